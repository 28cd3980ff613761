use assert_cmd::cargo::cargo_bin_cmd;

#[test]
fn help_lists_pipeline_flags() {
    let mut cmd = cargo_bin_cmd!("demoreel");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("--device"));
    assert!(stdout.contains("--scheme"));
    assert!(stdout.contains("--output-dir"));
}

#[test]
fn missing_config_path_exits_nonzero_before_spawning_anything() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("demoreel");
    cmd.current_dir(temp.path())
        .arg("--config")
        .arg("missing.toml");
    cmd.assert().failure();
}

#[test]
fn invalid_config_values_exit_nonzero() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("demoreel.toml"), "[encode]\ncrf = 99\n").expect("write");
    let mut cmd = cargo_bin_cmd!("demoreel");
    cmd.current_dir(temp.path());
    cmd.assert().failure();
}
