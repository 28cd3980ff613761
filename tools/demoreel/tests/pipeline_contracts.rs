use demoreel::errors::DemoreelError;
use demoreel::run_with_args;
use demoreel::runtime::{
    FakeClock, FakeFileSystem, FakeProcessRunner, FakeTerminal, ProcessRequest, Runtime,
};
use std::ffi::OsString;
use std::sync::Arc;

const BOOTED_LIST: &str =
    r#"{"devices":{"com.apple.CoreSimulator.SimRuntime.iOS-18-0":[{"name":"iPhone 16","state":"Booted"}]}}"#;

fn argv() -> Vec<OsString> {
    vec![OsString::from("demoreel")]
}

fn fake_runtime(runner: &FakeProcessRunner, terminal: &FakeTerminal) -> Runtime {
    let log_dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var("DEMOREEL_RUN_LOG", log_dir.keep().join("run.jsonl"));
    Runtime {
        clock: Arc::new(FakeClock::default()),
        file_system: Arc::new(FakeFileSystem::default()),
        process_runner: Arc::new(runner.clone()),
        terminal: Arc::new(terminal.clone()),
    }
}

fn request_index(spawned: &[ProcessRequest], needle: &str) -> usize {
    spawned
        .iter()
        .position(|r| r.args.join(" ").contains(needle) || r.program.contains(needle))
        .unwrap_or_else(|| panic!("no spawned request matching {needle:?}"))
}

fn line_index(lines: &[String], needle: &str) -> usize {
    lines
        .iter()
        .position(|l| l.contains(needle))
        .unwrap_or_else(|| panic!("no terminal line matching {needle:?}"))
}

#[test]
fn scenario_a_trims_and_thumbnails_a_twenty_second_capture() {
    let runner = FakeProcessRunner::default();
    runner.push_exit(0, BOOTED_LIST); // simctl list
    runner.push_exit(0, ""); // xcodebuild test
    runner.push_exit(0, ""); // recorder after interrupt
    runner.push_exit(0, r#"{"format":{"duration":"20.000000"}}"#); // ffprobe
    runner.push_exit(0, ""); // ffmpeg transcode
    runner.push_exit(0, ""); // ffmpeg thumbnail

    let terminal = FakeTerminal::default();
    let runtime = fake_runtime(&runner, &terminal);
    let code = run_with_args(&argv(), &runtime).expect("pipeline");
    assert_eq!(code, 0);

    let spawned = runner.spawned();
    let recorder = request_index(&spawned, "recordVideo");
    let test = request_index(&spawned, "xcodebuild");
    assert!(recorder < test, "recording must start before the test runs");

    let transcode = spawned[request_index(&spawned, "-c:v")].args.join(" ");
    assert!(transcode.contains("-ss 7 -t 12"), "got: {transcode}");
    assert!(transcode.contains("-an"));
    assert!(transcode.contains("scale=-2:1024"));

    let thumbnail = spawned[request_index(&spawned, "-frames:v")].args.join(" ");
    assert!(thumbnail.contains("-ss 13"), "got: {thumbnail}");
    assert!(
        thumbnail.contains("demo.mp4"),
        "thumbnail reads the post-trim video: {thumbnail}"
    );

    assert_eq!(runner.interrupts().len(), 1, "recorder stopped exactly once");

    let lines = terminal.written_lines();
    assert!(
        line_index(&lines, "Stopping screen recording")
            < line_index(&lines, "Transcoding demo video")
    );
    assert!(lines.iter().any(|l| l.contains("Demo recording completed")));
}

#[test]
fn scenario_b_failed_test_still_stops_recording_and_skips_post_processing() {
    let runner = FakeProcessRunner::default();
    runner.push_exit(0, BOOTED_LIST); // simctl list
    runner.push_exit(65, ""); // xcodebuild test fails
    runner.push_exit(0, ""); // recorder after interrupt

    let terminal = FakeTerminal::default();
    let runtime = fake_runtime(&runner, &terminal);
    let code = run_with_args(&argv(), &runtime).expect("pipeline");
    assert_ne!(code, 0);

    assert_eq!(runner.interrupts().len(), 1, "recorder stopped exactly once");
    let spawned = runner.spawned();
    assert!(
        !spawned
            .iter()
            .any(|r| r.program == "ffprobe" || r.program == "ffmpeg"),
        "no post-processing after a failed test"
    );

    // The operator sees the stop confirmation before the test verdict.
    let lines = terminal.written_lines();
    assert!(
        line_index(&lines, "Screen recording stopped")
            < line_index(&lines, "Step failed: Run UI Test")
    );
    assert!(lines.iter().any(|l| l.contains("Run UI test (0.00s)")));
}

#[test]
fn scenario_c_unknown_duration_transcodes_without_trim_flags() {
    let runner = FakeProcessRunner::default();
    runner.push_exit(0, BOOTED_LIST); // simctl list
    runner.push_exit(0, ""); // xcodebuild test
    runner.push_exit(0, ""); // recorder after interrupt
    runner.push_exit(0, "garbage"); // ffprobe emits malformed output
    runner.push_exit(0, ""); // ffmpeg transcode
    runner.push_exit(0, ""); // ffmpeg thumbnail

    let terminal = FakeTerminal::default();
    let runtime = fake_runtime(&runner, &terminal);
    let code = run_with_args(&argv(), &runtime).expect("pipeline");
    assert_eq!(code, 0);

    let spawned = runner.spawned();
    let transcode = &spawned[request_index(&spawned, "-c:v")].args;
    assert!(!transcode.contains(&"-ss".to_string()));
    assert!(!transcode.contains(&"-t".to_string()));

    let lines = terminal.written_lines();
    assert!(lines
        .iter()
        .any(|l| l.contains("Could not determine capture duration")));
}

#[test]
fn recording_is_stopped_even_when_the_test_stage_errors() {
    let runner = FakeProcessRunner::default();
    runner.push_exit(0, BOOTED_LIST); // simctl list
    runner.push_response(Err(DemoreelError::Process(
        "xcodebuild went missing".to_string(),
    ))); // xcodebuild cannot run at all
    runner.push_exit(0, ""); // recorder after interrupt

    let terminal = FakeTerminal::default();
    let runtime = fake_runtime(&runner, &terminal);
    let err = run_with_args(&argv(), &runtime).expect_err("test stage error propagates");
    assert!(matches!(err, DemoreelError::Process(message) if message.contains("xcodebuild")));

    assert_eq!(runner.interrupts().len(), 1, "stop still paired with start");
    let lines = terminal.written_lines();
    assert!(
        line_index(&lines, "Screen recording stopped")
            < line_index(&lines, "Step failed: Run UI Test")
    );
}

#[test]
fn broken_terminal_mid_test_still_waits_for_the_recorder() {
    let runner = FakeProcessRunner::default();
    runner.push_exit(0, BOOTED_LIST); // simctl list
    runner.push_exit(0, ""); // xcodebuild test
    runner.push_exit(0, ""); // recorder after interrupt

    let terminal = FakeTerminal::default();
    terminal.fail_on_line_containing("output redirected");

    let runtime = fake_runtime(&runner, &terminal);
    let err = run_with_args(&argv(), &runtime).expect_err("terminal error surfaces");
    assert!(matches!(err, DemoreelError::Io(_)), "got: {err:?}");

    // The recorder was interrupted and fully reaped before the terminal
    // error propagated; a bare drop would interrupt without waiting.
    assert_eq!(runner.interrupts(), vec![1], "recorder stopped exactly once");
    assert!(
        runner.waits().contains(&1),
        "recorder handle must be waited on, got: {:?}",
        runner.waits()
    );
}

#[test]
fn stop_failure_is_fatal_after_the_full_summary() {
    let runner = FakeProcessRunner::default();
    runner.push_exit(0, BOOTED_LIST); // simctl list
    runner.push_exit(0, ""); // xcodebuild test passes
    runner.push_response(Err(DemoreelError::Process("recorder hung".to_string()))); // recorder reap fails

    let terminal = FakeTerminal::default();
    let runtime = fake_runtime(&runner, &terminal);
    let err = run_with_args(&argv(), &runtime).expect_err("stop failure is fatal");
    assert!(
        matches!(&err, DemoreelError::Stage(message) if message.contains("stop")),
        "got: {err:?}"
    );

    let spawned = runner.spawned();
    assert!(
        !spawned
            .iter()
            .any(|r| r.program == "ffprobe" || r.program == "ffmpeg"),
        "no post-processing when the raw capture may be incomplete"
    );

    // Every collected outcome is still reported: the test verdict and the
    // full stage summary precede the fatal error.
    let lines = terminal.written_lines();
    assert!(
        line_index(&lines, "Could not stop screen recording")
            < line_index(&lines, "Step completed: Run UI Test")
    );
    assert!(lines.iter().any(|l| l.contains("Stop screen recording (0.00s)")));
    assert!(lines.iter().any(|l| l.contains("Total pipeline time")));
}

#[test]
fn boot_announcement_precedes_the_boot_command() {
    let shutdown_list =
        r#"{"devices":{"com.apple.CoreSimulator.SimRuntime.iOS-18-0":[{"name":"iPhone 16","state":"Shutdown"}]}}"#;
    let runner = FakeProcessRunner::default();
    runner.push_exit(0, shutdown_list); // simctl list

    let terminal = FakeTerminal::default();
    terminal.fail_on_line_containing("Boot iOS Simulator");

    let runtime = fake_runtime(&runner, &terminal);
    let err = run_with_args(&argv(), &runtime).expect_err("announcement failure aborts");
    assert!(matches!(err, DemoreelError::Io(_)), "got: {err:?}");

    // The announcement failed, so the boot command never ran.
    let spawned = runner.spawned();
    assert!(
        !spawned.iter().any(|r| r.args.contains(&"boot".to_string())),
        "boot must not run before its announcement, got: {spawned:?}"
    );
}

#[test]
fn unbooted_device_is_booted_before_recording_starts() {
    let shutdown_list =
        r#"{"devices":{"com.apple.CoreSimulator.SimRuntime.iOS-18-0":[{"name":"iPhone 16","state":"Shutdown"}]}}"#;
    let runner = FakeProcessRunner::default();
    runner.push_exit(0, shutdown_list); // simctl list
    runner.push_exit(0, ""); // simctl boot
    runner.push_exit(65, ""); // xcodebuild test fails, keeps the run short
    runner.push_exit(0, ""); // recorder after interrupt

    let terminal = FakeTerminal::default();
    let runtime = fake_runtime(&runner, &terminal);
    let code = run_with_args(&argv(), &runtime).expect("pipeline");
    assert_ne!(code, 0);

    let spawned = runner.spawned();
    let boot = request_index(&spawned, "boot");
    let recorder = request_index(&spawned, "recordVideo");
    assert!(boot < recorder);
}

#[test]
fn transcode_failure_is_fatal_and_names_its_log() {
    let runner = FakeProcessRunner::default();
    runner.push_exit(0, BOOTED_LIST); // simctl list
    runner.push_exit(0, ""); // xcodebuild test
    runner.push_exit(0, ""); // recorder after interrupt
    runner.push_exit(0, r#"{"format":{"duration":"20.0"}}"#); // ffprobe
    runner.push_exit(1, ""); // ffmpeg transcode fails

    let terminal = FakeTerminal::default();
    let runtime = fake_runtime(&runner, &terminal);
    let code = run_with_args(&argv(), &runtime).expect("pipeline");
    assert_ne!(code, 0);

    let spawned = runner.spawned();
    assert!(
        !spawned.iter().any(|r| r.args.contains(&"-frames:v".to_string())),
        "no thumbnail extraction after a failed transcode"
    );
    let lines = terminal.written_lines();
    assert!(lines
        .iter()
        .any(|l| l.contains("Step failed: Transcode demo video") && l.contains("transcode.log")));
}
