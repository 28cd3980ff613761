use crate::errors::DemoreelError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessRequest, ProcessRunner};
use serde_json::json;
use std::path::Path;

/// Client for the external build/test runner.
pub struct XcodebuildClient<'a> {
    runner: &'a dyn ProcessRunner,
}

impl<'a> XcodebuildClient<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self { runner }
    }

    /// Runs one UI test synchronously with combined output streamed to
    /// `log_path`, keeping the orchestration console readable. Exit code zero
    /// maps to pass; any other exit code is a test-stage failure, not a
    /// process error.
    pub fn run_ui_test(
        &self,
        workspace: &str,
        scheme: &str,
        destination: &str,
        selector: &str,
        log_path: &Path,
    ) -> Result<bool, DemoreelError> {
        let mut request = ProcessRequest::new(
            "xcodebuild",
            &[
                "test",
                "-workspace",
                workspace,
                "-scheme",
                scheme,
                "-destination",
                destination,
            ],
        );
        request.args.push(format!("-only-testing:{selector}"));
        request.combined_log = Some(log_path.to_path_buf());

        let out = self.runner.run(request)?;
        let passed = out.exit_code == 0;
        append_run_log(
            if passed { "info" } else { "error" },
            "xcodebuild.test.finished",
            json!({
                "scheme": scheme,
                "selector": selector,
                "exit_code": out.exit_code,
                "log": log_path.display().to_string()
            }),
        );
        Ok(passed)
    }
}
