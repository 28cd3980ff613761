use crate::errors::DemoreelError;
use crate::logging::append_run_log;
use crate::runtime::{Clock, ProcessOutput, ProcessRunner};
use crate::simctl::SimctlClient;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

/// Live handle to the background screen recorder. Exactly one session is
/// active at a time; `stop` consumes the session so it can only run once.
/// If the protected interval unwinds instead, `Drop` delivers a best-effort
/// interrupt so the recorder does not outlive the run.
pub struct RecordingSession<'a> {
    runner: &'a dyn ProcessRunner,
    handle: Option<u64>,
}

impl<'a> RecordingSession<'a> {
    /// Spawns the recorder and blocks for a fixed short delay so the external
    /// process reaches a ready state before the caller proceeds.
    pub fn start(
        runner: &'a dyn ProcessRunner,
        clock: &dyn Clock,
        client: &SimctlClient<'a>,
        output: &Path,
        ready_delay_seconds: f64,
    ) -> Result<Self, DemoreelError> {
        let handle = client.start_recording(output)?;
        let deadline = clock.now() + Duration::from_secs_f64(ready_delay_seconds);
        clock.sleep_until(deadline)?;
        Ok(Self {
            runner,
            handle: Some(handle),
        })
    }

    /// Graceful interrupt followed by a blocking wait for recorder exit.
    pub fn stop(mut self) -> Result<ProcessOutput, DemoreelError> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| DemoreelError::Process("recording already stopped".to_string()))?;
        self.runner.interrupt(handle)?;
        let out = self.runner.wait(handle)?;
        append_run_log(
            "info",
            "recording.stopped",
            json!({"exit_code": out.exit_code}),
        );
        Ok(out)
    }
}

impl Drop for RecordingSession<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            append_run_log("warn", "recording.abandoned", json!({"handle": handle}));
            let _ = self.runner.interrupt(handle);
        }
    }
}
