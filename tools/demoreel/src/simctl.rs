use crate::errors::DemoreelError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessRequest, ProcessRunner};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;

pub const BOOTED_STATE: &str = "Booted";

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceList {
    /// Runtime identifier -> devices available under that runtime.
    pub devices: BTreeMap<String, Vec<DeviceEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub state: String,
}

impl DeviceList {
    pub fn is_booted(&self, device_name: &str) -> bool {
        self.devices
            .values()
            .flatten()
            .any(|device| device.name == device_name && device.state == BOOTED_STATE)
    }
}

/// Client for the `xcrun simctl` device controller.
pub struct SimctlClient<'a> {
    runner: &'a dyn ProcessRunner,
    device: String,
}

impl<'a> SimctlClient<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, device: impl Into<String>) -> Self {
        Self {
            runner,
            device: device.into(),
        }
    }

    pub fn list_devices(&self) -> Result<DeviceList, DemoreelError> {
        let out = self.runner.run(ProcessRequest::new(
            "xcrun",
            &["simctl", "list", "devices", "--json"],
        ))?;
        if out.exit_code != 0 {
            return Err(DemoreelError::Process(format!(
                "simctl list devices failed: {}",
                out.stderr
            )));
        }
        serde_json::from_str(&out.stdout)
            .map_err(|e| DemoreelError::Process(format!("invalid simctl device list json: {e}")))
    }

    /// Whether a booted entry for the device exists right now. Probe failures
    /// degrade to `false`: the probe only optimizes away a boot command.
    ///
    /// Note the booted state is not re-checked between this call and a later
    /// `start_recording`; that gap matches the reference behavior.
    pub fn probe_booted(&self) -> bool {
        match self.list_devices() {
            Ok(list) => {
                let booted = list.is_booted(&self.device);
                if booted {
                    append_run_log(
                        "info",
                        "simctl.boot.skipped",
                        json!({"device": self.device}),
                    );
                }
                booted
            }
            Err(err) => {
                append_run_log(
                    "warn",
                    "simctl.list.failed",
                    json!({"device": self.device, "error": err.to_string()}),
                );
                false
            }
        }
    }

    /// Issues the boot command. Never fatal: the exit code is logged only,
    /// since booting may race with an already-in-flight boot from another
    /// process.
    pub fn boot(&self) {
        match self.runner.run(ProcessRequest::new(
            "xcrun",
            &["simctl", "boot", self.device.as_str()],
        )) {
            Ok(out) => {
                append_run_log(
                    "info",
                    "simctl.boot.finished",
                    json!({"device": self.device, "exit_code": out.exit_code}),
                );
            }
            Err(err) => {
                append_run_log(
                    "warn",
                    "simctl.boot.failed",
                    json!({"device": self.device, "error": err.to_string()}),
                );
            }
        }
    }

    /// Spawns the background screen recorder writing to `output`. The caller
    /// owns the returned handle; stop it via interrupt + wait.
    pub fn start_recording(&self, output: &Path) -> Result<u64, DemoreelError> {
        let output = output.display().to_string();
        let handle = self.runner.spawn(ProcessRequest::new(
            "xcrun",
            &["simctl", "io", "booted", "recordVideo", output.as_str()],
        ))?;
        append_run_log(
            "info",
            "simctl.recording.started",
            json!({"device": self.device, "output": output}),
        );
        Ok(handle)
    }
}
