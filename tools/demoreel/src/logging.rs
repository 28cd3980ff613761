use crate::errors::DemoreelError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const RUN_LOG_PATH: &str = "demoreel_run.jsonl";
pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), DemoreelError> {
        let parent = log_parent(&self.path);
        if let Some(parent) = &parent {
            fs::create_dir_all(parent).map_err(|e| DemoreelError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| DemoreelError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DemoreelError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| DemoreelError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| DemoreelError::Io(e.to_string()))?;

        if let Some(parent) = &parent {
            enforce_total_budget(parent, self.budget_bytes)?;
        }

        Ok(())
    }
}

/// Resolves the run log destination; `DEMOREEL_RUN_LOG` overrides the
/// default working-directory file.
pub fn run_log_path() -> PathBuf {
    std::env::var_os("DEMOREEL_RUN_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(RUN_LOG_PATH))
}

/// Best-effort structured run log. Pipeline progress never depends on it, so
/// append failures are swallowed.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let logger = JsonlLogger::new(run_log_path());
    let _ = logger.append(&LogEvent {
        level,
        event_type,
        payload,
    });
}

/// Directory the budget is enforced over. A bare file name lives in the
/// current directory, so the parent resolves to `.` rather than nothing.
fn log_parent(path: &Path) -> Option<PathBuf> {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Some(PathBuf::from(".")),
        Some(parent) => Some(parent.to_path_buf()),
        None => None,
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut truncated = rendered;
    truncated.truncate(max_bytes.saturating_sub(3));
    Value::String(format!("{truncated}..."))
}

/// Prunes the oldest `.jsonl` files in `dir` until their combined size fits
/// the budget. Only log files count against the budget; the directory may be
/// the working directory, which holds unrelated project files.
fn enforce_total_budget(dir: &Path, budget_bytes: u64) -> Result<Vec<PathBuf>, DemoreelError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| DemoreelError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect::<Vec<_>>();

    files.sort_by(|a, b| {
        let ma = fs::metadata(a).ok().and_then(|m| m.modified().ok());
        let mb = fs::metadata(b).ok().and_then(|m| m.modified().ok());
        ma.cmp(&mb)
    });

    let mut total = files
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();

    let mut deleted = Vec::new();
    for path in files {
        if total <= budget_bytes {
            break;
        }
        let len = fs::metadata(&path)
            .map_err(|e| DemoreelError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| DemoreelError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}
