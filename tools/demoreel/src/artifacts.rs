use crate::config::ArtifactsConfig;
use crate::logging::append_run_log;
use crate::runtime::FileSystem;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Fixed output/log paths for one run. Each file is written by exactly one
/// stage; identities never change mid-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub raw_video: PathBuf,
    pub final_video: PathBuf,
    pub thumbnail: PathBuf,
    pub compile_log: PathBuf,
    pub transcode_log: PathBuf,
    pub thumbnail_log: PathBuf,
}

impl ArtifactSet {
    pub fn from_config(config: &ArtifactsConfig) -> Self {
        let dir = &config.output_dir;
        Self {
            raw_video: dir.join(&config.raw_video),
            final_video: dir.join(&config.final_video),
            thumbnail: dir.join(&config.thumbnail),
            compile_log: dir.join(&config.compile_log),
            transcode_log: dir.join(&config.transcode_log),
            thumbnail_log: dir.join(&config.thumbnail_log),
        }
    }

    pub fn all(&self) -> [&Path; 6] {
        [
            &self.raw_video,
            &self.final_video,
            &self.thumbnail,
            &self.compile_log,
            &self.transcode_log,
            &self.thumbnail_log,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeEvent {
    pub path: PathBuf,
    pub removed: bool,
    pub error: Option<String>,
}

/// Deletes leftovers of a previous run. Missing paths are skipped, failed
/// deletions are reported as warnings; never aborts.
pub fn purge(fs: &dyn FileSystem, paths: &[&Path]) -> Vec<PurgeEvent> {
    let mut events = Vec::new();
    for path in paths {
        if !fs.exists(path) {
            continue;
        }
        let result = if fs.is_dir(path) {
            fs.remove_dir_all(path)
        } else {
            fs.remove_file(path)
        };
        match result {
            Ok(()) => {
                append_run_log(
                    "info",
                    "artifacts.purge.removed",
                    json!({"path": path.display().to_string()}),
                );
                events.push(PurgeEvent {
                    path: path.to_path_buf(),
                    removed: true,
                    error: None,
                });
            }
            Err(err) => {
                append_run_log(
                    "warn",
                    "artifacts.purge.failed",
                    json!({"path": path.display().to_string(), "error": err.to_string()}),
                );
                events.push(PurgeEvent {
                    path: path.to_path_buf(),
                    removed: false,
                    error: Some(err.to_string()),
                });
            }
        }
    }
    events
}
