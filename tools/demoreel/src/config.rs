use crate::errors::DemoreelError;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "demoreel.toml";

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub device: Option<String>,
    pub workspace: Option<String>,
    pub scheme: Option<String>,
    pub selector: Option<String>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub test: TestConfig,
    pub artifacts: ArtifactsConfig,
    pub timing: TimingConfig,
    pub encode: EncodeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    pub platform: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "iPhone 16".to_string(),
            platform: "iOS Simulator".to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn destination(&self) -> String {
        format!("platform={},name={}", self.platform, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestConfig {
    pub workspace: String,
    pub scheme: String,
    /// Fully-qualified test selector, `<Target>/<TestCaseName>`.
    pub selector: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            workspace: "RickAndMorty.xcworkspace".to_string(),
            scheme: "RickAndMortyApp".to_string(),
            selector: "RickAndMortyAppUITests/testDemo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub output_dir: PathBuf,
    pub raw_video: String,
    pub final_video: String,
    pub thumbnail: String,
    pub compile_log: String,
    pub transcode_log: String,
    pub thumbnail_log: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            raw_video: "raw_demo_recording.mp4".to_string(),
            final_video: "demo.mp4".to_string(),
            thumbnail: "demo_thumbnail.png".to_string(),
            compile_log: "record_demo_compilation.log".to_string(),
            transcode_log: "transcode.log".to_string(),
            thumbnail_log: "thumbnail.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause after spawning the recorder so it reaches a ready state.
    pub recorder_ready_delay_seconds: f64,
    pub trim_lead_in_seconds: f64,
    pub trim_tail_seconds: f64,
    pub thumbnail_offset_seconds: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            recorder_ready_delay_seconds: 1.0,
            trim_lead_in_seconds: 7.0,
            trim_tail_seconds: 1.0,
            thumbnail_offset_seconds: 13.0,
        }
    }
}

impl TimingConfig {
    /// Captures shorter than this are passed through without a trim window.
    pub fn min_trimmable_seconds(&self) -> f64 {
        self.trim_lead_in_seconds + self.trim_tail_seconds
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EncodeConfig {
    pub height: u32,
    pub codec: String,
    pub preset: String,
    pub crf: u32,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            height: 1024,
            codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 23,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), DemoreelError> {
        for (field, value) in [
            (
                "timing.recorder_ready_delay_seconds",
                self.timing.recorder_ready_delay_seconds,
            ),
            ("timing.trim_lead_in_seconds", self.timing.trim_lead_in_seconds),
            ("timing.trim_tail_seconds", self.timing.trim_tail_seconds),
            (
                "timing.thumbnail_offset_seconds",
                self.timing.thumbnail_offset_seconds,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(DemoreelError::InvalidConfig(format!(
                    "{field} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.encode.height == 0 {
            return Err(DemoreelError::InvalidConfig(
                "encode.height must be positive".to_string(),
            ));
        }
        if self.encode.crf > 51 {
            return Err(DemoreelError::InvalidConfig(format!(
                "encode.crf must be in 0..=51, got {}",
                self.encode.crf
            )));
        }
        if self.device.name.trim().is_empty() {
            return Err(DemoreelError::InvalidConfig(
                "device.name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn load_config(
    fs: &dyn FileSystem,
    overrides: &CliOverrides,
) -> Result<AppConfig, DemoreelError> {
    let mut config = match &overrides.config_path {
        Some(path) => parse_config(&fs.read_to_string(path)?)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if fs.exists(default_path) {
                parse_config(&fs.read_to_string(default_path)?)?
            } else {
                AppConfig::default()
            }
        }
    };

    if let Some(device) = &overrides.device {
        config.device.name = device.clone();
    }
    if let Some(workspace) = &overrides.workspace {
        config.test.workspace = workspace.clone();
    }
    if let Some(scheme) = &overrides.scheme {
        config.test.scheme = scheme.clone();
    }
    if let Some(selector) = &overrides.selector {
        config.test.selector = selector.clone();
    }
    if let Some(output_dir) = &overrides.output_dir {
        config.artifacts.output_dir = output_dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str) -> Result<AppConfig, DemoreelError> {
    toml::from_str(contents).map_err(|e| DemoreelError::ConfigParse(e.to_string()))
}
