pub mod artifacts;
pub mod config;
pub mod errors;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod recording;
pub mod runtime;
pub mod simctl;
pub mod xcodebuild;

use clap::error::ErrorKind;
use clap::Parser;
use config::{load_config, CliOverrides};
use errors::DemoreelError;
use pipeline::Pipeline;
use runtime::Runtime;
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "demoreel")]
#[command(about = "Record a demo video of a UI test on the iOS Simulator")]
pub struct Cli {
    /// Path to a TOML config file (defaults to demoreel.toml when present).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Simulator device name.
    #[arg(long)]
    pub device: Option<String>,
    /// Xcode workspace path.
    #[arg(long)]
    pub workspace: Option<String>,
    /// Scheme to build and test.
    #[arg(long)]
    pub scheme: Option<String>,
    /// Fully-qualified test selector, <Target>/<TestCaseName>.
    #[arg(long = "test")]
    pub selector: Option<String>,
    /// Directory receiving videos, the thumbnail, and stage logs.
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,
}

impl From<Cli> for CliOverrides {
    fn from(cli: Cli) -> Self {
        Self {
            config_path: cli.config,
            device: cli.device,
            workspace: cli.workspace,
            scheme: cli.scheme,
            selector: cli.selector,
            output_dir: cli.output_dir,
        }
    }
}

pub fn run() -> Result<i32, DemoreelError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let runtime = Runtime::production();
    run_with_args(&args, &runtime)
}

pub fn run_with_args(args: &[OsString], runtime: &Runtime) -> Result<i32, DemoreelError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            runtime.terminal.write_line(&err.to_string())?;
            return Ok(0);
        }
        Err(err) => return Err(DemoreelError::Cli(err.to_string())),
    };
    let overrides = CliOverrides::from(cli);
    let config = load_config(runtime.file_system.as_ref(), &overrides)?;
    let mut pipeline = Pipeline::new(&config, runtime);
    pipeline.run()
}
