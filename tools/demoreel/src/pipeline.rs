use crate::artifacts::{purge, ArtifactSet};
use crate::config::AppConfig;
use crate::errors::DemoreelError;
use crate::logging::append_run_log;
use crate::media::{compute_trim_window, MediaProcessor};
use crate::recording::RecordingSession;
use crate::runtime::{Clock, FileSystem, ProcessRunner, Runtime, Terminal};
use crate::simctl::SimctlClient;
use crate::xcodebuild::XcodebuildClient;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Outcome of one independently-timed pipeline step, in real execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub name: String,
    pub succeeded: bool,
    pub elapsed_seconds: f64,
    pub log_path: Option<PathBuf>,
}

/// Sequences the demo capture: purge, boot, record, test, guaranteed stop,
/// then conditional post-processing. Owns total-run timing and the ordered
/// stage log.
pub struct Pipeline<'a> {
    config: &'a AppConfig,
    artifacts: ArtifactSet,
    clock: &'a dyn Clock,
    fs: &'a dyn FileSystem,
    runner: &'a dyn ProcessRunner,
    terminal: &'a dyn Terminal,
    stages: Vec<StageResult>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a AppConfig, runtime: &'a Runtime) -> Self {
        Self {
            config,
            artifacts: ArtifactSet::from_config(&config.artifacts),
            clock: runtime.clock.as_ref(),
            fs: runtime.file_system.as_ref(),
            runner: runtime.process_runner.as_ref(),
            terminal: runtime.terminal.as_ref(),
            stages: Vec::new(),
        }
    }

    pub fn artifacts(&self) -> &ArtifactSet {
        &self.artifacts
    }

    pub fn stages(&self) -> &[StageResult] {
        &self.stages
    }

    /// Runs the full pipeline and returns the process exit code: zero when
    /// every fatal stage succeeded, non-zero otherwise.
    pub fn run(&mut self) -> Result<i32, DemoreelError> {
        let run_start = self.clock.now();
        self.say("🔧\tStarting demo recording pipeline...")?;

        self.purge_stage(run_start)?;
        self.fs.create_dir_all(&self.config.artifacts.output_dir)?;
        self.boot_stage()?;

        let simctl = SimctlClient::new(self.runner, self.config.device.name.clone());

        // RECORD_START: a failure here aborts before the protected interval.
        self.say("🎥\tStarting screen recording...")?;
        let start_at = self.clock.now();
        let session = match RecordingSession::start(
            self.runner,
            self.clock,
            &simctl,
            &self.artifacts.raw_video,
            self.config.timing.recorder_ready_delay_seconds,
        ) {
            Ok(session) => session,
            Err(err) => {
                self.say(&format!("❌\tCould not start screen recording: {err}"))?;
                self.record("Start screen recording", false, start_at, None);
                self.summarize(run_start)?;
                return Err(err);
            }
        };
        let elapsed = self.record("Start screen recording", true, start_at, None);
        self.say(&format!(
            "\t✅\tScreen recording started (took {elapsed:.2} seconds)"
        ))?;

        // TEST_RUN: protected interval. Outcomes and terminal write errors
        // are both captured, never propagated with `?`, so RECORD_STOP below
        // runs on every path.
        let mut deferred_say = self
            .say(&format!(
                "🧪\tRun UI Test (output redirected to {})",
                self.artifacts.compile_log.display()
            ))
            .err();
        let test_at = self.clock.now();
        let xcodebuild = XcodebuildClient::new(self.runner);
        let test_outcome = xcodebuild.run_ui_test(
            &self.config.test.workspace,
            &self.config.test.scheme,
            &self.config.device.destination(),
            &self.config.test.selector,
            &self.artifacts.compile_log,
        );
        let compile_log = self.artifacts.compile_log.clone();
        let test_elapsed = self.record(
            "Run UI test",
            matches!(test_outcome, Ok(true)),
            test_at,
            Some(compile_log.as_path()),
        );

        // RECORD_STOP: always, and reported before the test verdict.
        if let Err(err) = self.say("🛑\tStopping screen recording...") {
            deferred_say.get_or_insert(err);
        }
        let stop_at = self.clock.now();
        let stop_outcome = session.stop();
        let stop_elapsed = self.record(
            "Stop screen recording",
            stop_outcome.is_ok(),
            stop_at,
            None,
        );
        if let Some(err) = deferred_say {
            // The terminal broke mid-interval; the recorder has been stopped
            // and both stage results recorded, so propagating is safe now.
            return Err(err);
        }
        match &stop_outcome {
            Ok(_) => self.say(&format!(
                "\t✅\tScreen recording stopped (took {stop_elapsed:.2} seconds)"
            ))?,
            Err(err) => self.say(&format!("\t❌\tCould not stop screen recording: {err}"))?,
        }

        let log = compile_log.display().to_string();
        let passed = match &test_outcome {
            Ok(true) => {
                self.say(&format!(
                    "\t✅\tStep completed: Run UI Test (took {test_elapsed:.2} seconds, see {log})"
                ))?;
                true
            }
            Ok(false) => {
                self.say(&format!("\t❌\tStep failed: Run UI Test (see {log})"))?;
                false
            }
            Err(err) => {
                self.say(&format!("\t❌\tStep failed: Run UI Test: {err}"))?;
                false
            }
        };

        if let Err(err) = stop_outcome {
            // Fatal for artifact integrity, but only after every collected
            // stage result has been reported.
            self.summarize(run_start)?;
            return Err(DemoreelError::Stage(format!(
                "failed to stop screen recording: {err}"
            )));
        }
        if !passed {
            self.summarize(run_start)?;
            if let Err(err) = test_outcome {
                return Err(err);
            }
            return Ok(1);
        }

        match self.post_process_stage() {
            Ok(true) => {
                self.say(&format!(
                    "🎉\tDemo recording completed! Video saved to {}",
                    self.artifacts.final_video.display()
                ))?;
                self.summarize(run_start)?;
                Ok(0)
            }
            Ok(false) => {
                self.summarize(run_start)?;
                Ok(1)
            }
            Err(err) => {
                self.summarize(run_start)?;
                Err(err)
            }
        }
    }

    fn purge_stage(&mut self, run_start: SystemTime) -> Result<(), DemoreelError> {
        let all = self.artifacts.all().map(Path::to_path_buf);
        let paths = all.iter().map(PathBuf::as_path).collect::<Vec<_>>();
        for event in purge(self.fs, &paths) {
            if event.removed {
                self.say(&format!(
                    "🧹\tRemoved previous output: {}",
                    event.path.display()
                ))?;
            } else {
                self.say(&format!(
                    "⚠️\tCould not remove {}: {}",
                    event.path.display(),
                    event.error.unwrap_or_default()
                ))?;
            }
        }
        self.record("Purge stale artifacts", true, run_start, None);
        Ok(())
    }

    fn boot_stage(&mut self) -> Result<(), DemoreelError> {
        let boot_at = self.clock.now();
        let simctl = SimctlClient::new(self.runner, self.config.device.name.clone());
        if simctl.probe_booted() {
            self.say(&format!(
                "📱\tSimulator '{}' is already booted. Skipping boot step.",
                self.config.device.name
            ))?;
        } else {
            // Announce the step before the boot command executes.
            self.say(&format!(
                "📱\tBoot iOS Simulator '{}'",
                self.config.device.name
            ))?;
            simctl.boot();
        }
        self.record("Boot simulator", true, boot_at, None);
        Ok(())
    }

    /// TRANSCODE and THUMBNAIL. Returns whether both fatal stages succeeded.
    fn post_process_stage(&mut self) -> Result<bool, DemoreelError> {
        let media = MediaProcessor::new(self.runner, &self.config.encode);

        let duration = media.probe_duration(&self.artifacts.raw_video);
        match duration {
            Some(seconds) => self.say(&format!("📐\tCapture duration: {seconds:.2} seconds"))?,
            None => self.say("⚠️\tCould not determine capture duration; skipping trim")?,
        }
        let trim = compute_trim_window(duration, &self.config.timing);

        self.say("🎬\tTranscoding demo video...")?;
        let transcode_at = self.clock.now();
        let transcode_log = self.artifacts.transcode_log.clone();
        let outcome = media.transcode(
            &self.artifacts.raw_video,
            trim,
            &self.artifacts.final_video,
            &transcode_log,
        );
        if !self.report_fatal_stage("Transcode demo video", outcome, transcode_at, &transcode_log)? {
            return Ok(false);
        }

        self.say("🖼\tExtracting thumbnail...")?;
        let thumbnail_at = self.clock.now();
        let thumbnail_log = self.artifacts.thumbnail_log.clone();
        let outcome = media.extract_thumbnail(
            &self.artifacts.final_video,
            self.config.timing.thumbnail_offset_seconds,
            &self.artifacts.thumbnail,
            &thumbnail_log,
        );
        self.report_fatal_stage("Extract thumbnail", outcome, thumbnail_at, &thumbnail_log)
    }

    fn report_fatal_stage(
        &mut self,
        name: &str,
        outcome: Result<bool, DemoreelError>,
        started: SystemTime,
        log: &Path,
    ) -> Result<bool, DemoreelError> {
        let succeeded = matches!(outcome, Ok(true));
        let elapsed = self.record(name, succeeded, started, Some(log));
        match outcome {
            Ok(true) => {
                self.say(&format!(
                    "\t✅\tStep completed: {name} (took {elapsed:.2} seconds, see {})",
                    log.display()
                ))?;
                Ok(true)
            }
            Ok(false) => {
                self.say(&format!(
                    "\t❌\tStep failed: {name} (see {})",
                    log.display()
                ))?;
                Ok(false)
            }
            Err(err) => {
                self.say(&format!("\t❌\tStep failed: {name}: {err}"))?;
                Err(err)
            }
        }
    }

    fn record(
        &mut self,
        name: &str,
        succeeded: bool,
        started: SystemTime,
        log_path: Option<&Path>,
    ) -> f64 {
        let elapsed_seconds = self.elapsed_since(started);
        append_run_log(
            if succeeded { "info" } else { "error" },
            "pipeline.stage.completed",
            json!({
                "stage": name,
                "succeeded": succeeded,
                "elapsed_seconds": elapsed_seconds
            }),
        );
        self.stages.push(StageResult {
            name: name.to_string(),
            succeeded,
            elapsed_seconds,
            log_path: log_path.map(Path::to_path_buf),
        });
        elapsed_seconds
    }

    fn summarize(&self, run_start: SystemTime) -> Result<(), DemoreelError> {
        for stage in &self.stages {
            let mark = if stage.succeeded { "✅" } else { "❌" };
            let mut line = format!("{mark}\t{} ({:.2}s)", stage.name, stage.elapsed_seconds);
            if let Some(log) = &stage.log_path {
                line.push_str(&format!(", see {}", log.display()));
            }
            self.say(&line)?;
        }
        self.say(&format!(
            "⏱\tTotal pipeline time: {:.2} seconds",
            self.elapsed_since(run_start)
        ))
    }

    fn elapsed_since(&self, started: SystemTime) -> f64 {
        self.clock
            .now()
            .duration_since(started)
            .unwrap_or_default()
            .as_secs_f64()
    }

    fn say(&self, line: &str) -> Result<(), DemoreelError> {
        self.terminal.write_line(line)
    }
}
