use crate::config::{EncodeConfig, TimingConfig};
use crate::errors::DemoreelError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessRequest, ProcessRunner};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

/// Seconds to drop from the head of the capture, and the usable length that
/// remains after the tail is dropped too.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimWindow {
    pub start_offset_seconds: f64,
    pub duration_seconds: f64,
}

/// Trim policy: always drop a fixed lead-in and trail-out, never let the trim
/// produce a non-positive length. Unknown or too-short captures pass through
/// untrimmed.
pub fn compute_trim_window(duration: Option<f64>, timing: &TimingConfig) -> Option<TrimWindow> {
    let total = duration?;
    if total < timing.min_trimmable_seconds() {
        return None;
    }
    let usable = total - timing.trim_lead_in_seconds - timing.trim_tail_seconds;
    if usable <= 0.0 {
        return None;
    }
    Some(TrimWindow {
        start_offset_seconds: timing.trim_lead_in_seconds,
        duration_seconds: usable,
    })
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Client for the external media inspector/transcoder pair.
pub struct MediaProcessor<'a> {
    runner: &'a dyn ProcessRunner,
    encode: &'a EncodeConfig,
}

impl<'a> MediaProcessor<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, encode: &'a EncodeConfig) -> Self {
        Self { runner, encode }
    }

    /// Container-level duration in seconds, or `None` when the probe fails or
    /// the field is missing. Never fatal; the trim decision degrades to
    /// "no trim".
    pub fn probe_duration(&self, video: &Path) -> Option<f64> {
        let video_arg = video.display().to_string();
        let out = match self.runner.run(ProcessRequest::new(
            "ffprobe",
            &[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "json",
                video_arg.as_str(),
            ],
        )) {
            Ok(out) => out,
            Err(err) => {
                append_run_log(
                    "warn",
                    "media.probe.failed",
                    json!({"video": video_arg, "error": err.to_string()}),
                );
                return None;
            }
        };
        if out.exit_code != 0 {
            append_run_log(
                "warn",
                "media.probe.failed",
                json!({"video": video_arg, "exit_code": out.exit_code, "stderr": out.stderr}),
            );
            return None;
        }
        let duration = serde_json::from_str::<ProbeOutput>(&out.stdout)
            .ok()
            .and_then(|probe| probe.format)
            .and_then(|format| format.duration)
            .and_then(|raw| raw.parse::<f64>().ok());
        if duration.is_none() {
            append_run_log(
                "warn",
                "media.probe.unparseable",
                json!({"video": video_arg, "stdout": out.stdout}),
            );
        }
        duration
    }

    /// Re-encodes the capture: audio stripped, scaled to the configured
    /// height with an even width, H.264 at the configured preset/quality.
    /// Applies the trim window when present. Non-zero exit is fatal for the
    /// pipeline; combined output lands in `log_path`.
    pub fn transcode(
        &self,
        input: &Path,
        trim: Option<TrimWindow>,
        output: &Path,
        log_path: &Path,
    ) -> Result<bool, DemoreelError> {
        let mut args = vec!["-y".to_string()];
        if let Some(window) = trim {
            args.push("-ss".to_string());
            args.push(format_seconds(window.start_offset_seconds));
            args.push("-t".to_string());
            args.push(format_seconds(window.duration_seconds));
        }
        args.push("-i".to_string());
        args.push(input.display().to_string());
        args.push("-an".to_string());
        args.push("-vf".to_string());
        args.push(format!("scale=-2:{}", self.encode.height));
        args.push("-c:v".to_string());
        args.push(self.encode.codec.clone());
        args.push("-preset".to_string());
        args.push(self.encode.preset.clone());
        args.push("-crf".to_string());
        args.push(self.encode.crf.to_string());
        args.push(output.display().to_string());

        self.run_ffmpeg("media.transcode.finished", args, log_path)
    }

    /// Grabs exactly one frame at `offset_seconds` of the post-trim video.
    pub fn extract_thumbnail(
        &self,
        final_video: &Path,
        offset_seconds: f64,
        output: &Path,
        log_path: &Path,
    ) -> Result<bool, DemoreelError> {
        let args = vec![
            "-y".to_string(),
            "-ss".to_string(),
            format_seconds(offset_seconds),
            "-i".to_string(),
            final_video.display().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            output.display().to_string(),
        ];
        self.run_ffmpeg("media.thumbnail.finished", args, log_path)
    }

    fn run_ffmpeg(
        &self,
        event_type: &str,
        args: Vec<String>,
        log_path: &Path,
    ) -> Result<bool, DemoreelError> {
        let request = ProcessRequest {
            program: "ffmpeg".to_string(),
            args,
            cwd: None,
            combined_log: Some(log_path.to_path_buf()),
        };
        let out = self.runner.run(request)?;
        let succeeded = out.exit_code == 0;
        append_run_log(
            if succeeded { "info" } else { "error" },
            event_type,
            json!({"exit_code": out.exit_code, "log": log_path.display().to_string()}),
        );
        Ok(succeeded)
    }
}

fn format_seconds(value: f64) -> String {
    // 7.0 renders as "7", 7.5 as "7.5"; ffmpeg accepts both.
    format!("{value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeProcessRunner;
    use std::path::PathBuf;

    fn timing() -> TimingConfig {
        TimingConfig::default()
    }

    #[test]
    fn trim_window_is_absent_for_unknown_or_short_captures() {
        assert_eq!(compute_trim_window(None, &timing()), None);
        assert_eq!(compute_trim_window(Some(0.0), &timing()), None);
        assert_eq!(compute_trim_window(Some(7.9), &timing()), None);
    }

    #[test]
    fn trim_window_drops_lead_in_and_tail() {
        let window = compute_trim_window(Some(20.0), &timing()).expect("trim");
        assert_eq!(window.start_offset_seconds, 7.0);
        assert_eq!(window.duration_seconds, 12.0);
    }

    #[test]
    fn non_positive_usable_length_clamps_to_no_trim() {
        assert_eq!(compute_trim_window(Some(8.0), &timing()), None);
    }

    #[test]
    fn probe_parses_container_duration() {
        let runner = FakeProcessRunner::default();
        runner.push_exit(0, r#"{"format":{"duration":"20.000000"}}"#);

        let encode = EncodeConfig::default();
        let media = MediaProcessor::new(&runner, &encode);
        assert_eq!(media.probe_duration(Path::new("raw.mp4")), Some(20.0));

        let spawned = runner.spawned();
        assert_eq!(spawned[0].program, "ffprobe");
        assert!(spawned[0].args.contains(&"format=duration".to_string()));
    }

    #[test]
    fn probe_failures_yield_unknown_duration() {
        let runner = FakeProcessRunner::default();
        runner.push_exit(0, "not json");
        runner.push_exit(1, "");
        runner.push_exit(0, r#"{"format":{}}"#);

        let encode = EncodeConfig::default();
        let media = MediaProcessor::new(&runner, &encode);
        assert_eq!(media.probe_duration(Path::new("raw.mp4")), None);
        assert_eq!(media.probe_duration(Path::new("raw.mp4")), None);
        assert_eq!(media.probe_duration(Path::new("raw.mp4")), None);
    }

    #[test]
    fn transcode_applies_trim_flags_and_encode_settings() {
        let runner = FakeProcessRunner::default();
        runner.push_exit(0, "");

        let encode = EncodeConfig::default();
        let media = MediaProcessor::new(&runner, &encode);
        let window = TrimWindow {
            start_offset_seconds: 7.0,
            duration_seconds: 12.0,
        };
        let ok = media
            .transcode(
                Path::new("raw.mp4"),
                Some(window),
                Path::new("demo.mp4"),
                Path::new("transcode.log"),
            )
            .expect("transcode");
        assert!(ok);

        let request = &runner.spawned()[0];
        assert_eq!(request.program, "ffmpeg");
        assert_eq!(request.combined_log, Some(PathBuf::from("transcode.log")));
        let args = request.args.join(" ");
        assert!(args.contains("-ss 7 -t 12"));
        assert!(args.contains("-an"));
        assert!(args.contains("scale=-2:1024"));
        assert!(args.contains("-c:v libx264 -preset fast -crf 23"));
    }

    #[test]
    fn transcode_without_window_has_no_trim_flags() {
        let runner = FakeProcessRunner::default();
        runner.push_exit(0, "");

        let encode = EncodeConfig::default();
        let media = MediaProcessor::new(&runner, &encode);
        media
            .transcode(
                Path::new("raw.mp4"),
                None,
                Path::new("demo.mp4"),
                Path::new("transcode.log"),
            )
            .expect("transcode");

        let args = &runner.spawned()[0].args;
        assert!(!args.contains(&"-ss".to_string()));
        assert!(!args.contains(&"-t".to_string()));
    }

    #[test]
    fn thumbnail_grabs_one_frame_at_the_fixed_offset() {
        let runner = FakeProcessRunner::default();
        runner.push_exit(0, "");

        let encode = EncodeConfig::default();
        let media = MediaProcessor::new(&runner, &encode);
        let ok = media
            .extract_thumbnail(
                Path::new("demo.mp4"),
                13.0,
                Path::new("demo_thumbnail.png"),
                Path::new("thumbnail.log"),
            )
            .expect("thumbnail");
        assert!(ok);

        let args = runner.spawned()[0].args.join(" ");
        assert!(args.contains("-ss 13 -i demo.mp4 -frames:v 1 demo_thumbnail.png"));
    }
}
