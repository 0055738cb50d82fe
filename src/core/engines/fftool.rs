//! FFTool Engine
//!
//! The classic external-process variant: one flat command-line invocation of
//! the conversion tool per job, stdout/stderr treated as an unstructured
//! diagnostic log. Progress comes from the `time=` clock markers ffmpeg
//! prints to stderr, mapped against the `Duration:` header from the same
//! stream. When neither appears, only start/end are reported. Exit code 0
//! is success; any nonzero exit is an error, never a warning.
//!
//! This engine also realizes AI upscaling by spawning the isolated runtime's
//! interpreter on the upscaler script and parsing its `progress=<n>` status
//! lines.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Engine, EngineError, EngineId, EngineResult};
use crate::core::ai::AiRuntime;
use crate::core::jobs::{Job, JobKind};
use crate::core::params::JobParams;

const STDERR_TAIL_LINES: usize = 40;

/// External command-line conversion engine
pub struct FfToolEngine {
    tool_path: PathBuf,
    ai: Option<Arc<dyn AiRuntime>>,
    kill_grace: Duration,
}

impl FfToolEngine {
    /// Creates an engine around the conversion tool binary.
    ///
    /// When an AI runtime is supplied, the engine also advertises the
    /// Upscale capability.
    pub fn new(tool_path: impl Into<PathBuf>, ai: Option<Arc<dyn AiRuntime>>) -> Self {
        Self {
            tool_path: tool_path.into(),
            ai,
            kill_grace: Duration::from_secs(2),
        }
    }

    /// Overrides the cancellation grace period.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    async fn run_media(
        &self,
        job: &Job,
        progress: mpsc::Sender<u8>,
        cancel: CancellationToken,
    ) -> EngineResult<()> {
        let args = build_tool_args(job);
        tracing::debug!(job_id = %job.id, ?args, "Spawning conversion tool");

        let mut child = tokio::process::Command::new(&self.tool_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Spawn {
                tool: self.tool_path.to_string_lossy().into_owned(),
                source: e,
            })?;

        let _ = progress.send(0).await;

        // stderr doubles as progress source and diagnostic log.
        let stderr_task = child.stderr.take().map(|stderr| {
            let tx = progress.clone();
            tokio::spawn(async move {
                let mut parser = ClockParser::new();
                let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(percent) = parser.push(&line) {
                        if tx.send(percent).await.is_err() {
                            break;
                        }
                    }
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let status = match self.wait_or_cancel(&mut child, &cancel).await? {
            Some(status) => status,
            None => {
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return Err(EngineError::Cancelled);
            }
        };

        let detail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(EngineError::ExitStatus {
                tool: self.tool_path.to_string_lossy().into_owned(),
                code: status.code().unwrap_or(-1),
                detail,
            });
        }

        let _ = progress.send(100).await;
        Ok(())
    }

    async fn run_upscale(
        &self,
        job: &Job,
        progress: mpsc::Sender<u8>,
        cancel: CancellationToken,
    ) -> EngineResult<()> {
        let ai = self
            .ai
            .as_ref()
            .ok_or(EngineError::NotSupported(JobKind::Upscale))?;
        let interpreter = ai.interpreter().ok_or(EngineError::EnvironmentNotReady)?;
        let script = ai
            .upscaler_script()
            .ok_or(EngineError::EnvironmentNotReady)?;

        let JobParams::Upscale(params) = &job.params else {
            return Err(EngineError::NotSupported(job.kind));
        };

        tracing::debug!(job_id = %job.id, scale = params.factor, "Spawning upscaler");

        let mut child = tokio::process::Command::new(&interpreter)
            .arg(&script)
            .arg("--input")
            .arg(&job.input)
            .arg("--output")
            .arg(&job.output)
            .arg("--scale")
            .arg(params.factor.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Spawn {
                tool: interpreter.to_string_lossy().into_owned(),
                source: e,
            })?;

        let _ = progress.send(0).await;

        // The script reports `progress=<n>` status lines on stdout.
        let progress_task = child.stdout.take().map(|stdout| {
            let tx = progress.clone();
            tokio::spawn(async move {
                let mut last = 0u8;
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(percent) = parse_progress_marker(&line) {
                        if percent > last {
                            last = percent;
                            if tx.send(percent).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            })
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let status = match self.wait_or_cancel(&mut child, &cancel).await? {
            Some(status) => status,
            None => {
                if let Some(task) = progress_task {
                    task.abort();
                }
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return Err(EngineError::Cancelled);
            }
        };

        if let Some(task) = progress_task {
            let _ = task.await;
        }
        let detail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(EngineError::ExitStatus {
                tool: "upscaler".to_string(),
                code: status.code().unwrap_or(-1),
                detail,
            });
        }

        let _ = progress.send(100).await;
        Ok(())
    }

    /// Waits for the child to exit. Once cancellation is observed, gives it a grace period and then force-terminates it. Returns `None`
    /// when the job was cancelled.
    async fn wait_or_cancel(
        &self,
        child: &mut tokio::process::Child,
        cancel: &CancellationToken,
    ) -> EngineResult<Option<std::process::ExitStatus>> {
        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        match waited {
            Some(status) => Ok(Some(status.map_err(EngineError::Process)?)),
            None => {
                if tokio::time::timeout(self.kill_grace, child.wait())
                    .await
                    .is_err()
                {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Engine for FfToolEngine {
    fn id(&self) -> EngineId {
        EngineId::Fftool
    }

    fn supports(&self, kind: JobKind) -> bool {
        match kind {
            JobKind::Upscale => self.ai.is_some(),
            _ => true,
        }
    }

    async fn run(
        &self,
        job: &Job,
        progress: mpsc::Sender<u8>,
        cancel: CancellationToken,
    ) -> EngineResult<()> {
        if !self.supports(job.kind) {
            return Err(EngineError::NotSupported(job.kind));
        }
        match job.kind {
            JobKind::Upscale => self.run_upscale(job, progress, cancel).await,
            _ => self.run_media(job, progress, cancel).await,
        }
    }
}

// =============================================================================
// Flat command line
// =============================================================================

/// Builds the flat argument list for a job.
///
/// Deliberately plainer than the default engine's graph: simple scale
/// filters, no pixel-format or quality-scale plumbing beyond what each kind
/// needs. Different engines legitimately produce different output
/// characteristics.
fn build_tool_args(job: &Job) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    match &job.params {
        JobParams::Transcode(p) => {
            args.extend(["-i".into(), path_arg(&job.input)]);
            args.extend(["-c:v".into(), codec_or_copy(&p.video_codec)]);
            if let Some(bitrate) = p.video_bitrate {
                args.extend(["-b:v".into(), bitrate.to_string()]);
            }
            if let (Some(width), Some(height)) = (p.width, p.height) {
                args.extend(["-s".into(), format!("{width}x{height}")]);
            }
            args.extend(["-c:a".into(), codec_or_copy(&p.audio_codec)]);
            if let Some(bitrate) = p.audio_bitrate {
                args.extend(["-b:a".into(), bitrate.to_string()]);
            }
        }
        JobParams::Remux(p) => {
            args.extend(["-i".into(), path_arg(&job.input)]);
            for stream in &p.streams {
                args.extend(["-map".into(), format!("0:{stream}")]);
            }
            args.extend(["-c".into(), "copy".into()]);
        }
        JobParams::Cut(p) => {
            args.extend(["-ss".into(), format!("{:.3}", p.start_sec)]);
            args.extend(["-i".into(), path_arg(&job.input)]);
            args.extend(["-t".into(), format!("{:.3}", p.end_sec - p.start_sec)]);
            args.extend(["-c:v".into(), codec_or_copy(&p.video_codec)]);
            args.extend(["-c:a".into(), codec_or_copy(&p.audio_codec)]);
        }
        JobParams::ExtractAudio(p) => {
            args.extend(["-i".into(), path_arg(&job.input)]);
            args.push("-vn".into());
            args.extend(["-c:a".into(), codec_or_copy(&p.audio_codec)]);
            if let Some(bitrate) = p.audio_bitrate {
                args.extend(["-b:a".into(), bitrate.to_string()]);
            }
        }
        JobParams::CreateGif(p) => {
            args.extend(["-ss".into(), format!("{:.3}", p.start_sec)]);
            args.extend(["-t".into(), format!("{:.3}", p.end_sec - p.start_sec)]);
            args.extend(["-i".into(), path_arg(&job.input)]);
            let mut filter = format!("fps={}", p.fps);
            if let Some(width) = p.width {
                filter.push_str(&format!(",scale={width}:-1"));
            }
            args.extend(["-vf".into(), filter]);
        }
        JobParams::CompressPicture(p) => {
            args.extend(["-i".into(), path_arg(&job.input)]);
            args.extend(["-q:v".into(), ((31 * (100 - p.quality.min(100) as u32)) / 100).max(2).to_string()]);
            args.extend(["-frames:v".into(), "1".into()]);
        }
        JobParams::Upscale(_) => {}
    }

    args.extend(["-y".into(), path_arg(&job.output)]);
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn codec_or_copy(codec: &Option<String>) -> String {
    codec.clone().unwrap_or_else(|| "copy".to_string())
}

// =============================================================================
// Status stream parsing
// =============================================================================

/// Incremental parser for ffmpeg's stderr clock markers.
///
/// Picks the total duration out of the `Duration: HH:MM:SS.ss` header and
/// maps subsequent `time=HH:MM:SS.ss` markers onto 0–100.
struct ClockParser {
    duration_re: Regex,
    time_re: Regex,
    duration_sec: Option<f64>,
    last_percent: u8,
}

impl ClockParser {
    fn new() -> Self {
        Self {
            duration_re: Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap(),
            time_re: Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap(),
            duration_sec: None,
            last_percent: 0,
        }
    }

    fn push(&mut self, line: &str) -> Option<u8> {
        if self.duration_sec.is_none() {
            if let Some(caps) = self.duration_re.captures(line) {
                self.duration_sec = hms_to_secs(&caps);
                return None;
            }
        }
        let duration = self.duration_sec?;
        if duration <= 0.0 {
            return None;
        }
        let caps = self.time_re.captures(line)?;
        let elapsed = hms_to_secs(&caps)?;
        let percent = ((elapsed / duration) * 100.0).min(100.0) as u8;
        if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}

fn hms_to_secs(caps: &regex::Captures<'_>) -> Option<f64> {
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parses one `progress=<n>` status line from the upscaler script.
fn parse_progress_marker(line: &str) -> Option<u8> {
    let value: u32 = line.trim().strip_prefix("progress=")?.trim().parse().ok()?;
    Some(value.min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::JobRequest;
    use crate::core::params::{RemuxParams, TranscodeParams};

    fn job(params: JobParams) -> Job {
        Job::from_request(JobRequest {
            kind: params.kind(),
            input: PathBuf::from("/media/in.mkv"),
            output: PathBuf::from("/media/out.mp4"),
            params,
        })
    }

    #[test]
    fn test_clock_parser_maps_time_against_duration() {
        let mut parser = ClockParser::new();

        assert_eq!(
            parser.push("Input #0, matroska, from '/media/in.mkv':"),
            None
        );
        assert_eq!(parser.push("  Duration: 00:00:20.00, start: 0.0"), None);
        assert_eq!(
            parser.push("frame=  120 fps= 30 time=00:00:05.00 bitrate=1500k"),
            Some(25)
        );
        // No re-emit for a non-advancing clock.
        assert_eq!(
            parser.push("frame=  121 fps= 30 time=00:00:05.00 bitrate=1500k"),
            None
        );
        assert_eq!(
            parser.push("frame=  480 fps= 30 time=00:00:20.00 bitrate=1500k"),
            Some(100)
        );
    }

    #[test]
    fn test_clock_parser_without_duration_stays_silent() {
        let mut parser = ClockParser::new();
        assert_eq!(parser.push("time=00:00:05.00"), None);
    }

    #[test]
    fn test_clock_parser_hours() {
        let mut parser = ClockParser::new();
        parser.push("Duration: 02:00:00.00");
        assert_eq!(parser.push("time=01:00:00.00"), Some(50));
    }

    #[test]
    fn test_progress_marker() {
        assert_eq!(parse_progress_marker("progress=42"), Some(42));
        assert_eq!(parse_progress_marker("  progress=100  "), Some(100));
        assert_eq!(parse_progress_marker("progress=250"), Some(100));
        assert_eq!(parse_progress_marker("loaded model"), None);
    }

    #[test]
    fn test_tool_args_end_with_overwrite_and_output() {
        let args = build_tool_args(&job(JobParams::Remux(RemuxParams { streams: vec![1] })));
        assert_eq!(args[args.len() - 2], "-y");
        assert_eq!(args[args.len() - 1], "/media/out.mp4");
        assert!(args.join(" ").contains("-map 0:1"));
    }

    #[test]
    fn test_tool_args_use_simple_size_flag() {
        let args = build_tool_args(&job(JobParams::Transcode(TranscodeParams {
            width: Some(640),
            height: Some(360),
            ..TranscodeParams::default()
        })));
        let joined = args.join(" ");
        assert!(joined.contains("-s 640x360"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_maps_to_error() {
        // `false` ignores its arguments and exits 1, so the exit-code contract
        // is testable without a real conversion tool.
        let engine = FfToolEngine::new("false", None);
        let (tx, mut rx) = mpsc::channel(32);
        let result = engine
            .run(
                &job(JobParams::Remux(RemuxParams { streams: vec![0] })),
                tx,
                CancellationToken::new(),
            )
            .await;

        match result {
            Err(EngineError::ExitStatus { code, .. }) => assert_ne!(code, 0),
            other => panic!("expected exit-status error, got {other:?}"),
        }
        // Only the initial 0 was reported.
        assert_eq!(rx.recv().await, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let engine = FfToolEngine::new("true", None);
        let (tx, mut rx) = mpsc::channel(32);
        let result = engine
            .run(
                &job(JobParams::Remux(RemuxParams { streams: vec![0] })),
                tx,
                CancellationToken::new(),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(rx.recv().await, Some(0));
        assert_eq!(rx.recv().await, Some(100));
    }

    #[tokio::test]
    async fn test_upscale_without_runtime_not_supported() {
        let engine = FfToolEngine::new("true", None);
        assert!(!engine.supports(JobKind::Upscale));
    }
}
