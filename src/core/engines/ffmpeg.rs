//! FFmpeg Engine
//!
//! The default conversion engine. Drives the ffmpeg executable through its
//! machine-readable control surface: a per-kind argument graph, the
//! `-progress pipe:1` key/value stream on stdout, and stderr captured as a
//! diagnostic tail. Media duration for percent mapping comes from an ffprobe
//! JSON probe.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Engine, EngineError, EngineId, EngineResult};
use crate::core::jobs::{Job, JobKind};
use crate::core::params::JobParams;

/// Lines of stderr kept for error reporting
const STDERR_TAIL_LINES: usize = 40;

/// FFmpeg-driven conversion engine
pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    /// How long a cancelled child may keep running before it is killed
    kill_grace: Duration,
}

impl FfmpegEngine {
    /// Creates an engine using the given ffmpeg/ffprobe binaries.
    pub fn new(ffmpeg_path: impl Into<PathBuf>, ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            kill_grace: Duration::from_secs(2),
        }
    }

    /// Overrides the cancellation grace period.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Probes the input duration in seconds via ffprobe.
    async fn probe_duration(&self, input: &Path) -> EngineResult<f64> {
        let output = tokio::process::Command::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(input)
            .output()
            .await
            .map_err(|e| EngineError::Spawn {
                tool: "ffprobe".to_string(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Probe(stderr.trim().to_string()));
        }

        parse_probe_duration(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| EngineError::Probe("missing duration in probe output".to_string()))
    }

    /// The duration the progress stream should be mapped against.
    ///
    /// Cut and GIF know their span from the time range; remux and picture
    /// operations have no meaningful intermediate progress and report only
    /// start/end.
    async fn progress_duration(&self, job: &Job) -> Option<f64> {
        match &job.params {
            JobParams::Cut(cut) => Some(cut.end_sec - cut.start_sec),
            JobParams::CreateGif(gif) => Some(gif.end_sec - gif.start_sec),
            JobParams::Transcode(_) | JobParams::ExtractAudio(_) => {
                match self.probe_duration(&job.input).await {
                    Ok(duration) => Some(duration),
                    Err(err) => {
                        tracing::warn!(
                            input = %job.input.display(),
                            error = %err,
                            "Probe failed; progress reporting degraded to start/end"
                        );
                        None
                    }
                }
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Engine for FfmpegEngine {
    fn id(&self) -> EngineId {
        EngineId::Ffmpeg
    }

    fn supports(&self, kind: JobKind) -> bool {
        kind != JobKind::Upscale
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

        let duration = self.progress_duration(job).await;
        let args = build_args(job);
        tracing::debug!(job_id = %job.id, ?args, "Spawning ffmpeg");

        let mut child = tokio::process::Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Spawn {
                tool: "ffmpeg".to_string(),
                source: e,
            })?;

        let _ = progress.send(0).await;

        let progress_task = child.stdout.take().map(|stdout| {
            let tx = progress.clone();
            let mut parser = PipeProgressParser::new(duration);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(percent) = parser.push(&line) {
                        if tx.send(percent).await.is_err() {
                            break;
                        }
                    }
                }
            })
        });
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_stderr_tail(stderr)));

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let status = match waited {
            Some(status) => status.map_err(EngineError::Process)?,
            None => {
                // The child cannot observe the token; give it a grace period
                // to finish on its own, then terminate it.
                if tokio::time::timeout(self.kill_grace, child.wait())
                    .await
                    .is_err()
                {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
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
                tool: "ffmpeg".to_string(),
                code: status.code().unwrap_or(-1),
                detail,
            });
        }

        let _ = progress.send(100).await;
        Ok(())
    }
}

// =============================================================================
// Argument graph
// =============================================================================

/// Builds the full ffmpeg argument list for a job.
fn build_args(job: &Job) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    match &job.params {
        JobParams::Transcode(p) => {
            args.extend(["-i".into(), path_arg(&job.input)]);
            args.extend(["-c:v".into(), codec_or_copy(&p.video_codec)]);
            if let Some(bitrate) = p.video_bitrate {
                args.extend(["-b:v".into(), bitrate.to_string()]);
            }
            if let (Some(width), Some(height)) = (p.width, p.height) {
                args.extend(["-vf".into(), format!("scale={width}:{height}")]);
            }
            if let Some(pixel_format) = &p.pixel_format {
                args.extend(["-pix_fmt".into(), pixel_format.clone()]);
            }
            if let Some(qscale) = p.qscale {
                args.extend(["-qscale:v".into(), qscale.to_string()]);
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
            // -ss before -i for fast seeking
            args.extend(["-ss".into(), format_secs(p.start_sec)]);
            args.extend(["-i".into(), path_arg(&job.input)]);
            args.extend(["-t".into(), format_secs(p.end_sec - p.start_sec)]);
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
            args.extend(["-ss".into(), format_secs(p.start_sec)]);
            args.extend(["-t".into(), format_secs(p.end_sec - p.start_sec)]);
            args.extend(["-i".into(), path_arg(&job.input)]);
            let mut graph = format!("fps={}", p.fps);
            if let Some(width) = p.width {
                graph.push_str(&format!(",scale={width}:-1:flags=lanczos"));
            }
            graph.push_str(",split[a][b];[a]palettegen[p];[b][p]paletteuse");
            args.extend(["-filter_complex".into(), graph]);
        }
        JobParams::CompressPicture(p) => {
            args.extend(["-i".into(), path_arg(&job.input)]);
            if let (Some(width), Some(height)) = (p.max_width, p.max_height) {
                args.extend([
                    "-vf".into(),
                    format!("scale={width}:{height}:force_original_aspect_ratio=decrease"),
                ]);
            }
            args.extend(["-qscale:v".into(), quality_to_qscale(p.quality).to_string()]);
            args.extend(["-frames:v".into(), "1".into()]);
        }
        JobParams::Upscale(_) => {}
    }

    args.extend([
        "-progress".into(),
        "pipe:1".into(),
        "-nostats".into(),
        "-y".into(),
        path_arg(&job.output),
    ]);
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// An unset codec means stream copy.
fn codec_or_copy(codec: &Option<String>) -> String {
    codec.clone().unwrap_or_else(|| "copy".to_string())
}

fn format_secs(value: f64) -> String {
    format!("{value:.3}")
}

/// Maps UI quality 1–100 (higher is better) onto ffmpeg qscale 2–31
/// (lower is better).
fn quality_to_qscale(quality: u8) -> u8 {
    2 + ((100 - quality.min(100)) as u32 * 29 / 100) as u8
}

// =============================================================================
// Progress stream parsing
// =============================================================================

/// Incremental parser for the `-progress pipe:1` key/value stream.
pub(crate) struct PipeProgressParser {
    duration_sec: Option<f64>,
    out_time_us: u64,
    last_percent: u8,
}

impl PipeProgressParser {
    pub(crate) fn new(duration_sec: Option<f64>) -> Self {
        Self {
            duration_sec,
            out_time_us: 0,
            last_percent: 0,
        }
    }

    /// Feeds one line; returns a percent when a checkpoint advances it.
    pub(crate) fn push(&mut self, line: &str) -> Option<u8> {
        if let Some(value) = line.strip_prefix("out_time_ms=") {
            // Despite the key name, the value is in microseconds.
            self.out_time_us = value.trim().parse().unwrap_or(self.out_time_us);
            return None;
        }
        if !line.starts_with("progress=") {
            return None;
        }
        let duration = self.duration_sec?;
        if duration <= 0.0 {
            return None;
        }
        let elapsed = self.out_time_us as f64 / 1_000_000.0;
        let percent = ((elapsed / duration) * 100.0).min(100.0) as u8;
        if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}

/// Collects the last lines of a diagnostic stream.
async fn read_stderr_tail(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Parses the duration field out of ffprobe JSON output.
fn parse_probe_duration(json_str: &str) -> Option<f64> {
    let json: serde_json::Value = serde_json::from_str(json_str).ok()?;
    json.get("format")?
        .get("duration")?
        .as_str()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::JobRequest;
    use crate::core::params::{
        CompressPictureParams, CutParams, GifParams, RemuxParams, TranscodeParams,
    };

    fn job(params: JobParams) -> Job {
        Job::from_request(JobRequest {
            kind: params.kind(),
            input: PathBuf::from("/media/in.mkv"),
            output: PathBuf::from("/media/out.mp4"),
            params,
        })
    }

    #[test]
    fn test_transcode_args_stream_copy_when_unset() {
        let args = build_args(&job(JobParams::Transcode(TranscodeParams::default())));
        let joined = args.join(" ");
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-c:a copy"));
        assert!(joined.contains("-progress pipe:1"));
        assert!(joined.ends_with("-y /media/out.mp4"));
    }

    #[test]
    fn test_transcode_args_full_graph() {
        let args = build_args(&job(JobParams::Transcode(TranscodeParams {
            video_codec: Some("libx264".to_string()),
            video_bitrate: Some(4_000_000),
            width: Some(1280),
            height: Some(720),
            pixel_format: Some("yuv420p".to_string()),
            qscale: None,
            audio_codec: Some("aac".to_string()),
            audio_bitrate: Some(192_000),
        })));
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-b:v 4000000"));
        assert!(joined.contains("-vf scale=1280:720"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-b:a 192000"));
    }

    #[test]
    fn test_remux_args_map_selected_streams() {
        let args = build_args(&job(JobParams::Remux(RemuxParams {
            streams: vec![0, 2],
        })));
        let joined = args.join(" ");
        assert!(joined.contains("-map 0:0"));
        assert!(joined.contains("-map 0:2"));
        assert!(joined.contains("-c copy"));
    }

    #[test]
    fn test_cut_args_seek_before_input() {
        let args = build_args(&job(JobParams::Cut(CutParams {
            start_sec: 3.5,
            end_sec: 10.0,
            video_codec: None,
            audio_codec: None,
        })));
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
        assert_eq!(args[ss + 1], "3.500");
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "6.500");
    }

    #[test]
    fn test_gif_args_palette_graph() {
        let args = build_args(&job(JobParams::CreateGif(GifParams {
            fps: 12,
            width: Some(480),
            start_sec: 0.0,
            end_sec: 4.0,
        })));
        let graph = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        assert!(graph.starts_with("fps=12,scale=480:-1"));
        assert!(graph.contains("palettegen"));
        assert!(graph.contains("paletteuse"));
    }

    #[test]
    fn test_compress_picture_args() {
        let args = build_args(&job(JobParams::CompressPicture(CompressPictureParams {
            quality: 100,
            max_width: Some(1920),
            max_height: Some(1080),
        })));
        let joined = args.join(" ");
        assert!(joined.contains("-qscale:v 2"));
        assert!(joined.contains("force_original_aspect_ratio=decrease"));
        assert!(joined.contains("-frames:v 1"));
    }

    #[test]
    fn test_quality_to_qscale_mapping() {
        assert_eq!(quality_to_qscale(100), 2);
        assert_eq!(quality_to_qscale(1), 30);
        assert!(quality_to_qscale(50) > quality_to_qscale(80));
    }

    #[test]
    fn test_pipe_progress_parser() {
        let mut parser = PipeProgressParser::new(Some(10.0));

        assert_eq!(parser.push("frame=100"), None);
        assert_eq!(parser.push("out_time_ms=2500000"), None);
        assert_eq!(parser.push("progress=continue"), Some(25));
        // Same checkpoint again does not re-emit.
        assert_eq!(parser.push("progress=continue"), None);

        parser.push("out_time_ms=10000000");
        assert_eq!(parser.push("progress=end"), Some(100));
    }

    #[test]
    fn test_pipe_progress_parser_clamps_overshoot() {
        let mut parser = PipeProgressParser::new(Some(2.0));
        parser.push("out_time_ms=9000000");
        assert_eq!(parser.push("progress=continue"), Some(100));
    }

    #[test]
    fn test_pipe_progress_parser_without_duration() {
        let mut parser = PipeProgressParser::new(None);
        parser.push("out_time_ms=2500000");
        assert_eq!(parser.push("progress=continue"), None);
    }

    #[test]
    fn test_parse_probe_duration() {
        let json = r#"{"format": {"duration": "12.480000", "format_name": "matroska"}}"#;
        assert_eq!(parse_probe_duration(json), Some(12.48));
        assert_eq!(parse_probe_duration("{}"), None);
        assert_eq!(parse_probe_duration("not json"), None);
    }
}
