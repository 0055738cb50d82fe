//! Conversion Parameter Module
//!
//! Kind-specific frozen settings bundles plus the builder that validates
//! UI-supplied values into enqueueable job requests. Parameters are opaque
//! to the queue and executor; only engines interpret them.

mod builder;

pub use builder::*;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::jobs::JobKind;
use crate::core::TimeSec;

// =============================================================================
// Kind-specific parameter bundles
// =============================================================================

/// Transcode settings.
///
/// A `None` codec means stream copy for that stream, matching the convention
/// the conversion pages use for the "Copy" codec choice.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeParams {
    pub video_codec: Option<String>,
    /// Video bitrate in bits/s
    pub video_bitrate: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pixel_format: Option<String>,
    /// Fixed quality scale (2–31, lower is better)
    pub qscale: Option<u8>,
    pub audio_codec: Option<String>,
    /// Audio bitrate in bits/s
    pub audio_bitrate: Option<u64>,
}

/// Remux settings: which input streams to carry into the new container.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemuxParams {
    /// Input stream indices, at least one
    pub streams: Vec<u32>,
}

/// Cut settings. Stream copy by default; set codecs to re-encode the clip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CutParams {
    pub start_sec: TimeSec,
    pub end_sec: TimeSec,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

/// Audio extraction settings. A `None` codec keeps the source audio as-is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractAudioParams {
    pub audio_codec: Option<String>,
    pub audio_bitrate: Option<u64>,
}

/// Picture compression settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressPictureParams {
    /// Quality 1–100 (higher is better)
    pub quality: u8,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

/// GIF rendering settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GifParams {
    pub fps: u32,
    /// Output width; height follows the aspect ratio
    pub width: Option<u32>,
    pub start_sec: TimeSec,
    pub end_sec: TimeSec,
}

/// Upscale algorithm choices offered by the isolated runtime
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpscaleAlgorithm {
    #[default]
    Upscaler,
}

/// AI upscale settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleParams {
    pub algorithm: UpscaleAlgorithm,
    /// Scale factor; must be one the algorithm ships models for
    pub factor: u32,
}

/// Upscale factors the shipped model set supports
pub const SUPPORTED_UPSCALE_FACTORS: [u32; 4] = [2, 3, 4, 8];

// =============================================================================
// JobParams
// =============================================================================

/// Frozen kind-specific settings attached to a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum JobParams {
    Transcode(TranscodeParams),
    Remux(RemuxParams),
    Cut(CutParams),
    ExtractAudio(ExtractAudioParams),
    CompressPicture(CompressPictureParams),
    CreateGif(GifParams),
    Upscale(UpscaleParams),
}

impl JobParams {
    /// The job kind this parameter bundle belongs to
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Transcode(_) => JobKind::Transcode,
            JobParams::Remux(_) => JobKind::Remux,
            JobParams::Cut(_) => JobKind::Cut,
            JobParams::ExtractAudio(_) => JobKind::ExtractAudio,
            JobParams::CompressPicture(_) => JobKind::CompressPicture,
            JobParams::CreateGif(_) => JobKind::CreateGif,
            JobParams::Upscale(_) => JobKind::Upscale,
        }
    }
}

// =============================================================================
// Output naming policy
// =============================================================================

/// Batch-mode output naming: `{dir}/{basename}{suffix}.{ext}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPolicy {
    /// Output directory; `None` means same directory as the input
    pub directory: Option<PathBuf>,
    /// Filename suffix; may be empty to keep the original basename
    pub suffix: String,
    /// Target extension without the leading dot
    pub extension: String,
}

impl OutputPolicy {
    /// Derives the output path for one input file.
    ///
    /// Collisions between derived paths are permitted and overwrite
    /// silently: when two jobs resolve to the same output, the last one to
    /// finish wins. This is uniform documented behavior, not engine-specific.
    pub fn derive_output(&self, input: &Path) -> PathBuf {
        let dir = match &self.directory {
            Some(dir) => dir.clone(),
            None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let stem = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        dir.join(format!("{stem}{}.{}", self.suffix, self.extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_output_same_dir() {
        let policy = OutputPolicy {
            directory: None,
            suffix: "_converted".to_string(),
            extension: "mp4".to_string(),
        };
        let out = policy.derive_output(Path::new("/media/clips/holiday.mkv"));
        assert_eq!(out, PathBuf::from("/media/clips/holiday_converted.mp4"));
    }

    #[test]
    fn test_derive_output_custom_dir_empty_suffix() {
        let policy = OutputPolicy {
            directory: Some(PathBuf::from("/exports")),
            suffix: String::new(),
            extension: "gif".to_string(),
        };
        let out = policy.derive_output(Path::new("/media/a.mov"));
        assert_eq!(out, PathBuf::from("/exports/a.gif"));
    }

    #[test]
    fn test_params_kind_mapping() {
        let params = JobParams::Cut(CutParams {
            start_sec: 0.0,
            end_sec: 1.0,
            video_codec: None,
            audio_codec: None,
        });
        assert_eq!(params.kind(), JobKind::Cut);
    }

    #[test]
    fn test_params_serde_tagging() {
        let params = JobParams::CompressPicture(CompressPictureParams {
            quality: 80,
            max_width: Some(1920),
            max_height: None,
        });
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["kind"], "compressPicture");
        assert_eq!(json["quality"], 80);

        let back: JobParams = serde_json::from_value(json).unwrap();
        assert_eq!(back, params);
    }
}
