//! Conversion Engine Module
//!
//! The pluggable backend capability contract and its closed set of
//! implementations:
//! - [`FfmpegEngine`]: the default engine, driving ffmpeg through its
//!   machine-readable `-progress pipe:1` control channel
//! - [`FfToolEngine`]: classic external command-line invocation with
//!   unstructured diagnostics; also hosts AI upscaling via the isolated
//!   runtime
//! - [`PixelEngine`]: in-process picture pipeline with no external binary
//!
//! The executor and queue never depend on which variant is active.

mod fftool;
mod ffmpeg;
mod pixel;
mod registry;

pub use fftool::*;
pub use ffmpeg::*;
pub use pixel::*;
pub use registry::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::jobs::{Job, JobKind};

// =============================================================================
// Engine Identity
// =============================================================================

/// Engine identifier, selected by configuration, not per job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineId {
    #[default]
    Ffmpeg,
    Fftool,
    Pixel,
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineId::Ffmpeg => "ffmpeg",
            EngineId::Fftool => "fftool",
            EngineId::Pixel => "pixel",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for EngineId {
    type Err = crate::core::CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ffmpeg" => Ok(EngineId::Ffmpeg),
            "fftool" => Ok(EngineId::Fftool),
            "pixel" => Ok(EngineId::Pixel),
            other => Err(crate::core::CoreError::UnknownEngine(other.to_string())),
        }
    }
}

// =============================================================================
// Engine Errors
// =============================================================================

/// Engine-level error types
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine does not support {0} jobs")]
    NotSupported(JobKind),

    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with status {code}: {detail}")]
    ExitStatus {
        tool: String,
        code: i32,
        detail: String,
    },

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("AI runtime is not ready")]
    EnvironmentNotReady,

    /// Cooperative cancellation was observed; recorded as a distinct
    /// terminal state, never as a failure.
    #[error("cancelled")]
    Cancelled,

    #[error("process error: {0}")]
    Process(#[from] std::io::Error),
}

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Engine Contract
// =============================================================================

/// Uniform capability contract every conversion engine satisfies.
///
/// `run` may block its task for seconds to minutes; it must emit progress
/// values 0–100 through `progress` (zero or more times; operations without
/// meaningful intermediate progress may report only 0 and 100) and observe
/// `cancel` for cooperative early termination. An engine that completes
/// before noticing the token returns its natural result.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Identifier this engine registers under
    fn id(&self) -> EngineId;

    /// Capability query: can this engine perform `kind`?
    fn supports(&self, kind: JobKind) -> bool;

    /// Performs the conversion described by `job`.
    async fn run(
        &self,
        job: &Job,
        progress: mpsc::Sender<u8>,
        cancel: CancellationToken,
    ) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_id_round_trip() {
        for id in [EngineId::Ffmpeg, EngineId::Fftool, EngineId::Pixel] {
            let parsed: EngineId = id.to_string().parse().unwrap();
            assert_eq!(parsed, id);
        }
        assert!("avtool".parse::<EngineId>().is_err());
    }

    #[test]
    fn test_engine_id_serde_matches_display() {
        let json = serde_json::to_string(&EngineId::Fftool).unwrap();
        assert_eq!(json, "\"fftool\"");
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::ExitStatus {
            tool: "ffmpeg".to_string(),
            code: 1,
            detail: "unknown encoder".to_string(),
        };
        assert!(err.to_string().contains("exited with status 1"));
        assert!(err.to_string().contains("unknown encoder"));
    }
}
