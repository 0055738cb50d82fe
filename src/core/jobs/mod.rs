//! Job System Module
//!
//! The batch job data model and its state machine: immutable request fields,
//! mutable execution state, and the queue/executor pair that drives it.

mod executor;
mod queue;

pub use executor::*;
pub use queue::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::params::JobParams;
use crate::core::JobId;

// =============================================================================
// Job Kinds
// =============================================================================

/// Conversion job kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    /// Re-encode video/audio streams
    Transcode,
    /// Repackage selected streams into a new container without re-encoding
    Remux,
    /// Cut a time range out of the input
    Cut,
    /// Strip the video and keep the audio track
    ExtractAudio,
    /// Re-encode a still picture at reduced quality/size
    CompressPicture,
    /// Render an animated GIF from a video segment
    CreateGif,
    /// AI upscale via the isolated runtime
    Upscale,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobKind::Transcode => "transcode",
            JobKind::Remux => "remux",
            JobKind::Cut => "cut",
            JobKind::ExtractAudio => "extract-audio",
            JobKind::CompressPicture => "compress-picture",
            JobKind::CreateGif => "create-gif",
            JobKind::Upscale => "upscale",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Job Status
// =============================================================================

/// Job execution status
///
/// Transitions run forward only (`Waiting → Processing → terminal`), with one
/// exception: an operator retry resets a `Failed` job back to `Waiting` with
/// its original parameters unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobStatus {
    /// Waiting in queue
    #[default]
    Waiting,
    /// Currently running on an engine
    Processing,
    /// Successfully completed
    Finished,
    /// Failed with error detail
    Failed { error: String },
    /// Cancelled by user stop request
    Cancelled,
}

impl JobStatus {
    /// Checks whether the status is terminal (Finished, Failed, or Cancelled)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed { .. } | JobStatus::Cancelled
        )
    }
}

// =============================================================================
// Job
// =============================================================================

/// A validated conversion request that has not yet been enqueued.
///
/// Produced by the parameter builder; the queue assigns the id and initial
/// status when the request is enqueued.
#[derive(Clone, Debug, PartialEq)]
pub struct JobRequest {
    /// Kind of conversion
    pub kind: JobKind,
    /// Source path (batch expansion yields one request per input file)
    pub input: PathBuf,
    /// Destination path, resolved before enqueue
    pub output: PathBuf,
    /// Frozen kind-specific settings, opaque to the queue and executor
    pub params: JobParams,
}

/// One queued conversion job
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID, stable for the job's lifetime
    pub id: JobId,
    /// Kind of conversion
    pub kind: JobKind,
    /// Source path
    pub input: PathBuf,
    /// Destination path
    pub output: PathBuf,
    /// Frozen kind-specific settings, interpreted only by the engine
    pub params: JobParams,
    /// Current status
    pub status: JobStatus,
    /// Progress percent, monotonically non-decreasing while Processing
    pub progress: u8,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// When the executor claimed the job
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a queued job from a validated request, assigning a fresh id.
    pub(crate) fn from_request(request: JobRequest) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            kind: request.kind,
            input: request.input,
            output: request.output,
            params: request.params,
            status: JobStatus::Waiting,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Checks if the job is currently processing
    pub fn is_processing(&self) -> bool {
        matches!(self.status, JobStatus::Processing)
    }

    /// Checks if the job reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::TranscodeParams;

    fn request() -> JobRequest {
        JobRequest {
            kind: JobKind::Transcode,
            input: PathBuf::from("/media/in.mkv"),
            output: PathBuf::from("/media/out.mp4"),
            params: JobParams::Transcode(TranscodeParams::default()),
        }
    }

    #[test]
    fn test_job_creation() {
        let job = Job::from_request(request());

        assert!(!job.id.is_empty());
        assert_eq!(job.kind, JobKind::Transcode);
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.progress, 0);
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_status_checks() {
        let mut job = Job::from_request(request());
        assert!(!job.is_processing());
        assert!(!job.is_terminal());

        job.status = JobStatus::Processing;
        assert!(job.is_processing());
        assert!(!job.is_terminal());

        job.status = JobStatus::Failed {
            error: "boom".to_string(),
        };
        assert!(!job.is_processing());
        assert!(job.is_terminal());

        job.status = JobStatus::Cancelled;
        assert!(job.is_terminal());
    }

    #[test]
    fn test_unique_ids() {
        let a = Job::from_request(request());
        let b = Job::from_request(request());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(JobKind::ExtractAudio.to_string(), "extract-audio");
        assert_eq!(JobKind::Upscale.to_string(), "upscale");
    }
}
