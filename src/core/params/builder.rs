//! Parameter Builder
//!
//! Validates UI-supplied settings and freezes them into job requests. Bad
//! input is rejected here and never reaches the queue. The builder has no
//! side effects beyond allocating the request values.

use std::path::PathBuf;

use thiserror::Error;

use super::{JobParams, OutputPolicy, SUPPORTED_UPSCALE_FACTORS};
use crate::core::jobs::JobRequest;

// =============================================================================
// Validation Errors
// =============================================================================

/// Pre-enqueue validation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing path: {0}")]
    MissingPath(String),

    #[error("invalid time range: end ({end:.3}s) must be greater than start ({start:.3}s)")]
    InvalidRange { start: f64, end: f64 },

    #[error("no streams selected")]
    EmptySelection,

    #[error("unsupported upscale factor: {0}x")]
    UnsupportedFactor(u32),

    #[error("quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),

    #[error("frame rate must be positive")]
    InvalidFrameRate,
}

// =============================================================================
// Parameter Builder
// =============================================================================

/// Builds validated job requests from frozen parameter bundles.
pub struct ParameterBuilder;

impl ParameterBuilder {
    /// Builds a single job request.
    ///
    /// Rejects empty paths and applies the kind-specific checks; on success
    /// the returned request is ready to enqueue.
    pub fn build(
        params: JobParams,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Result<JobRequest, ValidationError> {
        let input = input.into();
        let output = output.into();
        if input.as_os_str().is_empty() {
            return Err(ValidationError::MissingPath("input".to_string()));
        }
        if output.as_os_str().is_empty() {
            return Err(ValidationError::MissingPath("output".to_string()));
        }
        Self::validate(&params)?;

        Ok(JobRequest {
            kind: params.kind(),
            input,
            output,
            params,
        })
    }

    /// Batch mode: one settings template applied to many inputs, producing
    /// one request per input file with the output derived from `policy`.
    ///
    /// Derived output collisions are not an error; see
    /// [`OutputPolicy::derive_output`].
    pub fn build_batch(
        params: JobParams,
        inputs: &[PathBuf],
        policy: &OutputPolicy,
    ) -> Result<Vec<JobRequest>, ValidationError> {
        if inputs.is_empty() {
            return Err(ValidationError::MissingPath("inputs".to_string()));
        }
        Self::validate(&params)?;

        inputs
            .iter()
            .map(|input| {
                if input.as_os_str().is_empty() {
                    return Err(ValidationError::MissingPath("input".to_string()));
                }
                Ok(JobRequest {
                    kind: params.kind(),
                    input: input.clone(),
                    output: policy.derive_output(input),
                    params: params.clone(),
                })
            })
            .collect()
    }

    fn validate(params: &JobParams) -> Result<(), ValidationError> {
        match params {
            JobParams::Transcode(_) | JobParams::ExtractAudio(_) => Ok(()),
            JobParams::Remux(remux) => {
                if remux.streams.is_empty() {
                    return Err(ValidationError::EmptySelection);
                }
                Ok(())
            }
            JobParams::Cut(cut) => Self::validate_range(cut.start_sec, cut.end_sec),
            JobParams::CreateGif(gif) => {
                if gif.fps == 0 {
                    return Err(ValidationError::InvalidFrameRate);
                }
                Self::validate_range(gif.start_sec, gif.end_sec)
            }
            JobParams::CompressPicture(picture) => {
                if picture.quality == 0 || picture.quality > 100 {
                    return Err(ValidationError::InvalidQuality(picture.quality));
                }
                Ok(())
            }
            JobParams::Upscale(upscale) => {
                if !SUPPORTED_UPSCALE_FACTORS.contains(&upscale.factor) {
                    return Err(ValidationError::UnsupportedFactor(upscale.factor));
                }
                Ok(())
            }
        }
    }

    fn validate_range(start: f64, end: f64) -> Result<(), ValidationError> {
        if !valid_time_range(start, end) {
            return Err(ValidationError::InvalidRange { start, end });
        }
        Ok(())
    }
}

/// Convenience check used by UI layers before offering the cut/gif action.
pub fn valid_time_range(start: f64, end: f64) -> bool {
    start >= 0.0 && end > start
}
