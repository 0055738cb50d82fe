//! MediaForge Error Definitions
//!
//! Defines error types used throughout the conversion core.

use thiserror::Error;

use super::engines::{EngineError, EngineId};
use super::jobs::{JobKind, QueueError};
use super::params::ValidationError;

/// Core conversion error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Per-concern taxonomies
    // =========================================================================
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    // =========================================================================
    // Dispatch Errors
    // =========================================================================
    #[error("engine {engine} does not support {kind} jobs")]
    NoCapableBackend { engine: EngineId, kind: JobKind },

    #[error("AI runtime is not ready")]
    EnvironmentNotReady,

    #[error("engine selection is locked while a batch is running")]
    SelectionLocked,

    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;
