//! MediaForge Core Engine
//!
//! Core conversion module.
//! Handles the job model, queue state machine, engine dispatch, and the
//! execution/cancellation contract.

pub mod ai;
pub mod engines;
pub mod jobs;
pub mod params;
pub mod settings;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

pub use jobs::{
    Executor, ExecutorEvent, ExecutorState, Job, JobKind, JobQueue, JobRequest, JobStatus,
    QueueCounts, QueueError, QueueSnapshot, StartOutcome,
};
pub use params::{JobParams, OutputPolicy, ParameterBuilder, ValidationError};
