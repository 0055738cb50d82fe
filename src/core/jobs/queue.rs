//! Job Queue Module
//!
//! Ordered collection of jobs with guarded mutation and aggregate counters.
//! All shared mutable state between the executor (writer) and UI observers
//! (readers) is serialized through this type; readers get consistent
//! snapshots taken under a short-lived lock, never live references.

use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Job, JobRequest, JobStatus};
use crate::core::JobId;

// =============================================================================
// Queue Errors
// =============================================================================

/// Guarded-mutation rejection reasons.
///
/// Returned explicitly instead of silently no-op-ing so the UI can explain
/// why an action was refused.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("job is currently being processed")]
    Busy,

    #[error("job not found")]
    NotFound,

    #[error("job is not in a failed state")]
    NotRetryable,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Aggregate status counters for status-bar reporting
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub total: usize,
    pub waiting: usize,
    pub processing: usize,
    pub finished: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Consistent view of the queue: ordered job views plus counts computed
/// under the same lock acquisition (no torn reads across mutation).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub jobs: Vec<Job>,
    pub counts: QueueCounts,
}

// =============================================================================
// Job Queue
// =============================================================================

/// FIFO batch queue.
///
/// Arrival order is the scheduling order; there is no priority handling.
pub struct JobQueue {
    jobs: Mutex<Vec<Job>>,
}

impl JobQueue {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Appends a validated request in arrival order and assigns its id.
    pub fn enqueue(&self, request: JobRequest) -> JobId {
        let job = Job::from_request(request);
        let id = job.id.clone();
        self.jobs.lock().unwrap().push(job);
        tracing::debug!(job_id = %id, "Job enqueued");
        id
    }

    /// Enqueues a batch of requests, preserving their order.
    pub fn enqueue_all(&self, requests: Vec<JobRequest>) -> Vec<JobId> {
        let mut jobs = self.jobs.lock().unwrap();
        requests
            .into_iter()
            .map(|request| {
                let job = Job::from_request(request);
                let id = job.id.clone();
                jobs.push(job);
                id
            })
            .collect()
    }

    /// Removes a job by id.
    ///
    /// Rejected with [`QueueError::Busy`] while the job is processing.
    pub fn remove(&self, id: &str) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().unwrap();
        let index = jobs
            .iter()
            .position(|job| job.id == id)
            .ok_or(QueueError::NotFound)?;
        if jobs[index].is_processing() {
            return Err(QueueError::Busy);
        }
        jobs.remove(index);
        Ok(())
    }

    /// Removes all terminal entries (Finished, Failed, Cancelled), never
    /// touching Waiting or Processing jobs. Returns the number removed.
    pub fn clear_finished(&self) -> usize {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|job| !job.is_terminal());
        before - jobs.len()
    }

    /// Removes every entry.
    ///
    /// Rejected with [`QueueError::Busy`] while any job is processing.
    /// Returns the number removed.
    pub fn clear_all(&self) -> Result<usize, QueueError> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.iter().any(Job::is_processing) {
            return Err(QueueError::Busy);
        }
        let removed = jobs.len();
        jobs.clear();
        Ok(removed)
    }

    /// Operator-initiated retry: resets a Failed job back to Waiting with its
    /// original parameters unchanged.
    pub fn retry(&self, id: &str) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(QueueError::NotFound)?;
        if !matches!(job.status, JobStatus::Failed { .. }) {
            return Err(QueueError::NotRetryable);
        }
        job.status = JobStatus::Waiting;
        job.progress = 0;
        job.started_at = None;
        job.finished_at = None;
        Ok(())
    }

    /// Returns the ordered job views plus aggregate counts.
    pub fn snapshot(&self) -> QueueSnapshot {
        let jobs = self.jobs.lock().unwrap();
        let mut counts = QueueCounts {
            total: jobs.len(),
            ..QueueCounts::default()
        };
        for job in jobs.iter() {
            match job.status {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Finished => counts.finished += 1,
                JobStatus::Failed { .. } => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        QueueSnapshot {
            jobs: jobs.clone(),
            counts,
        }
    }

    /// Gets a job view by id
    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|job| job.id == id)
            .cloned()
    }

    /// Checks whether any job is waiting to run
    pub fn has_waiting(&self) -> bool {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .any(|job| job.status == JobStatus::Waiting)
    }

    // =========================================================================
    // Executor-facing mutators
    // =========================================================================

    /// Atomically claims the oldest Waiting job, marking it Processing and
    /// stamping its start time.
    ///
    /// Returns `None` while another job is still processing, which makes the
    /// at-most-one-processing invariant structural rather than a convention.
    pub(crate) fn claim_next_waiting(&self) -> Option<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.iter().any(Job::is_processing) {
            return None;
        }
        let job = jobs
            .iter_mut()
            .find(|job| job.status == JobStatus::Waiting)?;
        job.status = JobStatus::Processing;
        job.progress = 0;
        job.started_at = Some(Utc::now());
        Some(job.clone())
    }

    /// Updates progress for a processing job, clamped monotone non-decreasing.
    pub(crate) fn set_progress(&self, id: &str, percent: u8) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|job| job.id == id) {
            if job.is_processing() && percent > job.progress {
                job.progress = percent.min(100);
            }
        }
    }

    pub(crate) fn mark_finished(&self, id: &str) {
        self.finish(id, JobStatus::Finished, 100);
    }

    pub(crate) fn mark_failed(&self, id: &str, error: &str) {
        self.finish(
            id,
            JobStatus::Failed {
                error: error.to_string(),
            },
            0,
        );
    }

    pub(crate) fn mark_cancelled(&self, id: &str) {
        self.finish(id, JobStatus::Cancelled, 0);
    }

    fn finish(&self, id: &str, status: JobStatus, progress_floor: u8) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|job| job.id == id) {
            job.status = status;
            job.progress = job.progress.max(progress_floor);
            job.finished_at = Some(Utc::now());
        }
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
