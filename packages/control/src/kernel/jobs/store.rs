//! Storage seam for job records and their log.
//!
//! The store holds no business logic. Its one obligation beyond persistence
//! is atomicity: every state change is a conditional update on the current
//! state, so that the web layer, administrators and the worker can race on
//! the same row without anyone observing a torn state/message pair.

use async_trait::async_trait;
use thiserror::Error;

use super::job::{Job, JobState, NewJobRecord};
use super::log::{JobLog, LogEntry};
use super::state::StateChange;
use crate::common::JobId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {id} is {actual}; expected one of {expected:?}")]
    InvalidState {
        id: JobId,
        actual: JobState,
        expected: &'static [JobState],
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for TransitionError {
    fn from(e: sqlx::Error) -> Self {
        TransitionError::Store(StoreError::Database(e))
    }
}

/// Trait for job record storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job together with its `created` log entry.
    ///
    /// A job inserted as `queued` wakes the runner.
    async fn create(&self, record: NewJobRecord, created: LogEntry) -> Result<Job, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Jobs in `state`, oldest first.
    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, StoreError>;

    /// Jobs owned by a member, newest first.
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Job>, StoreError>;

    /// Jobs acting on a society, newest first.
    async fn list_by_society(&self, society: &str) -> Result<Vec<Job>, StoreError>;

    /// Number of jobs in each state that has any.
    async fn count_by_state(&self) -> Result<Vec<(JobState, i64)>, StoreError>;

    /// Apply a state change if the job is still in one of `change.from`,
    /// writing the accompanying log entry in the same transaction.
    async fn transition(&self, id: JobId, change: StateChange) -> Result<Job, TransitionError>;

    /// The worker's `queued -> running` step. Returns `None` when the job is
    /// no longer queued (or does not exist); the caller discards it.
    async fn claim(&self, id: JobId, running_message: &str) -> Result<Option<Job>, StoreError>;

    async fn append_log(&self, id: JobId, entry: LogEntry) -> Result<JobLog, StoreError>;

    /// Log entries for a job, oldest first.
    async fn logs(&self, id: JobId) -> Result<Vec<JobLog>, StoreError>;
}
