//! Job queue infrastructure: records, lifecycle, storage and the runner.
//!
//! - [`JobStore`] - durable job records and their log ([`PostgresJobStore`],
//!   [`MemoryJobStore`])
//! - [`JobAction`] - the lifecycle state machine
//! - [`WorkerLock`] - the single-runner guarantee ([`PgAdvisoryLock`])
//! - [`JobNotifications`] - wakeups when jobs are queued
//! - [`JobRunner`] - the dispatch loop
//! - [`JobService`] - submission and the administrative surface
//!
//! # Architecture
//!
//! ```text
//! JobService.submit(NewJob)
//!     │
//!     └─► JobStore.create()  ── trigger ──► NOTIFY jobs_insert <id>
//!
//! JobRunner
//!     │
//!     ├─► JobNotifications.recv()
//!     ├─► JobStore.claim()            queued → running
//!     ├─► JobKind::decode → resolve → run
//!     └─► JobStore.transition()       running → done | failed
//! ```
//!
//! What each job does lives in `domains::jobs`; this module only knows how
//! to move jobs through their states.

pub mod coordinator;
mod job;
mod log;
mod memory_store;
pub mod notifications;
mod postgres_store;
pub mod runner;
pub mod service;
pub mod state;
mod store;

pub use coordinator::{
    CoordinatorError, MemoryLock, MemoryLockTable, PgAdvisoryLock, WorkerLock, RUNNER_LOCK_KEY,
};
pub use job::{Job, JobArgs, JobState, NewJobRecord};
pub use log::{JobLog, LogEntry, LogLevel, LogType};
pub use memory_store::MemoryJobStore;
pub use notifications::{
    ChannelNotifications, JobNotifications, PgJobNotifications, Wakeup, JOBS_CHANNEL,
};
pub use postgres_store::PostgresJobStore;
pub use runner::{JobRunner, JobRunnerConfig, RunnerError};
pub use service::{JobService, ServiceError, SubmissionContext};
pub use state::{Actor, JobAction, StateChange, Transition};
pub use store::{JobStore, StoreError, TransitionError};
