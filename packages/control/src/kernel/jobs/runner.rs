//! The job runner: the single process that executes queued jobs.
//!
//! ```text
//! JobRunner
//!     │
//!     ├─► Catch-up scan (every job already queued, oldest first)
//!     ├─► Wait for a notification, or the poll timeout
//!     │       ├─ Job(id)  → process that id
//!     │       ├─ Timeout  → verify the worker lock, rescan
//!     │       └─ Lagged   → rescan
//!     └─► Process a candidate
//!             ├─ claim (queued → running, atomically; otherwise discard)
//!             ├─ decode → resolve → run, with panics caught
//!             ├─ persist done/failed (only if still running)
//!             └─ notify the submitter, and sysadmins on unexpected failure
//! ```
//!
//! Jobs run one at a time. Nothing but a lost lock or a store error stops
//! the loop; every failure inside a job is recorded against that job.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::coordinator::{CoordinatorError, WorkerLock};
use super::job::{Job, JobState};
use super::log::{LogEntry, LogLevel};
use super::notifications::{JobNotifications, Wakeup};
use super::state::{JobAction, StateChange};
use super::store::{JobStore, StoreError, TransitionError};
use crate::common::JobId;
use crate::domains::jobs::{describe, JobKind, Outcome};
use crate::kernel::notifier::Sender;
use crate::kernel::JobDeps;

/// Default wait between rescans when no notification arrives.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration for the job runner.
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    pub poll_timeout: Duration,
    /// `"<host> <pid>"`, recorded in the state message of running jobs.
    pub runner_id: String,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            runner_id: runner_id(),
        }
    }
}

impl JobRunnerConfig {
    pub fn with_poll_timeout(poll_timeout: Duration) -> Self {
        Self {
            poll_timeout,
            ..Default::default()
        }
    }
}

/// Identifies this process in job state messages.
pub fn runner_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/proc/sys/kernel/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .unwrap_or_else(|| "localhost".to_string());
    format!("{} {}", host, std::process::id())
}

/// How a job's execution ended, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Execution {
    /// `run` returned an outcome.
    Finished(Outcome),
    /// The job could not be decoded or resolved, `run` returned an error,
    /// or it panicked. Carries a one-line summary.
    Unexpected(String),
}

impl Execution {
    fn action(&self) -> JobAction {
        match self {
            Execution::Finished(Outcome::Done(_)) => JobAction::Succeed,
            _ => JobAction::Fail,
        }
    }

    fn state(&self) -> JobState {
        self.action().transition().to
    }

    fn message(&self) -> Option<&str> {
        match self {
            Execution::Finished(outcome) => outcome.message(),
            Execution::Unexpected(summary) => Some(summary),
        }
    }

    fn level(&self) -> LogLevel {
        match self {
            Execution::Finished(Outcome::Done(_)) => LogLevel::Info,
            Execution::Finished(Outcome::Failed(_)) => LogLevel::Warning,
            Execution::Unexpected(_) => LogLevel::Error,
        }
    }
}

pub struct JobRunner {
    dispatch: Dispatch,
    notifications: Box<dyn JobNotifications>,
    lock: Box<dyn WorkerLock>,
}

/// The per-job half of the runner. Kept apart from the notification
/// stream and lock, which are only `Send`, so that `run` stays `Send`.
struct Dispatch {
    store: Arc<dyn JobStore>,
    deps: JobDeps,
    config: JobRunnerConfig,
}

impl JobRunner {
    /// `lock` must already be held; `notifications` should already be
    /// listening so nothing queued during the catch-up scan is missed.
    pub fn new(
        store: Arc<dyn JobStore>,
        notifications: Box<dyn JobNotifications>,
        lock: Box<dyn WorkerLock>,
        deps: JobDeps,
    ) -> Self {
        Self::with_config(store, notifications, lock, deps, JobRunnerConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn JobStore>,
        notifications: Box<dyn JobNotifications>,
        lock: Box<dyn WorkerLock>,
        deps: JobDeps,
        config: JobRunnerConfig,
    ) -> Self {
        Self {
            dispatch: Dispatch { store, deps, config },
            notifications,
            lock,
        }
    }

    /// Run until `shutdown` is cancelled. A job in progress is finished
    /// first.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), RunnerError> {
        let config = self.dispatch.config.clone();
        info!(
            runner_id = %config.runner_id,
            lock_key = %format!("{:#x}", self.lock.key()),
            poll_timeout_secs = config.poll_timeout.as_secs(),
            "job runner starting"
        );

        self.dispatch.process_queued(&shutdown).await?;

        loop {
            let wakeup = tokio::select! {
                _ = shutdown.cancelled() => break,
                wakeup = self.notifications.recv(config.poll_timeout) => wakeup?,
            };

            match wakeup {
                Wakeup::Job(id) => {
                    self.dispatch.process_candidate(id).await?;
                }
                Wakeup::Timeout => {
                    self.lock.verify().await?;
                    self.dispatch.process_queued(&shutdown).await?;
                }
                Wakeup::Lagged => {
                    debug!("notifications may have been missed; rescanning");
                    self.dispatch.process_queued(&shutdown).await?;
                }
            }
        }

        info!(runner_id = %config.runner_id, "job runner stopped");
        Ok(())
    }

    /// Process every job currently queued, oldest first.
    pub async fn process_queued(&self, shutdown: &CancellationToken) -> Result<(), RunnerError> {
        self.dispatch.process_queued(shutdown).await
    }

    /// Claim and execute one job if it is still queued. Returns the job as
    /// persisted afterwards, or `None` when the id was stale.
    pub async fn process_candidate(&self, id: JobId) -> Result<Option<Job>, RunnerError> {
        self.dispatch.process_candidate(id).await
    }
}

impl Dispatch {
    async fn process_queued(&self, shutdown: &CancellationToken) -> Result<(), RunnerError> {
        let queued: Vec<JobId> = self
            .store
            .list_by_state(JobState::Queued)
            .await?
            .into_iter()
            .map(|job| job.job_id)
            .collect();

        if !queued.is_empty() {
            debug!(count = queued.len(), "processing queued jobs");
        }

        for id in queued {
            if shutdown.is_cancelled() {
                break;
            }
            self.process_candidate(id).await?;
        }
        Ok(())
    }

    async fn process_candidate(&self, id: JobId) -> Result<Option<Job>, RunnerError> {
        let running_message = format!("..on {}", self.config.runner_id);
        let Some(job) = self.store.claim(id, &running_message).await? else {
            debug!(job_id = %id, "job not queued; discarding");
            return Ok(None);
        };

        info!(job_id = %job.job_id, job_type = %job.job_type, "running job");
        let execution = self.execute(&job).await;
        let finished = self.finish(&job, &execution).await?;

        info!(
            job_id = %finished.job_id,
            state = %finished.state,
            message = finished.state_message.as_deref().unwrap_or(""),
            "job finished"
        );

        self.notify(&finished, &execution).await;
        Ok(Some(finished))
    }

    async fn execute(&self, job: &Job) -> Execution {
        let kind = match JobKind::from_job(job) {
            Ok(kind) => kind,
            Err(e) => {
                error!(job_id = %job.job_id, job_type = %job.job_type, error = %e, "job does not decode");
                return Execution::Unexpected(e.to_string());
            }
        };

        let resolved = match kind.resolve(self.deps.directory.as_ref()).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "job references could not be resolved");
                return Execution::Unexpected(e.to_string());
            }
        };

        match AssertUnwindSafe(resolved.run(&self.deps)).catch_unwind().await {
            Ok(Ok(outcome)) => Execution::Finished(outcome),
            Ok(Err(e)) => {
                error!(job_id = %job.job_id, error = ?e, "job raised an unexpected error");
                Execution::Unexpected(summarize_error(&e))
            }
            Err(panic) => {
                let summary = summarize_panic(panic.as_ref());
                error!(job_id = %job.job_id, panic = %summary, "job panicked");
                Execution::Unexpected(summary)
            }
        }
    }

    /// Persist the terminal state, unless an administrator moved the job
    /// out of `running` while it ran; their decision stands.
    async fn finish(&self, job: &Job, execution: &Execution) -> Result<Job, RunnerError> {
        let action = execution.action();
        let log = LogEntry::progress(format!(
            "Worker state change: job {} on {}",
            action.transition().display,
            self.config.runner_id
        ))
        .with_level(execution.level());

        let change = StateChange::for_action(
            action,
            execution.message().map(str::to_string),
            Some(log),
        );

        match self.store.transition(job.job_id, change).await {
            Ok(finished) => Ok(finished),
            Err(TransitionError::InvalidState { actual, .. }) => {
                warn!(
                    job_id = %job.job_id,
                    state = %actual,
                    discarded = %execution.state(),
                    "job changed state while running; keeping administrator's state"
                );
                let discarded = LogEntry::progress(format!(
                    "Discarded result after job became {}: {} {}",
                    actual,
                    execution.state(),
                    execution.message().unwrap_or("")
                ))
                .with_level(LogLevel::Warning);
                self.store.append_log(job.job_id, discarded).await?;

                Ok(self.store.get(job.job_id).await?.unwrap_or_else(|| job.clone()))
            }
            Err(TransitionError::NotFound(id)) => Err(StoreError::Unavailable(format!(
                "job {} vanished while running",
                id
            ))
            .into()),
            Err(TransitionError::Store(e)) => Err(e.into()),
        }
    }

    /// Mail the submitter, and the sysadmins if something unexpected
    /// happened. Never fails: the job's state is already persisted.
    async fn notify(&self, job: &Job, execution: &Execution) {
        let mail = &self.deps.mail;
        let description = describe(job);
        let subject = format!(
            "[SRCF Control Panel] Job #{} {} -- {}",
            job.job_id, job.state, description
        );

        match self.submitter(job).await {
            Some(to) => {
                let mut body = format!("Your job \"{}\" is now {}.\n", description, job.state);
                if let Some(message) = &job.state_message {
                    body.push_str(&format!("\n{}\n", message));
                }
                let notification = mail.message(vec![to], subject.clone(), body);
                if let Err(e) = self.deps.notifier.notify(&notification).await {
                    warn!(job_id = %job.job_id, error = %e, "failed to notify submitter");
                }
            }
            None => warn!(job_id = %job.job_id, "no address to notify for job"),
        }

        if let Execution::Unexpected(summary) = execution {
            let body = format!(
                "Job #{} ({}) failed unexpectedly:\n\n{}\n\n{}\n",
                job.job_id,
                description,
                summary,
                mail.admin_job_url(job.job_id)
            );
            let notification = mail.to_sysadmins(subject, body);
            if let Err(e) = self.deps.notifier.notify(&notification).await {
                warn!(job_id = %job.job_id, error = %e, "failed to notify sysadmins");
            }
        }
    }

    /// The owner's mailbox, or the address given at signup.
    async fn submitter(&self, job: &Job) -> Option<Sender> {
        match &job.owner {
            Some(owner) => match self.deps.directory.get_member(owner).await {
                Ok(Some(member)) => Some(Sender::new(member.name(), member.email)),
                Ok(None) => None,
                Err(e) => {
                    warn!(job_id = %job.job_id, error = %e, "failed to look up job owner");
                    None
                }
            },
            None => job.arg("email").map(Sender::address_only),
        }
    }
}

/// An error chain on one line.
fn summarize_error(e: &anyhow::Error) -> String {
    let summary = format!("{:#}", e);
    summary.lines().next().unwrap_or("unknown error").to_string()
}

fn summarize_panic(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("panic: {}", message.lines().next().unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::jobs::{
        CreateUserDatabase, CreateUserMailingList, NewJob, ResetUserMailingListPassword, Signup,
    };
    use crate::kernel::jobs::coordinator::{MemoryLockTable, RUNNER_LOCK_KEY};
    use crate::kernel::jobs::LogType;
    use crate::kernel::jobs::MemoryJobStore;
    use crate::kernel::jobs::notifications::ChannelNotifications;
    use crate::kernel::jobs::NewJobRecord;
    use crate::kernel::test_dependencies::{member, TestDependencies};
    use crate::kernel::SqlEngine;

    struct Harness {
        store: Arc<MemoryJobStore>,
        deps: TestDependencies,
        locks: MemoryLockTable,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryJobStore::new()),
                deps: TestDependencies::new().with_member(member("spqr2")),
                locks: MemoryLockTable::new(),
            }
        }

        fn runner_with(&self, notifications: ChannelNotifications, poll_timeout: Duration) -> JobRunner {
            let lock = self.locks.acquire(RUNNER_LOCK_KEY).unwrap();
            JobRunner::with_config(
                self.store.clone(),
                Box::new(notifications),
                Box::new(lock),
                self.deps.job_deps(),
                JobRunnerConfig {
                    poll_timeout,
                    runner_id: "testhost 42".to_string(),
                },
            )
        }

        fn runner(&self) -> JobRunner {
            let (_tx, notifications) = ChannelNotifications::channel();
            self.runner_with(notifications, Duration::from_secs(600))
        }

        async fn submit(&self, job: NewJob) -> Job {
            self.store
                .create(job.record().unwrap(), LogEntry::created("test"))
                .await
                .unwrap()
        }

        async fn job(&self, id: JobId) -> Job {
            self.store.get(id).await.unwrap().unwrap()
        }
    }

    fn mysql_job() -> NewJob {
        CreateUserDatabase::new(SqlEngine::MySql, &member("spqr2"))
    }

    #[tokio::test]
    async fn database_job_runs_to_done_without_message() {
        let h = Harness::new();
        let job = h.submit(mysql_job()).await;
        assert_eq!(job.state, JobState::Queued);

        let finished = h.runner().process_candidate(job.job_id).await.unwrap().unwrap();

        assert_eq!(finished.state, JobState::Done);
        assert_eq!(finished.state_message, None);
        assert!(h.deps.databases.has_database(SqlEngine::MySql, "spqr2"));

        let logs = h.store.logs(job.job_id).await.unwrap();
        let last = logs.last().unwrap();
        assert_eq!(last.log_type, LogType::Progress);
        assert_eq!(last.message, "Worker state change: job completed on testhost 42");
    }

    #[tokio::test]
    async fn redelivered_id_executes_once() {
        let h = Harness::new();
        let job = h.submit(mysql_job()).await;
        let runner = h.runner();

        let first = runner.process_candidate(job.job_id).await.unwrap();
        let second = runner.process_candidate(job.job_id).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(h.deps.databases.database_count(), 1);
        assert_eq!(h.deps.notifier.sent_to("spqr2@example.org").len(), 2);
    }

    #[tokio::test]
    async fn unapproved_jobs_are_never_claimed() {
        let h = Harness::new();
        let mut risky = member("spqr2");
        risky.danger = true;
        let job = h.submit(CreateUserDatabase::new(SqlEngine::MySql, &risky)).await;
        assert_eq!(job.state, JobState::Unapproved);

        assert!(h.runner().process_candidate(job.job_id).await.unwrap().is_none());
        assert_eq!(h.job(job.job_id).await.state, JobState::Unapproved);
        assert_eq!(h.deps.databases.database_count(), 0);
    }

    #[tokio::test]
    async fn unexpected_error_fails_job_and_next_job_still_runs() {
        let h = Harness::new();
        h.deps.databases.fail_with("connection refused");
        let broken = h.submit(mysql_job()).await;
        let fine = h.submit(CreateUserMailingList::new(&member("spqr2"), "friends")).await;

        h.runner().process_queued(&CancellationToken::new()).await.unwrap();

        let broken = h.job(broken.job_id).await;
        assert_eq!(broken.state, JobState::Failed);
        assert_eq!(broken.state_message.as_deref(), Some("connection refused"));

        assert_eq!(h.job(fine.job_id).await.state, JobState::Done);
        assert_eq!(h.deps.mailing_lists.lists(), vec!["spqr2-friends".to_string()]);

        let to_admins = h.deps.notifier.sent_to("sysadmins@srcf.net");
        assert_eq!(to_admins.len(), 1);
        assert!(to_admins[0].body.contains("https://control.srcf.net/admin/jobs/1"));
    }

    #[tokio::test]
    async fn panic_in_run_is_contained() {
        let h = Harness::new();
        h.deps.mailing_lists.panic_on_create();
        let job = h.submit(CreateUserMailingList::new(&member("spqr2"), "friends")).await;
        let next = h.submit(mysql_job()).await;

        h.runner().process_queued(&CancellationToken::new()).await.unwrap();

        let job = h.job(job.job_id).await;
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(
            job.state_message.as_deref(),
            Some("panic: list backend exploded creating spqr2-friends")
        );
        assert_eq!(h.job(next.job_id).await.state, JobState::Done);
    }

    #[tokio::test]
    async fn list_password_reset_follows_creation() {
        let h = Harness::new();
        let early = h
            .submit(ResetUserMailingListPassword::new(&member("spqr2"), "friends"))
            .await;
        h.submit(CreateUserMailingList::new(&member("spqr2"), "friends")).await;
        let late = h
            .submit(ResetUserMailingListPassword::new(&member("spqr2"), "friends"))
            .await;

        h.runner().process_queued(&CancellationToken::new()).await.unwrap();

        let early = h.job(early.job_id).await;
        assert_eq!(early.state, JobState::Failed);
        assert_eq!(
            early.state_message.as_deref(),
            Some("Mailing list spqr2-friends does not exist")
        );
        assert_eq!(h.job(late.job_id).await.state, JobState::Done);
        assert_eq!(h.deps.mailing_lists.resets(), vec!["spqr2-friends".to_string()]);
    }

    #[tokio::test]
    async fn business_failure_does_not_page_sysadmins() {
        let h = Harness::new();
        let first = h.submit(mysql_job()).await;
        let second = h.submit(mysql_job()).await;

        h.runner().process_queued(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.job(first.job_id).await.state, JobState::Done);
        let second = h.job(second.job_id).await;
        assert_eq!(second.state, JobState::Failed);
        assert_eq!(
            second.state_message.as_deref(),
            Some("MySQL database spqr2 already exists")
        );
        assert!(h.deps.notifier.sent_to("sysadmins@srcf.net").is_empty());
    }

    #[tokio::test]
    async fn unknown_job_type_fails_only_that_job() {
        let h = Harness::new();
        let record = NewJobRecord::builder()
            .job_type("format_hard_drive")
            .owner(Some("spqr2".to_string()))
            .build();
        let bogus = h.store.create(record, LogEntry::created("test")).await.unwrap();

        let finished = h.runner().process_candidate(bogus.job_id).await.unwrap().unwrap();
        assert_eq!(finished.state, JobState::Failed);
        assert_eq!(
            finished.state_message.as_deref(),
            Some("unknown job type: format_hard_drive")
        );
    }

    #[tokio::test]
    async fn missing_owner_is_recorded_as_failure() {
        let h = Harness::new();
        let job = h.submit(CreateUserDatabase::new(SqlEngine::Postgres, &member("gone1"))).await;

        let finished = h.runner().process_candidate(job.job_id).await.unwrap().unwrap();
        assert_eq!(finished.state, JobState::Failed);
        assert_eq!(finished.state_message.as_deref(), Some("member gone1 not found"));
    }

    #[tokio::test]
    async fn retried_job_runs_again_with_the_same_args() {
        let h = Harness::new();
        h.deps.databases.fail_with("connection refused");
        let job = h.submit(mysql_job()).await;
        let runner = h.runner();

        runner.process_candidate(job.job_id).await.unwrap();
        assert_eq!(h.job(job.job_id).await.state, JobState::Failed);

        h.deps.databases.clear_failure();
        let retry = StateChange::for_action(JobAction::Retry, None, None);
        let requeued = h.store.transition(job.job_id, retry).await.unwrap();
        assert_eq!(requeued.state, JobState::Queued);
        assert_eq!(requeued.args, job.args);

        let finished = runner.process_candidate(job.job_id).await.unwrap().unwrap();
        assert_eq!(finished.state, JobState::Done);
        assert!(h.deps.databases.has_database(SqlEngine::MySql, "spqr2"));
    }

    #[tokio::test]
    async fn administrator_abort_during_run_is_kept() {
        let h = Harness::new();
        let job = h.submit(mysql_job()).await;
        let runner = h.runner();

        let claimed = h.store.claim(job.job_id, "..on testhost 42").await.unwrap().unwrap();
        let abort = StateChange::for_action(JobAction::Abort, Some("stuck".to_string()), None);
        h.store.transition(job.job_id, abort).await.unwrap();

        let execution = Execution::Finished(Outcome::done());
        let finished = runner.dispatch.finish(&claimed, &execution).await.unwrap();

        assert_eq!(finished.state, JobState::Failed);
        assert_eq!(finished.state_message.as_deref(), Some("stuck"));
        let logs = h.store.logs(job.job_id).await.unwrap();
        assert_eq!(logs.last().unwrap().level, LogLevel::Warning);
    }

    #[tokio::test]
    async fn mail_failures_never_undo_a_persisted_state() {
        let h = Harness::new();
        h.deps.notifier.fail_sends();
        let job = h.submit(Signup::new("xyz99", "Ada", "Lovelace", "ada@example.org", false)).await;

        let finished = h.runner().process_candidate(job.job_id).await.unwrap().unwrap();
        // The credentials mail fails inside run; the completion mail fails
        // after the state is written.
        assert_eq!(finished.state, JobState::Failed);
        assert_eq!(finished.state_message.as_deref(), Some("mail server unreachable"));
        assert_eq!(h.job(job.job_id).await.state, JobState::Failed);
    }

    #[tokio::test]
    async fn signup_completion_goes_to_the_signup_address() {
        let h = Harness::new();
        let job = h.submit(Signup::new("xyz99", "Ada", "Lovelace", "ada@example.org", false)).await;

        h.runner().process_candidate(job.job_id).await.unwrap();

        let sent = h.deps.notifier.sent_to("ada@example.org");
        assert_eq!(sent.len(), 2);
        assert!(sent[1].subject.starts_with("[SRCF Control Panel] Job #1 done -- Signup: xyz99"));
    }

    #[tokio::test]
    async fn loop_discards_duplicate_notifications() {
        let h = Harness::new();
        let (tx, notifications) = ChannelNotifications::channel();
        let runner = h.runner_with(notifications, Duration::from_secs(600));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(runner.run(shutdown.clone()));

        let job = h.submit(mysql_job()).await;
        tx.send(job.job_id).unwrap();
        tx.send(job.job_id).unwrap();

        let mut state = JobState::Queued;
        for _ in 0..100 {
            state = h.job(job.job_id).await.state;
            if state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Give the second notification a chance to be handled.
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(state, JobState::Done);
        assert_eq!(h.deps.databases.database_count(), 1);
    }

    #[tokio::test]
    async fn catch_up_scan_runs_jobs_queued_while_offline() {
        let h = Harness::new();
        let a = h.submit(mysql_job()).await;
        let b = h.submit(CreateUserMailingList::new(&member("spqr2"), "friends")).await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.runner().run(shutdown.clone()));

        for _ in 0..100 {
            if h.job(b.job_id).await.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(h.job(a.job_id).await.state, JobState::Done);
        assert_eq!(h.job(b.job_id).await.state, JobState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_lock_stops_the_runner() {
        let h = Harness::new();
        let (_tx, notifications) = ChannelNotifications::channel();
        let runner = h.runner_with(notifications, Duration::from_secs(1));
        h.locks.revoke(RUNNER_LOCK_KEY);

        let result = runner.run(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(RunnerError::Coordinator(CoordinatorError::LockLost { .. }))
        ));
    }

    #[test]
    fn error_summary_is_one_line() {
        let e = anyhow::anyhow!("first line\nsecond line").context("creating database");
        assert_eq!(summarize_error(&e), "creating database: first line");
    }
}
