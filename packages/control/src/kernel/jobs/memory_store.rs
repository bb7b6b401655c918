//! In-memory job store for tests.
//!
//! Mirrors the conditional-update semantics of [`PostgresJobStore`] under a
//! single lock, and publishes queued job ids to any subscribed
//! [`ChannelNotifications`], standing in for the database trigger.
//!
//! [`PostgresJobStore`]: super::PostgresJobStore

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use tokio::sync::mpsc;

use super::job::{Job, JobState, NewJobRecord};
use super::log::{JobLog, LogEntry};
use super::notifications::ChannelNotifications;
use super::state::StateChange;
use super::store::{JobStore, StoreError, TransitionError};
use crate::common::JobId;

#[derive(Default)]
struct Tables {
    jobs: Vec<Job>,
    logs: Vec<JobLog>,
}

impl Tables {
    fn find_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.job_id == id)
    }

    fn push_log(&mut self, id: JobId, entry: LogEntry) -> JobLog {
        let log = JobLog {
            log_id: self.logs.len() as i64 + 1,
            job_id: id,
            time: Utc::now(),
            log_type: entry.log_type,
            level: entry.level,
            message: entry.message,
            raw: entry.raw,
        };
        self.logs.push(log.clone());
        log
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    tables: RwLock<Tables>,
    subscribers: RwLock<Vec<mpsc::UnboundedSender<JobId>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive the ids of jobs as they become queued.
    pub fn subscribe(&self) -> ChannelNotifications {
        let (tx, notifications) = ChannelNotifications::channel();
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        notifications
    }

    fn publish_queued(&self, id: JobId) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(id).is_ok());
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, record: NewJobRecord, created: LogEntry) -> Result<Job, StoreError> {
        let job = {
            let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
            let job = Job {
                job_id: JobId::new(tables.jobs.len() as i64 + 1),
                job_type: record.job_type,
                owner: record.owner,
                state: record.state,
                state_message: None,
                args: Json(record.args),
                created_at: Utc::now(),
            };
            tables.jobs.push(job.clone());
            tables.push_log(job.job_id, created);
            job
        };

        if job.state == JobState::Queued {
            self.publish_queued(job.job_id);
        }
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables.jobs.iter().find(|j| j.job_id == id).cloned())
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .jobs
            .iter()
            .filter(|j| j.state == state)
            .cloned()
            .collect())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Job>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .jobs
            .iter()
            .rev()
            .filter(|j| j.owner.as_deref() == Some(owner))
            .cloned()
            .collect())
    }

    async fn list_by_society(&self, society: &str) -> Result<Vec<Job>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .jobs
            .iter()
            .rev()
            .filter(|j| j.society() == Some(society))
            .cloned()
            .collect())
    }

    async fn count_by_state(&self) -> Result<Vec<(JobState, i64)>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(JobState::ALL
            .into_iter()
            .map(|state| {
                let count = tables.jobs.iter().filter(|j| j.state == state).count() as i64;
                (state, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect())
    }

    async fn transition(&self, id: JobId, change: StateChange) -> Result<Job, TransitionError> {
        let job = {
            let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
            let job = tables.find_mut(id).ok_or(TransitionError::NotFound(id))?;
            if !change.from.contains(&job.state) {
                return Err(TransitionError::InvalidState {
                    id,
                    actual: job.state,
                    expected: change.from,
                });
            }
            job.state = change.to;
            job.state_message = change.message;
            let job = job.clone();
            if let Some(entry) = change.log {
                tables.push_log(id, entry);
            }
            job
        };

        if job.state == JobState::Queued {
            self.publish_queued(id);
        }
        Ok(job)
    }

    async fn claim(&self, id: JobId, running_message: &str) -> Result<Option<Job>, StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        Ok(tables.find_mut(id).and_then(|job| {
            (job.state == JobState::Queued).then(|| {
                job.state = JobState::Running;
                job.state_message = Some(running_message.to_string());
                job.clone()
            })
        }))
    }

    async fn append_log(&self, id: JobId, entry: LogEntry) -> Result<JobLog, StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        Ok(tables.push_log(id, entry))
    }

    async fn logs(&self, id: JobId) -> Result<Vec<JobLog>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .logs
            .iter()
            .filter(|l| l.job_id == id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::state::JobAction;

    fn record(state: JobState) -> NewJobRecord {
        NewJobRecord::builder()
            .job_type("create_mysql_user_database")
            .owner(Some("spqr2".to_string()))
            .state(state)
            .build()
    }

    #[tokio::test]
    async fn create_assigns_increasing_ids_and_logs_creation() {
        let store = MemoryJobStore::new();
        let a = store.create(record(JobState::Queued), LogEntry::created("a")).await.unwrap();
        let b = store.create(record(JobState::Queued), LogEntry::created("b")).await.unwrap();
        assert!(a.job_id < b.job_id);

        let logs = store.logs(b.job_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "b");
    }

    #[tokio::test]
    async fn claim_only_succeeds_once() {
        let store = MemoryJobStore::new();
        let job = store.create(record(JobState::Queued), LogEntry::created("x")).await.unwrap();

        let first = store.claim(job.job_id, "..on test").await.unwrap();
        let second = store.claim(job.job_id, "..on test").await.unwrap();

        assert_eq!(first.unwrap().state, JobState::Running);
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn rejected_transition_leaves_job_untouched() {
        let store = MemoryJobStore::new();
        let job = store.create(record(JobState::Unapproved), LogEntry::created("x")).await.unwrap();

        let change = StateChange::for_action(JobAction::Retry, None, Some(LogEntry::progress("no")));
        let err = store.transition(job.job_id, change).await.unwrap_err();

        assert!(matches!(err, TransitionError::InvalidState { actual: JobState::Unapproved, .. }));
        assert_eq!(store.get(job.job_id).await.unwrap().unwrap().state, JobState::Unapproved);
        assert_eq!(store.logs(job.job_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscribers_hear_about_queued_jobs_only() {
        let store = MemoryJobStore::new();
        let mut notifications = store.subscribe();

        let held = store.create(record(JobState::Unapproved), LogEntry::created("x")).await.unwrap();
        assert!(notifications.try_next().is_none());

        let change = StateChange::for_action(JobAction::Approve, None, None);
        store.transition(held.job_id, change).await.unwrap();
        assert_eq!(notifications.try_next(), Some(held.job_id));
    }

    #[tokio::test]
    async fn counts_only_populated_states() {
        let store = MemoryJobStore::new();
        store.create(record(JobState::Queued), LogEntry::created("x")).await.unwrap();
        store.create(record(JobState::Queued), LogEntry::created("y")).await.unwrap();
        store.create(record(JobState::Unapproved), LogEntry::created("z")).await.unwrap();

        let counts = store.count_by_state().await.unwrap();
        assert_eq!(counts, vec![(JobState::Unapproved, 1), (JobState::Queued, 2)]);
    }
}
