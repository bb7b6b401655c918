//! Submission and control surface over the job store.
//!
//! Everything a submitter or administrator does to a job goes through
//! here; the runner is the only other writer.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use super::job::{Job, JobState};
use super::log::{JobLog, LogEntry};
use super::state::{Actor, JobAction, StateChange};
use super::store::{JobStore, StoreError, TransitionError};
use crate::common::JobId;
use crate::domains::jobs::args::decode_list;
use crate::domains::jobs::{ArgsError, NewJob};
use crate::kernel::JobDeps;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Args(#[from] ArgsError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("{0} is not an administrator action")]
    NotAdminAction(JobAction),

    #[error("job {id} does not belong to {crsid}")]
    NotOwner { id: JobId, crsid: String },

    #[error("directory lookup failed: {0:#}")]
    Directory(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Where a submission came from, for the audit log.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct SubmissionContext {
    pub remote_addr: String,
    pub host: String,
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    deps: JobDeps,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, deps: JobDeps) -> Self {
        Self { store, deps }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Record a new job. Safe jobs are queued immediately; the rest wait
    /// for approval and the sysadmins are asked to look at them.
    pub async fn submit(&self, job: NewJob, context: &SubmissionContext) -> Result<Job> {
        let record = job.record()?;
        let submitter = record
            .owner
            .clone()
            .or_else(|| record.args.get("crsid").cloned())
            .unwrap_or_else(|| "anonymous".to_string());

        let created = LogEntry::created(format!(
            "Job submitted by {} from {} via {}.",
            submitter, context.remote_addr, context.host
        ));
        let created = self.store.create(record, created).await?;

        info!(
            job_id = %created.job_id,
            job_type = %created.job_type,
            state = %created.state,
            submitter = %submitter,
            "job submitted"
        );

        if created.state == JobState::Unapproved {
            self.request_approval(&created, &job).await;
        }
        Ok(created)
    }

    async fn request_approval(&self, job: &Job, new_job: &NewJob) {
        let mail = &self.deps.mail;
        let description = new_job.kind.description();

        let mut body = format!(
            "Job #{} requires approval:\n\n    {}\n\nArguments:\n",
            job.job_id, description
        );
        body.push_str(&format!("    type: {}\n", job.job_type));
        if let Some(owner) = &job.owner {
            body.push_str(&format!("    owner: {}\n", owner));
        }
        for (key, value) in job.args() {
            body.push_str(&format!("    {}: {}\n", key, value));
        }

        let warnings = self.danger_warnings(job).await;
        if !warnings.is_empty() {
            body.push_str("\nWarnings:\n");
            for warning in &warnings {
                body.push_str(&format!("    {}\n", warning));
            }
        }
        body.push_str(&format!("\n{}\n", mail.admin_job_url(job.job_id)));

        let subject = format!(
            "[SRCF Control Panel] Job #{} {} -- {}",
            job.job_id, job.state, description
        );
        if let Err(e) = self.deps.notifier.notify(&mail.to_sysadmins(subject, body)).await {
            warn!(job_id = %job.job_id, error = %e, "failed to request approval");
        }
    }

    /// Danger flags on everyone and everything the job touches.
    async fn danger_warnings(&self, job: &Job) -> Vec<String> {
        let directory = &self.deps.directory;
        let mut crsids: Vec<String> = job.owner.iter().cloned().collect();
        for key in ["crsid", "target_member"] {
            if let Some(crsid) = job.arg(key) {
                crsids.push(crsid.to_string());
            }
        }
        if let Some(admins) = job.arg("admins") {
            crsids.extend(decode_list(admins));
        }
        crsids.sort();
        crsids.dedup();

        let mut warnings = Vec::new();
        match directory.get_members(&crsids).await {
            Ok(members) => warnings.extend(
                members
                    .iter()
                    .filter(|m| m.danger)
                    .map(|m| format!("member {} is flagged as dangerous", m.crsid)),
            ),
            Err(e) => warn!(job_id = %job.job_id, error = %e, "failed to check members for danger flags"),
        }

        if let Some(society) = job.society() {
            match directory.get_society(society).await {
                Ok(Some(s)) if s.danger => {
                    warnings.push(format!("society {} is flagged as dangerous", s.society))
                }
                Ok(_) => {}
                Err(e) => warn!(job_id = %job.job_id, error = %e, "failed to check society for danger flag"),
            }
        }
        warnings
    }

    // =========================================================================
    // Administrative control
    // =========================================================================

    /// Apply an administrator action. Actions that move a job into
    /// `withdrawn` or `failed` record `message`, or a default naming the
    /// action; the others clear the state message.
    pub async fn admin_action(
        &self,
        id: JobId,
        action: JobAction,
        admin: &str,
        message: Option<&str>,
    ) -> Result<Job> {
        let transition = action.transition();
        if transition.actor != Actor::Administrator {
            return Err(ServiceError::NotAdminAction(action));
        }

        let message = match transition.to {
            JobState::Withdrawn | JobState::Failed => Some(
                non_blank(message)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Job {} by sysadmins", transition.display)),
            ),
            _ => None,
        };

        let log = LogEntry::progress(format!(
            "Admin state change: job {} by {}",
            transition.display, admin
        ));
        let change = StateChange::for_action(action, message, Some(log));
        let job = self.store.transition(id, change).await?;

        info!(job_id = %id, action = %action, admin = %admin, state = %job.state, "admin state change");
        Ok(job)
    }

    pub async fn approve(&self, id: JobId, admin: &str) -> Result<Job> {
        self.admin_action(id, JobAction::Approve, admin, None).await
    }

    pub async fn reject(&self, id: JobId, admin: &str, reason: Option<&str>) -> Result<Job> {
        self.admin_action(id, JobAction::Reject, admin, reason).await
    }

    pub async fn cancel(&self, id: JobId, admin: &str, reason: Option<&str>) -> Result<Job> {
        self.admin_action(id, JobAction::Cancel, admin, reason).await
    }

    /// Marks a running job failed. The runner does not stop; whatever it
    /// produces afterwards is discarded.
    pub async fn abort(&self, id: JobId, admin: &str, reason: Option<&str>) -> Result<Job> {
        self.admin_action(id, JobAction::Abort, admin, reason).await
    }

    pub async fn repeat(&self, id: JobId, admin: &str) -> Result<Job> {
        self.admin_action(id, JobAction::Repeat, admin, None).await
    }

    pub async fn retry(&self, id: JobId, admin: &str) -> Result<Job> {
        self.admin_action(id, JobAction::Retry, admin, None).await
    }

    /// Withdraw a job that has not started, on behalf of its owner or, for
    /// society jobs, any current admin of that society.
    ///
    /// `signup` jobs have no owner and can only be rejected by sysadmins.
    pub async fn withdraw(&self, id: JobId, crsid: &str, reason: Option<&str>) -> Result<Job> {
        let job = self.get(id).await?.ok_or(ServiceError::NotFound(id))?;
        if !self.may_withdraw(&job, crsid).await? {
            return Err(ServiceError::NotOwner {
                id,
                crsid: crsid.to_string(),
            });
        }

        let message = non_blank(reason)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Job withdrawn by {}", crsid));
        let log = LogEntry::progress(format!("User state change: job withdrawn by {}", crsid));
        let change = StateChange::for_action(JobAction::Withdraw, Some(message), Some(log));
        let job = self.store.transition(id, change).await?;

        info!(job_id = %id, crsid = %crsid, "job withdrawn");
        Ok(job)
    }

    async fn may_withdraw(&self, job: &Job, crsid: &str) -> Result<bool> {
        if job.owner.as_deref() == Some(crsid) {
            return Ok(true);
        }
        let Some(name) = job.society() else {
            return Ok(false);
        };
        let society = self
            .deps
            .directory
            .get_society(name)
            .await
            .map_err(ServiceError::Directory)?;
        Ok(society.is_some_and(|s| s.is_admin(crsid)))
    }

    /// Attach a free-text note. Blank notes are dropped.
    pub async fn add_note(&self, id: JobId, admin: &str, text: &str) -> Result<Option<JobLog>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        if self.get(id).await?.is_none() {
            return Err(ServiceError::NotFound(id));
        }
        let entry = LogEntry::note(format!("Note added by {}", admin), text);
        Ok(Some(self.store.append_log(id, entry).await?))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.store.get(id).await?)
    }

    pub async fn logs(&self, id: JobId) -> Result<Vec<JobLog>> {
        Ok(self.store.logs(id).await?)
    }

    pub async fn list_by_owner(&self, crsid: &str) -> Result<Vec<Job>> {
        Ok(self.store.list_by_owner(crsid).await?)
    }

    pub async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        Ok(self.store.list_by_state(state).await?)
    }

    pub async fn list_by_society(&self, society: &str) -> Result<Vec<Job>> {
        Ok(self.store.list_by_society(society).await?)
    }

    pub async fn count_by_state(&self) -> Result<Vec<(JobState, i64)>> {
        Ok(self.store.count_by_state().await?)
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}
