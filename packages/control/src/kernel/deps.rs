//! Job dependencies (using traits for testability)
//!
//! This module provides the dependency container handed to every job's
//! `run` and to the submission service. All external systems sit behind
//! trait objects so tests can swap in recording doubles.

use std::sync::Arc;

use super::notifier::{Notification, Sender};
use super::{
    BaseAccounts, BaseDirectory, BaseMailingLists, BaseNotifier, BaseSqlDatabases, BaseVhosts,
};
use crate::common::JobId;

// =============================================================================
// MailSettings
// =============================================================================

/// Who mail comes from, who the administrators are, and where the admin
/// pages live.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub from: Sender,
    pub sysadmins: Sender,
    pub control_url: String,
}

impl MailSettings {
    pub fn admin_job_url(&self, id: JobId) -> String {
        format!("{}/admin/jobs/{}", self.control_url.trim_end_matches('/'), id)
    }

    /// A message from the control panel to `recipients`, replies going to
    /// the sysadmins.
    pub fn message(
        &self,
        recipients: Vec<Sender>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Notification {
        Notification {
            sender: self.from.clone(),
            recipients,
            subject: subject.into(),
            body: body.into(),
            reply_to: Some(self.sysadmins.clone()),
        }
    }

    /// A message to the sysadmins themselves.
    pub fn to_sysadmins(&self, subject: impl Into<String>, body: impl Into<String>) -> Notification {
        Notification {
            sender: self.from.clone(),
            recipients: vec![self.sysadmins.clone()],
            subject: subject.into(),
            body: body.into(),
            reply_to: None,
        }
    }
}

// =============================================================================
// JobDeps
// =============================================================================

#[derive(Clone)]
pub struct JobDeps {
    pub directory: Arc<dyn BaseDirectory>,
    pub notifier: Arc<dyn BaseNotifier>,
    pub accounts: Arc<dyn BaseAccounts>,
    pub mailing_lists: Arc<dyn BaseMailingLists>,
    pub databases: Arc<dyn BaseSqlDatabases>,
    pub vhosts: Arc<dyn BaseVhosts>,
    pub mail: MailSettings,
}

impl JobDeps {
    pub fn new(
        directory: Arc<dyn BaseDirectory>,
        notifier: Arc<dyn BaseNotifier>,
        accounts: Arc<dyn BaseAccounts>,
        mailing_lists: Arc<dyn BaseMailingLists>,
        databases: Arc<dyn BaseSqlDatabases>,
        vhosts: Arc<dyn BaseVhosts>,
        mail: MailSettings,
    ) -> Self {
        Self {
            directory,
            notifier,
            accounts,
            mailing_lists,
            databases,
            vhosts,
            mail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_url_ignores_trailing_slash() {
        let mail = MailSettings {
            from: Sender::address_only("control@srcf.net"),
            sysadmins: Sender::address_only("sysadmins@srcf.net"),
            control_url: "https://control.srcf.net/".to_string(),
        };
        assert_eq!(
            mail.admin_job_url(JobId::new(42)),
            "https://control.srcf.net/admin/jobs/42"
        );
    }
}
