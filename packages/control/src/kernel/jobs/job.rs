//! Job record model.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::JobId;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Unapproved,
    Queued,
    Running,
    Done,
    Failed,
    Withdrawn,
}

impl JobState {
    /// All states, in the order the database enum declares them.
    pub const ALL: [JobState; 6] = [
        JobState::Unapproved,
        JobState::Queued,
        JobState::Running,
        JobState::Done,
        JobState::Failed,
        JobState::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Unapproved => "unapproved",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Withdrawn => "withdrawn",
        }
    }

    /// Terminal for the current execution attempt. `done` and `failed` can
    /// still be re-queued by an administrator.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Withdrawn)
    }

    /// Initial state of a freshly submitted job.
    pub fn initial(require_approval: bool) -> Self {
        if require_approval {
            JobState::Unapproved
        } else {
            JobState::Queued
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown job state: {}", s))
    }
}

// ============================================================================
// Job Model
// ============================================================================

/// Variant-specific arguments. Keys and values are always strings; each job
/// type owns the codec for its own keys.
pub type JobArgs = BTreeMap<String, String>;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    #[sqlx(rename = "type")]
    pub job_type: String,
    /// Crsid of the requesting member. `None` for signups.
    pub owner: Option<String>,
    pub state: JobState,
    pub state_message: Option<String>,
    pub args: Json<JobArgs>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn args(&self) -> &JobArgs {
        &self.args.0
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.0.get(key).map(String::as_str)
    }

    /// Group name the job acts on, for jobs scoped to a society.
    pub fn society(&self) -> Option<&str> {
        self.arg("society")
    }
}

/// A job about to be inserted. The store assigns the id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewJobRecord {
    pub job_type: String,
    #[builder(default)]
    pub owner: Option<String>,
    #[builder(default = JobState::Queued)]
    pub state: JobState,
    #[builder(default)]
    pub args: JobArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_round_trip() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("cancelled".parse::<JobState>().is_err());
    }

    #[test]
    fn initial_state_follows_approval() {
        assert_eq!(JobState::initial(true), JobState::Unapproved);
        assert_eq!(JobState::initial(false), JobState::Queued);
    }

    #[test]
    fn only_finished_states_are_terminal() {
        let terminal: Vec<_> = JobState::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![JobState::Done, JobState::Failed, JobState::Withdrawn]
        );
    }

    #[test]
    fn new_record_defaults_to_queued() {
        let record = NewJobRecord::builder()
            .job_type("create_mysql_user_database")
            .owner(Some("spqr2".to_string()))
            .build();
        assert_eq!(record.state, JobState::Queued);
        assert!(record.args.is_empty());
    }

    #[test]
    fn state_lists_bind_as_the_enum_array() {
        use sqlx::postgres::PgHasArrayType;
        use sqlx::TypeInfo;

        assert_eq!(JobState::array_type_info().name(), "_job_state");
    }
}
