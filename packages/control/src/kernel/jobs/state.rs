//! Lifecycle state machine for job records.
//!
//! Three actors move a job between states: the submitter (withdraw), an
//! administrator (approve, reject, cancel, abort, repeat, retry) and the
//! worker (dequeue, succeed, fail). Every allowed move is listed in
//! [`JobAction::transition`]; anything else is rejected without mutation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::JobState;
use super::log::LogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Submitter,
    Administrator,
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Approve,
    Reject,
    Withdraw,
    Cancel,
    Dequeue,
    Succeed,
    Fail,
    Abort,
    Repeat,
    Retry,
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: JobAction,
    pub actor: Actor,
    pub from: &'static [JobState],
    pub to: JobState,
    /// Past participle used in audit messages ("Job approved by ...").
    pub display: &'static str,
}

impl JobAction {
    pub const ALL: [JobAction; 10] = [
        JobAction::Approve,
        JobAction::Reject,
        JobAction::Withdraw,
        JobAction::Cancel,
        JobAction::Dequeue,
        JobAction::Succeed,
        JobAction::Fail,
        JobAction::Abort,
        JobAction::Repeat,
        JobAction::Retry,
    ];

    /// Actions exposed to administrators on the control surface.
    pub const ADMIN: [JobAction; 6] = [
        JobAction::Approve,
        JobAction::Reject,
        JobAction::Cancel,
        JobAction::Abort,
        JobAction::Repeat,
        JobAction::Retry,
    ];

    pub fn transition(self) -> Transition {
        use JobState::*;

        let (actor, from, to, display): (Actor, &'static [JobState], JobState, &'static str) =
            match self {
                JobAction::Approve => (Actor::Administrator, &[Unapproved], Queued, "approved"),
                JobAction::Reject => (Actor::Administrator, &[Unapproved], Withdrawn, "rejected"),
                JobAction::Withdraw => (Actor::Submitter, &[Unapproved, Queued], Withdrawn, "withdrawn"),
                JobAction::Cancel => (Actor::Administrator, &[Queued], Failed, "cancelled"),
                JobAction::Dequeue => (Actor::Worker, &[Queued], Running, "started"),
                JobAction::Succeed => (Actor::Worker, &[Running], Done, "completed"),
                JobAction::Fail => (Actor::Worker, &[Running], Failed, "failed"),
                JobAction::Abort => (Actor::Administrator, &[Running], Failed, "aborted"),
                JobAction::Repeat => (Actor::Administrator, &[Done], Queued, "repeated"),
                JobAction::Retry => (Actor::Administrator, &[Failed], Queued, "retried"),
            };

        Transition {
            action: self,
            actor,
            from,
            to,
            display,
        }
    }

    /// Target state when applied to `from`, or `None` if the action is not
    /// allowed there.
    pub fn apply(self, from: JobState) -> Option<JobState> {
        let transition = self.transition();
        transition.from.contains(&from).then_some(transition.to)
    }

    pub fn actor(self) -> Actor {
        self.transition().actor
    }

    /// Name used in URLs and on the admin surface.
    pub fn as_str(self) -> &'static str {
        match self {
            JobAction::Approve => "approve",
            JobAction::Reject => "reject",
            JobAction::Withdraw => "withdraw",
            JobAction::Cancel => "cancel",
            JobAction::Dequeue => "dequeue",
            JobAction::Succeed => "succeed",
            JobAction::Fail => "fail",
            JobAction::Abort => "abort",
            JobAction::Repeat => "repeat",
            JobAction::Retry => "retry",
        }
    }

    pub fn parse_admin(name: &str) -> Option<JobAction> {
        JobAction::ADMIN.into_iter().find(|a| a.as_str() == name)
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested state change, applied by the store as a single conditional
/// update: it only succeeds while the job is still in one of `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub from: &'static [JobState],
    pub to: JobState,
    /// Replaces `state_message`; `None` clears it.
    pub message: Option<String>,
    pub log: Option<LogEntry>,
}

impl StateChange {
    pub fn for_action(action: JobAction, message: Option<String>, log: Option<LogEntry>) -> Self {
        let transition = action.transition();
        Self {
            from: transition.from,
            to: transition.to,
            message,
            log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobState::*;

    /// The complete set of allowed (state, action) pairs.
    fn allowed() -> Vec<(JobState, JobAction, JobState)> {
        vec![
            (Unapproved, JobAction::Approve, Queued),
            (Unapproved, JobAction::Reject, Withdrawn),
            (Unapproved, JobAction::Withdraw, Withdrawn),
            (Queued, JobAction::Withdraw, Withdrawn),
            (Queued, JobAction::Cancel, Failed),
            (Queued, JobAction::Dequeue, Running),
            (Running, JobAction::Succeed, Done),
            (Running, JobAction::Fail, Failed),
            (Running, JobAction::Abort, Failed),
            (Done, JobAction::Repeat, Queued),
            (Failed, JobAction::Retry, Queued),
        ]
    }

    #[test]
    fn every_pair_outside_the_table_is_rejected() {
        let allowed = allowed();
        for state in JobState::ALL {
            for action in JobAction::ALL {
                let expected = allowed
                    .iter()
                    .find(|(s, a, _)| *s == state && *a == action)
                    .map(|(_, _, to)| *to);
                assert_eq!(
                    action.apply(state),
                    expected,
                    "{} from {}",
                    action,
                    state
                );
            }
        }
    }

    #[test]
    fn unapproved_job_cannot_run_retry_or_cancel() {
        assert_eq!(JobAction::Retry.apply(Unapproved), None);
        assert_eq!(JobAction::Dequeue.apply(Unapproved), None);
        assert_eq!(JobAction::Cancel.apply(Unapproved), None);
        assert_eq!(JobAction::Approve.apply(Unapproved), Some(Queued));
    }

    #[test]
    fn withdrawn_is_final() {
        for action in JobAction::ALL {
            assert_eq!(action.apply(Withdrawn), None);
        }
    }

    #[test]
    fn actors_match_the_surface_they_belong_to() {
        assert_eq!(JobAction::Withdraw.actor(), Actor::Submitter);
        assert_eq!(JobAction::Dequeue.actor(), Actor::Worker);
        for action in JobAction::ADMIN {
            assert_eq!(action.actor(), Actor::Administrator);
        }
    }

    #[test]
    fn parses_admin_actions_only() {
        assert_eq!(JobAction::parse_admin("retry"), Some(JobAction::Retry));
        assert_eq!(JobAction::parse_admin("abort"), Some(JobAction::Abort));
        assert_eq!(JobAction::parse_admin("dequeue"), None);
        assert_eq!(JobAction::parse_admin("withdraw"), None);
    }

    #[test]
    fn state_change_takes_sources_from_table() {
        let change = StateChange::for_action(JobAction::Withdraw, Some("bye".into()), None);
        assert_eq!(change.from, &[Unapproved, Queued]);
        assert_eq!(change.to, Withdrawn);
        assert_eq!(change.message.as_deref(), Some("bye"));
    }
}
