//! The closed catalogue of job kinds.
//!
//! A stored job is generic: a type tag plus a string argument map. This
//! module turns that into a typed value in two explicit phases. `decode`
//! validates the args against the variant's codec, then `resolve` looks up
//! every member or society the job refers to. Only a fully resolved job
//! can run.

pub mod actions;
pub mod args;
pub mod member;
pub mod society;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::domains::directory::{Member, Society};
use crate::kernel::jobs::{Job, JobArgs, JobState, NewJobRecord};
use crate::kernel::{BaseDirectory, JobDeps, SqlEngine};

pub use member::{
    CreateUserDatabase, CreateUserMailingList, Reactivate, RemoveUserVhost, ResetUserDatabasePassword,
    ResetUserMailingListPassword, ResetUserPassword, Signup, UpdateEmailAddress, AddUserVhost,
};
pub use society::{
    AddSocietyVhost, AdminAction, ChangeSocietyAdmin, ChangeSocietyVhostDocroot, CreateSociety,
    CreateSocietyDatabase, CreateSocietyMailingList, RemoveSocietyVhost,
    ResetSocietyDatabasePassword, ResetSocietyMailingListPassword, UpdateSocietyRoleEmail,
};

// =============================================================================
// Errors and outcomes
// =============================================================================

/// Stored job data that does not decode. Never expected in normal
/// operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("unknown job type: {0}")]
    UnknownType(String),

    #[error("{job_type}: missing argument '{key}'")]
    Missing {
        job_type: &'static str,
        key: &'static str,
    },

    #[error("{job_type}: malformed argument '{key}': {value:?}")]
    Malformed {
        job_type: &'static str,
        key: &'static str,
        value: String,
    },

    #[error("{job_type}: job has no owner")]
    MissingOwner { job_type: &'static str },
}

/// A member or society the job refers to could not be looked up.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("member {0} not found")]
    MemberNotFound(String),

    #[error("society {0} not found")]
    SocietyNotFound(String),

    #[error("directory lookup failed: {0}")]
    Directory(#[from] anyhow::Error),
}

/// Result of a job that ran to completion, successfully or not.
///
/// Errors returned from `run` are for the unexpected; anything a job can
/// anticipate is reported as `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done(Option<String>),
    Failed(String),
}

impl Outcome {
    pub fn done() -> Self {
        Outcome::Done(None)
    }

    pub fn done_with(message: impl Into<String>) -> Self {
        Outcome::Done(Some(message.into()))
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Outcome::Failed(message.into())
    }

    pub fn state(&self) -> JobState {
        match self {
            Outcome::Done(_) => JobState::Done,
            Outcome::Failed(_) => JobState::Failed,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Done(message) => message.as_deref(),
            Outcome::Failed(message) => Some(message),
        }
    }
}

// =============================================================================
// Variant contract
// =============================================================================

/// A decoded, not yet resolved, job.
#[async_trait]
pub trait JobVariant: fmt::Debug + Send + Sync {
    /// Type tag stored in `jobs.type`.
    fn job_type(&self) -> &'static str;

    fn to_args(&self) -> JobArgs;

    /// One line shown in listings and mail subjects.
    fn description(&self) -> String;

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError>;
}

/// A job with every reference looked up, ready to run.
#[async_trait]
pub trait ResolvedJob: Send + Sync {
    /// Perform the job's side effects.
    ///
    /// Must check the current external state before each step, and return
    /// `Outcome::Failed` rather than redo something that cannot safely be
    /// repeated.
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome>;
}

// =============================================================================
// Catalogue
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Signup(Signup),
    Reactivate(Reactivate),
    UpdateEmailAddress(UpdateEmailAddress),
    ResetUserPassword(ResetUserPassword),
    CreateUserMailingList(CreateUserMailingList),
    ResetUserMailingListPassword(ResetUserMailingListPassword),
    CreateUserDatabase(CreateUserDatabase),
    ResetUserDatabasePassword(ResetUserDatabasePassword),
    AddUserVhost(AddUserVhost),
    RemoveUserVhost(RemoveUserVhost),
    CreateSociety(CreateSociety),
    ChangeSocietyAdmin(ChangeSocietyAdmin),
    UpdateSocietyRoleEmail(UpdateSocietyRoleEmail),
    CreateSocietyMailingList(CreateSocietyMailingList),
    ResetSocietyMailingListPassword(ResetSocietyMailingListPassword),
    CreateSocietyDatabase(CreateSocietyDatabase),
    ResetSocietyDatabasePassword(ResetSocietyDatabasePassword),
    AddSocietyVhost(AddSocietyVhost),
    ChangeSocietyVhostDocroot(ChangeSocietyVhostDocroot),
    RemoveSocietyVhost(RemoveSocietyVhost),
}

impl JobKind {
    /// Every type tag the catalogue knows.
    pub const TAGS: [&'static str; 24] = [
        "signup",
        "reactivate",
        "update_email_address",
        "reset_user_password",
        "create_user_mailing_list",
        "reset_user_mailing_list_password",
        "create_mysql_user_database",
        "reset_mysql_user_password",
        "create_postgres_user_database",
        "reset_postgres_user_password",
        "add_user_vhost",
        "remove_user_vhost",
        "create_society",
        "change_society_admin",
        "update_society_role_email",
        "create_society_mailing_list",
        "reset_society_mailing_list_password",
        "create_mysql_society_database",
        "reset_mysql_society_password",
        "create_postgres_society_database",
        "reset_postgres_society_password",
        "add_society_vhost",
        "change_society_vhost_docroot",
        "remove_society_vhost",
    ];

    /// Decode a stored job into its typed variant.
    pub fn decode(job_type: &str, owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        use SqlEngine::{MySql, Postgres};

        let kind = match job_type {
            "signup" => JobKind::Signup(Signup::from_args(args)?),
            "reactivate" => JobKind::Reactivate(Reactivate::from_args(owner, args)?),
            "update_email_address" => {
                JobKind::UpdateEmailAddress(UpdateEmailAddress::from_args(owner, args)?)
            }
            "reset_user_password" => {
                JobKind::ResetUserPassword(ResetUserPassword::from_args(owner, args)?)
            }
            "create_user_mailing_list" => {
                JobKind::CreateUserMailingList(CreateUserMailingList::from_args(owner, args)?)
            }
            "reset_user_mailing_list_password" => JobKind::ResetUserMailingListPassword(
                ResetUserMailingListPassword::from_args(owner, args)?,
            ),
            "create_mysql_user_database" => {
                JobKind::CreateUserDatabase(CreateUserDatabase::from_args(MySql, owner, args)?)
            }
            "reset_mysql_user_password" => JobKind::ResetUserDatabasePassword(
                ResetUserDatabasePassword::from_args(MySql, owner, args)?,
            ),
            "create_postgres_user_database" => {
                JobKind::CreateUserDatabase(CreateUserDatabase::from_args(Postgres, owner, args)?)
            }
            "reset_postgres_user_password" => JobKind::ResetUserDatabasePassword(
                ResetUserDatabasePassword::from_args(Postgres, owner, args)?,
            ),
            "add_user_vhost" => JobKind::AddUserVhost(AddUserVhost::from_args(owner, args)?),
            "remove_user_vhost" => JobKind::RemoveUserVhost(RemoveUserVhost::from_args(owner, args)?),
            "create_society" => JobKind::CreateSociety(CreateSociety::from_args(owner, args)?),
            "change_society_admin" => {
                JobKind::ChangeSocietyAdmin(ChangeSocietyAdmin::from_args(owner, args)?)
            }
            "update_society_role_email" => {
                JobKind::UpdateSocietyRoleEmail(UpdateSocietyRoleEmail::from_args(owner, args)?)
            }
            "create_society_mailing_list" => {
                JobKind::CreateSocietyMailingList(CreateSocietyMailingList::from_args(owner, args)?)
            }
            "reset_society_mailing_list_password" => JobKind::ResetSocietyMailingListPassword(
                ResetSocietyMailingListPassword::from_args(owner, args)?,
            ),
            "create_mysql_society_database" => JobKind::CreateSocietyDatabase(
                CreateSocietyDatabase::from_args(MySql, owner, args)?,
            ),
            "reset_mysql_society_password" => JobKind::ResetSocietyDatabasePassword(
                ResetSocietyDatabasePassword::from_args(MySql, owner, args)?,
            ),
            "create_postgres_society_database" => JobKind::CreateSocietyDatabase(
                CreateSocietyDatabase::from_args(Postgres, owner, args)?,
            ),
            "reset_postgres_society_password" => JobKind::ResetSocietyDatabasePassword(
                ResetSocietyDatabasePassword::from_args(Postgres, owner, args)?,
            ),
            "add_society_vhost" => JobKind::AddSocietyVhost(AddSocietyVhost::from_args(owner, args)?),
            "change_society_vhost_docroot" => {
                JobKind::ChangeSocietyVhostDocroot(ChangeSocietyVhostDocroot::from_args(owner, args)?)
            }
            "remove_society_vhost" => {
                JobKind::RemoveSocietyVhost(RemoveSocietyVhost::from_args(owner, args)?)
            }
            other => return Err(ArgsError::UnknownType(other.to_string())),
        };
        Ok(kind)
    }

    pub fn from_job(job: &Job) -> Result<Self, ArgsError> {
        Self::decode(&job.job_type, job.owner.as_deref(), job.args())
    }

    pub fn variant(&self) -> &dyn JobVariant {
        match self {
            JobKind::Signup(j) => j,
            JobKind::Reactivate(j) => j,
            JobKind::UpdateEmailAddress(j) => j,
            JobKind::ResetUserPassword(j) => j,
            JobKind::CreateUserMailingList(j) => j,
            JobKind::ResetUserMailingListPassword(j) => j,
            JobKind::CreateUserDatabase(j) => j,
            JobKind::ResetUserDatabasePassword(j) => j,
            JobKind::AddUserVhost(j) => j,
            JobKind::RemoveUserVhost(j) => j,
            JobKind::CreateSociety(j) => j,
            JobKind::ChangeSocietyAdmin(j) => j,
            JobKind::UpdateSocietyRoleEmail(j) => j,
            JobKind::CreateSocietyMailingList(j) => j,
            JobKind::ResetSocietyMailingListPassword(j) => j,
            JobKind::CreateSocietyDatabase(j) => j,
            JobKind::ResetSocietyDatabasePassword(j) => j,
            JobKind::AddSocietyVhost(j) => j,
            JobKind::ChangeSocietyVhostDocroot(j) => j,
            JobKind::RemoveSocietyVhost(j) => j,
        }
    }

    pub fn job_type(&self) -> &'static str {
        self.variant().job_type()
    }

    pub fn description(&self) -> String {
        self.variant().description()
    }

    pub fn to_args(&self) -> JobArgs {
        self.variant().to_args()
    }

    pub async fn resolve(
        &self,
        directory: &dyn BaseDirectory,
    ) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        self.variant().resolve(directory).await
    }
}

/// Description for a stored job, falling back to the raw tag if it does not
/// decode.
pub fn describe(job: &Job) -> String {
    JobKind::from_job(job)
        .map(|kind| kind.description())
        .unwrap_or_else(|_| job.job_type.clone())
}

// =============================================================================
// Submission
// =============================================================================

/// A job constructed by one of the variants' `new` functions, with its
/// approval decision already made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub kind: JobKind,
    pub owner: Option<String>,
    pub require_approval: bool,
}

impl NewJob {
    pub fn new(kind: impl Into<JobKind>, owner: Option<String>, require_approval: bool) -> Self {
        Self {
            kind: kind.into(),
            owner,
            require_approval,
        }
    }

    pub fn initial_state(&self) -> JobState {
        JobState::initial(self.require_approval)
    }

    /// The row to insert. Args are re-decoded so that a job which could not
    /// later be read back is never stored.
    pub fn record(&self) -> Result<NewJobRecord, ArgsError> {
        let args = self.kind.to_args();
        JobKind::decode(self.kind.job_type(), self.owner.as_deref(), &args)?;

        Ok(NewJobRecord::builder()
            .job_type(self.kind.job_type())
            .owner(self.owner.clone())
            .state(self.initial_state())
            .args(args)
            .build())
    }
}

macro_rules! impl_into_kind {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for JobKind {
                fn from(job: $variant) -> Self {
                    JobKind::$variant(job)
                }
            }
        )*
    };
}

impl_into_kind!(
    Signup,
    Reactivate,
    UpdateEmailAddress,
    ResetUserPassword,
    CreateUserMailingList,
    ResetUserMailingListPassword,
    CreateUserDatabase,
    ResetUserDatabasePassword,
    AddUserVhost,
    RemoveUserVhost,
    CreateSociety,
    ChangeSocietyAdmin,
    UpdateSocietyRoleEmail,
    CreateSocietyMailingList,
    ResetSocietyMailingListPassword,
    CreateSocietyDatabase,
    ResetSocietyDatabasePassword,
    AddSocietyVhost,
    ChangeSocietyVhostDocroot,
    RemoveSocietyVhost,
);

pub(crate) fn require_owner(job_type: &'static str, owner: Option<&str>) -> Result<String, ArgsError> {
    owner
        .map(str::to_string)
        .ok_or(ArgsError::MissingOwner { job_type })
}

pub(crate) async fn find_member(
    directory: &dyn BaseDirectory,
    crsid: &str,
) -> Result<Member, ResolveError> {
    directory
        .get_member(crsid)
        .await?
        .ok_or_else(|| ResolveError::MemberNotFound(crsid.to_string()))
}

pub(crate) async fn find_society(
    directory: &dyn BaseDirectory,
    society: &str,
) -> Result<Society, ResolveError> {
    directory
        .get_society(society)
        .await?
        .ok_or_else(|| ResolveError::SocietyNotFound(society.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{member, society};

    #[test]
    fn unknown_tag_is_an_integrity_error() {
        let err = JobKind::decode("format_hard_drive", Some("spqr2"), &JobArgs::new()).unwrap_err();
        assert_eq!(err, ArgsError::UnknownType("format_hard_drive".to_string()));
    }

    #[test]
    fn every_tag_names_its_own_variant() {
        let owner = member("spqr2");
        let soc = society("chess", &["spqr2"]);
        let target = member("abc12");

        let jobs: Vec<NewJob> = vec![
            Signup::new("xyz99", "Ada", "Lovelace", "ada@example.org", true),
            Reactivate::new(&owner, "new@example.org"),
            UpdateEmailAddress::new(&owner, "new@example.org"),
            ResetUserPassword::new(&owner),
            CreateUserMailingList::new(&owner, "friends"),
            ResetUserMailingListPassword::new(&owner, "friends"),
            CreateUserDatabase::new(SqlEngine::MySql, &owner),
            ResetUserDatabasePassword::new(SqlEngine::MySql, &owner),
            CreateUserDatabase::new(SqlEngine::Postgres, &owner),
            ResetUserDatabasePassword::new(SqlEngine::Postgres, &owner),
            AddUserVhost::new(&owner, "spqr2.example.org", None),
            RemoveUserVhost::new(&owner, "spqr2.example.org"),
            CreateSociety::new(&owner, "go", "Go Society", &[owner.clone()], false, false, &[]),
            ChangeSocietyAdmin::new(&owner, &soc, &target, AdminAction::Add),
            UpdateSocietyRoleEmail::new(&owner, &soc, Some("chess@example.org")),
            CreateSocietyMailingList::new(&owner, &soc, "members"),
            ResetSocietyMailingListPassword::new(&owner, &soc, "members"),
            CreateSocietyDatabase::new(SqlEngine::MySql, &owner, &soc),
            ResetSocietyDatabasePassword::new(SqlEngine::MySql, &owner, &soc),
            CreateSocietyDatabase::new(SqlEngine::Postgres, &owner, &soc),
            ResetSocietyDatabasePassword::new(SqlEngine::Postgres, &owner, &soc),
            AddSocietyVhost::new(&owner, &soc, "chess.example.org", Some("www")),
            ChangeSocietyVhostDocroot::new(&owner, &soc, "chess.example.org", None),
            RemoveSocietyVhost::new(&owner, &soc, "chess.example.org"),
        ];

        let tags: Vec<&str> = jobs.iter().map(|j| j.kind.job_type()).collect();
        assert_eq!(tags, JobKind::TAGS.to_vec());

        for job in &jobs {
            let record = job.record().unwrap();
            let decoded = JobKind::decode(&record.job_type, record.owner.as_deref(), &record.args).unwrap();
            assert_eq!(decoded, job.kind, "{}", record.job_type);
        }
    }

    #[test]
    fn member_jobs_need_an_owner() {
        let err = JobKind::decode("reset_user_password", None, &JobArgs::new()).unwrap_err();
        assert_eq!(
            err,
            ArgsError::MissingOwner {
                job_type: "reset_user_password"
            }
        );
    }

    #[test]
    fn outcome_maps_to_terminal_state() {
        assert_eq!(Outcome::done().state(), JobState::Done);
        assert_eq!(Outcome::done().message(), None);
        assert_eq!(Outcome::failed("nope").state(), JobState::Failed);
        assert_eq!(Outcome::failed("nope").message(), Some("nope"));
    }

    #[test]
    fn record_uses_approval_for_initial_state() {
        let mut owner = member("spqr2");
        owner.danger = true;
        let record = ResetUserPassword::new(&owner).record().unwrap();
        assert_eq!(record.state, JobState::Unapproved);
        assert_eq!(record.owner.as_deref(), Some("spqr2"));
    }
}
