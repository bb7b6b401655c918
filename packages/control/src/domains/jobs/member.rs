//! Jobs acting on a single member's own account.
//!
//! Apart from `signup`, the member is always the job's owner and is not
//! repeated in the args. Approval is required whenever that member is
//! danger-flagged.

use async_trait::async_trait;

use super::actions;
use super::args::{ArgReader, ArgWriter};
use super::{find_member, require_owner, ArgsError, JobVariant, NewJob, Outcome, ResolveError, ResolvedJob};
use crate::domains::directory::{Member, OwnerClass};
use crate::kernel::jobs::JobArgs;
use crate::kernel::notifier::Sender;
use crate::kernel::traits::NewAccount;
use crate::kernel::{BaseDirectory, JobDeps, SqlEngine};

/// A member-scoped job together with its resolved owner.
pub struct WithMember<J> {
    pub job: J,
    pub member: Member,
}

impl<J> WithMember<J> {
    fn mailbox(&self) -> Sender {
        Sender::new(self.member.name(), self.member.email.clone())
    }
}

async fn with_member<J: Clone + Send + Sync + 'static>(
    job: &J,
    crsid: &str,
    directory: &dyn BaseDirectory,
) -> Result<WithMember<J>, ResolveError> {
    Ok(WithMember {
        job: job.clone(),
        member: find_member(directory, crsid).await?,
    })
}

fn owned_by(member: &Member, kind: impl Into<super::JobKind>) -> NewJob {
    NewJob::new(kind, Some(member.crsid.clone()), member.danger)
}

// =============================================================================
// signup
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signup {
    pub crsid: String,
    pub preferred_name: String,
    pub surname: String,
    pub email: String,
    pub social: bool,
}

impl Signup {
    const TAG: &'static str = "signup";

    /// There is no owner: the member does not exist yet.
    pub fn new(
        crsid: impl Into<String>,
        preferred_name: impl Into<String>,
        surname: impl Into<String>,
        email: impl Into<String>,
        social: bool,
    ) -> NewJob {
        let job = Signup {
            crsid: crsid.into(),
            preferred_name: preferred_name.into(),
            surname: surname.into(),
            email: email.into(),
            social,
        };
        NewJob::new(job, None, false)
    }

    pub fn from_args(args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            crsid: r.string("crsid")?,
            preferred_name: r.string("preferred_name")?,
            surname: r.string("surname")?,
            email: r.string("email")?,
            social: r.flag("social")?,
        })
    }
}

#[async_trait]
impl JobVariant for Signup {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new()
            .string("crsid", &self.crsid)
            .string("preferred_name", &self.preferred_name)
            .string("surname", &self.surname)
            .string("email", &self.email)
            .flag("social", self.social)
            .build()
    }

    fn description(&self) -> String {
        format!(
            "Signup: {} ({} {}, {})",
            self.crsid, self.preferred_name, self.surname, self.email
        )
    }

    async fn resolve(&self, _directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl ResolvedJob for Signup {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        if deps.directory.get_member(&self.crsid).await?.is_some() {
            return Ok(Outcome::failed(format!("{} is already a member", self.crsid)));
        }

        deps.accounts
            .create_member(&NewAccount {
                crsid: self.crsid.clone(),
                preferred_name: self.preferred_name.clone(),
                surname: self.surname.clone(),
                email: self.email.clone(),
                social: self.social,
            })
            .await?;

        let password = deps.accounts.reset_password(&self.crsid).await?;
        let body = format!(
            "Welcome, {}!\n\nYour account has been created.\n\nUsername: {}\nPassword: {}\n",
            self.preferred_name, self.crsid, password
        );
        let to = Sender::new(
            format!("{} {}", self.preferred_name, self.surname),
            self.email.clone(),
        );
        actions::send_credentials(deps, vec![to], "Account created", body).await?;

        Ok(Outcome::done())
    }
}

// =============================================================================
// reactivate
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reactivate {
    pub crsid: String,
    pub email: String,
}

impl Reactivate {
    const TAG: &'static str = "reactivate";

    pub fn new(member: &Member, email: impl Into<String>) -> NewJob {
        let job = Reactivate {
            crsid: member.crsid.clone(),
            email: email.into(),
        };
        owned_by(member, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            crsid: require_owner(Self::TAG, owner)?,
            email: r.string("email")?,
        })
    }
}

#[async_trait]
impl JobVariant for Reactivate {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new().string("email", &self.email).build()
    }

    fn description(&self) -> String {
        format!("Reactivate account: {} ({})", self.crsid, self.email)
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(with_member(self, &self.crsid, directory).await?))
    }
}

#[async_trait]
impl ResolvedJob for WithMember<Reactivate> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        if self.member.user {
            return Ok(Outcome::failed(format!(
                "{} already has an active account",
                self.member.crsid
            )));
        }

        deps.accounts.reactivate_member(&self.member.crsid).await?;
        if self.member.email != self.job.email {
            deps.accounts
                .set_email(&self.member.crsid, &self.job.email)
                .await?;
        }
        Ok(Outcome::done())
    }
}

// =============================================================================
// update_email_address
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEmailAddress {
    pub crsid: String,
    pub email: String,
}

impl UpdateEmailAddress {
    const TAG: &'static str = "update_email_address";

    pub fn new(member: &Member, email: impl Into<String>) -> NewJob {
        let job = UpdateEmailAddress {
            crsid: member.crsid.clone(),
            email: email.into(),
        };
        owned_by(member, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            crsid: require_owner(Self::TAG, owner)?,
            email: r.string("email")?,
        })
    }
}

#[async_trait]
impl JobVariant for UpdateEmailAddress {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new().string("email", &self.email).build()
    }

    fn description(&self) -> String {
        format!("Update email address: {} to {}", self.crsid, self.email)
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(with_member(self, &self.crsid, directory).await?))
    }
}

#[async_trait]
impl ResolvedJob for WithMember<UpdateEmailAddress> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        if self.member.email == self.job.email {
            return Ok(Outcome::done_with(format!("Email address is already {}", self.job.email)));
        }
        deps.accounts
            .set_email(&self.member.crsid, &self.job.email)
            .await?;
        Ok(Outcome::done())
    }
}

// =============================================================================
// reset_user_password
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetUserPassword {
    pub crsid: String,
}

impl ResetUserPassword {
    const TAG: &'static str = "reset_user_password";

    pub fn new(member: &Member) -> NewJob {
        let job = ResetUserPassword {
            crsid: member.crsid.clone(),
        };
        owned_by(member, job)
    }

    pub fn from_args(owner: Option<&str>, _args: &JobArgs) -> Result<Self, ArgsError> {
        Ok(Self {
            crsid: require_owner(Self::TAG, owner)?,
        })
    }
}

#[async_trait]
impl JobVariant for ResetUserPassword {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        JobArgs::new()
    }

    fn description(&self) -> String {
        format!("Reset user password: {}", self.crsid)
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(with_member(self, &self.crsid, directory).await?))
    }
}

#[async_trait]
impl ResolvedJob for WithMember<ResetUserPassword> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        if !self.member.user {
            return Ok(Outcome::failed(format!(
                "{} has no active shell account",
                self.member.crsid
            )));
        }

        let password = deps.accounts.reset_password(&self.member.crsid).await?;
        let body = format!(
            "The password for {} has been reset.\n\nUsername: {}\nPassword: {}\n",
            self.member.crsid, self.member.crsid, password
        );
        actions::send_credentials(deps, vec![self.mailbox()], "Password reset", body).await?;
        Ok(Outcome::done())
    }
}

// =============================================================================
// create_user_mailing_list / reset_user_mailing_list_password
// =============================================================================

fn user_list_name(crsid: &str, listname: &str) -> String {
    format!("{}-{}", crsid, listname)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUserMailingList {
    pub crsid: String,
    pub listname: String,
}

impl CreateUserMailingList {
    const TAG: &'static str = "create_user_mailing_list";

    pub fn new(member: &Member, listname: impl Into<String>) -> NewJob {
        let job = CreateUserMailingList {
            crsid: member.crsid.clone(),
            listname: listname.into(),
        };
        owned_by(member, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            crsid: require_owner(Self::TAG, owner)?,
            listname: r.string("listname")?,
        })
    }
}

#[async_trait]
impl JobVariant for CreateUserMailingList {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new().string("listname", &self.listname).build()
    }

    fn description(&self) -> String {
        format!(
            "Create user mailing list: {}",
            user_list_name(&self.crsid, &self.listname)
        )
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(with_member(self, &self.crsid, directory).await?))
    }
}

#[async_trait]
impl ResolvedJob for WithMember<CreateUserMailingList> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        let list = user_list_name(&self.member.crsid, &self.job.listname);
        actions::create_list(deps, &list, &self.member.email).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetUserMailingListPassword {
    pub crsid: String,
    pub listname: String,
}

impl ResetUserMailingListPassword {
    const TAG: &'static str = "reset_user_mailing_list_password";

    pub fn new(member: &Member, listname: impl Into<String>) -> NewJob {
        let job = ResetUserMailingListPassword {
            crsid: member.crsid.clone(),
            listname: listname.into(),
        };
        owned_by(member, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            crsid: require_owner(Self::TAG, owner)?,
            listname: r.string("listname")?,
        })
    }
}

#[async_trait]
impl JobVariant for ResetUserMailingListPassword {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new().string("listname", &self.listname).build()
    }

    fn description(&self) -> String {
        format!(
            "Reset user mailing list password: {}",
            user_list_name(&self.crsid, &self.listname)
        )
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(with_member(self, &self.crsid, directory).await?))
    }
}

#[async_trait]
impl ResolvedJob for WithMember<ResetUserMailingListPassword> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        let list = user_list_name(&self.member.crsid, &self.job.listname);
        actions::reset_list_password(deps, &list).await
    }
}

// =============================================================================
// create_{mysql,postgres}_user_database / reset_{mysql,postgres}_user_password
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUserDatabase {
    pub engine: SqlEngine,
    pub crsid: String,
}

impl CreateUserDatabase {
    fn tag(engine: SqlEngine) -> &'static str {
        match engine {
            SqlEngine::MySql => "create_mysql_user_database",
            SqlEngine::Postgres => "create_postgres_user_database",
        }
    }

    pub fn new(engine: SqlEngine, member: &Member) -> NewJob {
        let job = CreateUserDatabase {
            engine,
            crsid: member.crsid.clone(),
        };
        owned_by(member, job)
    }

    pub fn from_args(engine: SqlEngine, owner: Option<&str>, _args: &JobArgs) -> Result<Self, ArgsError> {
        Ok(Self {
            engine,
            crsid: require_owner(Self::tag(engine), owner)?,
        })
    }
}

#[async_trait]
impl JobVariant for CreateUserDatabase {
    fn job_type(&self) -> &'static str {
        Self::tag(self.engine)
    }

    fn to_args(&self) -> JobArgs {
        JobArgs::new()
    }

    fn description(&self) -> String {
        format!("Create {} user database: {}", self.engine, self.crsid)
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(with_member(self, &self.crsid, directory).await?))
    }
}

#[async_trait]
impl ResolvedJob for WithMember<CreateUserDatabase> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        let engine = self.job.engine;
        let name = engine.account_name(&self.member.crsid);
        actions::create_database(deps, engine, &name, vec![self.mailbox()]).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetUserDatabasePassword {
    pub engine: SqlEngine,
    pub crsid: String,
}

impl ResetUserDatabasePassword {
    fn tag(engine: SqlEngine) -> &'static str {
        match engine {
            SqlEngine::MySql => "reset_mysql_user_password",
            SqlEngine::Postgres => "reset_postgres_user_password",
        }
    }

    pub fn new(engine: SqlEngine, member: &Member) -> NewJob {
        let job = ResetUserDatabasePassword {
            engine,
            crsid: member.crsid.clone(),
        };
        owned_by(member, job)
    }

    pub fn from_args(engine: SqlEngine, owner: Option<&str>, _args: &JobArgs) -> Result<Self, ArgsError> {
        Ok(Self {
            engine,
            crsid: require_owner(Self::tag(engine), owner)?,
        })
    }
}

#[async_trait]
impl JobVariant for ResetUserDatabasePassword {
    fn job_type(&self) -> &'static str {
        Self::tag(self.engine)
    }

    fn to_args(&self) -> JobArgs {
        JobArgs::new()
    }

    fn description(&self) -> String {
        format!("Reset {} user password: {}", self.engine, self.crsid)
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(with_member(self, &self.crsid, directory).await?))
    }
}

#[async_trait]
impl ResolvedJob for WithMember<ResetUserDatabasePassword> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        let engine = self.job.engine;
        let name = engine.account_name(&self.member.crsid);
        actions::reset_database_password(deps, engine, &name, vec![self.mailbox()]).await
    }
}

// =============================================================================
// add_user_vhost / remove_user_vhost
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddUserVhost {
    pub crsid: String,
    pub domain: String,
    pub root: Option<String>,
}

impl AddUserVhost {
    const TAG: &'static str = "add_user_vhost";

    pub fn new(member: &Member, domain: impl Into<String>, root: Option<&str>) -> NewJob {
        let job = AddUserVhost {
            crsid: member.crsid.clone(),
            domain: domain.into(),
            root: root.map(str::to_string),
        };
        owned_by(member, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            crsid: require_owner(Self::TAG, owner)?,
            domain: r.string("domain")?,
            root: r.optional("root"),
        })
    }
}

#[async_trait]
impl JobVariant for AddUserVhost {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new()
            .string("domain", &self.domain)
            .optional("root", self.root.as_deref())
            .build()
    }

    fn description(&self) -> String {
        format!("Add custom domain: {} for {}", self.domain, self.crsid)
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(with_member(self, &self.crsid, directory).await?))
    }
}

#[async_trait]
impl ResolvedJob for WithMember<AddUserVhost> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        actions::add_vhost(
            deps,
            OwnerClass::User,
            &self.member.crsid,
            &self.job.domain,
            self.job.root.as_deref(),
        )
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveUserVhost {
    pub crsid: String,
    pub domain: String,
}

impl RemoveUserVhost {
    const TAG: &'static str = "remove_user_vhost";

    pub fn new(member: &Member, domain: impl Into<String>) -> NewJob {
        let job = RemoveUserVhost {
            crsid: member.crsid.clone(),
            domain: domain.into(),
        };
        owned_by(member, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            crsid: require_owner(Self::TAG, owner)?,
            domain: r.string("domain")?,
        })
    }
}

#[async_trait]
impl JobVariant for RemoveUserVhost {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new().string("domain", &self.domain).build()
    }

    fn description(&self) -> String {
        format!("Remove custom domain: {} from {}", self.domain, self.crsid)
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(with_member(self, &self.crsid, directory).await?))
    }
}

#[async_trait]
impl ResolvedJob for WithMember<RemoveUserVhost> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        actions::remove_vhost(deps, OwnerClass::User, &self.member.crsid, &self.job.domain).await
    }
}
