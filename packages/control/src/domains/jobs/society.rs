//! Jobs acting on a group account.
//!
//! The owner is the member who asked; the society is named in the args.
//! Approval is required when either the requester or the society is
//! danger-flagged, and `change_society_admin` adds its own rules.

use async_trait::async_trait;

use super::actions;
use super::args::{ArgReader, ArgWriter};
use super::{
    find_member, find_society, require_owner, ArgsError, JobKind, JobVariant, NewJob, Outcome,
    ResolveError, ResolvedJob,
};
use crate::domains::directory::{Member, OwnerClass, Society};
use crate::kernel::jobs::JobArgs;
use crate::kernel::notifier::Sender;
use crate::kernel::traits::NewGroupAccount;
use crate::kernel::{BaseDirectory, JobDeps, SqlEngine};

fn mailbox(member: &Member) -> Sender {
    Sender::new(member.name(), member.email.clone())
}

/// A society-scoped job with its requester, society and the society's
/// admins looked up.
pub struct WithSociety<J> {
    pub job: J,
    pub requester: Member,
    pub society: Society,
    pub admins: Vec<Member>,
}

impl<J> WithSociety<J> {
    /// Where credentials for the society go: every admin.
    fn admin_mailboxes(&self) -> Vec<Sender> {
        self.admins.iter().map(mailbox).collect()
    }
}

async fn with_society<J: Clone + Send + Sync + 'static>(
    job: &J,
    requester: &str,
    society: &str,
    directory: &dyn BaseDirectory,
) -> Result<WithSociety<J>, ResolveError> {
    let requester = find_member(directory, requester).await?;
    let society = find_society(directory, society).await?;
    let admins = directory.get_members(&society.admins).await?;
    Ok(WithSociety {
        job: job.clone(),
        requester,
        society,
        admins,
    })
}

fn requested_by(requester: &Member, society: &Society, kind: impl Into<JobKind>) -> NewJob {
    NewJob::new(
        kind,
        Some(requester.crsid.clone()),
        society.danger || requester.danger,
    )
}

fn society_list_name(society: &str, listname: &str) -> String {
    format!("{}-{}", society, listname)
}

// =============================================================================
// create_society
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSociety {
    pub requester: String,
    pub society: String,
    pub description: String,
    pub admins: Vec<String>,
    pub mysql: bool,
    pub postgres: bool,
    pub mailinglists: Vec<String>,
}

impl CreateSociety {
    const TAG: &'static str = "create_society";

    pub fn new(
        requester: &Member,
        society: impl Into<String>,
        description: impl Into<String>,
        admins: &[Member],
        mysql: bool,
        postgres: bool,
        mailinglists: &[String],
    ) -> NewJob {
        let require_approval = requester.danger || admins.iter().any(|a| a.danger);
        let job = CreateSociety {
            requester: requester.crsid.clone(),
            society: society.into(),
            description: description.into(),
            admins: admins.iter().map(|a| a.crsid.clone()).collect(),
            mysql,
            postgres,
            mailinglists: mailinglists.to_vec(),
        };
        NewJob::new(job, Some(requester.crsid.clone()), require_approval)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            requester: require_owner(Self::TAG, owner)?,
            society: r.string("society")?,
            description: r.string("description")?,
            admins: r.list("admins")?,
            mysql: r.flag("mysql")?,
            postgres: r.flag("postgres")?,
            mailinglists: r.list("mailinglists")?,
        })
    }
}

pub struct ResolvedCreateSociety {
    job: CreateSociety,
    requester: Member,
    admins: Vec<Member>,
}

#[async_trait]
impl JobVariant for CreateSociety {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new()
            .string("society", &self.society)
            .string("description", &self.description)
            .list("admins", &self.admins)
            .flag("mysql", self.mysql)
            .flag("postgres", self.postgres)
            .list("mailinglists", &self.mailinglists)
            .build()
    }

    fn description(&self) -> String {
        format!("Create society: {} ({})", self.society, self.description)
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        let requester = find_member(directory, &self.requester).await?;
        let admins = directory.get_members(&self.admins).await?;
        if let Some(missing) = self
            .admins
            .iter()
            .find(|crsid| !admins.iter().any(|a| &a.crsid == *crsid))
        {
            return Err(ResolveError::MemberNotFound(missing.clone()));
        }
        Ok(Box::new(ResolvedCreateSociety {
            job: self.clone(),
            requester,
            admins,
        }))
    }
}

#[async_trait]
impl ResolvedJob for ResolvedCreateSociety {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        let job = &self.job;
        if deps.directory.get_society(&job.society).await?.is_some() {
            return Ok(Outcome::failed(format!("Society {} already exists", job.society)));
        }

        deps.accounts
            .create_society(&NewGroupAccount {
                society: job.society.clone(),
                description: job.description.clone(),
                admins: job.admins.clone(),
            })
            .await?;

        let recipients: Vec<Sender> = self.admins.iter().map(mailbox).collect();
        let mut engines = Vec::new();
        if job.mysql {
            engines.push(SqlEngine::MySql);
        }
        if job.postgres {
            engines.push(SqlEngine::Postgres);
        }
        for engine in engines {
            let name = engine.account_name(&job.society);
            if let Outcome::Failed(msg) =
                actions::create_database(deps, engine, &name, recipients.clone()).await?
            {
                return Ok(Outcome::failed(format!("Society created, but: {}", msg)));
            }
        }

        for list in &job.mailinglists {
            let name = society_list_name(&job.society, list);
            if let Outcome::Failed(msg) =
                actions::create_list(deps, &name, &self.requester.email).await?
            {
                return Ok(Outcome::failed(format!("Society created, but: {}", msg)));
            }
        }

        Ok(Outcome::done())
    }
}

// =============================================================================
// change_society_admin
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Add,
    Remove,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::Add => "add",
            AdminAction::Remove => "remove",
        }
    }

    fn preposition(&self) -> &'static str {
        match self {
            AdminAction::Add => "to",
            AdminAction::Remove => "from",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSocietyAdmin {
    pub requester: String,
    pub society: String,
    pub target_member: String,
    pub action: AdminAction,
}

impl ChangeSocietyAdmin {
    const TAG: &'static str = "change_society_admin";

    /// Changing one's own admin status always goes to the sysadmins, as does
    /// anything involving a danger-flagged party.
    pub fn new(requester: &Member, society: &Society, target: &Member, action: AdminAction) -> NewJob {
        let require_approval = society.danger
            || target.danger
            || requester.danger
            || requester.crsid == target.crsid;
        let job = ChangeSocietyAdmin {
            requester: requester.crsid.clone(),
            society: society.society.clone(),
            target_member: target.crsid.clone(),
            action,
        };
        NewJob::new(job, Some(requester.crsid.clone()), require_approval)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        let action = match r.one_of("action", &["add", "remove"])?.as_str() {
            "add" => AdminAction::Add,
            _ => AdminAction::Remove,
        };
        Ok(Self {
            requester: require_owner(Self::TAG, owner)?,
            society: r.string("society")?,
            target_member: r.string("target_member")?,
            action,
        })
    }
}

pub struct ResolvedChangeSocietyAdmin {
    job: ChangeSocietyAdmin,
    society: Society,
    target: Member,
}

#[async_trait]
impl JobVariant for ChangeSocietyAdmin {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new()
            .string("society", &self.society)
            .string("target_member", &self.target_member)
            .string("action", self.action.as_str())
            .build()
    }

    fn description(&self) -> String {
        format!(
            "Change society admin: {} {} {} {}",
            self.action.as_str(),
            self.target_member,
            self.action.preposition(),
            self.society
        )
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        find_member(directory, &self.requester).await?;
        Ok(Box::new(ResolvedChangeSocietyAdmin {
            job: self.clone(),
            society: find_society(directory, &self.society).await?,
            target: find_member(directory, &self.target_member).await?,
        }))
    }
}

#[async_trait]
impl ResolvedJob for ResolvedChangeSocietyAdmin {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        let society = &self.society.society;
        let target = &self.target.crsid;
        let is_admin = self.society.is_admin(target);

        match self.job.action {
            AdminAction::Add if is_admin => Ok(Outcome::failed(format!(
                "{} is already an admin of {}",
                target, society
            ))),
            AdminAction::Add => {
                deps.accounts.add_society_admin(society, target).await?;
                Ok(Outcome::done())
            }
            AdminAction::Remove if !is_admin => Ok(Outcome::failed(format!(
                "{} is not an admin of {}",
                target, society
            ))),
            AdminAction::Remove if self.society.admins.len() == 1 => Ok(Outcome::failed(format!(
                "Cannot remove the last admin of {}",
                society
            ))),
            AdminAction::Remove => {
                deps.accounts.remove_society_admin(society, target).await?;
                Ok(Outcome::done())
            }
        }
    }
}

// =============================================================================
// update_society_role_email
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSocietyRoleEmail {
    pub requester: String,
    pub society: String,
    /// `None` removes the role address.
    pub email: Option<String>,
}

impl UpdateSocietyRoleEmail {
    const TAG: &'static str = "update_society_role_email";

    pub fn new(requester: &Member, society: &Society, email: Option<&str>) -> NewJob {
        let job = UpdateSocietyRoleEmail {
            requester: requester.crsid.clone(),
            society: society.society.clone(),
            email: email.map(str::to_string),
        };
        requested_by(requester, society, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            requester: require_owner(Self::TAG, owner)?,
            society: r.string("society")?,
            email: r.optional("email"),
        })
    }
}

#[async_trait]
impl JobVariant for UpdateSocietyRoleEmail {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new()
            .string("society", &self.society)
            .optional("email", self.email.as_deref())
            .build()
    }

    fn description(&self) -> String {
        match &self.email {
            Some(email) => format!("Update role email: {} to {}", self.society, email),
            None => format!("Remove role email: {}", self.society),
        }
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(
            with_society(self, &self.requester, &self.society, directory).await?,
        ))
    }
}

#[async_trait]
impl ResolvedJob for WithSociety<UpdateSocietyRoleEmail> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        if self.society.role_email == self.job.email {
            return Ok(Outcome::done_with("Role email unchanged"));
        }
        deps.accounts
            .set_role_email(&self.society.society, self.job.email.as_deref())
            .await?;
        Ok(Outcome::done())
    }
}

// =============================================================================
// create_society_mailing_list / reset_society_mailing_list_password
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSocietyMailingList {
    pub requester: String,
    pub society: String,
    pub listname: String,
}

impl CreateSocietyMailingList {
    const TAG: &'static str = "create_society_mailing_list";

    pub fn new(requester: &Member, society: &Society, listname: impl Into<String>) -> NewJob {
        let job = CreateSocietyMailingList {
            requester: requester.crsid.clone(),
            society: society.society.clone(),
            listname: listname.into(),
        };
        requested_by(requester, society, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            requester: require_owner(Self::TAG, owner)?,
            society: r.string("society")?,
            listname: r.string("listname")?,
        })
    }
}

#[async_trait]
impl JobVariant for CreateSocietyMailingList {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new()
            .string("society", &self.society)
            .string("listname", &self.listname)
            .build()
    }

    fn description(&self) -> String {
        format!(
            "Create society mailing list: {}",
            society_list_name(&self.society, &self.listname)
        )
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(
            with_society(self, &self.requester, &self.society, directory).await?,
        ))
    }
}

#[async_trait]
impl ResolvedJob for WithSociety<CreateSocietyMailingList> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        let list = society_list_name(&self.society.society, &self.job.listname);
        actions::create_list(deps, &list, &self.requester.email).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetSocietyMailingListPassword {
    pub requester: String,
    pub society: String,
    pub listname: String,
}

impl ResetSocietyMailingListPassword {
    const TAG: &'static str = "reset_society_mailing_list_password";

    pub fn new(requester: &Member, society: &Society, listname: impl Into<String>) -> NewJob {
        let job = ResetSocietyMailingListPassword {
            requester: requester.crsid.clone(),
            society: society.society.clone(),
            listname: listname.into(),
        };
        requested_by(requester, society, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            requester: require_owner(Self::TAG, owner)?,
            society: r.string("society")?,
            listname: r.string("listname")?,
        })
    }
}

#[async_trait]
impl JobVariant for ResetSocietyMailingListPassword {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new()
            .string("society", &self.society)
            .string("listname", &self.listname)
            .build()
    }

    fn description(&self) -> String {
        format!(
            "Reset society mailing list password: {}",
            society_list_name(&self.society, &self.listname)
        )
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(
            with_society(self, &self.requester, &self.society, directory).await?,
        ))
    }
}

#[async_trait]
impl ResolvedJob for WithSociety<ResetSocietyMailingListPassword> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        let list = society_list_name(&self.society.society, &self.job.listname);
        actions::reset_list_password(deps, &list).await
    }
}

// =============================================================================
// create_{mysql,postgres}_society_database / reset_{mysql,postgres}_society_password
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSocietyDatabase {
    pub engine: SqlEngine,
    pub requester: String,
    pub society: String,
}

impl CreateSocietyDatabase {
    fn tag(engine: SqlEngine) -> &'static str {
        match engine {
            SqlEngine::MySql => "create_mysql_society_database",
            SqlEngine::Postgres => "create_postgres_society_database",
        }
    }

    pub fn new(engine: SqlEngine, requester: &Member, society: &Society) -> NewJob {
        let job = CreateSocietyDatabase {
            engine,
            requester: requester.crsid.clone(),
            society: society.society.clone(),
        };
        requested_by(requester, society, job)
    }

    pub fn from_args(engine: SqlEngine, owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let tag = Self::tag(engine);
        let r = ArgReader::new(tag, args);
        Ok(Self {
            engine,
            requester: require_owner(tag, owner)?,
            society: r.string("society")?,
        })
    }
}

#[async_trait]
impl JobVariant for CreateSocietyDatabase {
    fn job_type(&self) -> &'static str {
        Self::tag(self.engine)
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new().string("society", &self.society).build()
    }

    fn description(&self) -> String {
        format!(
            "Create {} society database: {} ({})",
            self.engine, self.society, self.requester
        )
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(
            with_society(self, &self.requester, &self.society, directory).await?,
        ))
    }
}

#[async_trait]
impl ResolvedJob for WithSociety<CreateSocietyDatabase> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        let engine = self.job.engine;
        let name = engine.account_name(&self.society.society);
        actions::create_database(deps, engine, &name, self.admin_mailboxes()).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetSocietyDatabasePassword {
    pub engine: SqlEngine,
    pub requester: String,
    pub society: String,
}

impl ResetSocietyDatabasePassword {
    fn tag(engine: SqlEngine) -> &'static str {
        match engine {
            SqlEngine::MySql => "reset_mysql_society_password",
            SqlEngine::Postgres => "reset_postgres_society_password",
        }
    }

    pub fn new(engine: SqlEngine, requester: &Member, society: &Society) -> NewJob {
        let job = ResetSocietyDatabasePassword {
            engine,
            requester: requester.crsid.clone(),
            society: society.society.clone(),
        };
        requested_by(requester, society, job)
    }

    pub fn from_args(engine: SqlEngine, owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let tag = Self::tag(engine);
        let r = ArgReader::new(tag, args);
        Ok(Self {
            engine,
            requester: require_owner(tag, owner)?,
            society: r.string("society")?,
        })
    }
}

#[async_trait]
impl JobVariant for ResetSocietyDatabasePassword {
    fn job_type(&self) -> &'static str {
        Self::tag(self.engine)
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new().string("society", &self.society).build()
    }

    fn description(&self) -> String {
        format!(
            "Reset {} society password: {} ({})",
            self.engine, self.society, self.requester
        )
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(
            with_society(self, &self.requester, &self.society, directory).await?,
        ))
    }
}

#[async_trait]
impl ResolvedJob for WithSociety<ResetSocietyDatabasePassword> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        let engine = self.job.engine;
        let name = engine.account_name(&self.society.society);
        actions::reset_database_password(deps, engine, &name, self.admin_mailboxes()).await
    }
}

// =============================================================================
// add_society_vhost / change_society_vhost_docroot / remove_society_vhost
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddSocietyVhost {
    pub requester: String,
    pub society: String,
    pub domain: String,
    pub root: Option<String>,
}

impl AddSocietyVhost {
    const TAG: &'static str = "add_society_vhost";

    pub fn new(requester: &Member, society: &Society, domain: impl Into<String>, root: Option<&str>) -> NewJob {
        let job = AddSocietyVhost {
            requester: requester.crsid.clone(),
            society: society.society.clone(),
            domain: domain.into(),
            root: root.map(str::to_string),
        };
        requested_by(requester, society, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            requester: require_owner(Self::TAG, owner)?,
            society: r.string("society")?,
            domain: r.string("domain")?,
            root: r.optional("root"),
        })
    }
}

#[async_trait]
impl JobVariant for AddSocietyVhost {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new()
            .string("society", &self.society)
            .string("domain", &self.domain)
            .optional("root", self.root.as_deref())
            .build()
    }

    fn description(&self) -> String {
        format!("Add custom domain: {} for {}", self.domain, self.society)
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(
            with_society(self, &self.requester, &self.society, directory).await?,
        ))
    }
}

#[async_trait]
impl ResolvedJob for WithSociety<AddSocietyVhost> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        actions::add_vhost(
            deps,
            OwnerClass::Society,
            &self.society.society,
            &self.job.domain,
            self.job.root.as_deref(),
        )
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSocietyVhostDocroot {
    pub requester: String,
    pub society: String,
    pub domain: String,
    pub root: Option<String>,
}

impl ChangeSocietyVhostDocroot {
    const TAG: &'static str = "change_society_vhost_docroot";

    pub fn new(requester: &Member, society: &Society, domain: impl Into<String>, root: Option<&str>) -> NewJob {
        let job = ChangeSocietyVhostDocroot {
            requester: requester.crsid.clone(),
            society: society.society.clone(),
            domain: domain.into(),
            root: root.map(str::to_string),
        };
        requested_by(requester, society, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            requester: require_owner(Self::TAG, owner)?,
            society: r.string("society")?,
            domain: r.string("domain")?,
            root: r.optional("root"),
        })
    }
}

#[async_trait]
impl JobVariant for ChangeSocietyVhostDocroot {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new()
            .string("society", &self.society)
            .string("domain", &self.domain)
            .optional("root", self.root.as_deref())
            .build()
    }

    fn description(&self) -> String {
        format!(
            "Change document root: {} to /{}",
            self.domain,
            self.root.as_deref().unwrap_or("")
        )
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(
            with_society(self, &self.requester, &self.society, directory).await?,
        ))
    }
}

#[async_trait]
impl ResolvedJob for WithSociety<ChangeSocietyVhostDocroot> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        actions::set_docroot(
            deps,
            OwnerClass::Society,
            &self.society.society,
            &self.job.domain,
            self.job.root.as_deref(),
        )
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveSocietyVhost {
    pub requester: String,
    pub society: String,
    pub domain: String,
}

impl RemoveSocietyVhost {
    const TAG: &'static str = "remove_society_vhost";

    pub fn new(requester: &Member, society: &Society, domain: impl Into<String>) -> NewJob {
        let job = RemoveSocietyVhost {
            requester: requester.crsid.clone(),
            society: society.society.clone(),
            domain: domain.into(),
        };
        requested_by(requester, society, job)
    }

    pub fn from_args(owner: Option<&str>, args: &JobArgs) -> Result<Self, ArgsError> {
        let r = ArgReader::new(Self::TAG, args);
        Ok(Self {
            requester: require_owner(Self::TAG, owner)?,
            society: r.string("society")?,
            domain: r.string("domain")?,
        })
    }
}

#[async_trait]
impl JobVariant for RemoveSocietyVhost {
    fn job_type(&self) -> &'static str {
        Self::TAG
    }

    fn to_args(&self) -> JobArgs {
        ArgWriter::new()
            .string("society", &self.society)
            .string("domain", &self.domain)
            .build()
    }

    fn description(&self) -> String {
        format!("Remove custom domain: {} from {}", self.domain, self.society)
    }

    async fn resolve(&self, directory: &dyn BaseDirectory) -> Result<Box<dyn ResolvedJob>, ResolveError> {
        Ok(Box::new(
            with_society(self, &self.requester, &self.society, directory).await?,
        ))
    }
}

#[async_trait]
impl ResolvedJob for WithSociety<RemoveSocietyVhost> {
    async fn run(&self, deps: &JobDeps) -> anyhow::Result<Outcome> {
        actions::remove_vhost(deps, OwnerClass::Society, &self.society.society, &self.job.domain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{member, society, AccountCall, TestDependencies};

    #[test]
    fn self_admin_change_needs_approval() {
        let requester = member("spqr2");
        let other = member("abc12");
        let soc = society("chess", &["spqr2"]);

        assert!(ChangeSocietyAdmin::new(&requester, &soc, &requester, AdminAction::Remove).require_approval);
        assert!(!ChangeSocietyAdmin::new(&requester, &soc, &other, AdminAction::Add).require_approval);
    }

    #[test]
    fn any_danger_flag_forces_approval() {
        let requester = member("spqr2");
        let mut target = member("abc12");
        let mut soc = society("chess", &["spqr2"]);

        target.danger = true;
        assert!(ChangeSocietyAdmin::new(&requester, &soc, &target, AdminAction::Add).require_approval);

        target.danger = false;
        soc.danger = true;
        assert!(ChangeSocietyAdmin::new(&requester, &soc, &target, AdminAction::Add).require_approval);
        assert!(CreateSocietyDatabase::new(SqlEngine::Postgres, &requester, &soc).require_approval);
    }

    #[test]
    fn create_society_approval_follows_admins() {
        let requester = member("spqr2");
        let mut admin = member("abc12");
        assert!(!CreateSociety::new(&requester, "go", "Go", &[admin.clone()], true, false, &[]).require_approval);

        admin.danger = true;
        assert!(CreateSociety::new(&requester, "go", "Go", &[admin], true, false, &[]).require_approval);
    }

    #[test]
    fn unknown_admin_action_is_malformed() {
        let args = ArgWriter::new()
            .string("society", "chess")
            .string("target_member", "abc12")
            .string("action", "promote")
            .build();
        let err = ChangeSocietyAdmin::from_args(Some("spqr2"), &args).unwrap_err();
        assert!(matches!(err, ArgsError::Malformed { key: "action", .. }));
    }

    #[tokio::test]
    async fn cannot_remove_last_admin() {
        let deps = TestDependencies::new()
            .with_member(member("spqr2"))
            .with_society(society("chess", &["spqr2"]));
        let job = ChangeSocietyAdmin {
            requester: "spqr2".to_string(),
            society: "chess".to_string(),
            target_member: "spqr2".to_string(),
            action: AdminAction::Remove,
        };

        let resolved = job.resolve(deps.directory.as_ref()).await.unwrap();
        let outcome = resolved.run(&deps.job_deps()).await.unwrap();
        assert_eq!(outcome, Outcome::failed("Cannot remove the last admin of chess"));
        assert!(deps.accounts.calls().is_empty());
    }

    #[tokio::test]
    async fn adds_a_new_admin() {
        let deps = TestDependencies::new()
            .with_member(member("spqr2"))
            .with_member(member("abc12"))
            .with_society(society("chess", &["spqr2"]));
        let job = ChangeSocietyAdmin {
            requester: "spqr2".to_string(),
            society: "chess".to_string(),
            target_member: "abc12".to_string(),
            action: AdminAction::Add,
        };

        let resolved = job.resolve(deps.directory.as_ref()).await.unwrap();
        assert_eq!(resolved.run(&deps.job_deps()).await.unwrap(), Outcome::done());
        assert_eq!(
            deps.accounts.calls(),
            vec![AccountCall::AddSocietyAdmin {
                society: "chess".to_string(),
                crsid: "abc12".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn society_database_credentials_go_to_every_admin() {
        let deps = TestDependencies::new()
            .with_member(member("spqr2"))
            .with_member(member("abc12"))
            .with_society(society("chess-club", &["abc12", "spqr2"]));
        let job = CreateSocietyDatabase {
            engine: SqlEngine::MySql,
            requester: "spqr2".to_string(),
            society: "chess-club".to_string(),
        };

        let resolved = job.resolve(deps.directory.as_ref()).await.unwrap();
        assert_eq!(resolved.run(&deps.job_deps()).await.unwrap(), Outcome::done());
        assert!(deps.databases.has_database(SqlEngine::MySql, "chess_club"));

        let sent = deps.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients.len(), 2);
    }

    #[tokio::test]
    async fn vhost_held_by_someone_else_is_refused() {
        let deps = TestDependencies::new()
            .with_member(member("spqr2"))
            .with_society(society("chess", &["spqr2"]));
        deps.vhosts.insert(OwnerClass::User, "abc12", "chess.example.org", None);

        let job = AddSocietyVhost {
            requester: "spqr2".to_string(),
            society: "chess".to_string(),
            domain: "chess.example.org".to_string(),
            root: None,
        };
        let resolved = job.resolve(deps.directory.as_ref()).await.unwrap();
        assert_eq!(
            resolved.run(&deps.job_deps()).await.unwrap(),
            Outcome::failed("chess.example.org is already in use by another account")
        );
    }
}
