// TestDependencies - mock implementations for testing
//
// Provides in-memory collaborators that can be injected into JobDeps for
// tests. Each mock records what was asked of it and keeps just enough state
// for jobs' "does it already exist?" checks to behave.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use super::deps::{JobDeps, MailSettings};
use super::notifier::{Notification, Sender};
use super::traits::{NewAccount, NewGroupAccount};
use super::{
    BaseAccounts, BaseDirectory, BaseMailingLists, BaseNotifier, BaseSqlDatabases, BaseVhosts,
    SqlEngine,
};
use crate::domains::directory::{Domain, Member, OwnerClass, Society};

// =============================================================================
// Fixtures
// =============================================================================

/// An ordinary active member with no danger flag.
pub fn member(crsid: &str) -> Member {
    Member {
        crsid: crsid.to_string(),
        preferred_name: "Test".to_string(),
        surname: crsid.to_uppercase(),
        email: format!("{}@example.org", crsid),
        mail_handler: "forward".to_string(),
        member: true,
        user: true,
        danger: false,
        joined: Utc::now(),
    }
}

pub fn society(name: &str, admins: &[&str]) -> Society {
    Society {
        society: name.to_string(),
        description: format!("{} society", name),
        role_email: None,
        danger: false,
        joined: Utc::now(),
        admins: admins.iter().map(|a| a.to_string()).collect(),
    }
}

// =============================================================================
// Mock Directory
// =============================================================================

#[derive(Default)]
pub struct MockDirectory {
    members: Mutex<BTreeMap<String, Member>>,
    societies: Mutex<BTreeMap<String, Society>>,
}

impl MockDirectory {
    pub fn insert_member(&self, member: Member) {
        self.members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(member.crsid.clone(), member);
    }

    pub fn insert_society(&self, society: Society) {
        self.societies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(society.society.clone(), society);
    }

    fn update_member(&self, crsid: &str, f: impl FnOnce(&mut Member)) {
        if let Some(member) = self.members.lock().unwrap_or_else(|e| e.into_inner()).get_mut(crsid) {
            f(member);
        }
    }

    fn update_society(&self, society: &str, f: impl FnOnce(&mut Society)) {
        if let Some(society) = self.societies.lock().unwrap_or_else(|e| e.into_inner()).get_mut(society) {
            f(society);
        }
    }
}

#[async_trait]
impl BaseDirectory for MockDirectory {
    async fn get_member(&self, crsid: &str) -> Result<Option<Member>> {
        Ok(self.members.lock().unwrap_or_else(|e| e.into_inner()).get(crsid).cloned())
    }

    async fn get_society(&self, society: &str) -> Result<Option<Society>> {
        Ok(self.societies.lock().unwrap_or_else(|e| e.into_inner()).get(society).cloned())
    }

    async fn get_members(&self, crsids: &[String]) -> Result<Vec<Member>> {
        let members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        Ok(crsids.iter().filter_map(|c| members.get(c).cloned()).collect())
    }
}

// =============================================================================
// Recording Notifier
// =============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Make every subsequent send fail.
    pub fn fail_sends(&self) {
        *self.failing.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn sent_to(&self, address: &str) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.recipients.iter().any(|r| r.address == address))
            .collect()
    }
}

#[async_trait]
impl BaseNotifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        if *self.failing.lock().unwrap_or_else(|e| e.into_inner()) {
            anyhow::bail!("mail server unreachable");
        }
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(notification.clone());
        Ok(())
    }
}

// =============================================================================
// Mock Accounts
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountCall {
    CreateMember(String),
    ReactivateMember(String),
    SetEmail { crsid: String, email: String },
    ResetPassword(String),
    CreateSociety(String),
    AddSocietyAdmin { society: String, crsid: String },
    RemoveSocietyAdmin { society: String, crsid: String },
    SetRoleEmail { society: String, email: Option<String> },
}

/// Records account operations and reflects them into the shared directory.
pub struct MockAccounts {
    directory: Arc<MockDirectory>,
    calls: Mutex<Vec<AccountCall>>,
}

impl MockAccounts {
    pub fn new(directory: Arc<MockDirectory>) -> Self {
        Self {
            directory,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<AccountCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: AccountCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl BaseAccounts for MockAccounts {
    async fn create_member(&self, account: &NewAccount) -> Result<()> {
        self.record(AccountCall::CreateMember(account.crsid.clone()));
        let mut created = member(&account.crsid);
        created.preferred_name = account.preferred_name.clone();
        created.surname = account.surname.clone();
        created.email = account.email.clone();
        self.directory.insert_member(created);
        Ok(())
    }

    async fn reactivate_member(&self, crsid: &str) -> Result<()> {
        self.record(AccountCall::ReactivateMember(crsid.to_string()));
        self.directory.update_member(crsid, |m| m.user = true);
        Ok(())
    }

    async fn set_email(&self, crsid: &str, email: &str) -> Result<()> {
        self.record(AccountCall::SetEmail {
            crsid: crsid.to_string(),
            email: email.to_string(),
        });
        self.directory
            .update_member(crsid, |m| m.email = email.to_string());
        Ok(())
    }

    async fn reset_password(&self, crsid: &str) -> Result<String> {
        self.record(AccountCall::ResetPassword(crsid.to_string()));
        Ok(format!("pw-{}", crsid))
    }

    async fn create_society(&self, account: &NewGroupAccount) -> Result<()> {
        self.record(AccountCall::CreateSociety(account.society.clone()));
        let admins: Vec<&str> = account.admins.iter().map(String::as_str).collect();
        let mut created = society(&account.society, &admins);
        created.description = account.description.clone();
        self.directory.insert_society(created);
        Ok(())
    }

    async fn add_society_admin(&self, society: &str, crsid: &str) -> Result<()> {
        self.record(AccountCall::AddSocietyAdmin {
            society: society.to_string(),
            crsid: crsid.to_string(),
        });
        self.directory
            .update_society(society, |s| s.admins.push(crsid.to_string()));
        Ok(())
    }

    async fn remove_society_admin(&self, society: &str, crsid: &str) -> Result<()> {
        self.record(AccountCall::RemoveSocietyAdmin {
            society: society.to_string(),
            crsid: crsid.to_string(),
        });
        self.directory
            .update_society(society, |s| s.admins.retain(|a| a != crsid));
        Ok(())
    }

    async fn set_role_email(&self, society: &str, email: Option<&str>) -> Result<()> {
        self.record(AccountCall::SetRoleEmail {
            society: society.to_string(),
            email: email.map(str::to_string),
        });
        self.directory
            .update_society(society, |s| s.role_email = email.map(str::to_string));
        Ok(())
    }
}

// =============================================================================
// Mock Mailing Lists
// =============================================================================

#[derive(Default)]
pub struct MockMailingLists {
    lists: Mutex<BTreeMap<String, String>>,
    resets: Mutex<Vec<String>>,
    panic_on_create: Mutex<bool>,
}

impl MockMailingLists {
    pub fn lists(&self) -> Vec<String> {
        self.lists.lock().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }

    pub fn resets(&self) -> Vec<String> {
        self.resets.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Make `create_list` panic, standing in for a bug in a backend.
    pub fn panic_on_create(&self) {
        *self.panic_on_create.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }
}

#[async_trait]
impl BaseMailingLists for MockMailingLists {
    async fn list_exists(&self, list: &str) -> Result<bool> {
        Ok(self.lists.lock().unwrap_or_else(|e| e.into_inner()).contains_key(list))
    }

    async fn create_list(&self, list: &str, admin_email: &str) -> Result<()> {
        if *self.panic_on_create.lock().unwrap_or_else(|e| e.into_inner()) {
            panic!("list backend exploded creating {}", list);
        }
        self.lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(list.to_string(), admin_email.to_string());
        Ok(())
    }

    async fn reset_list_password(&self, list: &str) -> Result<()> {
        self.resets.lock().unwrap_or_else(|e| e.into_inner()).push(list.to_string());
        Ok(())
    }
}

// =============================================================================
// Mock SQL Databases
// =============================================================================

#[derive(Default)]
pub struct MockSqlDatabases {
    users: Mutex<BTreeSet<(SqlEngine, String)>>,
    databases: Mutex<BTreeMap<(SqlEngine, String), String>>,
    failure: Mutex<Option<String>>,
}

impl MockSqlDatabases {
    pub fn has_user(&self, engine: SqlEngine, user: &str) -> bool {
        self.users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(engine, user.to_string()))
    }

    pub fn has_database(&self, engine: SqlEngine, database: &str) -> bool {
        self.databases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&(engine, database.to_string()))
    }

    pub fn database_count(&self) -> usize {
        self.databases.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Make every operation fail with `message` until cleared.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn check(&self) -> Result<()> {
        match self.failure.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(message) => anyhow::bail!("{}", message),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BaseSqlDatabases for MockSqlDatabases {
    async fn user_exists(&self, engine: SqlEngine, user: &str) -> Result<bool> {
        self.check()?;
        Ok(self.has_user(engine, user))
    }

    async fn database_exists(&self, engine: SqlEngine, database: &str) -> Result<bool> {
        self.check()?;
        Ok(self.has_database(engine, database))
    }

    async fn create_user(&self, engine: SqlEngine, user: &str) -> Result<String> {
        self.check()?;
        self.users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((engine, user.to_string()));
        Ok(format!("pw-{}", user))
    }

    async fn create_database(&self, engine: SqlEngine, database: &str, owner: &str) -> Result<()> {
        self.check()?;
        self.databases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((engine, database.to_string()), owner.to_string());
        Ok(())
    }

    async fn reset_password(&self, engine: SqlEngine, user: &str) -> Result<String> {
        self.check()?;
        Ok(format!("pw2-{}-{}", engine.as_str(), user))
    }
}

// =============================================================================
// Mock Vhosts
// =============================================================================

#[derive(Default)]
pub struct MockVhosts {
    domains: Mutex<BTreeMap<String, Domain>>,
}

impl MockVhosts {
    pub fn insert(&self, class: OwnerClass, owner: &str, domain: &str, root: Option<&str>) {
        let mut domains = self.domains.lock().unwrap_or_else(|e| e.into_inner());
        let id = domains.len() as i64 + 1;
        domains.insert(
            domain.to_string(),
            Domain {
                id,
                class: class.as_str().to_string(),
                owner: owner.to_string(),
                domain: domain.to_string(),
                root: root.map(str::to_string),
            },
        );
    }

    pub fn get(&self, domain: &str) -> Option<Domain> {
        self.domains.lock().unwrap_or_else(|e| e.into_inner()).get(domain).cloned()
    }
}

#[async_trait]
impl BaseVhosts for MockVhosts {
    async fn get_vhost(&self, domain: &str) -> Result<Option<Domain>> {
        Ok(self.get(domain))
    }

    async fn add_vhost(
        &self,
        class: OwnerClass,
        owner: &str,
        domain: &str,
        root: Option<&str>,
    ) -> Result<()> {
        self.insert(class, owner, domain, root);
        Ok(())
    }

    async fn set_docroot(&self, domain: &str, root: Option<&str>) -> Result<()> {
        if let Some(existing) = self.domains.lock().unwrap_or_else(|e| e.into_inner()).get_mut(domain) {
            existing.root = root.map(str::to_string);
        }
        Ok(())
    }

    async fn remove_vhost(&self, domain: &str) -> Result<()> {
        self.domains.lock().unwrap_or_else(|e| e.into_inner()).remove(domain);
        Ok(())
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Bundle of mocks with typed handles for assertions.
pub struct TestDependencies {
    pub directory: Arc<MockDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub accounts: Arc<MockAccounts>,
    pub mailing_lists: Arc<MockMailingLists>,
    pub databases: Arc<MockSqlDatabases>,
    pub vhosts: Arc<MockVhosts>,
    pub mail: MailSettings,
}

impl TestDependencies {
    pub fn new() -> Self {
        let directory = Arc::new(MockDirectory::default());
        Self {
            accounts: Arc::new(MockAccounts::new(directory.clone())),
            directory,
            notifier: Arc::new(RecordingNotifier::default()),
            mailing_lists: Arc::new(MockMailingLists::default()),
            databases: Arc::new(MockSqlDatabases::default()),
            vhosts: Arc::new(MockVhosts::default()),
            mail: MailSettings {
                from: Sender::new("SRCF Control Panel", "control@srcf.net"),
                sysadmins: Sender::address_only("sysadmins@srcf.net"),
                control_url: "https://control.srcf.net".to_string(),
            },
        }
    }

    pub fn with_member(self, member: Member) -> Self {
        self.directory.insert_member(member);
        self
    }

    pub fn with_society(self, society: Society) -> Self {
        self.directory.insert_society(society);
        self
    }

    pub fn job_deps(&self) -> JobDeps {
        JobDeps::new(
            self.directory.clone(),
            self.notifier.clone(),
            self.accounts.clone(),
            self.mailing_lists.clone(),
            self.databases.clone(),
            self.vhosts.clone(),
            self.mail.clone(),
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
