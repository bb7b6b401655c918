// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic. Jobs decide
// what to do; these seams only know how to look things up and poke the
// outside world.
//
// Naming convention: Base* for trait names (e.g., BaseDirectory, BaseNotifier)

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use super::notifier::Notification;
use crate::domains::directory::{Domain, Member, OwnerClass, Society};

// =============================================================================
// Directory Trait (Infrastructure - member / society lookup)
// =============================================================================

#[async_trait]
pub trait BaseDirectory: Send + Sync {
    async fn get_member(&self, crsid: &str) -> Result<Option<Member>>;

    async fn get_society(&self, society: &str) -> Result<Option<Society>>;

    /// Look up several members at once. Unknown crsids are omitted, so
    /// callers compare lengths to detect missing references.
    async fn get_members(&self, crsids: &[String]) -> Result<Vec<Member>>;
}

// =============================================================================
// Notifier Trait (Infrastructure - outbound mail)
// =============================================================================

#[async_trait]
pub trait BaseNotifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

// =============================================================================
// Accounts Trait (Infrastructure - shell and group accounts)
// =============================================================================

/// Details of a member account about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub crsid: String,
    pub preferred_name: String,
    pub surname: String,
    pub email: String,
    /// Subscribe to the social mailing list.
    pub social: bool,
}

/// Details of a group account about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroupAccount {
    pub society: String,
    pub description: String,
    pub admins: Vec<String>,
}

#[async_trait]
pub trait BaseAccounts: Send + Sync {
    /// Create a member record and shell account.
    async fn create_member(&self, account: &NewAccount) -> Result<()>;

    /// Re-enable a lapsed member's shell account.
    async fn reactivate_member(&self, crsid: &str) -> Result<()>;

    async fn set_email(&self, crsid: &str, email: &str) -> Result<()>;

    /// Set a new random login password and return it.
    async fn reset_password(&self, crsid: &str) -> Result<String>;

    async fn create_society(&self, account: &NewGroupAccount) -> Result<()>;

    async fn add_society_admin(&self, society: &str, crsid: &str) -> Result<()>;

    async fn remove_society_admin(&self, society: &str, crsid: &str) -> Result<()>;

    /// `None` clears the role address.
    async fn set_role_email(&self, society: &str, email: Option<&str>) -> Result<()>;
}

// =============================================================================
// Mailing Lists Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseMailingLists: Send + Sync {
    async fn list_exists(&self, list: &str) -> Result<bool>;

    async fn create_list(&self, list: &str, admin_email: &str) -> Result<()>;

    /// Reset the list administrator password; the list software mails the
    /// new one to the list owner.
    async fn reset_list_password(&self, list: &str) -> Result<()>;
}

// =============================================================================
// SQL Databases Trait (Infrastructure - MySQL / PostgreSQL hosting)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SqlEngine {
    MySql,
    Postgres,
}

impl SqlEngine {
    /// Name used in job tags and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlEngine::MySql => "mysql",
            SqlEngine::Postgres => "postgres",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SqlEngine::MySql => "MySQL",
            SqlEngine::Postgres => "PostgreSQL",
        }
    }

    /// Account and database names as the engine sees them. MySQL does not
    /// allow `-` in unquoted names, so society names are mangled.
    pub fn account_name(&self, name: &str) -> String {
        match self {
            SqlEngine::MySql => name.replace('-', "_"),
            SqlEngine::Postgres => name.to_string(),
        }
    }
}

impl fmt::Display for SqlEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[async_trait]
pub trait BaseSqlDatabases: Send + Sync {
    async fn user_exists(&self, engine: SqlEngine, user: &str) -> Result<bool>;

    async fn database_exists(&self, engine: SqlEngine, database: &str) -> Result<bool>;

    /// Create a login role and return its generated password.
    async fn create_user(&self, engine: SqlEngine, user: &str) -> Result<String>;

    /// Create a database owned by (or fully granted to) `owner`.
    async fn create_database(&self, engine: SqlEngine, database: &str, owner: &str) -> Result<()>;

    /// Set a new random password for an existing role and return it.
    async fn reset_password(&self, engine: SqlEngine, user: &str) -> Result<String>;
}

// =============================================================================
// Vhosts Trait (Infrastructure - custom domains)
// =============================================================================

#[async_trait]
pub trait BaseVhosts: Send + Sync {
    async fn get_vhost(&self, domain: &str) -> Result<Option<Domain>>;

    async fn add_vhost(
        &self,
        class: OwnerClass,
        owner: &str,
        domain: &str,
        root: Option<&str>,
    ) -> Result<()>;

    async fn set_docroot(&self, domain: &str, root: Option<&str>) -> Result<()>;

    async fn remove_vhost(&self, domain: &str) -> Result<()>;
}
