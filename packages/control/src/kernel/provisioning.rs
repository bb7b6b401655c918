//! Production provisioning backends.
//!
//! Accounts, vhosts and mailing lists are records in the shared control
//! panel database; the hosting hosts pick changes up from there. SQL
//! databases are created directly over admin connections to each engine.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, PgPool};
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use super::deps::MailSettings;
use super::traits::{NewAccount, NewGroupAccount};
use super::{BaseAccounts, BaseMailingLists, BaseNotifier, BaseSqlDatabases, BaseVhosts, SqlEngine};
use crate::domains::directory::{Domain, OwnerClass};

/// A random password: 16 lowercase hex characters.
pub fn generate_password() -> String {
    Uuid::new_v4().simple().to_string().chars().take(16).collect()
}

// =============================================================================
// Accounts
// =============================================================================

pub struct DirectoryAccounts {
    pool: PgPool,
    /// Sets shell passwords when present; otherwise passwords are only
    /// generated and mailed.
    chpasswd: Option<PathBuf>,
}

impl DirectoryAccounts {
    pub fn new(pool: PgPool, chpasswd: Option<PathBuf>) -> Self {
        Self { pool, chpasswd }
    }

    async fn chpasswd(&self, crsid: &str, password: &str) -> Result<()> {
        let Some(path) = &self.chpasswd else {
            return Ok(());
        };

        let mut child = tokio::process::Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", path.display()))?;

        let mut stdin = child.stdin.take().context("chpasswd stdin was not captured")?;
        stdin
            .write_all(format!("{}:{}\n", crsid, password).as_bytes())
            .await
            .context("Failed to write to chpasswd")?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for chpasswd")?;
        if !output.status.success() {
            bail!(
                "chpasswd exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl BaseAccounts for DirectoryAccounts {
    async fn create_member(&self, account: &NewAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO members (crsid, preferred_name, surname, email, member, "user")
            VALUES ($1, $2, $3, $4, true, true)
            "#,
        )
        .bind(&account.crsid)
        .bind(&account.preferred_name)
        .bind(&account.surname)
        .bind(&account.email)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create member {}", account.crsid))?;

        info!(crsid = %account.crsid, social = account.social, "member created");
        Ok(())
    }

    async fn reactivate_member(&self, crsid: &str) -> Result<()> {
        let result = sqlx::query(r#"UPDATE members SET member = true, "user" = true WHERE crsid = $1"#)
            .bind(crsid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("member {} not found", crsid);
        }
        Ok(())
    }

    async fn set_email(&self, crsid: &str, email: &str) -> Result<()> {
        sqlx::query("UPDATE members SET email = $2 WHERE crsid = $1")
            .bind(crsid)
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_password(&self, crsid: &str) -> Result<String> {
        let password = generate_password();
        self.chpasswd(crsid, &password).await?;
        Ok(password)
    }

    async fn create_society(&self, account: &NewGroupAccount) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO societies (society, description) VALUES ($1, $2)")
            .bind(&account.society)
            .bind(&account.description)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to create society {}", account.society))?;

        for crsid in &account.admins {
            sqlx::query("INSERT INTO society_admins (society, crsid) VALUES ($1, $2)")
                .bind(&account.society)
                .bind(crsid)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn add_society_admin(&self, society: &str, crsid: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO society_admins (society, crsid) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(society)
        .bind(crsid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_society_admin(&self, society: &str, crsid: &str) -> Result<()> {
        sqlx::query("DELETE FROM society_admins WHERE society = $1 AND crsid = $2")
            .bind(society)
            .bind(crsid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_role_email(&self, society: &str, email: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE societies SET role_email = $2 WHERE society = $1")
            .bind(society)
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// SQL databases
// =============================================================================

/// Admin connections to the hosted database servers. An engine without a
/// connection refuses every request.
#[derive(Default)]
pub struct SqlDatabases {
    mysql: Option<MySqlPool>,
    postgres: Option<PgPool>,
}

impl SqlDatabases {
    pub fn new(mysql: Option<MySqlPool>, postgres: Option<PgPool>) -> Self {
        Self { mysql, postgres }
    }

    fn mysql(&self) -> Result<&MySqlPool> {
        self.mysql
            .as_ref()
            .context("MySQL provisioning is not configured")
    }

    fn postgres(&self) -> Result<&PgPool> {
        self.postgres
            .as_ref()
            .context("PostgreSQL provisioning is not configured")
    }
}

/// Account and database names end up inside DDL, so only a conservative
/// character set is accepted.
fn checked_identifier(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !valid {
        bail!("invalid database identifier {:?}", name);
    }
    Ok(name)
}

fn mysql_account(user: &str) -> Result<String> {
    Ok(format!("'{}'@'%'", checked_identifier(user)?))
}

fn mysql_database(database: &str) -> Result<String> {
    Ok(format!("`{}`", checked_identifier(database)?))
}

fn pg_identifier(name: &str) -> Result<String> {
    Ok(format!("\"{}\"", checked_identifier(name)?))
}

#[async_trait]
impl BaseSqlDatabases for SqlDatabases {
    async fn user_exists(&self, engine: SqlEngine, user: &str) -> Result<bool> {
        match engine {
            SqlEngine::MySql => {
                let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM mysql.user WHERE User = ?")
                    .bind(user)
                    .fetch_one(self.mysql()?)
                    .await?;
                Ok(count > 0)
            }
            SqlEngine::Postgres => {
                let (exists,): (bool,) =
                    sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_roles WHERE rolname = $1)")
                        .bind(user)
                        .fetch_one(self.postgres()?)
                        .await?;
                Ok(exists)
            }
        }
    }

    async fn database_exists(&self, engine: SqlEngine, database: &str) -> Result<bool> {
        match engine {
            SqlEngine::MySql => {
                let (count,): (i64,) = sqlx::query_as(
                    "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = ?",
                )
                .bind(database)
                .fetch_one(self.mysql()?)
                .await?;
                Ok(count > 0)
            }
            SqlEngine::Postgres => {
                let (exists,): (bool,) =
                    sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                        .bind(database)
                        .fetch_one(self.postgres()?)
                        .await?;
                Ok(exists)
            }
        }
    }

    async fn create_user(&self, engine: SqlEngine, user: &str) -> Result<String> {
        let password = generate_password();
        match engine {
            SqlEngine::MySql => {
                let sql = format!("CREATE USER {} IDENTIFIED BY '{}'", mysql_account(user)?, password);
                sqlx::raw_sql(&sql).execute(self.mysql()?).await?;
            }
            SqlEngine::Postgres => {
                let sql = format!("CREATE ROLE {} LOGIN PASSWORD '{}'", pg_identifier(user)?, password);
                sqlx::raw_sql(&sql).execute(self.postgres()?).await?;
            }
        }
        info!(engine = engine.as_str(), user = %user, "database user created");
        Ok(password)
    }

    async fn create_database(&self, engine: SqlEngine, database: &str, owner: &str) -> Result<()> {
        match engine {
            SqlEngine::MySql => {
                let pool = self.mysql()?;
                let db = mysql_database(database)?;
                sqlx::raw_sql(&format!("CREATE DATABASE {}", db)).execute(pool).await?;
                sqlx::raw_sql(&format!(
                    "GRANT ALL PRIVILEGES ON {}.* TO {}",
                    db,
                    mysql_account(owner)?
                ))
                .execute(pool)
                .await?;
            }
            SqlEngine::Postgres => {
                let sql = format!(
                    "CREATE DATABASE {} OWNER {}",
                    pg_identifier(database)?,
                    pg_identifier(owner)?
                );
                sqlx::raw_sql(&sql).execute(self.postgres()?).await?;
            }
        }
        Ok(())
    }

    async fn reset_password(&self, engine: SqlEngine, user: &str) -> Result<String> {
        let password = generate_password();
        match engine {
            SqlEngine::MySql => {
                let sql = format!("ALTER USER {} IDENTIFIED BY '{}'", mysql_account(user)?, password);
                sqlx::raw_sql(&sql).execute(self.mysql()?).await?;
            }
            SqlEngine::Postgres => {
                let sql = format!("ALTER ROLE {} PASSWORD '{}'", pg_identifier(user)?, password);
                sqlx::raw_sql(&sql).execute(self.postgres()?).await?;
            }
        }
        Ok(password)
    }
}

// =============================================================================
// Mailing lists
// =============================================================================

/// Records list requests and mails the sysadmins, who run the list server.
pub struct SysadminMailingLists {
    pool: PgPool,
    notifier: Arc<dyn BaseNotifier>,
    mail: MailSettings,
}

impl SysadminMailingLists {
    pub fn new(pool: PgPool, notifier: Arc<dyn BaseNotifier>, mail: MailSettings) -> Self {
        Self {
            pool,
            notifier,
            mail,
        }
    }

    async fn ask_sysadmins(&self, subject: String, body: String) -> Result<()> {
        let notification = self
            .mail
            .to_sysadmins(format!("[SRCF Control Panel] {}", subject), body);
        self.notifier.notify(&notification).await
    }
}

#[async_trait]
impl BaseMailingLists for SysadminMailingLists {
    async fn list_exists(&self, list: &str) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM mailing_lists WHERE list = $1)")
                .bind(list)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn create_list(&self, list: &str, admin_email: &str) -> Result<()> {
        sqlx::query("INSERT INTO mailing_lists (list, admin_email) VALUES ($1, $2)")
            .bind(list)
            .bind(admin_email)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to record mailing list {}", list))?;

        self.ask_sysadmins(
            format!("Create mailing list {}", list),
            format!("Please create the mailing list {} with administrator {}.\n", list, admin_email),
        )
        .await
    }

    async fn reset_list_password(&self, list: &str) -> Result<()> {
        self.ask_sysadmins(
            format!("Reset mailing list password for {}", list),
            format!(
                "Please reset the administrator password of {} and send it to the list owner.\n",
                list
            ),
        )
        .await
    }
}

// =============================================================================
// Vhosts
// =============================================================================

pub struct DirectoryVhosts {
    pool: PgPool,
}

impl DirectoryVhosts {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseVhosts for DirectoryVhosts {
    async fn get_vhost(&self, domain: &str) -> Result<Option<Domain>> {
        Domain::find_by_domain(domain, &self.pool).await
    }

    async fn add_vhost(
        &self,
        class: OwnerClass,
        owner: &str,
        domain: &str,
        root: Option<&str>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO domains (class, owner, domain, root) VALUES ($1, $2, $3, $4)")
            .bind(class.as_str())
            .bind(owner)
            .bind(domain)
            .bind(root)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to add vhost {}", domain))?;
        Ok(())
    }

    async fn set_docroot(&self, domain: &str, root: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE domains SET root = $2 WHERE domain = $1")
            .bind(domain)
            .bind(root)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_vhost(&self, domain: &str) -> Result<()> {
        sqlx::query("DELETE FROM domains WHERE domain = $1")
            .bind(domain)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_are_hex_and_distinct() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn identifiers_reject_quoting_characters() {
        assert!(checked_identifier("chess_club").is_ok());
        assert!(checked_identifier("chess-soc").is_ok());
        assert!(checked_identifier("").is_err());
        assert!(checked_identifier("x'; DROP DATABASE y; --").is_err());
        assert!(checked_identifier("Upper").is_err());
    }

    #[test]
    fn engine_quoting() {
        assert_eq!(mysql_account("spqr2").unwrap(), "'spqr2'@'%'");
        assert_eq!(mysql_database("chess_club").unwrap(), "`chess_club`");
        assert_eq!(pg_identifier("chess-soc").unwrap(), "\"chess-soc\"");
    }

    #[tokio::test]
    async fn unconfigured_engine_is_refused() {
        let databases = SqlDatabases::default();
        let err = databases
            .user_exists(SqlEngine::MySql, "spqr2")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "MySQL provisioning is not configured");
    }
}
