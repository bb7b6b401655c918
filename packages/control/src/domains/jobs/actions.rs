//! Provisioning steps shared by member and society jobs.
//!
//! Each step checks the current external state first and reports a
//! business failure instead of redoing work that already happened.

use anyhow::Result;
use tracing::info;

use super::Outcome;
use crate::domains::directory::OwnerClass;
use crate::kernel::notifier::Sender;
use crate::kernel::{JobDeps, SqlEngine};

/// Mail generated credentials to `recipients`.
pub async fn send_credentials(
    deps: &JobDeps,
    recipients: Vec<Sender>,
    subject: &str,
    body: String,
) -> Result<()> {
    let notification = deps
        .mail
        .message(recipients, format!("[SRCF Control Panel] {}", subject), body);
    deps.notifier.notify(&notification).await
}

pub async fn create_database(
    deps: &JobDeps,
    engine: SqlEngine,
    name: &str,
    recipients: Vec<Sender>,
) -> Result<Outcome> {
    if deps.databases.database_exists(engine, name).await? {
        return Ok(Outcome::failed(format!("{} database {} already exists", engine, name)));
    }

    let password = if deps.databases.user_exists(engine, name).await? {
        None
    } else {
        Some(deps.databases.create_user(engine, name).await?)
    };

    deps.databases.create_database(engine, name, name).await?;
    info!(engine = engine.as_str(), database = %name, "database created");

    let mut body = format!("{} database {} has been created.\n\n", engine, name);
    match password {
        Some(password) => body.push_str(&format!(
            "Username: {}\nPassword: {}\n\nYou can change this password once logged in.\n",
            name, password
        )),
        None => body.push_str(&format!(
            "It belongs to your existing {} account {}, whose password is unchanged.\n",
            engine, name
        )),
    }
    send_credentials(deps, recipients, &format!("{} database created", engine), body).await?;

    Ok(Outcome::done())
}

pub async fn reset_database_password(
    deps: &JobDeps,
    engine: SqlEngine,
    name: &str,
    recipients: Vec<Sender>,
) -> Result<Outcome> {
    if !deps.databases.user_exists(engine, name).await? {
        return Ok(Outcome::failed(format!("{} account {} does not exist", engine, name)));
    }

    let password = deps.databases.reset_password(engine, name).await?;
    let body = format!(
        "The password for {} account {} has been reset.\n\nUsername: {}\nPassword: {}\n",
        engine, name, name, password
    );
    send_credentials(deps, recipients, &format!("{} password reset", engine), body).await?;

    Ok(Outcome::done())
}

pub async fn create_list(deps: &JobDeps, list: &str, admin_email: &str) -> Result<Outcome> {
    if deps.mailing_lists.list_exists(list).await? {
        return Ok(Outcome::failed(format!("Mailing list {} already exists", list)));
    }
    deps.mailing_lists.create_list(list, admin_email).await?;
    Ok(Outcome::done())
}

pub async fn reset_list_password(deps: &JobDeps, list: &str) -> Result<Outcome> {
    if !deps.mailing_lists.list_exists(list).await? {
        return Ok(Outcome::failed(format!("Mailing list {} does not exist", list)));
    }
    deps.mailing_lists.reset_list_password(list).await?;
    Ok(Outcome::done())
}

pub async fn add_vhost(
    deps: &JobDeps,
    class: OwnerClass,
    owner: &str,
    domain: &str,
    root: Option<&str>,
) -> Result<Outcome> {
    if let Some(existing) = deps.vhosts.get_vhost(domain).await? {
        let message = if existing.is_owned_by(class, owner) {
            format!("{} is already set up for {}", domain, owner)
        } else {
            format!("{} is already in use by another account", domain)
        };
        return Ok(Outcome::failed(message));
    }
    deps.vhosts.add_vhost(class, owner, domain, root).await?;
    Ok(Outcome::done())
}

pub async fn set_docroot(
    deps: &JobDeps,
    class: OwnerClass,
    owner: &str,
    domain: &str,
    root: Option<&str>,
) -> Result<Outcome> {
    match deps.vhosts.get_vhost(domain).await? {
        Some(existing) if existing.is_owned_by(class, owner) => {
            if existing.root.as_deref() != root {
                deps.vhosts.set_docroot(domain, root).await?;
            }
            Ok(Outcome::done())
        }
        _ => Ok(Outcome::failed(format!("{} is not registered to {}", domain, owner))),
    }
}

pub async fn remove_vhost(
    deps: &JobDeps,
    class: OwnerClass,
    owner: &str,
    domain: &str,
) -> Result<Outcome> {
    match deps.vhosts.get_vhost(domain).await? {
        Some(existing) if existing.is_owned_by(class, owner) => {
            deps.vhosts.remove_vhost(domain).await?;
            Ok(Outcome::done())
        }
        _ => Ok(Outcome::failed(format!("{} is not registered to {}", domain, owner))),
    }
}
