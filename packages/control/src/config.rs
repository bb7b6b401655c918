use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;

use crate::kernel::jobs::{JOBS_CHANNEL, RUNNER_LOCK_KEY};
use crate::kernel::notifier::Sender;
use crate::kernel::MailSettings;

/// How outbound mail leaves the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTransport {
    Sendmail,
    /// Log messages instead of sending them (development).
    Log,
}

/// Job runner configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub lock_key: i64,
    /// Must match the channel the `jobs_queued_notify` trigger publishes on.
    pub notify_channel: String,
    pub poll_timeout: Duration,
    pub sysadmins: Sender,
    pub notify_from: Sender,
    pub control_url: String,
    pub notify_transport: NotifyTransport,
    pub sendmail_path: PathBuf,
    pub chpasswd_path: Option<PathBuf>,
    pub mysql_admin_url: Option<String>,
    pub postgres_admin_url: Option<String>,
    pub run_migrations: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url: var("DATABASE_URL").context("DATABASE_URL must be set")?,
            lock_key: match var("JOB_RUNNER_LOCK_KEY") {
                Some(key) => parse_lock_key(&key).context("JOB_RUNNER_LOCK_KEY must be an integer")?,
                None => RUNNER_LOCK_KEY,
            },
            notify_channel: match var("JOB_NOTIFY_CHANNEL") {
                None => JOBS_CHANNEL.to_string(),
                Some(channel) if channel == JOBS_CHANNEL => channel,
                Some(other) => bail!(
                    "JOB_NOTIFY_CHANNEL must be {:?} to match the jobs_queued_notify trigger, not {:?}",
                    JOBS_CHANNEL,
                    other
                ),
            },
            poll_timeout: Duration::from_secs(
                var("JOB_POLL_TIMEOUT_SECS")
                    .unwrap_or_else(|| "600".to_string())
                    .parse()
                    .context("JOB_POLL_TIMEOUT_SECS must be a number of seconds")?,
            ),
            sysadmins: Sender::parse(
                &var("SYSADMINS_EMAIL").unwrap_or_else(|| "sysadmins@srcf.net".to_string()),
            ),
            notify_from: Sender::parse(
                &var("NOTIFY_FROM")
                    .unwrap_or_else(|| "SRCF Control Panel <control@srcf.net>".to_string()),
            ),
            control_url: var("CONTROL_PANEL_URL")
                .unwrap_or_else(|| "https://control.srcf.net".to_string()),
            notify_transport: match var("NOTIFY_TRANSPORT").as_deref() {
                None | Some("log") => NotifyTransport::Log,
                Some("sendmail") => NotifyTransport::Sendmail,
                Some(other) => bail!("NOTIFY_TRANSPORT must be sendmail or log, not {:?}", other),
            },
            sendmail_path: var("SENDMAIL_PATH")
                .unwrap_or_else(|| "/usr/sbin/sendmail".to_string())
                .into(),
            chpasswd_path: var("CHPASSWD_PATH").map(PathBuf::from),
            mysql_admin_url: var("MYSQL_ADMIN_URL"),
            postgres_admin_url: var("POSTGRES_ADMIN_URL"),
            run_migrations: var("RUN_MIGRATIONS")
                .unwrap_or_else(|| "true".to_string())
                .parse()
                .context("RUN_MIGRATIONS must be true or false")?,
        })
    }

    pub fn mail_settings(&self) -> MailSettings {
        MailSettings {
            from: self.notify_from.clone(),
            sysadmins: self.sysadmins.clone(),
            control_url: self.control_url.clone(),
        }
    }
}

/// Decimal, or hex with a `0x` prefix.
fn parse_lock_key(value: &str) -> Result<i64> {
    let value = value.trim();
    let key = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16)?,
        None => value.parse()?,
    };
    Ok(key)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    fn config_err(vars: &[(&str, &str)]) -> String {
        match config(vars) {
            Ok(_) => panic!("expected configuration error"),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/control")]).unwrap();

        assert_eq!(config.lock_key, 0x366636F6E7472);
        assert_eq!(config.notify_channel, "jobs_insert");
        assert_eq!(config.poll_timeout, Duration::from_secs(600));
        assert_eq!(config.sysadmins.address, "sysadmins@srcf.net");
        assert_eq!(config.notify_from.to_string(), "SRCF Control Panel <control@srcf.net>");
        assert_eq!(config.notify_transport, NotifyTransport::Log);
        assert_eq!(config.chpasswd_path, None);
        assert!(config.run_migrations);
    }

    #[test]
    fn database_url_is_required() {
        let err = config(&[("JOB_POLL_TIMEOUT_SECS", "5")]).unwrap_err();
        assert_eq!(err.to_string(), "DATABASE_URL must be set");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("DATABASE_URL", "postgres://db/control"),
            ("JOB_RUNNER_LOCK_KEY", "42"),
            ("JOB_POLL_TIMEOUT_SECS", "30"),
            ("NOTIFY_TRANSPORT", "sendmail"),
            ("RUN_MIGRATIONS", "false"),
            ("MYSQL_ADMIN_URL", ""),
        ])
        .unwrap();

        assert_eq!(config.lock_key, 42);
        assert_eq!(config.poll_timeout, Duration::from_secs(30));
        assert_eq!(config.notify_transport, NotifyTransport::Sendmail);
        assert!(!config.run_migrations);
        assert_eq!(config.mysql_admin_url, None);
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let result = config(&[("DATABASE_URL", "postgres://db/control"), ("NOTIFY_TRANSPORT", "smtp")]);
        assert!(result.is_err());
    }

    #[test]
    fn notify_channel_must_match_the_trigger() {
        let config = config(&[
            ("DATABASE_URL", "postgres://db/control"),
            ("JOB_NOTIFY_CHANNEL", "jobs_insert"),
        ])
        .unwrap();
        assert_eq!(config.notify_channel, JOBS_CHANNEL);

        let err = config_err(&[
            ("DATABASE_URL", "postgres://db/control"),
            ("JOB_NOTIFY_CHANNEL", "jobs_changed"),
        ]);
        assert!(err.contains("jobs_changed"), "{}", err);
    }

    #[test]
    fn lock_keys_accept_hex() {
        assert_eq!(parse_lock_key("0x366636F6E7472").unwrap(), RUNNER_LOCK_KEY);
        assert_eq!(parse_lock_key("17").unwrap(), 17);
        assert!(parse_lock_key("0xzz").is_err());
    }
}
