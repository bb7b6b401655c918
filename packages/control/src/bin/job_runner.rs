//! The control panel job runner.
//!
//! Exactly one of these runs against a database; a second instance fails
//! to take the runner lock and exits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use control::config::{Config, NotifyTransport};
use control::kernel::jobs::{
    runner::runner_id, JobRunner, JobRunnerConfig, JobStore, PgJobNotifications, PostgresJobStore,
};
use control::kernel::{
    BaseNotifier, DirectoryAccounts, DirectoryVhosts, JobDeps, LogNotifier, PostgresDirectory,
    SendmailNotifier, SqlDatabases, SysadminMailingLists,
};
use control::startup::{open_database, Database};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "job_runner")]
#[command(about = "Execute queued control panel jobs")]
struct Cli {
    /// Seconds to wait for a notification before rescanning the queue
    #[arg(long)]
    poll_timeout: Option<u64>,

    /// Do not run database migrations at startup
    #[arg(long)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,control=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(secs) = cli.poll_timeout {
        config.poll_timeout = Duration::from_secs(secs);
    }
    if cli.skip_migrations {
        config.run_migrations = false;
    }

    tracing::info!("Starting control panel job runner");

    let Database { pool, lock } = open_database(&config).await?;

    // Listen before the catch-up scan so nothing queued in between is lost
    let notifications = PgJobNotifications::listen(&pool, &config.notify_channel)
        .await
        .context("Failed to listen for job notifications")?;

    let deps = build_deps(&config, &pool).await?;
    let store: Arc<dyn JobStore> = Arc::new(PostgresJobStore::new(pool.clone()));

    let runner = JobRunner::with_config(
        store,
        Box::new(notifications),
        Box::new(lock),
        deps,
        JobRunnerConfig {
            poll_timeout: config.poll_timeout,
            runner_id: runner_id(),
        },
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown requested; finishing current job");
            shutdown.cancel();
        }
    });

    runner.run(shutdown).await.context("Job runner failed")?;
    Ok(())
}

async fn build_deps(config: &Config, pool: &sqlx::PgPool) -> Result<JobDeps> {
    let mail = config.mail_settings();

    let notifier: Arc<dyn BaseNotifier> = match config.notify_transport {
        NotifyTransport::Sendmail => Arc::new(SendmailNotifier::new(&config.sendmail_path)),
        NotifyTransport::Log => Arc::new(LogNotifier),
    };

    let mysql = match &config.mysql_admin_url {
        Some(url) => Some(
            MySqlPoolOptions::new()
                .max_connections(2)
                .connect(url)
                .await
                .context("Failed to connect to MySQL admin database")?,
        ),
        None => {
            tracing::warn!("MYSQL_ADMIN_URL not set; MySQL jobs will fail");
            None
        }
    };
    let postgres = match &config.postgres_admin_url {
        Some(url) => Some(
            PgPoolOptions::new()
                .max_connections(2)
                .connect(url)
                .await
                .context("Failed to connect to PostgreSQL admin database")?,
        ),
        None => {
            tracing::warn!("POSTGRES_ADMIN_URL not set; PostgreSQL jobs will fail");
            None
        }
    };

    Ok(JobDeps::new(
        Arc::new(PostgresDirectory::new(pool.clone())),
        notifier.clone(),
        Arc::new(DirectoryAccounts::new(pool.clone(), config.chpasswd_path.clone())),
        Arc::new(SysadminMailingLists::new(pool.clone(), notifier, mail.clone())),
        Arc::new(SqlDatabases::new(mysql, postgres)),
        Arc::new(DirectoryVhosts::new(pool.clone())),
        mail,
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
