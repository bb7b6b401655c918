//! Runner startup against the control panel database.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::kernel::jobs::PgAdvisoryLock;

/// The pool plus the lock that makes this process the live runner.
pub struct Database {
    pub pool: PgPool,
    pub lock: PgAdvisoryLock,
}

/// Connect, take the runner lock, then migrate. A runner that fails with
/// `LockHeld` never touches the schema.
pub async fn open_database(config: &Config) -> Result<Database> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    // Held on its own connection until the process exits
    let lock = PgAdvisoryLock::acquire(&config.database_url, config.lock_key)
        .await
        .context("Failed to acquire job runner lock")?;

    if config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Database migrations applied");
    }

    Ok(Database { pool, lock })
}
