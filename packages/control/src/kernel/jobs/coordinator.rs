//! Single-worker coordination.
//!
//! Exactly one job runner may be live per database. The runner takes a
//! session-level advisory lock on a dedicated connection and keeps that
//! connection open for its whole lifetime; the lock goes away with the
//! session, so a crashed runner never wedges the queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use thiserror::Error;
use tracing::info;

/// Advisory lock key shared by every runner deployment.
pub const RUNNER_LOCK_KEY: i64 = 0x366636F6E7472;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("another job runner holds lock {key:#x}")]
    LockHeld { key: i64 },

    #[error("lost job runner lock {key:#x}: {reason}")]
    LockLost { key: i64, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A held worker lock.
#[async_trait]
pub trait WorkerLock: Send {
    fn key(&self) -> i64;

    /// Confirm the lock is still held. An error means exclusivity can no
    /// longer be assumed and the runner must stop.
    async fn verify(&mut self) -> Result<(), CoordinatorError>;
}

// =============================================================================
// Postgres advisory lock
// =============================================================================

pub struct PgAdvisoryLock {
    // Deliberately not from the pool: the lock lives exactly as long as this
    // session.
    conn: PgConnection,
    key: i64,
}

impl PgAdvisoryLock {
    /// Try once to take the lock. Never waits.
    pub async fn acquire(database_url: &str, key: i64) -> Result<Self, CoordinatorError> {
        let mut conn = PgConnection::connect(database_url).await?;

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut conn)
            .await?;

        if !locked {
            // Dropping the connection here is fine; we hold nothing.
            return Err(CoordinatorError::LockHeld { key });
        }

        info!(key = format!("{:#x}", key), "acquired job runner lock");
        Ok(Self { conn, key })
    }

    /// Release the lock explicitly and close the session.
    pub async fn release(mut self) -> Result<(), CoordinatorError> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut self.conn)
            .await?;
        self.conn.close().await?;
        Ok(())
    }
}

#[async_trait]
impl WorkerLock for PgAdvisoryLock {
    fn key(&self) -> i64 {
        self.key
    }

    async fn verify(&mut self) -> Result<(), CoordinatorError> {
        // A single-bigint advisory lock is recorded in pg_locks split across
        // classid (high 32 bits) and objid (low 32 bits), with objsubid = 1.
        let held: Result<bool, sqlx::Error> = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_locks
                WHERE locktype = 'advisory'
                  AND pid = pg_backend_pid()
                  AND granted
                  AND objsubid = 1
                  AND ((classid::bigint << 32) | objid::bigint) = $1
            )
            "#,
        )
        .bind(self.key)
        .fetch_one(&mut self.conn)
        .await;

        match held {
            Ok(true) => Ok(()),
            Ok(false) => Err(CoordinatorError::LockLost {
                key: self.key,
                reason: "lock no longer granted to this session".to_string(),
            }),
            Err(e) => Err(CoordinatorError::LockLost {
                key: self.key,
                reason: e.to_string(),
            }),
        }
    }
}

// =============================================================================
// In-process lock table
// =============================================================================

/// Process-local stand-in for the advisory lock namespace.
#[derive(Clone, Default)]
pub struct MemoryLockTable {
    state: Arc<Mutex<LockTableState>>,
}

#[derive(Default)]
struct LockTableState {
    /// Key to the token of the acquisition that holds it.
    held: HashMap<i64, u64>,
    next_token: u64,
}

impl MemoryLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LockTableState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn acquire(&self, key: i64) -> Result<MemoryLock, CoordinatorError> {
        let mut state = self.state();
        if state.held.contains_key(&key) {
            return Err(CoordinatorError::LockHeld { key });
        }
        state.next_token += 1;
        let token = state.next_token;
        state.held.insert(key, token);
        Ok(MemoryLock {
            table: self.clone(),
            key,
            token,
        })
    }

    /// Drop a lock out from under its holder, as a lost session would.
    pub fn revoke(&self, key: i64) {
        self.state().held.remove(&key);
    }

    pub fn is_held(&self, key: i64) -> bool {
        self.state().held.contains_key(&key)
    }

    fn holds(&self, key: i64, token: u64) -> bool {
        self.state().held.get(&key) == Some(&token)
    }

    fn release(&self, key: i64, token: u64) {
        let mut state = self.state();
        if state.held.get(&key) == Some(&token) {
            state.held.remove(&key);
        }
    }
}

pub struct MemoryLock {
    table: MemoryLockTable,
    key: i64,
    token: u64,
}

#[async_trait]
impl WorkerLock for MemoryLock {
    fn key(&self) -> i64 {
        self.key
    }

    async fn verify(&mut self) -> Result<(), CoordinatorError> {
        if self.table.holds(self.key, self.token) {
            Ok(())
        } else {
            Err(CoordinatorError::LockLost {
                key: self.key,
                reason: "revoked".to_string(),
            })
        }
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        self.table.release(self.key, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_live() {
        let table = MemoryLockTable::new();
        let _first = table.acquire(RUNNER_LOCK_KEY).unwrap();

        let second = table.acquire(RUNNER_LOCK_KEY);
        assert!(matches!(second, Err(CoordinatorError::LockHeld { key }) if key == RUNNER_LOCK_KEY));
    }

    #[test]
    fn dropping_the_holder_releases_the_lock() {
        let table = MemoryLockTable::new();
        let first = table.acquire(RUNNER_LOCK_KEY).unwrap();
        drop(first);

        tokio_test::assert_ok!(table.acquire(RUNNER_LOCK_KEY));
    }

    #[test]
    fn distinct_keys_do_not_conflict() {
        let table = MemoryLockTable::new();
        let _a = tokio_test::assert_ok!(table.acquire(1));
        tokio_test::assert_ok!(table.acquire(2));
    }

    #[tokio::test]
    async fn verify_reports_a_revoked_lock() {
        let table = MemoryLockTable::new();
        let mut lock = table.acquire(RUNNER_LOCK_KEY).unwrap();
        tokio_test::assert_ok!(lock.verify().await);

        table.revoke(RUNNER_LOCK_KEY);
        assert!(matches!(lock.verify().await, Err(CoordinatorError::LockLost { .. })));
    }

    #[tokio::test]
    async fn stale_holder_cannot_release_its_successor() {
        let table = MemoryLockTable::new();
        let mut stale = tokio_test::assert_ok!(table.acquire(RUNNER_LOCK_KEY));
        table.revoke(RUNNER_LOCK_KEY);

        let mut current = tokio_test::assert_ok!(table.acquire(RUNNER_LOCK_KEY));
        assert!(stale.verify().await.is_err());
        drop(stale);

        assert!(table.is_held(RUNNER_LOCK_KEY));
        tokio_test::assert_ok!(current.verify().await);
        drop(current);
        assert!(!table.is_held(RUNNER_LOCK_KEY));
    }

    #[test]
    fn lock_held_message_names_the_key() {
        let err = CoordinatorError::LockHeld { key: RUNNER_LOCK_KEY };
        assert_eq!(err.to_string(), "another job runner holds lock 0x366636f6e7472");
    }
}
