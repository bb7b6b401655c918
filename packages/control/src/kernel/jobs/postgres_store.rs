//! PostgreSQL-backed job store.
//!
//! The `jobs_queued_notify` trigger (see migrations) publishes the job id on
//! the `jobs_insert` channel whenever a row enters `queued`, so nothing here
//! needs to notify explicitly.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::job::{Job, JobState, NewJobRecord};
use super::log::{JobLog, LogEntry};
use super::state::StateChange;
use super::store::{JobStore, StoreError, TransitionError};
use crate::common::JobId;

#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_log(
        tx: &mut Transaction<'_, Postgres>,
        id: JobId,
        entry: &LogEntry,
    ) -> Result<JobLog, sqlx::Error> {
        sqlx::query_as::<_, JobLog>(
            r#"
            INSERT INTO job_log (job_id, type, level, message, raw)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(entry.log_type)
        .bind(entry.level)
        .bind(&entry.message)
        .bind(&entry.raw)
        .fetch_one(&mut **tx)
        .await
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, record: NewJobRecord, created: LogEntry) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (type, owner, state, args)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&record.job_type)
        .bind(&record.owner)
        .bind(record.state)
        .bind(Json(&record.args))
        .fetch_one(&mut *tx)
        .await?;

        Self::insert_log(&mut tx, job.job_id, &created).await?;
        tx.commit().await?;

        debug!(job_id = %job.job_id, job_type = %job.job_type, state = %job.state, "job created");
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE job_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, StoreError> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE state = $1 ORDER BY job_id ASC")
            .bind(state)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Job>, StoreError> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE owner = $1 ORDER BY job_id DESC")
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn list_by_society(&self, society: &str) -> Result<Vec<Job>, StoreError> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE args ->> 'society' = $1 ORDER BY job_id DESC",
        )
        .bind(society)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn count_by_state(&self) -> Result<Vec<(JobState, i64)>, StoreError> {
        // Ordering by the enum gives declaration order, which is the order
        // the admin dashboard wants.
        sqlx::query_as::<_, (JobState, i64)>(
            "SELECT state, COUNT(*) FROM jobs GROUP BY state ORDER BY state",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn transition(&self, id: JobId, change: StateChange) -> Result<Job, TransitionError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = $2,
                state_message = $3
            WHERE job_id = $1
              AND state = ANY($4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(change.to)
        .bind(&change.message)
        .bind(change.from)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = updated else {
            let actual = sqlx::query_scalar::<_, JobState>("SELECT state FROM jobs WHERE job_id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;

            return Err(match actual {
                None => TransitionError::NotFound(id),
                Some(actual) => TransitionError::InvalidState {
                    id,
                    actual,
                    expected: change.from,
                },
            });
        };

        if let Some(entry) = &change.log {
            Self::insert_log(&mut tx, id, entry).await?;
        }
        tx.commit().await?;

        Ok(job)
    }

    async fn claim(&self, id: JobId, running_message: &str) -> Result<Option<Job>, StoreError> {
        sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'running',
                state_message = $2
            WHERE job_id = $1
              AND state = 'queued'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(running_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn append_log(&self, id: JobId, entry: LogEntry) -> Result<JobLog, StoreError> {
        let mut tx = self.pool.begin().await?;
        let log = Self::insert_log(&mut tx, id, &entry).await?;
        tx.commit().await?;
        Ok(log)
    }

    async fn logs(&self, id: JobId) -> Result<Vec<JobLog>, StoreError> {
        sqlx::query_as::<_, JobLog>(
            "SELECT * FROM job_log WHERE job_id = $1 ORDER BY time ASC, log_id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }
}
