//! Directory lookups against the shared control panel database.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use super::BaseDirectory;
use crate::domains::directory::{Member, Society};

#[derive(Clone)]
pub struct PostgresDirectory {
    pool: PgPool,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseDirectory for PostgresDirectory {
    async fn get_member(&self, crsid: &str) -> Result<Option<Member>> {
        Member::find_by_crsid(crsid, &self.pool).await
    }

    async fn get_society(&self, society: &str) -> Result<Option<Society>> {
        Society::find_by_name(society, &self.pool).await
    }

    async fn get_members(&self, crsids: &[String]) -> Result<Vec<Member>> {
        if crsids.is_empty() {
            return Ok(Vec::new());
        }
        Member::find_many(crsids, &self.pool).await
    }
}
