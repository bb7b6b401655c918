use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// A registered member of the facility.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub crsid: String,
    pub preferred_name: String,
    pub surname: String,
    pub email: String,
    pub mail_handler: String,
    /// Registered member of the facility.
    pub member: bool,
    /// Has an active shell account.
    pub user: bool,
    /// Flagged for manual review of every job touching this member.
    pub danger: bool,
    pub joined: DateTime<Utc>,
}

impl Member {
    pub fn name(&self) -> String {
        format!("{} {}", self.preferred_name, self.surname)
    }

    pub async fn find_by_crsid(crsid: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM members WHERE crsid = $1")
            .bind(crsid)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Members among `crsids`, in crsid order. Unknown crsids are skipped.
    pub async fn find_many(crsids: &[String], pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM members WHERE crsid = ANY($1) ORDER BY crsid")
            .bind(crsids)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }
}

/// A group account.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Society {
    pub society: String,
    pub description: String,
    pub role_email: Option<String>,
    pub danger: bool,
    pub joined: DateTime<Utc>,
    /// Crsids of the group's administrators.
    #[sqlx(default)]
    pub admins: Vec<String>,
}

impl Society {
    pub fn is_admin(&self, crsid: &str) -> bool {
        self.admins.iter().any(|a| a == crsid)
    }

    pub async fn find_by_name(society: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT s.*,
                    COALESCE(
                        ARRAY(SELECT a.crsid FROM society_admins a
                              WHERE a.society = s.society ORDER BY a.crsid),
                        '{}'
                    ) AS admins
             FROM societies s
             WHERE s.society = $1",
        )
        .bind(society)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }
}

/// Whether a vhost belongs to a member or a society.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerClass {
    User,
    Society,
}

impl OwnerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerClass::User => "user",
            OwnerClass::Society => "society",
        }
    }
}

/// A custom domain served from a member's or society's web space.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: i64,
    /// `user` or `society`; see [`OwnerClass`].
    pub class: String,
    pub owner: String,
    pub domain: String,
    /// Document root relative to the owner's public_html. `None` is the
    /// top level.
    pub root: Option<String>,
}

impl Domain {
    pub fn is_owned_by(&self, class: OwnerClass, owner: &str) -> bool {
        self.class == class.as_str() && self.owner == owner
    }

    pub async fn find_by_domain(domain: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM domains WHERE domain = $1")
            .bind(domain)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }
}
