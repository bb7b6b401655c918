//! Directory rows for integration tests.

use control::domains::directory::Member;
use sqlx::PgPool;
use uuid::Uuid;

/// A crsid no other test will use.
pub fn unique_crsid() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("t{}", &id[..7])
}

pub async fn insert_member(pool: &PgPool, crsid: &str, danger: bool) -> Member {
    sqlx::query_as::<_, Member>(
        r#"
        INSERT INTO members (crsid, preferred_name, surname, email, danger)
        VALUES ($1, 'Test', 'Member', $2, $3)
        RETURNING *
        "#,
    )
    .bind(crsid)
    .bind(format!("{}@example.org", crsid))
    .bind(danger)
    .fetch_one(pool)
    .await
    .expect("Failed to insert member")
}

pub async fn insert_society(pool: &PgPool, society: &str, admins: &[&str]) {
    sqlx::query("INSERT INTO societies (society, description) VALUES ($1, 'Test society')")
        .bind(society)
        .execute(pool)
        .await
        .expect("Failed to insert society");

    for crsid in admins {
        sqlx::query("INSERT INTO society_admins (society, crsid) VALUES ($1, $2)")
            .bind(society)
            .bind(crsid)
            .execute(pool)
            .await
            .expect("Failed to insert society admin");
    }
}
