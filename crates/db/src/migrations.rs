use sqlx::migrate::{MigrateError, Migrator};
use sqlx::Row;

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

pub async fn approval_schema_present(pool: &DbPool) -> Result<bool, sqlx::Error> {
    let count = sqlx::query(
        "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'approval_request'",
    )
    .fetch_one(pool)
    .await?
    .get::<i64, _>("count");
    Ok(count == 1)
}
