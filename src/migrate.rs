use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the tracker and item tables. Safe to run repeatedly.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Tracking state: changed = 0 means indexed, anything else is the
    // unix time of the change that made the item pending.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracker_items (
            index_id TEXT NOT NULL,
            datasource TEXT NOT NULL,
            item_id TEXT NOT NULL,
            changed INTEGER NOT NULL,
            PRIMARY KEY (index_id, datasource, item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_tracker_items_changed
        ON tracker_items(index_id, changed)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indexed_items (
            index_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            datasource TEXT NOT NULL,
            item_json TEXT NOT NULL,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (index_id, item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_indexed_items_datasource
        ON indexed_items(index_id, datasource)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
