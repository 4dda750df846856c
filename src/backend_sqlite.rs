//! A search backend storing indexed items as JSON rows in SQLite.
//!
//! Searching loads the index's rows and evaluates keys, filters and sorts
//! in process, the same way the in-memory backend does.

use anyhow::{Context, Result};
use async_trait::async_trait;
use indexkit_core::backend::{eval, Backend};
use indexkit_core::item::{Item, ItemMap};
use indexkit_core::{Index, Query};
use indexkit_core::results::ResultSet;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, warn};

const DELETE_CHUNK: usize = 1000;

pub struct SqliteBackend {
    id: String,
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(id: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            id: id.into(),
            pool,
        }
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn index_items(&self, index: &Index, items: &ItemMap) -> Result<Vec<String>> {
        let now = chrono::Utc::now().timestamp();
        let mut stored = Vec::with_capacity(items.len());
        let mut tx = self.pool.begin().await?;

        for (id, item) in items {
            let json = match serde_json::to_string(item) {
                Ok(json) => json,
                Err(e) => {
                    warn!(index = %index.id(), item = %id, error = %e, "item could not be serialized");
                    continue;
                }
            };
            sqlx::query(
                r#"
                INSERT INTO indexed_items (index_id, item_id, datasource, item_json, indexed_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(index_id, item_id) DO UPDATE SET
                    datasource = excluded.datasource,
                    item_json = excluded.item_json,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(index.id())
            .bind(id)
            .bind(item.datasource_id.as_deref().unwrap_or_default())
            .bind(&json)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            stored.push(id.clone());
        }

        tx.commit().await?;
        debug!(index = %index.id(), stored = stored.len(), "items stored");
        Ok(stored)
    }

    async fn delete_items(&self, index: &Index, item_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in item_ids.chunks(DELETE_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM indexed_items WHERE index_id = ");
            qb.push_bind(index.id());
            qb.push(" AND item_id IN (");
            let mut list = qb.separated(", ");
            for id in chunk {
                list.push_bind(id.as_str());
            }
            list.push_unseparated(")");
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_all_items(&self, index: &Index, datasource: Option<&str>) -> Result<()> {
        match datasource {
            Some(datasource) => {
                sqlx::query("DELETE FROM indexed_items WHERE index_id = ? AND datasource = ?")
                    .bind(index.id())
                    .bind(datasource)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM indexed_items WHERE index_id = ?")
                    .bind(index.id())
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn search(&self, query: &Query) -> indexkit_core::Result<ResultSet> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT item_json FROM indexed_items WHERE index_id = ? ORDER BY item_id",
        )
        .bind(query.index().id())
        .fetch_all(&self.pool)
        .await
        .context("loading indexed items")?;

        let mut items = Vec::with_capacity(rows.len());
        for json in rows {
            let item: Item = serde_json::from_str(&json)?;
            items.push(item);
        }
        Ok(eval::evaluate(query, items.iter()))
    }
}
