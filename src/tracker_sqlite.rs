//! SQLite persistence for tracking state.
//!
//! Every [`TrackerStore`] call runs in its own transaction. Id lists are
//! sent in chunks of [`TRACKER_BATCH_SIZE`] inside that transaction, so a
//! failing chunk rolls back the ones before it.

use anyhow::Result;
use async_trait::async_trait;
use indexkit_core::tracker::{
    CountFilter, Selection, TrackedItem, TrackerStore, TRACKER_BATCH_SIZE,
};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

pub struct SqliteTrackerStore {
    pool: SqlitePool,
}

impl SqliteTrackerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run the statement produced by `head` once per id chunk, or once for
    /// a datasource or the whole index. `head` must end inside a `WHERE`
    /// clause that already restricts the index.
    async fn apply<'a, F>(&self, selection: Selection<'a>, head: F) -> Result<()>
    where
        F: Fn() -> QueryBuilder<'a, Sqlite> + Send,
    {
        let mut tx = self.pool.begin().await?;
        match selection {
            Selection::Items(ids) => {
                for chunk in ids.chunks(TRACKER_BATCH_SIZE) {
                    let mut qb = head();
                    qb.push(" AND item_id IN (");
                    let mut list = qb.separated(", ");
                    for id in chunk {
                        list.push_bind(id.as_str());
                    }
                    list.push_unseparated(")");
                    qb.build().execute(&mut *tx).await?;
                }
            }
            Selection::Datasource(datasource) => {
                let mut qb = head();
                qb.push(" AND datasource = ");
                qb.push_bind(datasource);
                qb.build().execute(&mut *tx).await?;
            }
            Selection::All => {
                let mut qb = head();
                qb.build().execute(&mut *tx).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

fn scoped<'a>(sql: &str, index_id: &'a str, datasource: Option<&'a str>) -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::new(sql);
    qb.push(" WHERE index_id = ");
    qb.push_bind(index_id);
    if let Some(datasource) = datasource {
        qb.push(" AND datasource = ");
        qb.push_bind(datasource);
    }
    qb
}

#[async_trait]
impl TrackerStore for SqliteTrackerStore {
    async fn insert(&self, index_id: &str, items: &[TrackedItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in items.chunks(TRACKER_BATCH_SIZE) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO tracker_items (index_id, datasource, item_id, changed) ");
            qb.push_values(chunk, |mut row, item| {
                row.push_bind(index_id)
                    .push_bind(item.datasource.as_str())
                    .push_bind(item.item_id.as_str())
                    .push_bind(item.changed);
            });
            qb.push(" ON CONFLICT(index_id, datasource, item_id) DO UPDATE SET changed = excluded.changed");
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn mark_changed(
        &self,
        index_id: &str,
        selection: Selection<'_>,
        changed: i64,
    ) -> Result<()> {
        self.apply(selection, || {
            let mut qb = QueryBuilder::new("UPDATE tracker_items SET changed = ");
            qb.push_bind(changed);
            qb.push(" WHERE index_id = ");
            qb.push_bind(index_id);
            qb
        })
        .await
    }

    async fn mark_indexed(&self, index_id: &str, item_ids: &[String]) -> Result<()> {
        self.apply(Selection::Items(item_ids), || {
            scoped("UPDATE tracker_items SET changed = 0", index_id, None)
        })
        .await
    }

    async fn delete(&self, index_id: &str, selection: Selection<'_>) -> Result<()> {
        self.apply(selection, || scoped("DELETE FROM tracker_items", index_id, None))
            .await
    }

    async fn remaining(
        &self,
        index_id: &str,
        datasource: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let mut qb = scoped("SELECT item_id FROM tracker_items", index_id, datasource);
        qb.push(" AND changed > 0 ORDER BY changed ASC, rowid ASC");
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }
        let ids = qb
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn count(
        &self,
        index_id: &str,
        datasource: Option<&str>,
        filter: CountFilter,
    ) -> Result<usize> {
        let mut qb = scoped("SELECT COUNT(*) FROM tracker_items", index_id, datasource);
        match filter {
            CountFilter::All => {}
            CountFilter::Indexed => {
                qb.push(" AND changed = 0");
            }
            CountFilter::Remaining => {
                qb.push(" AND changed > 0");
            }
        }
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count as usize)
    }
}
