//! In-memory [`TrackerStore`] for tests and embedded use.
//!
//! Each call works on a copy of the table and swaps it in only when every
//! chunk succeeded, which gives the same all-or-nothing behavior as a
//! database transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{CountFilter, Selection, TrackedItem, TrackerStore, TRACKER_BATCH_SIZE};

#[derive(Debug, Clone)]
struct Row {
    changed: i64,
    /// Insertion sequence, breaks ties between equal `changed` values.
    seq: u64,
}

/// Rows keyed by `(index_id, datasource, item_id)`.
#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<(String, String, String), Row>,
    next_seq: u64,
}

impl Table {
    /// Rows of `index_id` matching `selection`. Only the index's key range
    /// is visited; id lists are looked up in a set.
    fn selected<'a>(
        &'a mut self,
        index_id: &'a str,
        selection: Selection<'a>,
    ) -> impl Iterator<Item = (&'a (String, String, String), &'a mut Row)> + 'a {
        let wanted: BTreeSet<&'a str> = match selection {
            Selection::Items(ids) => ids.iter().map(String::as_str).collect(),
            _ => BTreeSet::new(),
        };
        let from = (index_id.to_string(), String::new(), String::new());
        self.rows
            .range_mut(from..)
            .take_while(move |((index, _, _), _)| index == index_id)
            .filter(move |((_, ds, item), _)| match selection {
                Selection::Items(_) => wanted.contains(item.as_str()),
                Selection::Datasource(d) => ds == d,
                Selection::All => true,
            })
    }
}

pub struct MemoryTrackerStore {
    table: RwLock<Table>,
    #[cfg(test)]
    fail_at_chunk: std::sync::Mutex<Option<usize>>,
}

impl MemoryTrackerStore {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table::default()),
            #[cfg(test)]
            fail_at_chunk: std::sync::Mutex::new(None),
        }
    }

    /// Make the `n`-th chunk (1-based) of every following call fail.
    #[cfg(test)]
    pub(crate) fn fail_at_chunk(&self, n: usize) {
        if let Ok(mut slot) = self.fail_at_chunk.lock() {
            *slot = Some(n);
        }
    }

    fn check_chunk(&self, _chunk: usize) -> Result<()> {
        #[cfg(test)]
        {
            let fail = self.fail_at_chunk.lock().ok().and_then(|slot| *slot);
            if fail == Some(_chunk) {
                return Err(anyhow!("injected failure in chunk {}", _chunk));
            }
        }
        Ok(())
    }

    /// Apply `f` to a copy of the table and commit it only on success.
    fn transaction<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Table) -> Result<()>,
    {
        let mut guard = self
            .table
            .write()
            .map_err(|_| anyhow!("tracker table lock poisoned"))?;
        let mut working = guard.clone();
        f(&mut working)?;
        *guard = working;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&Table) -> T) -> Result<T> {
        let guard = self
            .table
            .read()
            .map_err(|_| anyhow!("tracker table lock poisoned"))?;
        Ok(f(&guard))
    }

    /// Apply `f` per chunk of ids, or once when the selection is not an id
    /// list.
    fn chunked(
        &self,
        table: &mut Table,
        index_id: &str,
        selection: Selection<'_>,
        f: &dyn Fn(&mut Table, &str, Selection<'_>),
    ) -> Result<()> {
        match selection {
            Selection::Items(ids) => {
                for (i, chunk) in ids.chunks(TRACKER_BATCH_SIZE).enumerate() {
                    self.check_chunk(i + 1)?;
                    f(table, index_id, Selection::Items(chunk));
                }
            }
            other => {
                self.check_chunk(1)?;
                f(table, index_id, other);
            }
        }
        Ok(())
    }
}

impl Default for MemoryTrackerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackerStore for MemoryTrackerStore {
    async fn insert(&self, index_id: &str, items: &[TrackedItem]) -> Result<()> {
        self.transaction(|table| {
            for (i, chunk) in items.chunks(TRACKER_BATCH_SIZE).enumerate() {
                self.check_chunk(i + 1)?;
                for item in chunk {
                    let key = (
                        index_id.to_string(),
                        item.datasource.clone(),
                        item.item_id.clone(),
                    );
                    match table.rows.get_mut(&key) {
                        Some(row) => row.changed = item.changed,
                        None => {
                            let seq = table.next_seq;
                            table.next_seq += 1;
                            table.rows.insert(
                                key,
                                Row {
                                    changed: item.changed,
                                    seq,
                                },
                            );
                        }
                    }
                }
            }
            Ok(())
        })
    }

    async fn mark_changed(
        &self,
        index_id: &str,
        selection: Selection<'_>,
        changed: i64,
    ) -> Result<()> {
        self.transaction(|table| {
            self.chunked(table, index_id, selection, &|table, index_id, selection| {
                for (_, row) in table.selected(index_id, selection) {
                    row.changed = changed;
                }
            })
        })
    }

    async fn mark_indexed(&self, index_id: &str, item_ids: &[String]) -> Result<()> {
        self.transaction(|table| {
            self.chunked(
                table,
                index_id,
                Selection::Items(item_ids),
                &|table, index_id, selection| {
                    for (_, row) in table.selected(index_id, selection) {
                        row.changed = 0;
                    }
                },
            )
        })
    }

    async fn delete(&self, index_id: &str, selection: Selection<'_>) -> Result<()> {
        self.transaction(|table| {
            self.chunked(table, index_id, selection, &|table, index_id, selection| {
                let doomed: Vec<_> = table
                    .selected(index_id, selection)
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in doomed {
                    table.rows.remove(&key);
                }
            })
        })
    }

    async fn remaining(
        &self,
        index_id: &str,
        datasource: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        self.read(|table| {
            let mut pending: Vec<(&(String, String, String), &Row)> = table
                .rows
                .iter()
                .filter(|((index, ds, _), row)| {
                    index == index_id && row.changed > 0 && datasource.map_or(true, |d| ds == d)
                })
                .collect();
            pending.sort_by_key(|(_, row)| (row.changed, row.seq));
            pending
                .into_iter()
                .take(limit.unwrap_or(usize::MAX))
                .map(|((_, _, item), _)| item.clone())
                .collect()
        })
    }

    async fn count(
        &self,
        index_id: &str,
        datasource: Option<&str>,
        filter: CountFilter,
    ) -> Result<usize> {
        self.read(|table| {
            table
                .rows
                .iter()
                .filter(|((index, ds, _), row)| {
                    index == index_id
                        && datasource.map_or(true, |d| ds == d)
                        && match filter {
                            CountFilter::All => true,
                            CountFilter::Indexed => row.changed == 0,
                            CountFilter::Remaining => row.changed > 0,
                        }
                })
                .count()
        })
    }
}
