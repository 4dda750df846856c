//! Tracking of which items of an index need (re)indexing.
//!
//! Each tracked item has a single `changed` timestamp:
//!
//! | State     | `changed` | Entered via |
//! |-----------|-----------|-------------|
//! | untracked | (no row)  | [`Tracker::track_deleted`], [`Tracker::clear`] |
//! | pending   | `> 0`     | [`Tracker::track_inserted`], [`Tracker::track_updated`] |
//! | indexed   | `0`       | [`Tracker::track_indexed`] |
//!
//! Pending items are handed out oldest `changed` first, so items that
//! failed to index are naturally retried on the next pass.
//!
//! Persistence lives behind [`TrackerStore`]; every store call is one
//! transaction. [`Tracker`] adds the index guard (no writes for a disabled
//! or read-only index) and turns storage failures into logged `false`
//! results.

pub mod memory;

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use tracing::{debug, error};

use crate::error::Result;
use crate::item::split_combined_id;

/// Ids per statement in bulk store operations.
pub const TRACKER_BATCH_SIZE: usize = 1000;

/// One row of tracking state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedItem {
    pub datasource: String,
    /// Combined item id.
    pub item_id: String,
    pub changed: i64,
}

/// Which tracked rows of an index an operation applies to.
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    Items(&'a [String]),
    Datasource(&'a str),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountFilter {
    All,
    Indexed,
    Remaining,
}

/// Persistence for tracking state.
///
/// Every method must run in a single transaction: on error nothing of the
/// call may remain applied, including chunks processed before the failure.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Insert rows, or refresh `changed` of rows that already exist.
    async fn insert(&self, index_id: &str, items: &[TrackedItem]) -> anyhow::Result<()>;

    /// Set `changed` on existing rows.
    async fn mark_changed(
        &self,
        index_id: &str,
        selection: Selection<'_>,
        changed: i64,
    ) -> anyhow::Result<()>;

    /// Set `changed = 0` on existing rows.
    async fn mark_indexed(&self, index_id: &str, item_ids: &[String]) -> anyhow::Result<()>;

    async fn delete(&self, index_id: &str, selection: Selection<'_>) -> anyhow::Result<()>;

    /// Pending item ids, oldest change first; ties in insertion order.
    async fn remaining(
        &self,
        index_id: &str,
        datasource: Option<&str>,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<String>>;

    async fn count(
        &self,
        index_id: &str,
        datasource: Option<&str>,
        filter: CountFilter,
    ) -> anyhow::Result<usize>;
}

/// Source of `changed` timestamps.
pub trait Clock: Send + Sync {
    /// Current unix time in seconds.
    fn now(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// The index properties that decide whether tracking may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerGuard {
    pub exists: bool,
    pub enabled: bool,
    pub read_only: bool,
}

impl TrackerGuard {
    pub fn allows_writes(&self) -> bool {
        self.exists && self.enabled && !self.read_only
    }

    pub fn allows_reads(&self) -> bool {
        self.exists && self.enabled
    }
}

/// The tracker of one index.
#[derive(Clone)]
pub struct Tracker {
    index_id: String,
    guard: TrackerGuard,
    store: Arc<dyn TrackerStore>,
    clock: Arc<dyn Clock>,
}

impl Tracker {
    pub fn new(
        index_id: impl Into<String>,
        guard: TrackerGuard,
        store: Arc<dyn TrackerStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index_id: index_id.into(),
            guard,
            store,
            clock,
        }
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn guard(&self) -> TrackerGuard {
        self.guard
    }

    pub fn store(&self) -> &Arc<dyn TrackerStore> {
        &self.store
    }

    /// Pending timestamps are always positive.
    fn changed_now(&self) -> i64 {
        self.clock.now().max(1)
    }

    async fn write<F>(&self, operation: &'static str, count: usize, fut: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        if !self.guard.allows_writes() {
            debug!(
                index = %self.index_id,
                operation,
                "tracking skipped: index missing, disabled or read-only"
            );
            return false;
        }
        match fut.await {
            Ok(()) => {
                debug!(index = %self.index_id, operation, count, "tracking updated");
                true
            }
            Err(e) => {
                error!(
                    index = %self.index_id,
                    operation,
                    error = %format!("{:#}", e),
                    "tracker transaction rolled back"
                );
                false
            }
        }
    }

    /// Start tracking `item_ids` (combined ids) as pending.
    pub async fn track_inserted(&self, item_ids: &[String]) -> bool {
        let changed = self.changed_now();
        let fut = async {
            let rows = item_ids
                .iter()
                .map(|id| {
                    let Some((datasource, _)) = split_combined_id(id) else {
                        bail!("item id '{}' has no datasource prefix", id);
                    };
                    Ok(TrackedItem {
                        datasource: datasource.to_string(),
                        item_id: id.clone(),
                        changed,
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            self.store.insert(&self.index_id, &rows).await
        };
        self.write("track_inserted", item_ids.len(), fut).await
    }

    /// Mark tracked `item_ids` pending again.
    pub async fn track_updated(&self, item_ids: &[String]) -> bool {
        let changed = self.changed_now();
        let fut = self
            .store
            .mark_changed(&self.index_id, Selection::Items(item_ids), changed);
        self.write("track_updated", item_ids.len(), fut).await
    }

    /// Mark every tracked item (of `datasource`, if given) pending again.
    pub async fn track_all_updated(&self, datasource: Option<&str>) -> bool {
        let changed = self.changed_now();
        let selection = match datasource {
            Some(ds) => Selection::Datasource(ds),
            None => Selection::All,
        };
        let fut = self.store.mark_changed(&self.index_id, selection, changed);
        self.write("track_all_updated", 0, fut).await
    }

    /// Mark `item_ids` indexed. There is deliberately no "all" variant.
    pub async fn track_indexed(&self, item_ids: &[String]) -> bool {
        let fut = self.store.mark_indexed(&self.index_id, item_ids);
        self.write("track_indexed", item_ids.len(), fut).await
    }

    pub async fn track_deleted(&self, item_ids: &[String]) -> bool {
        let fut = self.store.delete(&self.index_id, Selection::Items(item_ids));
        self.write("track_deleted", item_ids.len(), fut).await
    }

    /// Stop tracking every item (of `datasource`, if given).
    pub async fn track_all_deleted(&self, datasource: Option<&str>) -> bool {
        let selection = match datasource {
            Some(ds) => Selection::Datasource(ds),
            None => Selection::All,
        };
        let fut = self.store.delete(&self.index_id, selection);
        self.write("track_all_deleted", 0, fut).await
    }

    /// Forget all tracking state of the index.
    pub async fn clear(&self) -> bool {
        let fut = self.store.delete(&self.index_id, Selection::All);
        self.write("clear", 0, fut).await
    }

    /// Pending item ids, oldest first. `None` means no limit.
    pub async fn remaining_items(
        &self,
        limit: Option<usize>,
        datasource: Option<&str>,
    ) -> Result<Vec<String>> {
        if !self.guard.allows_reads() || limit == Some(0) {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .remaining(&self.index_id, datasource, limit)
            .await?)
    }

    async fn count(&self, datasource: Option<&str>, filter: CountFilter) -> Result<usize> {
        if !self.guard.allows_reads() {
            return Ok(0);
        }
        Ok(self.store.count(&self.index_id, datasource, filter).await?)
    }

    pub async fn total_count(&self, datasource: Option<&str>) -> Result<usize> {
        self.count(datasource, CountFilter::All).await
    }

    pub async fn indexed_count(&self, datasource: Option<&str>) -> Result<usize> {
        self.count(datasource, CountFilter::Indexed).await
    }

    pub async fn remaining_count(&self, datasource: Option<&str>) -> Result<usize> {
        self.count(datasource, CountFilter::Remaining).await
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryTrackerStore;
    use super::*;

    const WRITABLE: TrackerGuard = TrackerGuard {
        exists: true,
        enabled: true,
        read_only: false,
    };

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn setup(guard: TrackerGuard) -> (Tracker, Arc<ManualClock>, Arc<MemoryTrackerStore>) {
        let clock = Arc::new(ManualClock::new(100));
        let store = Arc::new(MemoryTrackerStore::new());
        let tracker = Tracker::new("main", guard, store.clone(), clock.clone());
        (tracker, clock, store)
    }

    #[tokio::test]
    async fn track_indexed_is_idempotent() {
        let (tracker, _, _) = setup(WRITABLE);
        assert!(tracker.track_inserted(&ids(&["ds/a", "ds/b"])).await);
        assert!(tracker.track_indexed(&ids(&["ds/a"])).await);
        let first = tracker.indexed_count(None).await.unwrap();
        assert!(tracker.track_indexed(&ids(&["ds/a"])).await);
        assert_eq!(tracker.indexed_count(None).await.unwrap(), first);
        assert_eq!(first, 1);
    }

    #[tokio::test]
    async fn remaining_items_are_fifo() {
        let (tracker, clock, _) = setup(WRITABLE);
        clock.set(200);
        tracker.track_inserted(&ids(&["ds/late"])).await;
        clock.set(150);
        tracker.track_inserted(&ids(&["ds/early"])).await;
        assert_eq!(
            tracker.remaining_items(None, None).await.unwrap(),
            ids(&["ds/early", "ds/late"])
        );
        assert_eq!(
            tracker.remaining_items(Some(1), None).await.unwrap(),
            ids(&["ds/early"])
        );
    }

    #[tokio::test]
    async fn deleting_a_datasource_leaves_others_alone() {
        let (tracker, _, _) = setup(WRITABLE);
        tracker
            .track_inserted(&ids(&["one/a", "one/b", "two/a"]))
            .await;
        assert!(tracker.track_all_deleted(Some("one")).await);
        assert_eq!(tracker.total_count(Some("one")).await.unwrap(), 0);
        assert_eq!(tracker.total_count(Some("two")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn touch_all_requeues_indexed_items_in_insertion_order() {
        let (tracker, clock, _) = setup(WRITABLE);
        tracker.track_inserted(&ids(&["ds/A", "ds/B"])).await;
        tracker.track_indexed(&ids(&["ds/B"])).await;

        assert_eq!(
            tracker.remaining_items(None, None).await.unwrap(),
            ids(&["ds/A"])
        );
        tracker.track_indexed(&ids(&["ds/A"])).await;
        assert_eq!(tracker.indexed_count(None).await.unwrap(), 2);

        clock.set(500);
        assert!(tracker.track_all_updated(None).await);
        assert_eq!(
            tracker.remaining_items(None, None).await.unwrap(),
            ids(&["ds/A", "ds/B"])
        );
    }

    #[tokio::test]
    async fn updating_unknown_ids_does_not_track_them() {
        let (tracker, _, _) = setup(WRITABLE);
        assert!(tracker.track_updated(&ids(&["ds/ghost"])).await);
        assert_eq!(tracker.total_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn disabled_or_read_only_index_never_writes() {
        let (tracker, _, store) = setup(TrackerGuard {
            enabled: false,
            ..WRITABLE
        });
        assert!(!tracker.track_inserted(&ids(&["ds/a"])).await);
        assert_eq!(tracker.total_count(None).await.unwrap(), 0);
        assert_eq!(store.count("main", None, CountFilter::All).await.unwrap(), 0);

        let (tracker, _, store) = setup(TrackerGuard {
            read_only: true,
            ..WRITABLE
        });
        assert!(!tracker.track_inserted(&ids(&["ds/a"])).await);
        assert!(!tracker.clear().await);
        assert_eq!(store.count("main", None, CountFilter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_mid_batch_rolls_back_earlier_chunks() {
        let (tracker, _, store) = setup(WRITABLE);
        let many: Vec<String> = (0..2500).map(|i| format!("ds/{}", i)).collect();
        store.fail_at_chunk(2);
        assert!(!tracker.track_inserted(&many).await);
        assert_eq!(tracker.total_count(None).await.unwrap(), 0);

        store.fail_at_chunk(usize::MAX);
        assert!(tracker.track_inserted(&many).await);
        assert_eq!(tracker.remaining_count(None).await.unwrap(), 2500);
    }

    #[tokio::test]
    async fn ids_without_datasource_are_rejected() {
        let (tracker, _, _) = setup(WRITABLE);
        assert!(!tracker.track_inserted(&ids(&["ds/ok", "broken"])).await);
        assert_eq!(tracker.total_count(None).await.unwrap(), 0);
    }
}
