use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use moka::sync::Cache;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::RowKey;
use crate::store::{DocHandle, SharedDocStore};
use crate::utils::{defer, CancelToken};

struct QueueState {
    order: VecDeque<String>,
    queued: HashSet<String>,
}

/// Lazily loads row documents needed by a view's active sort/filter
/// conditions, in bounded cooperative batches.
///
/// One loader lives per view; cancel it when the view is torn down, the
/// underlying database changes, or the consumer unmounts.
pub struct BackgroundRowLoader {
    store: Arc<SharedDocStore>,
    cache: Cache<String, DocHandle>,
    queue: Mutex<QueueState>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    cancel: CancelToken,
    batch_size: usize,
    concurrency: usize,
}

impl BackgroundRowLoader {
    pub fn new(store: Arc<SharedDocStore>, config: &Config) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.hydrated_row_cache_capacity)
            .time_to_idle(Duration::from_secs(config.hydrated_row_cache_idle_secs))
            .build();
        Self {
            store,
            cache,
            queue: Mutex::new(QueueState {
                order: VecDeque::new(),
                queued: HashSet::new(),
            }),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            cancel: CancelToken::new(),
            batch_size: config.hydration_batch_size,
            concurrency: config.hydration_concurrency,
        }
    }

    /// Entry point for a view: hydrate whatever the view needs that isn't
    /// available yet. A view with no active sort or filter conditions needs
    /// no background hydration at all.
    pub async fn hydrate_view(&self, has_conditions: bool, rows: &[RowKey]) {
        if !has_conditions {
            return;
        }
        let queued = self.enqueue_missing(rows);
        if queued > 0 {
            self.drain().await;
        }
    }

    /// Enqueue the rows not already open, hydrated or queued, preserving the
    /// view's declared order. Returns how many were added.
    pub fn enqueue_missing(&self, rows: &[RowKey]) -> usize {
        let mut state = self.queue.lock().unwrap();
        let mut added = 0;
        for row in rows {
            let key = row.doc_key();
            if self.store.is_open(&key)
                || self.cache.get(&key).is_some()
                || state.queued.contains(&key)
            {
                continue;
            }
            state.queued.insert(key.clone());
            state.order.push_back(key);
            added += 1;
        }
        if added > 0 {
            info!(
                "Background hydration queued {} of {} view rows",
                added,
                rows.len()
            );
        }
        added
    }

    /// Drain the queue in batches, with a bounded number of opens in flight.
    /// Yields between batches so the interactive thread never waits for more
    /// than one batch's worth of work.
    pub async fn drain(&self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let batch = self.pop_batch();
            if batch.is_empty() {
                break;
            }
            stream::iter(batch)
                .for_each_concurrent(self.concurrency, |key| async move {
                    self.hydrate_row(key).await;
                })
                .await;
            tokio::task::yield_now().await;
        }
        if self.cancel.is_cancelled() {
            let mut state = self.queue.lock().unwrap();
            state.order.clear();
            state.queued.clear();
        }
    }

    async fn hydrate_row(&self, key: String) {
        if self.cancel.is_cancelled() {
            return;
        }
        // Two overlapping drains must never open the same row twice.
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(key.clone()) {
                return;
            }
        }
        let in_flight = self.in_flight.clone();
        let guard_key = key.clone();
        let _in_flight_guard = defer(move || {
            in_flight.lock().unwrap().remove(&guard_key);
        });

        match self.store.open(&key).await {
            Ok(handle) => {
                if self.cancel.is_cancelled() {
                    // Opened but unclaimed: dropping the handle destroys it.
                    debug!("Dropping hydrated row '{}' after cancellation", key);
                    return;
                }
                self.cache.insert(key, handle);
            }
            Err(e) => {
                // A single row failing never fails the batch.
                warn!("Background hydration of row '{}' failed: {}", key, e);
            }
        }
    }

    fn pop_batch(&self) -> Vec<String> {
        let mut state = self.queue.lock().unwrap();
        let take = self.batch_size.min(state.order.len());
        let batch: Vec<String> = state.order.drain(..take).collect();
        for key in &batch {
            state.queued.remove(key);
        }
        batch
    }

    /// Hydrated document for a row, if the background path loaded it.
    pub fn cached_row_doc(&self, row: &RowKey) -> Option<DocHandle> {
        self.cache.get(&row.doc_key())
    }

    /// Drop a hydrated row that became available through the normal path, so
    /// two live copies of the same row are never held.
    pub fn prune(&self, row: &RowKey) {
        self.cache.invalidate(&row.doc_key());
    }

    /// Stop the drain loop at its next check point and clear the queue. Work
    /// already started completes; nothing further starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of rows currently held by the background path.
    pub fn cached_row_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OpenedDocument;
    use loro::LoroDoc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Open fn that tracks the number of concurrent and total opens.
    fn instrumented_store(
        current: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
        total: Arc<AtomicUsize>,
    ) -> Arc<SharedDocStore> {
        SharedDocStore::new(Arc::new(move |_key: String| {
            let current = current.clone();
            let max_seen = max_seen.clone();
            let total = total.clone();
            Box::pin(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                total.fetch_add(1, Ordering::SeqCst);
                Ok(OpenedDocument {
                    doc: LoroDoc::new(),
                    provider: None,
                })
            })
        }))
    }

    fn view_rows(count: usize) -> Vec<RowKey> {
        let database_id = Uuid::new_v4();
        (0..count)
            .map(|_| RowKey::new(database_id, Uuid::new_v4()))
            .collect()
    }

    #[tokio::test]
    async fn never_exceeds_the_open_concurrency_bound() {
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        let store = instrumented_store(current, max_seen.clone(), total.clone());
        let loader = BackgroundRowLoader::new(store.clone(), &Config::default());

        let rows = view_rows(100);
        loader.hydrate_view(true, &rows).await;

        assert_eq!(total.load(Ordering::SeqCst), 100);
        assert!(max_seen.load(Ordering::SeqCst) <= 6);
        // Every hydrated row is claimed by the background cache.
        assert_eq!(loader.cached_row_count(), 100);
        assert_eq!(store.open_doc_count(), 100);
    }

    #[tokio::test]
    async fn no_conditions_means_no_hydration() {
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        let store = instrumented_store(current, max_seen, total.clone());
        let loader = BackgroundRowLoader::new(store, &Config::default());

        loader.hydrate_view(false, &view_rows(10)).await;
        assert_eq!(total.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn already_open_rows_are_not_enqueued() {
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        let store = instrumented_store(current, max_seen, total.clone());
        let loader = BackgroundRowLoader::new(store.clone(), &Config::default());

        let rows = view_rows(3);
        let _held = store.open(&rows[0].doc_key()).await.unwrap();
        assert_eq!(loader.enqueue_missing(&rows), 2);
        // Re-enqueueing while queued is a no-op.
        assert_eq!(loader.enqueue_missing(&rows), 0);
    }

    #[tokio::test]
    async fn cancellation_leaks_no_open_documents() {
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        let store = instrumented_store(current, max_seen, total.clone());
        let loader = Arc::new(BackgroundRowLoader::new(store.clone(), &Config::default()));

        let rows = view_rows(100);
        loader.enqueue_missing(&rows);
        let drain = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.drain().await })
        };
        // Let some rows through, then cancel mid-drain.
        while total.load(Ordering::SeqCst) < 10 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        loader.cancel();
        drain.await.unwrap();

        // Whatever was opened is either claimed by the cache or destroyed.
        assert_eq!(store.open_doc_count() as u64, loader.cached_row_count());
        assert!(total.load(Ordering::SeqCst) < 100);

        // Tearing the loader down releases the claimed rows too.
        drop(loader);
        assert_eq!(store.open_doc_count(), 0);
    }

    #[tokio::test]
    async fn prune_drops_the_background_copy() {
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        let store = instrumented_store(current, max_seen, total);
        let loader = BackgroundRowLoader::new(store.clone(), &Config::default());

        let rows = view_rows(1);
        loader.hydrate_view(true, &rows).await;
        assert!(loader.cached_row_doc(&rows[0]).is_some());

        loader.prune(&rows[0]);
        assert!(loader.cached_row_doc(&rows[0]).is_none());
        loader.cache.run_pending_tasks();
        assert_eq!(store.open_doc_count(), 0);
    }
}
