use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use loro::LoroDoc;
use loro::ToJson;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::RowKey;
use crate::store::{DocHandle, SharedDocStore};
use crate::utils::{CancelToken, Debouncer};

/// A rollup field aggregates values from a related database through a
/// relation field; this describes one such field in the active view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupFieldSpec {
    pub rollup_field_id: String,
    pub relation_field_id: String,
    pub related_database_id: Uuid,
}

/// Caller-supplied "conditions changed" callback, debounced so bursts of
/// related-row edits collapse into one recompute signal.
pub type RollupChangedFn = Arc<dyn Fn() + Send + Sync>;

struct ObserverState {
    version: Option<u64>,
    cancel: CancelToken,
    subscriptions: Vec<loro::Subscription>,
    handles: Vec<DocHandle>,
}

/// Watches the related rows every rollup field depends on and invalidates
/// the computed cell cache when one of them changes.
pub struct RollupFieldObservers {
    store: Arc<SharedDocStore>,
    on_change: RollupChangedFn,
    debouncer: Debouncer,
    worker_count: usize,
    stale: Arc<Mutex<HashSet<String>>>,
    state: Arc<Mutex<ObserverState>>,
}

impl RollupFieldObservers {
    pub fn new(store: Arc<SharedDocStore>, on_change: RollupChangedFn, config: &Config) -> Self {
        Self {
            store,
            on_change,
            debouncer: Debouncer::new(Duration::from_millis(config.rollup_debounce_ms)),
            worker_count: config.rollup_worker_count,
            stale: Arc::new(Mutex::new(HashSet::new())),
            state: Arc::new(Mutex::new(ObserverState {
                version: None,
                cancel: CancelToken::new(),
                subscriptions: Vec::new(),
                handles: Vec::new(),
            })),
        }
    }

    /// Build the observer set for the given rollup fields and view rows.
    /// Passing a new `version` forces a rebuild even when nothing else
    /// changed; repeating the current version is a no-op.
    pub async fn setup(&self, specs: &[RollupFieldSpec], rows: &[RowKey], version: u64) {
        let cancel = {
            let mut state = self.state.lock().unwrap();
            if state.version == Some(version) {
                debug!("Rollup observers already set up for version {}", version);
                return;
            }
            Self::clear_state(&mut state);
            state.version = Some(version);
            state.cancel = CancelToken::new();
            state.cancel.clone()
        };

        // One task per (field, row); the fixed worker pool pulls from this
        // list so concurrent document opens stay bounded.
        let tasks: Vec<(RollupFieldSpec, RowKey)> = specs
            .iter()
            .flat_map(|spec| rows.iter().map(move |row| (spec.clone(), *row)))
            .collect();
        info!(
            "Setting up rollup observers (version {}): {} fields, {} rows, {} tasks",
            version,
            specs.len(),
            rows.len(),
            tasks.len()
        );

        stream::iter(tasks)
            .for_each_concurrent(self.worker_count, |(spec, row)| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    self.observe_row_rollup(&spec, &row).await;
                }
            })
            .await;
    }

    async fn observe_row_rollup(&self, spec: &RollupFieldSpec, row: &RowKey) {
        let row_handle = match self.store.open(&row.doc_key()).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to open row '{}' for rollup tracking: {}", row, e);
                return;
            }
        };
        let related_ids = relation_cell_ids(row_handle.doc(), &spec.relation_field_id);

        for related_id in related_ids {
            let related_row = match Uuid::parse_str(&related_id) {
                Ok(id) => RowKey::new(spec.related_database_id, id),
                Err(e) => {
                    warn!("Ignoring malformed related row id '{}': {}", related_id, e);
                    continue;
                }
            };
            let related_handle = match self.store.open(&related_row.doc_key()).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Failed to open related row '{}': {}", related_row, e);
                    continue;
                }
            };

            let invalidation_key = format!("{}:{}", row.row_id, spec.rollup_field_id);
            let stale = self.stale.clone();
            let debouncer = self.debouncer.clone();
            let on_change = self.on_change.clone();
            let subscription = related_handle.doc().subscribe_root(Arc::new(
                move |_event: loro::event::DiffEvent| {
                    stale.lock().unwrap().insert(invalidation_key.clone());
                    let on_change = on_change.clone();
                    debouncer.call(move || on_change());
                },
            ));

            let mut state = self.state.lock().unwrap();
            state.subscriptions.push(subscription);
            state.handles.push(related_handle);
        }

        // Keep the observed row itself open for the lifetime of the set.
        self.state.lock().unwrap().handles.push(row_handle);
    }

    /// Invalidation keys (`"{row_id}:{rollup_field_id}"`) raised since the
    /// last drain, for the recompute step.
    pub fn take_invalidations(&self) -> HashSet<String> {
        std::mem::take(&mut *self.stale.lock().unwrap())
    }

    pub fn observer_count(&self) -> usize {
        self.state.lock().unwrap().subscriptions.len()
    }

    /// Detach every observer and cancel in-flight setup work.
    pub fn teardown(&self) {
        let mut state = self.state.lock().unwrap();
        Self::clear_state(&mut state);
        state.version = None;
        self.debouncer.cancel();
    }

    fn clear_state(state: &mut ObserverState) {
        state.cancel.cancel();
        // Dropping a subscription detaches the observer.
        state.subscriptions.clear();
        state.handles.clear();
    }
}

impl Drop for RollupFieldObservers {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Read a relation cell's list of related row ids. The cell is stored either
/// as a JSON string array or as a native list; anything unreadable is
/// treated as empty.
fn relation_cell_ids(doc: &LoroDoc, relation_field_id: &str) -> Vec<String> {
    let cells = doc.get_map("cells");
    let value = match cells.get(relation_field_id) {
        Some(value) => value,
        None => return Vec::new(),
    };
    let json = match value.as_value() {
        Some(value) => value.to_json_value(),
        None => return Vec::new(),
    };
    match json {
        Value::String(raw) => serde_json::from_str::<Vec<String>>(&raw).unwrap_or_else(|e| {
            warn!(
                "Failed to parse relation cell '{}' as id list: {}",
                relation_field_id, e
            );
            Vec::new()
        }),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
