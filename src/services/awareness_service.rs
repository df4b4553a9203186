use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::models::{AwarenessMetadata, AwarenessState, AwarenessUser};
use crate::utils::Debouncer;

/// Transport-level publish of a full presence record. Last write wins; no
/// merging of concurrent states from the same user is attempted.
pub type PublishAwarenessFn = Arc<dyn Fn(AwarenessState) + Send + Sync>;

pub type SelectionListenerFn = Arc<dyn Fn(&Value) + Send + Sync>;

struct SurfaceInner {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, SelectionListenerFn>>,
}

/// Selection-change subscriber registry for the local editing surface.
///
/// The editor glue calls `emit_selection` on every local selection change;
/// sync logic registers and unregisters listeners instead of intercepting
/// and rewrapping a change handler.
#[derive(Clone)]
pub struct EditorSurface {
    inner: Arc<SurfaceInner>,
}

impl EditorSurface {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self, listener: SelectionListenerFn) -> SelectionListenerGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.lock().unwrap().insert(id, listener);
        SelectionListenerGuard {
            surface: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn emit_selection(&self, selection: &Value) {
        let listeners: Vec<SelectionListenerFn> =
            self.inner.listeners.lock().unwrap().values().cloned().collect();
        for listener in listeners {
            listener(selection);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().unwrap().len()
    }
}

impl Default for EditorSurface {
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters its listener on drop.
pub struct SelectionListenerGuard {
    surface: Weak<SurfaceInner>,
    id: u64,
}

impl Drop for SelectionListenerGuard {
    fn drop(&mut self) {
        if let Some(surface) = self.surface.upgrade() {
            surface.listeners.lock().unwrap().remove(&self.id);
        }
    }
}

/// Publishes ephemeral presence and cursor state for the local client.
pub struct AwarenessBroadcaster {
    transport: Arc<Mutex<Option<PublishAwarenessFn>>>,
    debounce_window: Duration,
}

impl AwarenessBroadcaster {
    pub fn new(config: &Config) -> Self {
        Self {
            transport: Arc::new(Mutex::new(None)),
            debounce_window: Duration::from_millis(config.awareness_debounce_ms),
        }
    }

    pub fn bind_transport(&self, publish: PublishAwarenessFn) {
        *self.transport.lock().unwrap() = Some(publish);
    }

    /// Overwrite the full presence record; used on join and identity change.
    pub fn publish_user(&self, user: &AwarenessUser, metadata: &AwarenessMetadata) {
        publish_state(
            &self.transport,
            AwarenessState::present(user.clone(), metadata.clone(), None),
        );
    }

    /// Publish presence and keep it updated with the local cursor: every
    /// selection change on the editing surface re-publishes the full state,
    /// debounced, until the returned sync is dropped.
    pub fn publish_cursor(
        &self,
        user: &AwarenessUser,
        metadata: &AwarenessMetadata,
        editor: &EditorSurface,
    ) -> CursorSync {
        self.publish_user(user, metadata);

        let debouncer = Debouncer::new(self.debounce_window);
        let transport = self.transport.clone();
        let user = user.clone();
        let metadata = metadata.clone();
        let listener_debouncer = debouncer.clone();
        let listener: SelectionListenerFn = Arc::new(move |selection: &Value| {
            let state =
                AwarenessState::present(user.clone(), metadata.clone(), Some(selection.clone()));
            let transport = transport.clone();
            listener_debouncer.call(move || publish_state(&transport, state));
        });
        let listener_guard = editor.subscribe(listener);
        CursorSync {
            _listener: listener_guard,
            debouncer,
        }
    }

    /// Signal departure: a minimal user-only record, not a removal.
    pub fn clear(&self, user: &AwarenessUser) {
        publish_state(&self.transport, AwarenessState::departed(user.clone()));
    }
}

fn publish_state(transport: &Arc<Mutex<Option<PublishAwarenessFn>>>, state: AwarenessState) {
    let publish = transport.lock().unwrap().clone();
    match publish {
        Some(publish) => publish(state),
        // Publishing with no transport bound is a no-op, not an error.
        None => debug!("No awareness transport bound; dropping publish"),
    }
}

/// Keeps cursor awareness flowing; dropping it detaches the selection
/// listener and stops any pending debounced publish.
pub struct CursorSync {
    _listener: SelectionListenerGuard,
    debouncer: Debouncer,
}

impl CursorSync {
    pub fn teardown(self) {}
}

impl Drop for CursorSync {
    fn drop(&mut self) {
        self.debouncer.cancel();
    }
}
