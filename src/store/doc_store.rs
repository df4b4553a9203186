use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use loro::LoroDoc;
#[cfg(test)]
use loro::ToJson;
use tracing::{debug, error};

/// Network binding of an open shared document, separable from the in-memory
/// structure. Destroyed exactly once, when the last handle goes away.
pub trait DocumentProvider: Send + Sync {
    fn destroy(&self);
}

/// What the external open operation yields: the shared document plus its
/// network binding (absent for purely local documents, e.g. in tests).
pub struct OpenedDocument {
    pub doc: LoroDoc,
    pub provider: Option<Box<dyn DocumentProvider>>,
}

/// External document open operation, injected by the embedder. The embedder
/// is expected to consume any pending seed for the key here, so a seeded
/// document skips the redundant network fetch.
pub type OpenDocumentFn = Arc<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<OpenedDocument, String>> + Send>>
        + Send
        + Sync,
>;

struct DocEntry {
    doc: LoroDoc,
    provider: Option<Box<dyn DocumentProvider>>,
    refcount: usize,
}

enum DocSlot {
    Ready(DocEntry),
    Opening(Shared<BoxFuture<'static, Result<(), String>>>),
}

/// Arena of open shared documents keyed by string.
///
/// Each `open` increments the entry's reference count and concurrent opens of
/// one key coalesce onto a single in-flight fetch; dropping the returned
/// `DocHandle` decrements. At zero the provider is destroyed and the document
/// released, so no consumer can invalidate a document another consumer still
/// holds.
pub struct SharedDocStore {
    open_fn: OpenDocumentFn,
    inner: Mutex<HashMap<String, DocSlot>>,
}

impl SharedDocStore {
    pub fn new(open_fn: OpenDocumentFn) -> Arc<Self> {
        Arc::new(Self {
            open_fn,
            inner: Mutex::new(HashMap::new()),
        })
    }

    /// Open the document for `key`, fetching it via the injected open
    /// operation if it isn't live yet. While a prior open is live this
    /// returns a handle to the same instance.
    pub async fn open(self: &Arc<Self>, key: &str) -> Result<DocHandle, String> {
        loop {
            let opening = {
                let mut inner = self.inner.lock().unwrap();
                match inner.get_mut(key) {
                    Some(DocSlot::Ready(entry)) => {
                        entry.refcount += 1;
                        return Ok(DocHandle {
                            key: key.to_string(),
                            doc: entry.doc.clone(),
                            store: Arc::downgrade(self),
                        });
                    }
                    Some(DocSlot::Opening(fut)) => fut.clone(),
                    None => {
                        let fut = self.make_open_future(key.to_string());
                        inner.insert(key.to_string(), DocSlot::Opening(fut.clone()));
                        fut
                    }
                }
            };
            opening.await?;
            // Loop back to pick up the Ready slot and take a reference. If
            // every other waiter released it in the meantime the slot is gone
            // again and we simply re-open.
        }
    }

    /// Handle to an already-open document, without triggering a fetch.
    pub fn get_open(self: &Arc<Self>, key: &str) -> Option<DocHandle> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(key) {
            Some(DocSlot::Ready(entry)) => {
                entry.refcount += 1;
                Some(DocHandle {
                    key: key.to_string(),
                    doc: entry.doc.clone(),
                    store: Arc::downgrade(self),
                })
            }
            _ => None,
        }
    }

    pub fn is_open(&self, key: &str) -> bool {
        matches!(
            self.inner.lock().unwrap().get(key),
            Some(DocSlot::Ready(_))
        )
    }

    /// Reference count held on `key`, zero when not open.
    pub fn open_count(&self, key: &str) -> usize {
        match self.inner.lock().unwrap().get(key) {
            Some(DocSlot::Ready(entry)) => entry.refcount,
            _ => 0,
        }
    }

    /// Number of documents currently live in the arena.
    pub fn open_doc_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|slot| matches!(slot, DocSlot::Ready(_)))
            .count()
    }

    fn make_open_future(
        self: &Arc<Self>,
        key: String,
    ) -> Shared<BoxFuture<'static, Result<(), String>>> {
        let store = Arc::downgrade(self);
        let open_fn = self.open_fn.clone();
        async move {
            let opened = match open_fn(key.clone()).await {
                Ok(opened) => opened,
                Err(e) => {
                    error!("Failed to open document '{}': {}", key, e);
                    if let Some(store) = store.upgrade() {
                        store.inner.lock().unwrap().remove(&key);
                    }
                    return Err(format!("Failed to open document '{}': {}", key, e));
                }
            };
            match store.upgrade() {
                Some(store) => {
                    let mut inner = store.inner.lock().unwrap();
                    inner.insert(
                        key,
                        DocSlot::Ready(DocEntry {
                            doc: opened.doc,
                            provider: opened.provider,
                            refcount: 0,
                        }),
                    );
                    Ok(())
                }
                None => {
                    // Store went away while the fetch was in flight.
                    if let Some(provider) = opened.provider {
                        provider.destroy();
                    }
                    Err("Document store was dropped".to_string())
                }
            }
        }
        .boxed()
        .shared()
    }

    fn retain(&self, key: &str) {
        if let Some(DocSlot::Ready(entry)) = self.inner.lock().unwrap().get_mut(key) {
            entry.refcount += 1;
        }
    }

    fn release(&self, key: &str) {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            match inner.get_mut(key) {
                Some(DocSlot::Ready(entry)) => {
                    entry.refcount = entry.refcount.saturating_sub(1);
                    if entry.refcount == 0 {
                        match inner.remove(key) {
                            Some(DocSlot::Ready(entry)) => Some(entry),
                            _ => None,
                        }
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        // Destroy outside the lock; the provider callback is external code.
        if let Some(entry) = removed {
            debug!("Releasing document '{}'", key);
            if let Some(provider) = entry.provider {
                provider.destroy();
            }
        }
    }
}

impl Drop for SharedDocStore {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        for (_, slot) in inner.drain() {
            if let DocSlot::Ready(entry) = slot {
                if let Some(provider) = entry.provider {
                    provider.destroy();
                }
            }
        }
    }
}

/// Reference-counted handle to an open shared document. Cloning takes another
/// reference; the last drop destroys the provider and releases the document.
pub struct DocHandle {
    key: String,
    doc: LoroDoc,
    store: Weak<SharedDocStore>,
}

impl DocHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn doc(&self) -> &LoroDoc {
        &self.doc
    }
}

impl Clone for DocHandle {
    fn clone(&self) -> Self {
        if let Some(store) = self.store.upgrade() {
            store.retain(&self.key);
        }
        Self {
            key: self.key.clone(),
            doc: self.doc.clone(),
            store: self.store.clone(),
        }
    }
}

impl Drop for DocHandle {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.release(&self.key);
        }
    }
}

impl std::fmt::Debug for DocHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocHandle").field("key", &self.key).finish()
    }
}
