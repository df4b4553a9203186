use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Trailing-edge debouncer: each call cancels the previously scheduled
/// closure, so a burst of calls collapses into the last one, executed after
/// the delay window passes without another call.
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<DebouncerInner>,
}

struct DebouncerInner {
    delay: Duration,
    runtime: Handle,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Must be called from within a tokio runtime; the captured handle lets
    /// `call` be invoked from synchronous observer callbacks.
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Arc::new(DebouncerInner {
                delay,
                runtime: Handle::current(),
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn call<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.inner.pending.lock().unwrap();
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        let delay = self.inner.delay;
        *pending = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        }));
    }

    /// Drop whatever is scheduled without running it.
    pub fn cancel(&self) {
        if let Some(handle) = self.inner.pending.lock().unwrap().take() {
            handle.abort();
        }
    }
}
