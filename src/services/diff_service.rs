use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{DiffError, DiffResponse, DiffStatus, Rid};
use crate::store::{load_rid, KvStore};

use super::apply_service::DiffApplier;

/// The diff RPC, injected so the retry loop can be driven against scripted
/// responses in tests. Arguments: workspace id, database id, watermark,
/// protocol version.
pub type FetchDiffFn = Arc<
    dyn Fn(
            String,
            Uuid,
            Option<Rid>,
            u32,
        ) -> Pin<Box<dyn Future<Output = Result<DiffResponse, String>> + Send>>
        + Send
        + Sync,
>;

/// Fetches incremental server changes since the persisted watermark,
/// retrying a fixed number of times while the server is still assembling the
/// diff.
pub struct BlobDiffClient {
    fetch: FetchDiffFn,
    kv: Arc<dyn KvStore>,
    retry_delay: Duration,
    retry_attempts: u32,
    protocol_version: u32,
}

impl BlobDiffClient {
    pub fn new(fetch: FetchDiffFn, kv: Arc<dyn KvStore>, config: &Config) -> Self {
        Self {
            fetch,
            kv,
            retry_delay: Duration::from_secs(config.diff_retry_delay_secs),
            retry_attempts: config.diff_retry_attempts,
            protocol_version: config.diff_protocol_version,
        }
    }

    /// Fetch a ready diff for `database_id`, waiting out up to
    /// `retry_attempts` "not ready" responses. A still-unready server after
    /// that surfaces as `DiffError::NotReady`; the caller decides whether to
    /// re-invoke later.
    pub async fn fetch_ready_diff(
        &self,
        workspace_id: &str,
        database_id: &Uuid,
    ) -> Result<DiffResponse, DiffError> {
        // Absent or unreadable watermark means "from the beginning".
        let max_known_rid = load_rid(self.kv.as_ref(), database_id);

        for attempt in 0..=self.retry_attempts {
            let started = std::time::Instant::now();
            let diff = (self.fetch)(
                workspace_id.to_string(),
                *database_id,
                max_known_rid,
                self.protocol_version,
            )
            .await
            .map_err(DiffError::Fetch)?;

            match diff.status {
                DiffStatus::Ready => {
                    info!(
                        "Blob diff for database '{}' ready after {} attempt(s) in {:?}: {}",
                        database_id,
                        attempt + 1,
                        started.elapsed(),
                        diff.summary()
                    );
                    return Ok(diff);
                }
                DiffStatus::NotReady => {
                    // The server's retry_after_seconds hint is deliberately
                    // ignored in favor of the fixed delay.
                    warn!(
                        "Blob diff for database '{}' not ready (attempt {} of {}, took {:?}, server hint {:?}s)",
                        database_id,
                        attempt + 1,
                        self.retry_attempts + 1,
                        started.elapsed(),
                        diff.retry_after_seconds
                    );
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(DiffError::NotReady)
    }
}

/// The full fetch → apply → persist cycle for one database.
pub struct DatabaseSyncService {
    diff_client: BlobDiffClient,
    applier: DiffApplier,
}

impl DatabaseSyncService {
    pub fn new(diff_client: BlobDiffClient, applier: DiffApplier) -> Self {
        Self {
            diff_client,
            applier,
        }
    }

    /// Catch the locally cached database up to the server's state. The
    /// watermark advances only after the whole diff applied successfully.
    pub async fn prefetch_database_blob_diff(
        &self,
        workspace_id: &str,
        database_id: &Uuid,
    ) -> Result<DiffResponse, DiffError> {
        let diff = self
            .diff_client
            .fetch_ready_diff(workspace_id, database_id)
            .await?;
        self.applier
            .apply_diff(database_id, &diff)
            .await
            .map_err(DiffError::Apply)?;
        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiffEntry;
    use crate::store::MemoryKvStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn ready_diff() -> DiffResponse {
        DiffResponse {
            status: DiffStatus::Ready,
            retry_after_seconds: None,
            creates: vec![DiffEntry {
                rid: Rid::new(5, 0),
                row_id: None,
                doc_state: None,
                document: None,
            }],
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Fetch fn that answers NotReady `not_ready_count` times, then Ready.
    fn scripted_fetch(not_ready_count: u32) -> FetchDiffFn {
        let calls = Arc::new(AtomicU32::new(0));
        Arc::new(move |_ws, _db, _rid, _version| {
            let calls = calls.clone();
            Box::pin(async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < not_ready_count {
                    Ok(DiffResponse::not_ready(Some(1)))
                } else {
                    Ok(ready_diff())
                }
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_fixed_delays() {
        let kv = Arc::new(MemoryKvStore::new());
        let client = BlobDiffClient::new(scripted_fetch(2), kv, &Config::default());

        let started = tokio::time::Instant::now();
        let diff = client
            .fetch_ready_diff("ws", &Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(diff.status, DiffStatus::Ready);
        // Two NotReady responses cost exactly two fixed 5s delays.
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_when_never_ready() {
        let kv = Arc::new(MemoryKvStore::new());
        let client = BlobDiffClient::new(scripted_fetch(10), kv, &Config::default());

        let err = client
            .fetch_ready_diff("ws", &Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, DiffError::NotReady));
    }

    #[tokio::test]
    async fn presents_the_persisted_watermark() {
        let kv = Arc::new(MemoryKvStore::new());
        let database_id = Uuid::new_v4();
        crate::store::store_rid(kv.as_ref(), &database_id, &Rid::new(7, 2));

        let seen: Arc<Mutex<Option<Option<Rid>>>> = Arc::new(Mutex::new(None));
        let seen_in_fetch = seen.clone();
        let fetch: FetchDiffFn = Arc::new(move |_ws, _db, rid, _version| {
            let seen = seen_in_fetch.clone();
            Box::pin(async move {
                *seen.lock().unwrap() = Some(rid);
                Ok(ready_diff())
            })
        });

        let client = BlobDiffClient::new(fetch, kv, &Config::default());
        client.fetch_ready_diff("ws", &database_id).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(Some(Rid::new(7, 2))));
    }

    #[tokio::test]
    async fn fetch_errors_surface_as_fetch_failures() {
        let kv = Arc::new(MemoryKvStore::new());
        let fetch: FetchDiffFn = Arc::new(|_ws, _db, _rid, _version| {
            Box::pin(async move { Err("connection refused".to_string()) })
        });
        let client = BlobDiffClient::new(fetch, kv, &Config::default());
        let err = client
            .fetch_ready_diff("ws", &Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, DiffError::Fetch(_)));
    }
}
