use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use loro::LoroDoc;
#[cfg(test)]
use loro::ToJson;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{DiffEntry, DiffResponse, DocState, RowKey};
use crate::store::{store_rid, DocSeed, KvStore, SeedCache, SharedDocStore};

/// Merges fetched diff entries into shared documents with bounded
/// concurrency, then advances the persisted watermark.
pub struct DiffApplier {
    store: Arc<SharedDocStore>,
    seeds: Arc<SeedCache>,
    kv: Arc<dyn KvStore>,
    batch_size: usize,
}

impl DiffApplier {
    pub fn new(
        store: Arc<SharedDocStore>,
        seeds: Arc<SeedCache>,
        kv: Arc<dyn KvStore>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            seeds,
            kv,
            batch_size: config.diff_apply_concurrency,
        }
    }

    /// Apply one diff. Creates and updates are merged in fixed-size batches
    /// with fan-out inside each batch; deletes only count toward the
    /// watermark. The watermark is persisted only after every batch
    /// succeeded.
    pub async fn apply_diff(&self, database_id: &Uuid, diff: &DiffResponse) -> Result<(), String> {
        let entries: Vec<&DiffEntry> = diff.creates.iter().chain(diff.updates.iter()).collect();
        info!(
            "Applying diff to database '{}': {}",
            database_id,
            diff.summary()
        );

        for batch in entries.chunks(self.batch_size) {
            let results: Vec<Result<(), String>> = stream::iter(
                batch
                    .iter()
                    .map(|entry| self.apply_entry(database_id, entry)),
            )
            .buffer_unordered(self.batch_size)
            .collect()
            .await;
            for result in results {
                result?;
            }
            tokio::task::yield_now().await;
        }

        // Deletes advance the watermark but are not applied as document
        // mutations here; removal is owned by the outline layer.
        if let Some(rid) = diff.max_rid() {
            store_rid(self.kv.as_ref(), database_id, &rid);
        }
        Ok(())
    }

    async fn apply_entry(&self, database_id: &Uuid, entry: &DiffEntry) -> Result<(), String> {
        if let (Some(row_id_bytes), Some(doc_state)) = (&entry.row_id, &entry.doc_state) {
            match Uuid::from_slice(row_id_bytes) {
                Ok(row_id) => {
                    let key = RowKey::new(*database_id, row_id).doc_key();
                    self.merge_or_seed(&key, doc_state).await?;
                }
                Err(e) => {
                    // Malformed id short-circuits this entry, not the batch.
                    warn!(
                        "Skipping diff entry with malformed row id ({} bytes): {}",
                        row_id_bytes.len(),
                        e
                    );
                }
            }
        }

        if let Some(sub) = &entry.document {
            if !sub.deleted {
                if let Some(doc_state) = &sub.doc_state {
                    match Uuid::from_slice(&sub.document_id) {
                        Ok(document_id) => {
                            self.merge_or_seed(&document_id.to_string(), doc_state).await?;
                        }
                        Err(e) => {
                            warn!(
                                "Skipping sub-document with malformed id ({} bytes): {}",
                                sub.document_id.len(),
                                e
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Route update bytes to the right document: merge into the open one if
    /// any, otherwise seed the cache and push the update through a transient
    /// open/merge/close.
    async fn merge_or_seed(&self, key: &str, doc_state: &DocState) -> Result<(), String> {
        if let Some(handle) = self.store.get_open(key) {
            debug!("Merging diff payload into open document '{}'", key);
            return merge_doc_state(handle.doc(), key, doc_state);
        }

        // Seed first so the open glue can pick the bytes up instead of
        // fetching them again.
        self.seeds.insert(
            key.to_string(),
            DocSeed {
                bytes: doc_state.bytes.clone(),
                encoder_version: doc_state.encoder_version,
            },
        );
        let handle = self.store.open(key).await?;
        // The handle drops at the end of this scope on success and on error,
        // so the transient document is always closed.
        merge_doc_state(handle.doc(), key, doc_state)
    }
}

/// Apply encoded update bytes to a document. Opaque to this layer; the CRDT
/// merge is commutative and idempotent.
fn merge_doc_state(doc: &LoroDoc, key: &str, doc_state: &DocState) -> Result<(), String> {
    if let Err(e) = doc.import(&doc_state.bytes) {
        error!(
            "Failed to merge update bytes (encoder v{}) into '{}': {}",
            doc_state.encoder_version, key, e
        );
        return Err(format!("Failed to merge update bytes into '{}': {}", key, e));
    }
    Ok(())
}
