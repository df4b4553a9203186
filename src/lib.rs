//! Real-time collaborative synchronization core for a workspace editor.
//!
//! Keeps locally held, merge-friendly shared documents (pages, database
//! rows, comment threads) consistent with a server and with other concurrent
//! editors: watermark-based incremental diff sync, bounded seed/hydration
//! caches, rollup dependency observers, comment transactions and ephemeral
//! awareness broadcast. The CRDT merge itself is supplied by `loro`; this
//! layer decides what is fetched, when, how much is cached and how failures
//! retry.

pub mod clients;
pub mod config;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;

pub use config::Config;
pub use models::{
    AwarenessMetadata, AwarenessState, AwarenessUser, Comment, DiffError, DiffResponse,
    DiffStatus, Rid, RowKey,
};
pub use services::{
    AwarenessBroadcaster, BackgroundRowLoader, BlobDiffClient, DatabaseSyncService, DiffApplier,
    EditorSurface, FetchDiffFn, RollupFieldObservers, RollupFieldSpec,
};
pub use store::{
    DocHandle, DocSeed, DocumentProvider, KvStore, MemoryKvStore, OpenDocumentFn, OpenedDocument,
    SeedCache, SharedDocStore,
};

use services::RollupChangedFn;

/// Shared state of one workspace's sync layer: the document arena, the seed
/// cache and the durable watermark store, constructed explicitly so tests
/// and multi-workspace embedders get isolated instances.
pub struct SyncCore {
    config: Config,
    store: Arc<SharedDocStore>,
    seeds: Arc<SeedCache>,
    kv: Arc<dyn KvStore>,
}

impl SyncCore {
    pub fn new(config: Config, open_fn: OpenDocumentFn, kv: Arc<dyn KvStore>) -> Self {
        let seeds = Arc::new(SeedCache::with_capacity(config.max_row_doc_seeds));
        Self {
            store: SharedDocStore::new(open_fn),
            seeds,
            kv,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SharedDocStore> {
        &self.store
    }

    pub fn seeds(&self) -> &Arc<SeedCache> {
        &self.seeds
    }

    /// Consume-once read of a row's pre-fetched document bytes; the open
    /// glue calls this so a seeded row skips its network fetch.
    pub fn take_database_row_doc_seed(&self, row: &RowKey) -> Option<DocSeed> {
        self.seeds.take(&row.doc_key())
    }

    /// Same consume-once read for sub-documents, keyed by their own id.
    pub fn take_doc_seed(&self, key: &str) -> Option<DocSeed> {
        self.seeds.take(key)
    }

    /// The fetch → apply → persist pipeline for database blob diffs.
    pub fn database_sync(&self, fetch: FetchDiffFn) -> DatabaseSyncService {
        let diff_client = BlobDiffClient::new(fetch, self.kv.clone(), &self.config);
        let applier = DiffApplier::new(
            self.store.clone(),
            self.seeds.clone(),
            self.kv.clone(),
            &self.config,
        );
        DatabaseSyncService::new(diff_client, applier)
    }

    /// A per-view background hydration loader.
    pub fn background_row_loader(&self) -> BackgroundRowLoader {
        BackgroundRowLoader::new(self.store.clone(), &self.config)
    }

    /// A rollup dependency observer set reporting through `on_change`.
    pub fn rollup_observers(&self, on_change: RollupChangedFn) -> RollupFieldObservers {
        RollupFieldObservers::new(self.store.clone(), on_change, &self.config)
    }

    pub fn awareness(&self) -> AwarenessBroadcaster {
        AwarenessBroadcaster::new(&self.config)
    }

    /// Drop cached seeds, for workspace switches and test isolation. Open
    /// documents are untouched; they release through their handles.
    pub fn reset(&self) {
        self.seeds.reset();
    }
}
