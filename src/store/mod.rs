pub mod doc_store;
pub mod kv;
pub mod seed_cache;

pub use doc_store::{DocHandle, DocumentProvider, OpenDocumentFn, OpenedDocument, SharedDocStore};
pub use kv::{load_rid, rid_storage_key, store_rid, KvStore, MemoryKvStore};
pub use seed_cache::{DocSeed, SeedCache, MAX_ROW_DOC_SEEDS};
