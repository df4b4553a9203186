pub mod awareness;
pub mod comment;
pub mod diff;
pub mod error;
pub mod rid;
pub mod row_key;

pub use awareness::{AwarenessMetadata, AwarenessState, AwarenessUser, AWARENESS_VERSION};
pub use comment::{Attachment, Comment};
pub use diff::{DiffEntry, DiffResponse, DiffStatus, DocState, SubDocumentState};
pub use error::DiffError;
pub use rid::Rid;
pub use row_key::RowKey;
