pub mod apply_service;
pub mod awareness_service;
pub mod comment_service;
pub mod diff_service;
pub mod hydration_service;
pub mod rollup_service;

pub use apply_service::DiffApplier;
pub use awareness_service::{
    AwarenessBroadcaster, CursorSync, EditorSurface, PublishAwarenessFn, SelectionListenerFn,
};
pub use comment_service::{
    add_comment, add_comment_reaction, delete_comment, get_row_comments, remove_comment_reaction,
    resolve_comment, update_comment_content, COMMENTS_KEY, LOCAL_ORIGIN,
};
pub use diff_service::{BlobDiffClient, DatabaseSyncService, FetchDiffFn};
pub use hydration_service::BackgroundRowLoader;
pub use rollup_service::{RollupChangedFn, RollupFieldObservers, RollupFieldSpec};
