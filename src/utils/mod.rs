pub mod cancel;
pub mod debounce;
pub mod scope_guard;

pub use cancel::CancelToken;
pub use debounce::Debouncer;
pub use scope_guard::{defer, ScopeGuard};
