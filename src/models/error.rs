/// Failure modes of the blob diff cycle.
///
/// `NotReady` is terminal for one `fetch_ready_diff` call: the retries are
/// exhausted and the caller decides whether to re-invoke later.
#[derive(Debug)]
pub enum DiffError {
    NotReady,
    Fetch(String),
    Apply(String),
}

impl std::fmt::Display for DiffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffError::NotReady => write!(f, "Diff not ready after retries"),
            DiffError::Fetch(e) => write!(f, "Diff fetch failed: {}", e),
            DiffError::Apply(e) => write!(f, "Diff apply failed: {}", e),
        }
    }
}

impl std::error::Error for DiffError {}
