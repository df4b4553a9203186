/// Runs a closure when dropped, so cleanup happens on success, error and
/// early-return paths alike.
pub struct ScopeGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Shorthand for `ScopeGuard::new`.
pub fn defer<F: FnOnce()>(f: F) -> ScopeGuard<F> {
    ScopeGuard::new(f)
}
