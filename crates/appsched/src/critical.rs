//! Scoped exclusive access to state shared with timer notifications.

use parking_lot::Mutex;

/// State guarded by a short critical section.
///
/// Access only happens through [`CriticalCell::with`], so the guard is
/// scoped to a single read-modify-write and released on every exit path.
/// Never call out to user code from inside the closure.
#[derive(Debug, Default)]
pub struct CriticalCell<T> {
    inner: Mutex<T>,
}

impl<T> CriticalCell<T> {
    /// Wrap `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Run `f` with exclusive access to the guarded state.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}
