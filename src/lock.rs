//! Cache-wide lock witness.
//!
//! Every stateful operation on the priority engine happens under a single
//! process-wide cache lock owned by the host. Rather than trusting callers to
//! remember that, the engine takes a [`CacheLock`] witness parameter on every
//! such method: the only way to obtain one is to lock the host's
//! [`CacheGuard`], so a call site that compiles is a call site that holds the
//! lock.
//!
//! The engine itself contains no further synchronization; two callers are
//! serialized entirely by this one lock.
//!
//! ## Example
//!
//! ```
//! use priokit::lock::CacheGuard;
//!
//! let guard = CacheGuard::new();
//! let lock = guard.lock();
//! // pass `&lock` to policy methods; drop it to release
//! drop(lock);
//! ```

use parking_lot::{Mutex, MutexGuard};

/// Owner of the cache-wide lock. Lives in the host cache next to the policy.
#[derive(Debug, Default)]
pub struct CacheGuard {
    mutex: Mutex<()>,
}

impl CacheGuard {
    /// Creates a new unlocked guard.
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
        }
    }

    /// Acquires the cache lock, blocking until it is available.
    pub fn lock(&self) -> CacheLock<'_> {
        CacheLock {
            _guard: self.mutex.lock(),
        }
    }

    /// Acquires the cache lock if it is free.
    pub fn try_lock(&self) -> Option<CacheLock<'_>> {
        self.mutex.try_lock().map(|guard| CacheLock { _guard: guard })
    }
}

/// Proof of holding the cache lock.
///
/// Borrowed (`&CacheLock`) by every stateful method of the engine. The token
/// carries no data; its lifetime ties the call to the critical section.
pub struct CacheLock<'a> {
    _guard: MutexGuard<'a, ()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_excludes_second_acquisition() {
        let guard = CacheGuard::new();
        let lock = guard.lock();
        assert!(guard.try_lock().is_none());
        drop(lock);
        assert!(guard.try_lock().is_some());
    }

    #[test]
    fn default_is_unlocked() {
        let guard = CacheGuard::default();
        assert!(guard.try_lock().is_some());
    }
}
