//! RecursiveLock - re-entrant mutual exclusion for process-wide state
//!
//! A thread that already holds the lock may take it again; the lock is
//! released when the outermost guard is dropped. Waiting threads spin on a
//! `spin::Mutex` protected owner record and yield to the host scheduler
//! between attempts.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use spin::Mutex;

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// A recursive lock shared through an `Arc`.
///
/// Guards keep their own reference to the lock, so the owner of the lock
/// (the process context) may replace it with a fresh one while a guard on
/// the old lock is still alive.
///
/// # Examples
///
/// ```
/// use vermilion::sync::RecursiveLock;
///
/// let lock = RecursiveLock::new();
/// let outer = lock.lock();
/// let inner = lock.lock();
/// assert_eq!(lock.depth(), 2);
/// drop(inner);
/// drop(outer);
/// assert_eq!(lock.depth(), 0);
/// ```
#[derive(Debug, Default)]
pub struct RecursiveLock {
    state: Mutex<LockState>,
}

impl RecursiveLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the lock, blocking while another thread holds it.
    pub fn lock(self: &Arc<Self>) -> RecursiveGuard {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            thread::yield_now();
        }
    }

    /// Acquire the lock if it is free or already held by this thread.
    pub fn try_lock(self: &Arc<Self>) -> Option<RecursiveGuard> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.owner {
            None => {
                state.owner = Some(me);
                state.depth = 1;
            }
            Some(owner) if owner == me => state.depth += 1,
            Some(_) => return None,
        }
        Some(RecursiveGuard { lock: Arc::clone(self) })
    }

    /// Nesting depth of the current holder, 0 when free.
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
        }
    }
}

/// RAII guard returned by [`RecursiveLock::lock`].
#[must_use]
#[derive(Debug)]
pub struct RecursiveGuard {
    lock: Arc<RecursiveLock>,
}

impl Drop for RecursiveGuard {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_reentrant_acquire() {
        let lock = RecursiveLock::new();
        let a = lock.lock();
        let b = lock.lock();
        assert!(lock.is_held_by_current_thread());
        assert_eq!(lock.depth(), 2);
        drop(b);
        assert_eq!(lock.depth(), 1);
        drop(a);
        assert_eq!(lock.depth(), 0);
        assert!(!lock.is_held_by_current_thread());
    }

    #[test]
    fn test_other_thread_is_excluded() {
        let lock = RecursiveLock::new();
        let guard = lock.lock();
        let remote = Arc::clone(&lock);
        let acquired = thread::spawn(move || remote.try_lock().is_some())
            .join()
            .unwrap();
        assert!(!acquired);
        drop(guard);
        let remote = Arc::clone(&lock);
        let acquired = thread::spawn(move || remote.try_lock().is_some())
            .join()
            .unwrap();
        assert!(acquired);
    }

    #[test]
    fn test_serializes_threads() {
        let lock = RecursiveLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _outer = lock.lock();
                        let _inner = lock.lock();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock.depth(), 0);
    }

    #[test]
    fn test_guard_outlives_replaced_lock() {
        let mut current = RecursiveLock::new();
        let guard = current.lock();
        let old = Arc::clone(&current);
        current = RecursiveLock::new();
        assert_eq!(current.depth(), 0);
        assert_eq!(old.depth(), 1);
        drop(guard);
        assert_eq!(old.depth(), 0);
    }
}
