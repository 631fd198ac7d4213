//! Re-entrant lock guarding a list of in-flight load entries.
//!
//! [`ListLock`] is the base primitive of the per-domain load-lock table. It
//! provides exclusive mutation of the entry set, re-entrant per owning thread,
//! with linear lookup over the (small) set of concurrently in-flight loads.
//! Entries are reference counted so a looked-up entry stays valid after the
//! lock is left.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};

struct ListLockState<T> {
    owner: Option<ThreadId>,
    depth: usize,
    entries: Vec<Arc<T>>,
}

/// A re-entrant lock over a list of entries.
///
/// `enter` blocks until the calling thread owns the lock (immediately if it
/// already does) and returns a guard through which the entry list may be
/// inspected and mutated. The guard releases ownership on drop; nested guards
/// held by the same thread release in any order.
pub struct ListLock<T> {
    state: Mutex<ListLockState<T>>,
    handoff: Condvar,
}

impl<T> ListLock<T> {
    /// Create an empty lock.
    pub fn new() -> Self {
        ListLock {
            state: Mutex::new(ListLockState {
                owner: None,
                depth: 0,
                entries: Vec::new(),
            }),
            handoff: Condvar::new(),
        }
    }

    /// Take ownership of the lock, blocking while another thread holds it.
    ///
    /// Re-entrant: a thread that already owns the lock enters again without
    /// blocking.
    pub fn enter(&self) -> ListLockGuard<'_, T> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    break;
                }
                Some(_) => {
                    state = self
                        .handoff
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        ListLockGuard { lock: self }
    }

    fn leave(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.handoff.notify_one();
        }
    }
}

impl<T> Default for ListLock<T> {
    fn default() -> Self {
        ListLock::new()
    }
}

/// Ownership guard returned by [`ListLock::enter`].
pub struct ListLockGuard<'a, T> {
    lock: &'a ListLock<T>,
}

impl<T> ListLockGuard<'_, T> {
    /// Find the first entry matching the predicate. Linear over the in-flight
    /// set, which stays small by construction.
    pub fn find_entry(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<Arc<T>> {
        let state = self
            .lock
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state
            .entries
            .iter()
            .find(|entry| predicate(entry))
            .cloned()
    }

    /// Append an entry to the in-flight set.
    pub fn add_entry(&self, entry: Arc<T>) {
        let mut state = self
            .lock
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.entries.push(entry);
    }

    /// Remove and return the first entry matching the predicate.
    pub fn remove_entry(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<Arc<T>> {
        let mut state = self
            .lock
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let position = state.entries.iter().position(|entry| predicate(entry))?;
        Some(state.entries.remove(position))
    }

    /// Drop every entry.
    pub fn clear_entries(&self) {
        let mut state = self
            .lock
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.entries.clear();
    }

    /// Number of in-flight entries.
    pub fn len(&self) -> usize {
        let state = self
            .lock
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.entries.len()
    }

    /// Whether the in-flight set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for ListLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.leave();
    }
}
