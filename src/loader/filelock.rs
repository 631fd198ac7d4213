//! The per-(domain, module) file-load lock.
//!
//! A [`FileLoadLock`] is a transient entry in the domain's load-lock table: it
//! exists only while a module is being loaded and is removed once the load
//! completes (success or permanent failure is recorded on the
//! [`DomainAssembly`], not on the lock). At most one lock exists per
//! (domain, module) at any instant; the domain's table guarantees this by
//! doing find-or-create under its [`crate::loader::ListLock`].
//!
//! The lock confers the *advancement right*: only one thread may advance a
//! module's level at a time, and any other thread requesting a level the
//! module has already reached proceeds without blocking. Blocking
//! [`FileLoadLock::acquire`] is the only intentional blocking call in the
//! loader; capped (nested) loads use [`FileLoadLock::try_acquire`] so that a
//! dependency cycle spread across threads degrades to partial progress
//! instead of a blocking deadlock.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use crate::assembly::DomainAssembly;
use crate::error::LoadError;
use crate::loader::Level;

struct HoldState {
    holder: Option<ThreadId>,
}

/// Serializes and records progress of a single module load.
pub struct FileLoadLock {
    assembly: Arc<DomainAssembly>,
    state: Mutex<HoldState>,
    released: Condvar,
}

/// Outcome of a non-blocking acquisition attempt.
pub enum TryAcquire<'a> {
    /// The caller owns the advancement right and must complete or fail the
    /// level through the guard.
    Acquired(FileLockGuard<'a>),
    /// The module already satisfies the target (or its error is frozen, or
    /// the caller already holds this lock); proceed without advancing.
    Satisfied,
    /// Another thread holds the advancement right.
    Busy,
}

impl FileLoadLock {
    pub(crate) fn new(assembly: Arc<DomainAssembly>) -> Self {
        FileLoadLock {
            assembly,
            state: Mutex::new(HoldState { holder: None }),
            released: Condvar::new(),
        }
    }

    /// The assembly this lock advances.
    pub fn assembly(&self) -> &Arc<DomainAssembly> {
        &self.assembly
    }

    /// Whether the target is already met without taking the lock: the module
    /// is at or past `target`, or its error is frozen.
    fn satisfied(&self, target: Level) -> bool {
        self.assembly.level() >= target || self.assembly.error().is_some()
    }

    /// Non-blocking probe: `false` if the lock is definitely unobtainable —
    /// the module already satisfies `target`, or the calling thread already
    /// holds the advancement right (acquiring would deadlock against itself).
    pub fn can_acquire(&self, target: Level) -> bool {
        if self.satisfied(target) {
            return false;
        }
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.holder != Some(thread::current().id())
    }

    /// Block until the advancement right is free *and* the module has not yet
    /// reached `target`.
    ///
    /// Returns `None` without blocking once the module satisfies `target`
    /// (including when its error is frozen), and also when the calling thread
    /// already holds this lock — re-entry proceeds with the attained level
    /// instead of deadlocking. On `Some`, the caller owns the advancement
    /// right until the guard drops and must call
    /// [`FileLockGuard::complete_level`] or [`FileLockGuard::set_error`].
    pub fn acquire(&self, target: Level) -> Option<FileLockGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.satisfied(target) {
                return None;
            }
            match state.holder {
                None => {
                    state.holder = Some(me);
                    return Some(FileLockGuard { lock: self });
                }
                Some(holder) if holder == me => return None,
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Non-blocking form of [`acquire`](Self::acquire), used by capped nested
    /// loads: a busy lock is reported as [`TryAcquire::Busy`] so the caller
    /// can return partial progress instead of waiting.
    pub fn try_acquire(&self, target: Level) -> TryAcquire<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.satisfied(target) {
            return TryAcquire::Satisfied;
        }
        match state.holder {
            None => {
                state.holder = Some(me);
                TryAcquire::Acquired(FileLockGuard { lock: self })
            }
            Some(holder) if holder == me => TryAcquire::Satisfied,
            Some(_) => TryAcquire::Busy,
        }
    }

    /// Advance the module by exactly one step, to `level`.
    ///
    /// Idempotent: returns `false` if a racing advance already happened or if
    /// the error is frozen.
    pub fn complete_level(&self, level: Level) -> bool {
        let advanced = self.assembly.advance_to(level);
        if advanced {
            log::trace!("{} reached {}", self.assembly.id(), level);
        }
        advanced
    }

    /// Permanently mark the module failed. The level freezes; all current and
    /// future observers receive a cloned copy of `error`. Wakes every waiter.
    pub fn set_error(&self, error: LoadError) {
        self.assembly.set_error(error);
        // Notify while holding the state mutex, or a waiter between its
        // satisfied-check and wait could miss the wakeup.
        let _state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.released.notify_all();
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.holder = None;
        self.released.notify_all();
    }
}

/// The advancement right over one module, held until drop.
pub struct FileLockGuard<'a> {
    lock: &'a FileLoadLock,
}

impl FileLockGuard<'_> {
    /// The assembly being advanced.
    pub fn assembly(&self) -> &Arc<DomainAssembly> {
        self.lock.assembly()
    }

    /// Advance the module by exactly one step, to `level`. See
    /// [`FileLoadLock::complete_level`].
    pub fn complete_level(&self, level: Level) -> bool {
        self.lock.complete_level(level)
    }

    /// Freeze the module with a permanent error. See
    /// [`FileLoadLock::set_error`].
    pub fn set_error(&self, error: LoadError) {
        self.lock.set_error(error);
    }
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::module::ModuleImage;
    use crate::test::FixedAllocator;

    fn lock_for(path: &str) -> FileLoadLock {
        let image = ModuleImage::from_data(path, path.as_bytes());
        FileLoadLock::new(DomainAssembly::new(image, Arc::new(FixedAllocator::new(false))))
    }

    #[test]
    fn test_acquire_then_complete() {
        let lock = lock_for("a.dll");
        assert!(lock.can_acquire(Level::Begin));

        let guard = lock.acquire(Level::Begin).unwrap();
        assert!(guard.complete_level(Level::Begin));
        assert!(!guard.complete_level(Level::Begin));
        drop(guard);

        assert_eq!(lock.assembly().level(), Level::Begin);
        // Target met: further acquires return without blocking.
        assert!(lock.acquire(Level::Begin).is_none());
        assert!(!lock.can_acquire(Level::Begin));
    }

    #[test]
    fn test_reentrant_acquire_returns_none() {
        let lock = lock_for("a.dll");
        let _guard = lock.acquire(Level::Begin).unwrap();
        // Same thread, lock held: must not block, must not deadlock.
        assert!(lock.acquire(Level::Begin).is_none());
        assert!(!lock.can_acquire(Level::Begin));
    }

    #[test]
    fn test_try_acquire_reports_busy_cross_thread() {
        let lock = Arc::new(lock_for("a.dll"));
        let guard = lock.acquire(Level::Begin).unwrap();

        let (tx, rx) = mpsc::channel();
        let other = lock.clone();
        let worker = thread::spawn(move || {
            let busy = matches!(other.try_acquire(Level::Begin), TryAcquire::Busy);
            tx.send(busy).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        worker.join().unwrap();
        drop(guard);
    }

    #[test]
    fn test_blocked_acquire_wakes_on_completion() {
        let lock = Arc::new(lock_for("a.dll"));
        let guard = lock.acquire(Level::Begin).unwrap();

        let (tx, rx) = mpsc::channel();
        let other = lock.clone();
        let worker = thread::spawn(move || {
            // Blocks until the holder completes Begin, then observes the
            // satisfied target.
            let outcome = other.acquire(Level::Begin);
            tx.send(outcome.is_none()).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        guard.complete_level(Level::Begin);
        drop(guard);

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        worker.join().unwrap();
    }

    #[test]
    fn test_set_error_freezes_and_wakes() {
        let lock = Arc::new(lock_for("a.dll"));
        let guard = lock.acquire(Level::Begin).unwrap();

        let (tx, rx) = mpsc::channel();
        let other = lock.clone();
        let worker = thread::spawn(move || {
            let outcome = other.acquire(Level::Begin);
            tx.send(outcome.is_none()).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        guard.set_error(LoadError::new("a.dll", Level::Begin, "binder failure"));
        drop(guard);

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        worker.join().unwrap();

        assert_eq!(lock.assembly().level(), Level::Create);
        assert_eq!(lock.assembly().error().unwrap().message, "binder failure");
        assert!(!lock.complete_level(Level::Begin));
    }
}
