//! Isolation domains.
//!
//! A [`Domain`] is an explicit value owning everything a load needs: the
//! append-only assembly list, the load-lock table, the identity index, and
//! handles to the four external collaborators. There are no process-wide
//! registries; multi-domain isolation falls out of the type system, since no
//! domain can see another's table without an explicit reference.
//!
//! # Locking
//!
//! The assembly list and the load-lock table are guarded by separate locks,
//! deliberately, so that registering a new load never contends with
//! enumerating already-loaded assemblies. Identity lookup goes through a
//! dedicated concurrent index and touches neither.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cildomain::domain::{Domain, DomainId};
//! use cildomain::loader::{Level, LoadLimiter};
//! use cildomain::module::ModuleImage;
//! # fn collaborators() -> (Arc<dyn cildomain::loader::Binder>, Arc<dyn cildomain::loader::ExecutionEngine>, Arc<dyn cildomain::loader::Notifier>, Arc<dyn cildomain::loader::LoaderAllocator>) { unimplemented!() }
//!
//! let (binder, engine, notifier, allocator) = collaborators();
//! let domain = Domain::new(DomainId::new(1), binder, engine, notifier, allocator);
//!
//! let core = domain.load(ModuleImage::from_data("core.dll", b"..."))?;
//! let result = domain.ensure_level(&core, Level::Active, LoadLimiter::unbounded());
//! assert!(result.is_reached());
//! # Ok::<(), cildomain::Error>(())
//! ```

mod list;

pub use list::{DomainAssemblyList, IterationFlags};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::assembly::{AssemblyHolder, DomainAssembly, NotifyFlags};
use crate::loader::{
    self, AdvanceResult, Binder, ExecutionEngine, FileLoadLock, Level, ListLock, LoadLimiter,
    LoaderAllocator, Notifier,
};
use crate::module::{ModuleId, ModuleImage};
use crate::{Error, Result};

/// Small integer handle identifying a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainId(u32);

impl DomainId {
    /// Create a domain handle from its raw value.
    pub fn new(value: u32) -> Self {
        DomainId(value)
    }

    /// The raw handle value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain#{}", self.0)
    }
}

/// A process-internal isolation boundary owning its own module list and
/// load-lock table.
///
/// Created explicitly, torn down explicitly (or on drop); all assemblies in
/// it are released at teardown, with the unload notification delivered
/// exactly once per module.
pub struct Domain {
    id: DomainId,
    assemblies: DomainAssemblyList,
    load_locks: ListLock<FileLoadLock>,
    index: DashMap<ModuleId, usize>,
    binder: Arc<dyn Binder>,
    engine: Arc<dyn ExecutionEngine>,
    notifier: Arc<dyn Notifier>,
    allocator: Arc<dyn LoaderAllocator>,
    torn_down: AtomicBool,
}

impl Domain {
    /// Create an empty domain wired to its four collaborators.
    pub fn new(
        id: DomainId,
        binder: Arc<dyn Binder>,
        engine: Arc<dyn ExecutionEngine>,
        notifier: Arc<dyn Notifier>,
        allocator: Arc<dyn LoaderAllocator>,
    ) -> Self {
        Domain {
            id,
            assemblies: DomainAssemblyList::new(),
            load_locks: ListLock::new(),
            index: DashMap::new(),
            binder,
            engine,
            notifier,
            allocator,
            torn_down: AtomicBool::new(false),
        }
    }

    /// The domain's handle.
    pub fn id(&self) -> DomainId {
        self.id
    }

    /// The domain's assembly list.
    pub fn assemblies(&self) -> &DomainAssemblyList {
        &self.assemblies
    }

    /// Constant-time identity lookup, touching neither the list lock nor the
    /// load-lock table.
    pub fn find(&self, id: &ModuleId) -> Option<Arc<DomainAssembly>> {
        let index = *self.index.get(id)?;
        self.assemblies.get_unlocked(index)
    }

    /// Bring a module into the domain at level `Create`, or return the
    /// existing assembly if the domain already references it.
    ///
    /// # Errors
    /// [`Error::CollectibleRoot`] if this would make a collectible module the
    /// domain's first assembly.
    pub fn load(&self, image: ModuleImage) -> Result<Arc<DomainAssembly>> {
        self.intern(image)
    }

    /// [`load`](Self::load) followed by one uncapped `ensure_level` pass.
    pub fn load_to(
        &self,
        image: ModuleImage,
        target: Level,
    ) -> Result<(Arc<DomainAssembly>, AdvanceResult)> {
        let assembly = self.intern(image)?;
        let result = self.ensure_level(&assembly, target, LoadLimiter::unbounded());
        Ok((assembly, result))
    }

    /// Advance `assembly` toward `target`, as far as `limiter` allows.
    ///
    /// Blocking only on the unbounded path, and only inside
    /// [`FileLoadLock::acquire`]. Returning below `target` is a legal
    /// outcome; callers must match on the [`AdvanceResult`] and re-invoke
    /// later if they need target-level guarantees.
    pub fn ensure_level(
        &self,
        assembly: &Arc<DomainAssembly>,
        target: Level,
        limiter: LoadLimiter,
    ) -> AdvanceResult {
        loader::drive(self, assembly, target, limiter)
    }

    /// Iterate the domain's assemblies, filtered by `flags`, yielding holders
    /// so collectible entries stay alive while observed.
    pub fn iter(&self, flags: IterationFlags) -> impl Iterator<Item = AssemblyHolder> + '_ {
        self.assemblies.iter_holders(flags)
    }

    /// Tear the domain down: deliver each pending unload notification exactly
    /// once and release every assembly. Idempotent; also runs on drop.
    pub fn teardown(&mut self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("{} tearing down, {} assemblies", self.id, self.assemblies.count());
        for assembly in self.assemblies.iter() {
            if assembly.try_mark(NotifyFlags::UNLOAD_NOTIFIED) {
                self.notifier.notify_unload(assembly.id());
            }
        }
        // Capped in-flight entries would otherwise keep assemblies alive
        // past teardown.
        self.load_locks.enter().clear_entries();
        self.index.clear();
        self.assemblies.clear();
    }

    pub(crate) fn binder(&self) -> &Arc<dyn Binder> {
        &self.binder
    }

    pub(crate) fn engine(&self) -> &Arc<dyn ExecutionEngine> {
        &self.engine
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Find-or-create the per-domain assembly for `image`.
    ///
    /// The identity index entry is settled first, so two racing creators of
    /// the same module converge on a single `DomainAssembly`.
    pub(crate) fn intern(&self, image: ModuleImage) -> Result<Arc<DomainAssembly>> {
        match self.index.entry(image.id().clone()) {
            Entry::Occupied(entry) => self
                .assemblies
                .get_unlocked(*entry.get())
                .ok_or(Error::LockError),
            Entry::Vacant(entry) => {
                let assembly = DomainAssembly::new(image, self.allocator.clone());
                let index = self.assemblies.append(assembly.clone())?;
                entry.insert(index);
                Ok(assembly)
            }
        }
    }

    /// Find-or-create the in-flight [`FileLoadLock`] for `assembly`.
    ///
    /// Runs under the load-lock table's [`ListLock`], which is what upholds
    /// the at-most-one-lock-per-module invariant. Returns `None` instead of
    /// registering a fresh entry when the load already finished (fully active
    /// or frozen): the finishing thread sets the terminal state before
    /// retiring its entry, so a finished module must never re-enter the
    /// table.
    pub(crate) fn lock_for(&self, assembly: &Arc<DomainAssembly>) -> Option<Arc<FileLoadLock>> {
        let guard = self.load_locks.enter();
        if let Some(existing) = guard.find_entry(|lock| lock.assembly().id() == assembly.id()) {
            return Some(existing);
        }
        if assembly.is_active() || assembly.error().is_some() {
            return None;
        }
        let lock = Arc::new(FileLoadLock::new(assembly.clone()));
        guard.add_entry(lock.clone());
        log::debug!("{}: load lock registered for {}", self.id, assembly.id());
        Some(lock)
    }

    /// Remove the transient lock entry once a load finishes (fully active or
    /// frozen by a permanent error).
    pub(crate) fn retire_lock(&self, id: &ModuleId) {
        let guard = self.load_locks.enter();
        if guard.remove_entry(|lock| lock.assembly().id() == id).is_some() {
            log::debug!("{}: load lock retired for {}", self.id, id);
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight_locks(&self) -> usize {
        self.load_locks.enter().len()
    }
}

impl Drop for Domain {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.id)
            .field("assemblies", &self.assemblies.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleRef;
    use crate::test::{test_domain, StubBinder};

    #[test]
    fn test_intern_is_idempotent() {
        let domain = test_domain(StubBinder::new());
        let image = ModuleImage::from_data("core.dll", b"core");

        let a = domain.load(image.clone()).unwrap();
        let b = domain.load(image).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(domain.assemblies().count(), 1);
        assert_eq!(a.level(), Level::Create);
    }

    #[test]
    fn test_find_by_identity() {
        let domain = test_domain(StubBinder::new());
        let image = ModuleImage::from_data("core.dll", b"core");
        let id = image.id().clone();

        assert!(domain.find(&id).is_none());
        let loaded = domain.load(image).unwrap();
        assert!(Arc::ptr_eq(&domain.find(&id).unwrap(), &loaded));
    }

    #[test]
    fn test_single_pass_load_retires_lock() {
        let binder = StubBinder::new();
        let domain = test_domain(binder);
        let (core, result) = domain
            .load_to(ModuleImage::from_data("core.dll", b"core"), Level::Active)
            .unwrap();

        assert_eq!(result, AdvanceResult::Reached(Level::Active));
        assert!(core.is_active());
        assert_eq!(domain.in_flight_locks(), 0);
    }

    #[test]
    fn test_unresolvable_dependency_freezes_module() {
        let domain = test_domain(StubBinder::new());
        let image = ModuleImage::from_data("app.dll", b"app")
            .with_dependency(ModuleRef::by_name("missing.dll"));

        let (app, result) = domain.load_to(image, Level::Active).unwrap();
        let error = match result {
            AdvanceResult::Failed(error) => error,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(error.level, Level::AddDependencies);
        assert_eq!(app.level(), Level::Allocate);
        assert_eq!(domain.in_flight_locks(), 0);

        // Sticky: the retry observes the same frozen failure.
        let retry = domain.ensure_level(&app, Level::Active, LoadLimiter::unbounded());
        assert_eq!(retry, AdvanceResult::Failed(error));
    }

    #[test]
    fn test_finished_module_never_reenters_lock_table() {
        let domain = test_domain(StubBinder::new());
        let (core, _) = domain
            .load_to(ModuleImage::from_data("core.dll", b"core"), Level::Active)
            .unwrap();
        assert_eq!(domain.in_flight_locks(), 0);

        // An active module must not get a fresh table entry, directly or
        // through a full retry.
        assert!(domain.lock_for(&core).is_none());
        let retry = domain.ensure_level(&core, Level::Active, LoadLimiter::unbounded());
        assert_eq!(retry, AdvanceResult::Reached(Level::Active));
        assert_eq!(domain.in_flight_locks(), 0);

        // Same for a module frozen by a permanent error.
        let broken = ModuleImage::from_data("app.dll", b"app")
            .with_dependency(ModuleRef::by_name("missing.dll"));
        let (app, _) = domain.load_to(broken, Level::Active).unwrap();
        assert!(app.error().is_some());
        assert!(domain.lock_for(&app).is_none());
        assert_eq!(domain.in_flight_locks(), 0);
    }

    #[test]
    fn test_teardown_clears_in_flight_locks() {
        let mut domain = test_domain(StubBinder::new());
        let (core, result) = domain
            .load_to(ModuleImage::from_data("core.dll", b"core"), Level::Begin)
            .unwrap();

        // A load stopped below Active keeps its table entry for the retry.
        assert_eq!(result, AdvanceResult::Reached(Level::Begin));
        assert_eq!(core.level(), Level::Begin);
        assert_eq!(domain.in_flight_locks(), 1);

        domain.teardown();
        assert_eq!(domain.in_flight_locks(), 0);
    }
}
