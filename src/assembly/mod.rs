//! Per-domain assembly state.
//!
//! A [`DomainAssembly`] is the per-domain projection of a module: its current
//! load level, its frozen error (if any), its notification flags, and the
//! dependencies resolved for it so far. It is created when a domain first
//! references the module and mutated only through level-advancing operations
//! carried out under the module's [`crate::loader::FileLoadLock`].
//!
//! # Thread Safety
//!
//! The level is an atomic ordinal that only ever increases; the error is a
//! write-once cell; flags are set with atomic or-operations. Readers never
//! block. The single advancement-right holder is the only writer of the
//! level, which is what makes the plain compare-exchange in
//! [`DomainAssembly::advance_to`] sufficient.

mod holder;

pub use holder::AssemblyHolder;

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use bitflags::bitflags;

use crate::error::LoadError;
use crate::loader::{Level, LoaderAllocator};
use crate::module::{ModuleId, ModuleImage};

bitflags! {
    /// Notification and lifecycle flags of a [`DomainAssembly`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NotifyFlags: u32 {
        /// The assembly is visible to profiler enumerators. Guaranteed set
        /// strictly before the load notification fires.
        const AVAILABLE_TO_PROFILERS = 1;
        /// The load notification has been delivered (exactly once).
        const LOAD_NOTIFIED = 1 << 1;
        /// The unload notification has been delivered (exactly once).
        const UNLOAD_NOTIFIED = 1 << 2;
        /// The assembly's memory may be reclaimed while the process runs.
        const COLLECTIBLE = 1 << 3;
    }
}

/// The per-domain state machine entity representing a loading or loaded
/// module.
///
/// The level only increases and is advanced one step at a time by whichever
/// thread holds the module's advancement right. A permanent failure freezes
/// the level and is observed as a cloned [`LoadError`] by every current and
/// future caller.
pub struct DomainAssembly {
    image: ModuleImage,
    level: AtomicU8,
    error: OnceLock<LoadError>,
    flags: AtomicU32,
    collectible: bool,
    allocator: Arc<dyn LoaderAllocator>,
    dependencies: boxcar::Vec<Arc<DomainAssembly>>,
    index: OnceLock<usize>,
}

impl DomainAssembly {
    pub(crate) fn new(image: ModuleImage, allocator: Arc<dyn LoaderAllocator>) -> Arc<Self> {
        let collectible = image.is_collectible() && allocator.is_collectible();
        let flags = if collectible {
            NotifyFlags::COLLECTIBLE.bits()
        } else {
            NotifyFlags::empty().bits()
        };
        Arc::new(DomainAssembly {
            image,
            level: AtomicU8::new(Level::Create as u8),
            error: OnceLock::new(),
            flags: AtomicU32::new(flags),
            collectible,
            allocator,
            dependencies: boxcar::Vec::new(),
            index: OnceLock::new(),
        })
    }

    /// The module's stable identity.
    pub fn id(&self) -> &ModuleId {
        self.image.id()
    }

    /// The binder-resolved image this assembly was created from.
    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    /// The current load level. Monotonic non-decreasing.
    pub fn level(&self) -> Level {
        Level::from_raw(self.level.load(Ordering::Acquire))
    }

    /// Advance the level by exactly one step, to `level`.
    ///
    /// Returns `false` if the assembly is not exactly one step below `level`
    /// (a racing advance already happened) or if the error is frozen.
    pub(crate) fn advance_to(&self, level: Level) -> bool {
        if self.error.get().is_some() {
            return false;
        }
        let previous = level.step_down();
        if previous == level {
            // Create is the floor; it is attained at construction.
            return false;
        }
        self.level
            .compare_exchange(
                previous as u8,
                level as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// The frozen failure, if the load has permanently failed. Each call
    /// clones the same logical error.
    pub fn error(&self) -> Option<LoadError> {
        self.error.get().cloned()
    }

    /// Record the permanent failure. First writer wins; the level freezes at
    /// its current value.
    pub(crate) fn set_error(&self, error: LoadError) {
        if self.error.set(error).is_ok() {
            log::warn!(
                "load of {} frozen at {} with permanent error",
                self.id(),
                self.level()
            );
        }
    }

    /// Whether the module counts as loaded (level ≥ `DeliverLoadEvents`).
    pub fn is_loaded(&self) -> bool {
        self.level().is_loaded()
    }

    /// Whether the module is fully active.
    pub fn is_active(&self) -> bool {
        self.level() == Level::Active
    }

    /// Whether profiler enumerators may observe this assembly. Set strictly
    /// before the load notification is issued.
    pub fn is_available_to_profilers(&self) -> bool {
        self.flags().contains(NotifyFlags::AVAILABLE_TO_PROFILERS)
    }

    /// Whether the module's memory may be reclaimed while the process runs.
    pub fn is_collectible(&self) -> bool {
        self.collectible
    }

    /// The current notification and lifecycle flags.
    pub fn flags(&self) -> NotifyFlags {
        NotifyFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn set_flags(&self, flags: NotifyFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Set `flags` and report whether this call was the one that set them.
    /// Used for exactly-once notification delivery.
    pub(crate) fn try_mark(&self, flags: NotifyFlags) -> bool {
        let previous = self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
        !NotifyFlags::from_bits_truncate(previous).contains(flags)
    }

    /// Acquire a holder keeping this assembly alive across collector
    /// safepoints. A no-op wrapper for non-collectible assemblies.
    pub fn holder(self: &Arc<Self>) -> AssemblyHolder {
        AssemblyHolder::acquire(self)
    }

    pub(crate) fn allocator(&self) -> &Arc<dyn LoaderAllocator> {
        &self.allocator
    }

    /// Record a resolved dependency. Deduplicates by module identity.
    pub(crate) fn add_dependency(&self, dependency: Arc<DomainAssembly>) {
        for (_, existing) in self.dependencies.iter() {
            if existing.id() == dependency.id() {
                return;
            }
        }
        self.dependencies.push(dependency);
    }

    pub(crate) fn dependencies(&self) -> &boxcar::Vec<Arc<DomainAssembly>> {
        &self.dependencies
    }

    pub(crate) fn set_index(&self, index: usize) {
        let _ = self.index.set(index);
    }

    /// The assembly's stable index in its domain's list, once appended.
    pub fn index(&self) -> Option<usize> {
        self.index.get().copied()
    }
}

impl std::fmt::Debug for DomainAssembly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainAssembly")
            .field("id", &self.id().to_string())
            .field("level", &self.level())
            .field("flags", &self.flags())
            .field("error", &self.error.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::FixedAllocator;

    fn assembly(collectible: bool) -> Arc<DomainAssembly> {
        let image = if collectible {
            ModuleImage::from_data("a.dll", b"a").collectible()
        } else {
            ModuleImage::from_data("a.dll", b"a")
        };
        DomainAssembly::new(image, Arc::new(FixedAllocator::new(collectible)))
    }

    #[test]
    fn test_level_advances_one_step_at_a_time() {
        let asm = assembly(false);
        assert_eq!(asm.level(), Level::Create);

        assert!(asm.advance_to(Level::Begin));
        assert_eq!(asm.level(), Level::Begin);

        // Skipping a step is rejected.
        assert!(!asm.advance_to(Level::VerifyDependencyIdentities));
        // Repeating a step is rejected (idempotent advance).
        assert!(!asm.advance_to(Level::Begin));
        assert_eq!(asm.level(), Level::Begin);
    }

    #[test]
    fn test_error_freezes_level() {
        let asm = assembly(false);
        assert!(asm.advance_to(Level::Begin));

        asm.set_error(LoadError::new("a.dll", Level::ResolveNativeRepresentation, "broken"));
        assert!(!asm.advance_to(Level::ResolveNativeRepresentation));
        assert_eq!(asm.level(), Level::Begin);

        // First error wins; later errors do not replace it.
        asm.set_error(LoadError::new("a.dll", Level::Begin, "other"));
        assert_eq!(asm.error().unwrap().message, "broken");
    }

    #[test]
    fn test_try_mark_is_exactly_once() {
        let asm = assembly(false);
        assert!(asm.try_mark(NotifyFlags::LOAD_NOTIFIED));
        assert!(!asm.try_mark(NotifyFlags::LOAD_NOTIFIED));
        assert!(asm.flags().contains(NotifyFlags::LOAD_NOTIFIED));
    }

    #[test]
    fn test_collectible_flag_set_at_creation() {
        assert!(assembly(true).is_collectible());
        assert!(assembly(true).flags().contains(NotifyFlags::COLLECTIBLE));
        assert!(!assembly(false).is_collectible());
    }

    #[test]
    fn test_dependencies_deduplicate() {
        let asm = assembly(false);
        let dep = assembly(false);
        asm.add_dependency(dep.clone());
        asm.add_dependency(dep);
        assert_eq!(asm.dependencies().count(), 1);
    }
}
