//! The append-only, lock-free-readable per-domain assembly list.

use std::sync::{Arc, Mutex, PoisonError};

use bitflags::bitflags;

use crate::assembly::{AssemblyHolder, DomainAssembly, NotifyFlags};
use crate::{Error, Result};

bitflags! {
    /// Filters for iterating a domain's assemblies.
    ///
    /// Nothing is ever removed from the list mid-flight; collected and
    /// still-loading modules remain as inert entries and are filtered out
    /// here rather than during mutation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IterationFlags: u32 {
        /// Include fully loaded assemblies (level ≥ `DeliverLoadEvents`).
        const LOADED = 1;
        /// Include assemblies whose load is still in flight (or frozen by an
        /// error below the loaded level).
        const LOADING = 1 << 1;
        /// Include collectible assemblies that have already been unloaded.
        const COLLECTED = 1 << 2;
    }
}

impl IterationFlags {
    /// The default filter: loaded assemblies only.
    pub fn loaded_only() -> Self {
        IterationFlags::LOADED
    }
}

/// A lock-guarded, append-only list of a domain's assemblies with lock-free
/// reads.
///
/// Indices, once assigned, are stable forever; the list only grows until
/// domain teardown. The lock-free read fast path is justified by three
/// invariants: the list is append-only, indices are stable, and the first
/// entry ever appended is non-collectible — so an emptiness or count-based
/// check never races with destruction.
pub struct DomainAssemblyList {
    entries: boxcar::Vec<Arc<DomainAssembly>>,
    append: Mutex<()>,
}

impl DomainAssemblyList {
    pub(crate) fn new() -> Self {
        DomainAssemblyList {
            entries: boxcar::Vec::new(),
            append: Mutex::new(()),
        }
    }

    /// Append an assembly and assign its stable index. Amortized O(1), lock
    /// held.
    ///
    /// # Errors
    /// [`Error::CollectibleRoot`] if the very first appended assembly is
    /// collectible; the lock-free read path depends on it being permanent.
    pub(crate) fn append(&self, assembly: Arc<DomainAssembly>) -> Result<usize> {
        let _guard = self.append.lock().unwrap_or_else(PoisonError::into_inner);
        if self.entries.count() == 0 && assembly.is_collectible() {
            return Err(Error::CollectibleRoot);
        }
        let index = self.entries.push(assembly.clone());
        assembly.set_index(index);
        log::debug!("{} appended at index {}", assembly.id(), index);
        Ok(index)
    }

    /// The assembly at `index`, if assigned.
    pub fn get(&self, index: usize) -> Option<Arc<DomainAssembly>> {
        self.entries.get(index).cloned()
    }

    /// Lock-free read of the assembly at `index`. Identical to
    /// [`get`](Self::get); the separate name marks call sites that rely on
    /// the append-only invariants instead of holding the domain lock.
    pub fn get_unlocked(&self, index: usize) -> Option<Arc<DomainAssembly>> {
        self.entries.get(index).cloned()
    }

    /// Lock-free count of appended assemblies.
    pub fn count(&self) -> usize {
        self.entries.count()
    }

    /// Domain-teardown only: drop every entry.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate assemblies matching `flags`, yielding holders so collectible
    /// entries stay alive while the caller looks at them.
    pub fn iter_holders(
        &self,
        flags: IterationFlags,
    ) -> impl Iterator<Item = AssemblyHolder> + '_ {
        self.entries.iter().filter_map(move |(_, assembly)| {
            let collected = assembly.is_collectible()
                && assembly.flags().contains(NotifyFlags::UNLOAD_NOTIFIED);
            let wanted = if collected {
                flags.contains(IterationFlags::COLLECTED)
            } else if assembly.is_loaded() {
                flags.contains(IterationFlags::LOADED)
            } else {
                flags.contains(IterationFlags::LOADING)
            };
            wanted.then(|| assembly.holder())
        })
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<DomainAssembly>> + '_ {
        self.entries.iter().map(|(_, assembly)| assembly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Level;
    use crate::module::ModuleImage;
    use crate::test::FixedAllocator;

    fn assembly(path: &str, collectible: bool) -> Arc<DomainAssembly> {
        let mut image = ModuleImage::from_data(path, path.as_bytes());
        if collectible {
            image = image.collectible();
        }
        DomainAssembly::new(image, Arc::new(FixedAllocator::new(collectible)))
    }

    #[test]
    fn test_append_assigns_stable_indices() {
        let list = DomainAssemblyList::new();
        let core = assembly("core.dll", false);
        let app = assembly("app.dll", false);

        assert_eq!(list.append(core.clone()).unwrap(), 0);
        assert_eq!(list.append(app.clone()).unwrap(), 1);
        assert_eq!(core.index(), Some(0));
        assert_eq!(app.index(), Some(1));
        assert_eq!(list.count(), 2);
        assert_eq!(list.get(1).unwrap().id(), app.id());
        assert_eq!(list.get_unlocked(0).unwrap().id(), core.id());
        assert!(list.get(2).is_none());
    }

    #[test]
    fn test_first_entry_must_be_noncollectible() {
        let list = DomainAssemblyList::new();
        assert!(matches!(
            list.append(assembly("plugin.dll", true)),
            Err(Error::CollectibleRoot)
        ));

        // After a non-collectible root, collectible entries are fine.
        list.append(assembly("core.dll", false)).unwrap();
        assert!(list.append(assembly("plugin.dll", true)).is_ok());
    }

    #[test]
    fn test_iteration_flags_filter() {
        let list = DomainAssemblyList::new();
        let loaded = assembly("core.dll", false);
        for level in [
            Level::Begin,
            Level::ResolveNativeRepresentation,
            Level::VerifyDependencyIdentities,
            Level::Allocate,
            Level::AddDependencies,
            Level::PreLink,
            Level::Link,
            Level::PostLink,
            Level::EagerFixups,
            Level::DeliverLoadEvents,
        ] {
            assert!(loaded.advance_to(level));
        }
        let loading = assembly("app.dll", false);

        list.append(loaded).unwrap();
        list.append(loading).unwrap();

        let loaded_only: Vec<_> = list.iter_holders(IterationFlags::loaded_only()).collect();
        assert_eq!(loaded_only.len(), 1);
        assert_eq!(loaded_only[0].id().path(), "core.dll");

        let everything: Vec<_> = list
            .iter_holders(IterationFlags::LOADED | IterationFlags::LOADING)
            .collect();
        assert_eq!(everything.len(), 2);
    }
}
