//! RAII reference holders for collectible assemblies.

use std::ops::Deref;
use std::sync::Arc;

use crate::assembly::DomainAssembly;

/// An owning handle that keeps an assembly alive while a native frame
/// references it.
///
/// The variant is selected once, from the collectibility decided at assembly
/// creation, rather than branching on a runtime flag at every use site:
/// `OwnedForever` is a zero-overhead wrapper for non-collectible assemblies,
/// `RefCounted` pins a collectible assembly by holding a reference on the
/// owning allocator for the lifetime of the holder. Dropping the last
/// `RefCounted` holder may trigger the allocator's deferred reclamation.
///
/// Required anywhere an assembly reference crosses a safepoint where the
/// collector could otherwise run and reclaim it.
pub enum AssemblyHolder {
    /// Non-collectible target; holding it costs nothing.
    OwnedForever(Arc<DomainAssembly>),
    /// Collectible target; the allocator's reference count is held.
    RefCounted(Arc<DomainAssembly>),
}

impl AssemblyHolder {
    pub(crate) fn acquire(assembly: &Arc<DomainAssembly>) -> Self {
        if assembly.is_collectible() {
            assembly.allocator().add_reference();
            AssemblyHolder::RefCounted(assembly.clone())
        } else {
            AssemblyHolder::OwnedForever(assembly.clone())
        }
    }

    /// The held assembly.
    pub fn assembly(&self) -> &Arc<DomainAssembly> {
        match self {
            AssemblyHolder::OwnedForever(assembly) | AssemblyHolder::RefCounted(assembly) => {
                assembly
            }
        }
    }
}

impl Deref for AssemblyHolder {
    type Target = DomainAssembly;

    fn deref(&self) -> &Self::Target {
        self.assembly()
    }
}

impl Clone for AssemblyHolder {
    fn clone(&self) -> Self {
        AssemblyHolder::acquire(self.assembly())
    }
}

impl Drop for AssemblyHolder {
    fn drop(&mut self) {
        if let AssemblyHolder::RefCounted(assembly) = self {
            assembly.allocator().release();
        }
    }
}

impl std::fmt::Debug for AssemblyHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            AssemblyHolder::OwnedForever(_) => "OwnedForever",
            AssemblyHolder::RefCounted(_) => "RefCounted",
        };
        write!(f, "AssemblyHolder::{}({})", kind, self.assembly().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleImage;
    use crate::test::CountingAllocator;

    #[test]
    fn test_noncollectible_holder_is_free() {
        let allocator = Arc::new(CountingAllocator::new(false));
        let asm = DomainAssembly::new(ModuleImage::from_data("core.dll", b"core"), allocator.clone());

        let holder = asm.holder();
        assert!(matches!(holder, AssemblyHolder::OwnedForever(_)));
        assert_eq!(allocator.references(), 0);
        drop(holder);
        assert_eq!(allocator.references(), 0);
    }

    #[test]
    fn test_refcount_symmetry_any_release_order() {
        let allocator = Arc::new(CountingAllocator::new(true));
        let asm = DomainAssembly::new(
            ModuleImage::from_data("plugin.dll", b"plugin").collectible(),
            allocator.clone(),
        );

        let a = asm.holder();
        let b = asm.holder();
        let c = b.clone();
        assert_eq!(allocator.references(), 3);

        drop(b);
        drop(a);
        assert_eq!(allocator.references(), 1);
        drop(c);
        assert_eq!(allocator.references(), 0);
    }

    #[test]
    fn test_holder_derefs_to_assembly() {
        let allocator = Arc::new(CountingAllocator::new(true));
        let asm = DomainAssembly::new(
            ModuleImage::from_data("plugin.dll", b"plugin").collectible(),
            allocator,
        );
        let holder = asm.holder();
        assert_eq!(holder.id(), asm.id());
    }
}
