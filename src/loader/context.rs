//! Collaborator interfaces and the context handed to engine hooks.
//!
//! The loader consumes four external collaborators, specified only through
//! these traits: the [`Binder`] that resolves a name to a module image, the
//! [`ExecutionEngine`] that applies fixups and runs static initializers, the
//! [`Notifier`] sink for debugger/profiler events, and the
//! [`LoaderAllocator`] that owns collectible modules.
//!
//! Engine hooks may themselves recursively request loads; the
//! [`LoadContext`] they receive carries the current [`LoadLimiter`] so those
//! nested requests stay capped and cannot deadlock on a dependency cycle.

use std::sync::Arc;

use crate::assembly::{AssemblyHolder, DomainAssembly, NotifyFlags};
use crate::domain::Domain;
use crate::loader::{LoadLimiter, Level};
use crate::module::{ModuleId, ModuleImage, ModuleRef};
use crate::Result;

/// Which fixup pass the execution engine is asked to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// Eager fixups, applied at the `EagerFixups` level.
    Eager,
    /// Virtual-table fixups, applied at the `VTableFixups` level.
    VTable,
}

/// The dependency/reference binder: resolves a declared reference to a module
/// image.
///
/// Invoked during the `AddDependencies` level. A resolution failure is
/// surfaced as [`crate::Error::NotFound`] and frozen onto the requesting
/// module.
pub trait Binder: Send + Sync {
    /// Resolve a reference to the image it denotes.
    fn resolve(&self, reference: &ModuleRef) -> Result<ModuleImage>;
}

/// The code-generation / static-initializer execution engine.
///
/// Both hooks are opaque to the loader and may recursively request loads
/// through the provided [`LoadContext`]; the context's limiter keeps those
/// requests capped below the level currently being advanced.
pub trait ExecutionEngine: Send + Sync {
    /// Apply the given fixup pass for the module being advanced.
    fn apply_fixups(&self, ctx: &LoadContext<'_>, kind: FixupKind) -> Result<()>;

    /// Run the module's static initializers. Invoked at the `Active` level.
    fn run_static_initializers(&self, ctx: &LoadContext<'_>) -> Result<()>;
}

/// The debugger/profiler notification sink.
///
/// Each callback fires exactly once per module lifetime: `notify_load` at the
/// `DeliverLoadEvents` level (with the available-to-profilers flag already
/// set), `notify_unload` at domain teardown.
pub trait Notifier: Send + Sync {
    /// A module has become observable to debuggers and profilers.
    fn notify_load(&self, id: &ModuleId, flags: NotifyFlags);

    /// A module is going away as part of domain teardown.
    fn notify_unload(&self, id: &ModuleId);
}

/// The allocator owning collectible modules.
///
/// [`crate::assembly::AssemblyHolder`] pins collectible assemblies through
/// this reference count; releasing the last reference may trigger deferred
/// reclamation.
pub trait LoaderAllocator: Send + Sync {
    /// Take a reference preventing reclamation.
    fn add_reference(&self);

    /// Release a reference; at zero, reclamation may run.
    fn release(&self);

    /// Whether this allocator's modules are collectible at all.
    fn is_collectible(&self) -> bool;
}

/// Context handed to [`ExecutionEngine`] hooks while a level's side effect
/// runs.
///
/// It exposes the module being advanced and a capped entry point for
/// recursive dependency loads.
pub struct LoadContext<'a> {
    domain: &'a Domain,
    assembly: &'a Arc<DomainAssembly>,
    limiter: LoadLimiter,
}

impl<'a> LoadContext<'a> {
    pub(crate) fn new(
        domain: &'a Domain,
        assembly: &'a Arc<DomainAssembly>,
        limiter: LoadLimiter,
    ) -> Self {
        LoadContext {
            domain,
            assembly,
            limiter,
        }
    }

    /// The domain the load is running in.
    pub fn domain(&self) -> &Domain {
        self.domain
    }

    /// The module whose level is being advanced.
    pub fn assembly(&self) -> &Arc<DomainAssembly> {
        self.assembly
    }

    /// The cap under which any nested load must run.
    pub fn limiter(&self) -> LoadLimiter {
        self.limiter
    }

    /// Recursively request a dependency load, capped by this context's
    /// limiter.
    ///
    /// The dependency is resolved through the domain's binder, recorded on
    /// the requesting module, and driven as far as the cap allows — which may
    /// be below its fully active level. Code running inside a fixup hook must
    /// tolerate an incompletely initialized dependency. The returned holder
    /// keeps a collectible dependency alive for the caller's frame.
    pub fn load_dependency(&self, reference: &ModuleRef) -> Result<AssemblyHolder> {
        let image = self.domain.binder().resolve(reference)?;
        if let Some(expected) = reference.expected_hash() {
            if expected != image.id().hash() {
                return Err(crate::Error::IdentityMismatch(reference.name().to_string()));
            }
        }
        let dependency = self.domain.intern(image)?;
        if dependency.id() != self.assembly.id() {
            self.assembly.add_dependency(dependency.clone());
        }
        let target = self.limiter.cap();
        let _ = self
            .domain
            .ensure_level(&dependency, target, self.limiter);
        Ok(dependency.holder())
    }

    /// The level the surrounding step is advancing toward; one above the cap
    /// available for nested loads.
    pub fn advancing_to(&self) -> Option<Level> {
        self.limiter.cap().step_up()
    }
}
