//! The incremental load driver and its locking primitives.
//!
//! This module contains the machinery that advances a
//! [`crate::assembly::DomainAssembly`] through its load levels: the
//! [`ListLock`] guarding the domain's in-flight lock table, the per-module
//! [`FileLoadLock`], the [`LoadLimiter`] cap that makes circular dependencies
//! terminate, and the per-level side effects wired to the external
//! collaborators.
//!
//! # Modules
//! - `level`: the [`Level`] ordinal, [`LoadLimiter`], and [`AdvanceResult`].
//! - `listlock`: the re-entrant in-flight entry lock.
//! - `filelock`: the per-(domain, module) advancement-right lock.
//! - `context`: collaborator traits and the [`LoadContext`] engine hooks see.
//!
//! # Driving a load
//!
//! [`crate::domain::Domain::ensure_level`] repeatedly acquires the module's
//! [`FileLoadLock`] at the next level, performs that level's side effect, and
//! completes the step. A [`LoadLimiter`] cap, or contention on a nested
//! (capped) path, ends the pass early with [`AdvanceResult::Capped`]; the
//! caller retries later. Per-module progress is strictly monotonic; no
//! ordering is guaranteed across modules beyond the limiter cap.

mod context;
mod filelock;
mod level;
mod listlock;

pub use context::{Binder, ExecutionEngine, FixupKind, LoadContext, LoaderAllocator, Notifier};
pub use filelock::{FileLoadLock, FileLockGuard, TryAcquire};
pub use level::{AdvanceResult, Level, LoadLimiter};
pub use listlock::{ListLock, ListLockGuard};

use std::collections::HashSet;
use std::sync::Arc;

use crate::assembly::{DomainAssembly, NotifyFlags};
use crate::domain::Domain;
use crate::error::LoadError;
use crate::{Error, Result};

/// One full `ensure_level` pass over a single module.
///
/// Loops: check the frozen error, acquire the [`FileLoadLock`] for the next
/// level, perform the side effect, complete the step. Blocking acquisition is
/// used only on the unbounded (top-level) path; bounded passes treat a busy
/// lock as a legal capped outcome.
pub(crate) fn drive(
    domain: &Domain,
    assembly: &Arc<DomainAssembly>,
    target: Level,
    limiter: LoadLimiter,
) -> AdvanceResult {
    let effective = target.min(limiter.cap());
    loop {
        if let Some(error) = assembly.error() {
            return AdvanceResult::Failed(error);
        }

        let current = assembly.level();
        if current >= effective {
            return if effective == target {
                AdvanceResult::Reached(target)
            } else {
                AdvanceResult::Capped(effective)
            };
        }

        let Some(next) = current.step_up() else {
            return AdvanceResult::Reached(current);
        };

        let Some(lock) = domain.lock_for(assembly) else {
            // The load finished (fully active or frozen) between the level
            // read and the table lookup; loop to surface the terminal state.
            continue;
        };
        let guard = if limiter.is_bounded() {
            match lock.try_acquire(next) {
                TryAcquire::Acquired(guard) => Some(guard),
                TryAcquire::Satisfied => None,
                TryAcquire::Busy => {
                    // Another thread owns the advancement right; partial
                    // progress is the legal outcome for a capped pass.
                    return AdvanceResult::Capped(assembly.level().min(effective));
                }
            }
        } else {
            lock.acquire(next)
        };

        if let Some(guard) = guard {
            match perform_step(domain, assembly, next, limiter) {
                Ok(()) => {
                    guard.complete_level(next);
                    drop(guard);
                    if assembly.level() == Level::Active {
                        domain.retire_lock(assembly.id());
                    }
                }
                Err(error) => {
                    let frozen =
                        LoadError::new(assembly.id().path(), next, error.to_string());
                    guard.set_error(frozen.clone());
                    drop(guard);
                    domain.retire_lock(assembly.id());
                    return AdvanceResult::Failed(frozen);
                }
            }
        } else if assembly.level() < next && assembly.error().is_none() {
            // Acquisition declined with the target still unmet: the calling
            // thread already holds this module's advancement right (a hook
            // re-entered the loader). Proceed with the attained level.
            return AdvanceResult::Capped(assembly.level().min(effective));
        }
        // Re-check level and error; either this thread advanced one step or
        // another thread did the work while we waited.
    }
}

/// The side effect attached to advancing `assembly` to `level`.
fn perform_step(
    domain: &Domain,
    assembly: &Arc<DomainAssembly>,
    level: Level,
    limiter: LoadLimiter,
) -> Result<()> {
    let nested = limiter.nested(level.step_down());
    match level {
        Level::Create | Level::Begin | Level::Allocate => Ok(()),
        Level::ResolveNativeRepresentation => {
            // No native image store in this core; the probe always misses.
            log::trace!("{}: no native representation", assembly.id());
            Ok(())
        }
        Level::VerifyDependencyIdentities => verify_dependency_identities(assembly),
        Level::AddDependencies => add_dependencies(domain, assembly, nested),
        Level::PreLink | Level::Link | Level::PostLink | Level::Loaded => {
            redrive_dependencies(domain, assembly, nested);
            Ok(())
        }
        Level::EagerFixups => {
            redrive_dependencies(domain, assembly, nested);
            let ctx = LoadContext::new(domain, assembly, nested);
            domain.engine().apply_fixups(&ctx, FixupKind::Eager)
        }
        Level::DeliverLoadEvents => {
            redrive_dependencies(domain, assembly, nested);
            // Profiler enumerators must be able to observe the assembly
            // before the notification fires.
            assembly.set_flags(NotifyFlags::AVAILABLE_TO_PROFILERS);
            if assembly.try_mark(NotifyFlags::LOAD_NOTIFIED) {
                domain.notifier().notify_load(assembly.id(), assembly.flags());
            }
            Ok(())
        }
        Level::VTableFixups => {
            redrive_dependencies(domain, assembly, nested);
            let ctx = LoadContext::new(domain, assembly, nested);
            domain.engine().apply_fixups(&ctx, FixupKind::VTable)
        }
        Level::Active => {
            redrive_dependencies(domain, assembly, nested);
            let ctx = LoadContext::new(domain, assembly, nested);
            domain.engine().run_static_initializers(&ctx)
        }
    }
}

/// Internal consistency checks on the declared references, before any binder
/// round-trips: duplicate names and self-references are rejected here.
fn verify_dependency_identities(assembly: &Arc<DomainAssembly>) -> Result<()> {
    let mut seen = HashSet::new();
    for reference in assembly.image().dependencies() {
        if reference.name() == assembly.id().path() {
            return Err(Error::SelfReference(reference.name().to_string()));
        }
        if !seen.insert(reference.name()) {
            return Err(Error::DuplicateDependency(reference.name().to_string()));
        }
    }
    Ok(())
}

/// Resolve each declared reference through the binder, verify pinned hashes,
/// and drive the dependency as far as the nested cap allows.
///
/// A dependency whose load has permanently failed fails this module too; a
/// capped dependency is fine and will be re-driven by later levels.
fn add_dependencies(
    domain: &Domain,
    assembly: &Arc<DomainAssembly>,
    nested: LoadLimiter,
) -> Result<()> {
    for reference in assembly.image().dependencies() {
        let image = domain.binder().resolve(reference)?;
        if let Some(expected) = reference.expected_hash() {
            if expected != image.id().hash() {
                return Err(Error::IdentityMismatch(reference.name().to_string()));
            }
        }

        let dependency = domain.intern(image)?;
        if dependency.id() == assembly.id() {
            // A differently-named reference may still resolve to this very
            // module (name self-references were rejected at verification);
            // nothing to load.
            continue;
        }
        assembly.add_dependency(dependency.clone());

        if let AdvanceResult::Failed(error) = drive(domain, &dependency, nested.cap(), nested) {
            return Err(Error::Load(error));
        }
    }
    Ok(())
}

/// Push already-resolved dependencies toward one level below this module's.
///
/// Capped and contended outcomes are ignored: cross-module ordering is only
/// guaranteed up to the limiter cap, and anything missed here is picked up by
/// the external retry loop. A frozen dependency error is likewise left for
/// the levels that consume the dependency to surface.
fn redrive_dependencies(domain: &Domain, assembly: &Arc<DomainAssembly>, nested: LoadLimiter) {
    for (_, dependency) in assembly.dependencies().iter() {
        let _ = drive(domain, dependency, nested.cap(), nested);
    }
}
