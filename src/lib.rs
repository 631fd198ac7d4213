// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # cildomain
//!
//! The incremental, multi-level module-loading core of a managed-code
//! execution runtime: the machinery that brings a compiled code module into
//! an isolation [`domain::Domain`], advances it through an ordered sequence
//! of initialization stages (load [`loader::Level`]s), and does so correctly
//! when multiple threads concurrently request loads of modules that depend on
//! each other — including circular dependencies — without deadlocking.
//!
//! ## What this crate is
//!
//! - **Domains** — explicit isolation boundaries, each owning its own
//!   assembly list and load-lock table. No process-wide registries.
//! - **Incremental loading** — a module advances one [`loader::Level`] at a
//!   time, from `Create` to `Active`; the level is strictly monotonic and
//!   partial progress is a legal, explicit outcome
//!   ([`loader::AdvanceResult::Capped`]).
//! - **Deadlock avoidance** — the [`loader::LoadLimiter`] caps every nested
//!   load at one level below its parent, so dependency cycles terminate by
//!   consuming the already-attained level of the other module instead of
//!   blocking on it.
//! - **Concurrent unload safety** — collectible assemblies are pinned across
//!   collector safepoints by [`assembly::AssemblyHolder`], an RAII reference
//!   on the owning allocator.
//!
//! A module here is an opaque identity plus a small state record. Binary
//! image parsing, IL verification, and code generation belong to the external
//! collaborators behind the [`loader::Binder`], [`loader::ExecutionEngine`],
//! [`loader::Notifier`], and [`loader::LoaderAllocator`] traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cildomain::prelude::*;
//! # fn collaborators() -> (std::sync::Arc<dyn Binder>, std::sync::Arc<dyn ExecutionEngine>, std::sync::Arc<dyn Notifier>, std::sync::Arc<dyn LoaderAllocator>) { unimplemented!() }
//!
//! let (binder, engine, notifier, allocator) = collaborators();
//! let domain = Domain::new(DomainId::new(1), binder, engine, notifier, allocator);
//!
//! // One uncapped pass; dependency cycles may leave dependencies below
//! // Active, in which case the caller retries.
//! let (app, result) = domain.load_to(ModuleImage::from_data("app.dll", b"..."), Level::Active)?;
//! match result {
//!     AdvanceResult::Reached(_) => {}
//!     AdvanceResult::Capped(level) => println!("stopped early at {level}, retry later"),
//!     AdvanceResult::Failed(err) => eprintln!("permanently failed: {err}"),
//! }
//! # Ok::<(), cildomain::Error>(())
//! ```
//!
//! ## Concurrency model
//!
//! OS-level preemptive threads; all synchronization is mutex/condition based.
//! The only intentional blocking call is [`loader::FileLoadLock::acquire`],
//! and only top-level (uncapped) loads use it — capped nested loads fall back
//! to partial progress when a lock is busy. A permanent failure is recorded
//! once via [`LoadError`] and every later observer receives a clone of the
//! same logical failure; there is no cancellation and there are no timeouts.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result):
//!
//! ```rust,no_run
//! use cildomain::{Error, prelude::*};
//! # fn domain() -> Domain { unimplemented!() }
//!
//! match domain().load(ModuleImage::from_data("app.dll", b"...")) {
//!     Ok(assembly) => println!("{} at {}", assembly.id(), assembly.level()),
//!     Err(Error::CollectibleRoot) => eprintln!("first assembly must be non-collectible"),
//!     Err(e) => eprintln!("load error: {e}"),
//! }
//! ```

pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
pub mod prelude;

/// Per-domain assembly state: the [`assembly::DomainAssembly`] state machine,
/// its notification flags, and the RAII [`assembly::AssemblyHolder`] that
/// keeps collectible assemblies alive across collector safepoints.
pub mod assembly;

/// Isolation domains: the [`domain::Domain`] value owning the assembly list,
/// the load-lock table, and the collaborator handles, plus the append-only
/// [`domain::DomainAssemblyList`].
pub mod domain;

/// The incremental load driver and its primitives: load [`loader::Level`]s,
/// the [`loader::LoadLimiter`] deadlock-avoidance cap, the re-entrant
/// [`loader::ListLock`], the per-module [`loader::FileLoadLock`], and the
/// collaborator traits.
pub mod loader;

/// Module identity: [`module::ModuleId`] (path + content hash),
/// [`module::ModuleRef`] dependency references, and the binder's
/// [`module::ModuleImage`] resolution product.
pub mod module;

/// `cildomain` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is
/// always [`Error`]. Used consistently throughout the crate for all fallible
/// operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `cildomain` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// The frozen, clonable per-module load failure shared by all observers of a
/// permanently broken module.
pub use error::LoadError;
