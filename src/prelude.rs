//! Convenient re-exports of the most commonly used types and traits.
//!
//! # Example
//!
//! ```rust,no_run
//! use cildomain::prelude::*;
//! # fn collaborators() -> (std::sync::Arc<dyn Binder>, std::sync::Arc<dyn ExecutionEngine>, std::sync::Arc<dyn Notifier>, std::sync::Arc<dyn LoaderAllocator>) { unimplemented!() }
//!
//! let (binder, engine, notifier, allocator) = collaborators();
//! let domain = Domain::new(DomainId::new(1), binder, engine, notifier, allocator);
//! let (core, result) = domain.load_to(ModuleImage::from_data("core.dll", b"..."), Level::Active)?;
//! assert!(result.is_reached());
//! # Ok::<(), cildomain::Error>(())
//! ```

pub use crate::assembly::{AssemblyHolder, DomainAssembly, NotifyFlags};
pub use crate::domain::{Domain, DomainAssemblyList, DomainId, IterationFlags};
pub use crate::loader::{
    AdvanceResult, Binder, ExecutionEngine, FileLoadLock, FixupKind, Level, ListLock, LoadContext,
    LoadLimiter, LoaderAllocator, Notifier,
};
pub use crate::module::{ModuleHash, ModuleId, ModuleImage, ModuleRef};
pub use crate::{Error, LoadError, Result};
