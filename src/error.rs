use thiserror::Error;

use crate::loader::Level;

/// The frozen, per-module load failure.
///
/// Once a module's load fails permanently, a single `LoadError` is recorded on
/// its [`crate::assembly::DomainAssembly`] and the load level freezes. Every
/// current and future observer of that module — any thread, any later call —
/// receives a clone of the same logical failure instead of re-attempting the
/// failed step. This gives deterministic, caller-count-independent behavior
/// for permanently broken modules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("load of `{module}` failed at {level}: {message}")]
pub struct LoadError {
    /// Path of the module whose load failed.
    pub module: String,
    /// The level whose side effect failed; the module's level never advances
    /// past the value it had when the error was recorded.
    pub level: Level,
    /// Human-readable description of the underlying failure.
    pub message: String,
}

impl LoadError {
    /// Create a new frozen load failure record.
    pub fn new(module: impl Into<String>, level: Level, message: impl Into<String>) -> Self {
        LoadError {
            module: module.into(),
            level,
            message: message.into(),
        }
    }
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Resolution Errors
/// - [`Error::NotFound`] - The binder could not resolve a module reference
/// - [`Error::IdentityMismatch`] - A resolved dependency's content hash differs from the declared one
/// - [`Error::DuplicateDependency`] - A module declares the same dependency reference twice
/// - [`Error::SelfReference`] - A module declares itself as a dependency by name
///
/// ## Load Errors
/// - [`Error::Load`] - A module's load failed permanently; carries the frozen [`LoadError`]
/// - [`Error::CollectibleRoot`] - The first assembly appended to a domain was collectible
///
/// ## Synchronization Errors
/// - [`Error::LockError`] - Thread synchronization failure
#[derive(Error, Debug)]
pub enum Error {
    /// The binder could not resolve a module reference to an image.
    ///
    /// Surfaced from [`crate::loader::Binder::resolve`] during the
    /// `AddDependencies` level; recorded on the requesting module via
    /// [`LoadError`] so that the failure is observed exactly once.
    #[error("module reference `{0}` could not be resolved")]
    NotFound(String),

    /// A module's load has failed permanently.
    ///
    /// The payload is the frozen failure record shared by all observers of the
    /// broken module.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A resolved dependency's content hash does not match the hash declared
    /// by the referencing module.
    #[error("dependency identity mismatch for `{0}`")]
    IdentityMismatch(String),

    /// A module declares the same dependency reference more than once.
    ///
    /// Detected at the `VerifyDependencyIdentities` level, before any binder
    /// round-trips are made for the module.
    #[error("duplicate dependency reference `{0}`")]
    DuplicateDependency(String),

    /// A module declares itself as a dependency by name.
    ///
    /// Detected at the `VerifyDependencyIdentities` level, alongside the
    /// duplicate check.
    #[error("module `{0}` declares itself as a dependency")]
    SelfReference(String),

    /// The first assembly loaded into a domain must not be collectible.
    ///
    /// The domain's assembly list relies on its first entry being
    /// non-collectible so that lock-free emptiness and count checks never race
    /// with reclamation.
    #[error("the first assembly loaded into a domain must not be collectible")]
    CollectibleRoot,

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically
    /// when trying to acquire a mutex or rwlock that is in an invalid state.
    #[error("Failed to lock target")]
    LockError,

    /// Generic error for miscellaneous failures.
    ///
    /// Used for errors that don't fit into other categories or for
    /// wrapping collaborator failures with additional context.
    #[error("{0}")]
    Error(String),
}
