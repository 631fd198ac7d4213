//! Load levels, the deadlock-avoiding load limiter, and advancement results.
//!
//! A module's initialization progress is an ordinal walk through [`Level`],
//! from `Create` to `Active`. Levels only ever increase. The
//! [`LoadLimiter`] is the explicit "maximum reachable level" value threaded
//! through every recursive load call; it is what guarantees termination when
//! modules depend on each other in cycles. [`AdvanceResult`] makes partial
//! progress an explicit, matched-on outcome rather than something the caller
//! must remember to re-check.

use crate::error::LoadError;

/// An ordinal stage of a module's initialization progress.
///
/// The sequence is strictly ascending; a [`crate::assembly::DomainAssembly`]
/// advances through it one step at a time and never moves backwards. The
/// side effects attached to each level are performed by the domain's load
/// driver while holding the module's
/// [`crate::loader::FileLoadLock`] advancement right.
///
/// Derived predicates used throughout the crate:
/// - *loaded* ⇔ level ≥ [`Level::DeliverLoadEvents`]
/// - *active* ⇔ level == [`Level::Active`]
#[repr(u8)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::FromRepr,
    strum::EnumIter,
)]
pub enum Level {
    /// The per-domain state record exists; nothing else has happened.
    Create = 0,
    /// The load has been registered with the domain's load-lock table.
    Begin,
    /// A precompiled native representation has been probed for.
    ResolveNativeRepresentation,
    /// The declared dependency references have been checked for internal
    /// consistency (no duplicates, no self-references by name).
    VerifyDependencyIdentities,
    /// Runtime structures for the module have been allocated.
    Allocate,
    /// Dependency references have been resolved through the binder and their
    /// loads driven to one level below this module's.
    AddDependencies,
    /// Pre-link preparation is complete.
    PreLink,
    /// The module is linked against its dependencies.
    Link,
    /// Post-link verification is complete.
    PostLink,
    /// Eager fixups have been applied by the execution engine.
    EagerFixups,
    /// Debugger/profiler load notifications have been delivered.
    DeliverLoadEvents,
    /// Virtual-table fixups have been applied by the execution engine.
    VTableFixups,
    /// The module is fully loaded.
    Loaded,
    /// Static initializers have run; the module is in active use.
    Active,
}

impl Level {
    /// The next level in the sequence, or `None` past [`Level::Active`].
    pub fn step_up(self) -> Option<Level> {
        Level::from_repr(self as u8 + 1)
    }

    /// The previous level in the sequence, saturating at [`Level::Create`].
    pub fn step_down(self) -> Level {
        Level::from_repr((self as u8).saturating_sub(1)).unwrap_or(Level::Create)
    }

    pub(crate) fn from_raw(raw: u8) -> Level {
        Level::from_repr(raw).unwrap_or(Level::Active)
    }

    /// Whether a module at this level counts as loaded.
    pub fn is_loaded(self) -> bool {
        self >= Level::DeliverLoadEvents
    }
}

/// The explicit recursion-depth cap that prevents circular-dependency
/// deadlock.
///
/// When module A, while being advanced to level `L`, triggers a nested load
/// of module B, the nested call carries a limiter capped at `L − 1`. If B's
/// nested load in turn requests A, that request is satisfied immediately
/// from A's already-attained level (≤ `L − 1`) instead of blocking — which is
/// what breaks the cycle.
///
/// The limiter is a plain `Copy` value threaded as a parameter through every
/// recursive load call, so the deadlock-avoidance cap is visible in every
/// function signature and testable without spinning up threads. An
/// [`unbounded`](LoadLimiter::unbounded) limiter is the no-op case used by
/// top-level loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimiter {
    cap: Level,
}

impl LoadLimiter {
    /// A limiter that does not constrain the load. Top-level `ensure_level`
    /// calls start with this.
    pub fn unbounded() -> Self {
        LoadLimiter { cap: Level::Active }
    }

    /// A limiter capped at the given level.
    pub fn capped(cap: Level) -> Self {
        LoadLimiter { cap }
    }

    /// The current cap: no load carried out under this limiter may advance a
    /// module past this level.
    pub fn cap(&self) -> Level {
        self.cap
    }

    /// Whether this limiter actually constrains anything.
    ///
    /// Bounded limiters identify nested loads; the driver uses non-blocking
    /// lock acquisition for them so that a dependency cycle spread across
    /// threads degrades to partial progress instead of a blocking deadlock.
    pub fn is_bounded(&self) -> bool {
        self.cap < Level::Active
    }

    /// Derive the limiter for a nested load.
    ///
    /// The child's effective cap is `min(requested, parent cap − 1)`,
    /// saturating at [`Level::Create`].
    #[must_use]
    pub fn nested(&self, requested: Level) -> LoadLimiter {
        LoadLimiter {
            cap: requested.min(self.cap.step_down()),
        }
    }
}

/// Outcome of a single `ensure_level` pass.
///
/// Partial progress is a legal outcome, not a failure: a load capped by a
/// [`LoadLimiter`] (or pre-empted by a busy lock on a nested path) returns
/// [`AdvanceResult::Capped`] below the requested target, and a higher-level
/// retry loop is expected to call `ensure_level` again later. Callers must
/// match on the result before relying on target-level guarantees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceResult {
    /// The module satisfies the requested target level.
    Reached(Level),
    /// The limiter (or contention on a nested path) stopped the load early;
    /// the payload is the level attained under this caller's cap.
    Capped(Level),
    /// The module is permanently broken; the payload is a clone of the frozen
    /// failure shared by every observer.
    Failed(LoadError),
}

impl AdvanceResult {
    /// The attained level, unless the load failed.
    pub fn level(&self) -> Option<Level> {
        match self {
            AdvanceResult::Reached(level) | AdvanceResult::Capped(level) => Some(*level),
            AdvanceResult::Failed(_) => None,
        }
    }

    /// Whether the requested target was reached.
    pub fn is_reached(&self) -> bool {
        matches!(self, AdvanceResult::Reached(_))
    }

    /// Convert into a `Result`, treating both `Reached` and `Capped` as
    /// success and carrying the attained level.
    pub fn into_result(self) -> crate::Result<Level> {
        match self {
            AdvanceResult::Reached(level) | AdvanceResult::Capped(level) => Ok(level),
            AdvanceResult::Failed(err) => Err(err.into()),
        }
    }
}
