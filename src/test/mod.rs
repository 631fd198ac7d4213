//! Shared functionality which is used in unit-tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::assembly::NotifyFlags;
use crate::domain::{Domain, DomainId};
use crate::loader::{Binder, ExecutionEngine, FixupKind, LoadContext, LoaderAllocator, Notifier};
use crate::module::{ModuleId, ModuleImage, ModuleRef};
use crate::{Error, Result};

/// Allocator stub with a fixed collectibility answer and no real counting.
pub(crate) struct FixedAllocator {
    collectible: bool,
}

impl FixedAllocator {
    pub(crate) fn new(collectible: bool) -> Self {
        FixedAllocator { collectible }
    }
}

impl LoaderAllocator for FixedAllocator {
    fn add_reference(&self) {}
    fn release(&self) {}
    fn is_collectible(&self) -> bool {
        self.collectible
    }
}

/// Allocator stub tracking its reference count.
pub(crate) struct CountingAllocator {
    collectible: bool,
    references: AtomicIsize,
}

impl CountingAllocator {
    pub(crate) fn new(collectible: bool) -> Self {
        CountingAllocator {
            collectible,
            references: AtomicIsize::new(0),
        }
    }

    pub(crate) fn references(&self) -> isize {
        self.references.load(Ordering::SeqCst)
    }
}

impl LoaderAllocator for CountingAllocator {
    fn add_reference(&self) {
        self.references.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.references.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_collectible(&self) -> bool {
        self.collectible
    }
}

/// Binder stub resolving from a registered name → image map.
pub(crate) struct StubBinder {
    images: Mutex<HashMap<String, ModuleImage>>,
}

impl StubBinder {
    pub(crate) fn new() -> Self {
        StubBinder {
            images: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, name: &str, image: ModuleImage) {
        self.images.lock().unwrap().insert(name.to_string(), image);
    }
}

impl Binder for StubBinder {
    fn resolve(&self, reference: &ModuleRef) -> Result<ModuleImage> {
        self.images
            .lock()
            .unwrap()
            .get(reference.name())
            .cloned()
            .ok_or_else(|| Error::NotFound(reference.name().to_string()))
    }
}

/// Execution engine stub whose hooks always succeed.
pub(crate) struct NullEngine;

impl ExecutionEngine for NullEngine {
    fn apply_fixups(&self, _ctx: &LoadContext<'_>, _kind: FixupKind) -> Result<()> {
        Ok(())
    }

    fn run_static_initializers(&self, _ctx: &LoadContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Notifier stub that swallows all events.
pub(crate) struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify_load(&self, _id: &ModuleId, _flags: NotifyFlags) {}
    fn notify_unload(&self, _id: &ModuleId) {}
}

/// A domain wired to stub collaborators, for unit tests.
pub(crate) fn test_domain(binder: StubBinder) -> Domain {
    Domain::new(
        DomainId::new(1),
        Arc::new(binder),
        Arc::new(NullEngine),
        Arc::new(NullNotifier),
        Arc::new(FixedAllocator::new(true)),
    )
}
