//! Hook dispatcher
//!
//! Callbacks are stored in an append-only arena per hook. A [`HookHandle`]
//! is the slot index, so removal is O(1) and never shifts the slots that
//! fire after it. Callbacks are invoked outside the registry lock, so a
//! callback may itself register or remove hooks.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error};

/// Events consumers can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FederationHook {
    /// Any change to the coordinator set, merged book or exchange stats
    Updated,
}

impl FederationHook {
    pub fn as_str(&self) -> &'static str {
        match self {
            FederationHook::Updated => "federation_updated",
        }
    }
}

type HookFn = Arc<dyn Fn() + Send + Sync>;

/// Registration receipt; pass it to [`HookRegistry::remove`] to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle {
    hook: FederationHook,
    slot: usize,
}

#[derive(Default)]
pub struct HookRegistry {
    slots: RwLock<HashMap<FederationHook, Vec<Option<HookFn>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, hook: FederationHook, callback: F) -> HookHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let arena = slots.entry(hook).or_default();
        arena.push(Some(Arc::new(callback)));
        HookHandle {
            hook,
            slot: arena.len() - 1,
        }
    }

    /// Returns false if the handle was already removed.
    pub fn remove(&self, handle: HookHandle) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots
            .get_mut(&handle.hook)
            .and_then(|arena| arena.get_mut(handle.slot))
            .and_then(Option::take)
            .is_some()
    }

    pub fn len(&self, hook: FederationHook) -> usize {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(&hook)
            .map(|arena| arena.iter().flatten().count())
            .unwrap_or(0)
    }

    /// Invoke every live callback in registration order. A panicking callback
    /// is logged and skipped. Returns how many callbacks completed.
    pub fn trigger(&self, hook: FederationHook) -> usize {
        let callbacks: Vec<HookFn> = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            match slots.get(&hook) {
                Some(arena) => arena.iter().flatten().cloned().collect(),
                None => return 0,
            }
        };

        let mut completed = 0;
        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback())) {
                Ok(()) => completed += 1,
                Err(_) => error!(hook = hook.as_str(), index, "hook callback panicked"),
            }
        }
        debug!(hook = hook.as_str(), completed, "hook triggered");
        completed
    }
}
