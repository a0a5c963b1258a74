//! Lifecycle hooks for plugins and integrations.
//!
//! The core exposes lifecycle moments only; everything else plugins might
//! do lives outside the editor core.

use std::collections::HashMap;
use std::sync::RwLock;

/// Lifecycle moments surfaced to registered hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    BootstrapComplete,
    BeforeShutdown,
}

pub type LifecycleHook = Box<dyn Fn(LifecycleEvent) + Send + Sync>;

/// A named registry of lifecycle hooks. The kernel keeps one for plugins
/// and one for integrations.
pub struct HookRegistry {
    name: &'static str,
    hooks: RwLock<HashMap<LifecycleEvent, Vec<LifecycleHook>>>,
}

impl HookRegistry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            hooks: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_hook<F>(&self, event: LifecycleEvent, hook: F)
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .unwrap()
            .entry(event)
            .or_default()
            .push(Box::new(hook));
    }

    /// Invoke every hook for `event`; a panicking hook is recorded and
    /// skipped.
    pub fn run_hooks(&self, event: LifecycleEvent) {
        let hooks = self.hooks.read().unwrap();
        let Some(list) = hooks.get(&event) else {
            return;
        };
        for hook in list {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(event)));
            if let Err(panic) = result {
                tracing::error!(
                    registry = self.name,
                    ?event,
                    message = %crate::services::panic_message(&panic),
                    "lifecycle hook panicked"
                );
            }
        }
    }

    pub fn hook_count(&self, event: LifecycleEvent) -> usize {
        self.hooks
            .read()
            .unwrap()
            .get(&event)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_hooks_run_and_panics_are_contained() {
        let registry = HookRegistry::new("plugins");
        let hits = Arc::new(AtomicUsize::new(0));

        registry.add_hook(LifecycleEvent::BootstrapComplete, |_| panic!("bad hook"));
        let hits2 = Arc::clone(&hits);
        registry.add_hook(LifecycleEvent::BootstrapComplete, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        registry.run_hooks(LifecycleEvent::BootstrapComplete);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // No hooks for this event: nothing happens
        registry.run_hooks(LifecycleEvent::BeforeShutdown);
        assert_eq!(registry.hook_count(LifecycleEvent::BootstrapComplete), 2);
        assert_eq!(registry.hook_count(LifecycleEvent::BeforeShutdown), 0);
    }
}
