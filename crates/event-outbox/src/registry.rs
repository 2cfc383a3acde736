//! Flush hooks for periodic and shutdown flushing.
//!
//! Queues do not reach for any ambient state. Each queue is handed a
//! [`FlushRegistrar`] at construction and registers one named hook with it;
//! whoever owns the registrar decides when to fire the hooks.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Boxed flush callback.
pub type FlushHook = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Capability to register flush hooks.
pub trait FlushRegistrar: Send + Sync {
    fn register(&self, name: String, hook: FlushHook);
}

/// Registrar that discards every hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistrar;

impl FlushRegistrar for NoopRegistrar {
    fn register(&self, name: String, _hook: FlushHook) {
        debug!(name = %name, "Flush hook ignored");
    }
}

/// Collects flush hooks and fires them on demand or on an interval.
#[derive(Default)]
pub struct FlushRegistry {
    hooks: Mutex<Vec<(String, FlushHook)>>,
}

impl FlushRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.lock().is_empty()
    }

    /// Names of registered hooks in registration order.
    pub fn names(&self) -> Vec<String> {
        self.hooks.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Fire every hook in registration order.
    pub async fn flush_all(&self) {
        // Snapshot so hooks may register further hooks without deadlocking.
        let hooks: Vec<(String, FlushHook)> = self.hooks.lock().clone();
        for (name, hook) in hooks {
            debug!(name = %name, "Firing flush hook");
            hook().await;
        }
    }

    /// Fire every hook each `period` until the returned task is aborted.
    pub fn spawn_interval(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                self.flush_all().await;
            }
        })
    }
}

impl FlushRegistrar for FlushRegistry {
    /// A hook registered under a name already in use replaces the old one in
    /// place, keeping its position in the firing order.
    fn register(&self, name: String, hook: FlushHook) {
        let mut hooks = self.hooks.lock();
        match hooks.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => {
                debug!(name = %name, "Replaced flush hook");
                slot.1 = hook;
            }
            None => {
                debug!(name = %name, "Registered flush hook");
                hooks.push((name, hook));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_hook(counter: Arc<AtomicUsize>) -> FlushHook {
        Arc::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn test_flush_all_fires_every_hook() {
        let registry = FlushRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register("a".to_string(), counting_hook(counter.clone()));
        registry.register("b".to_string(), counting_hook(counter.clone()));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a", "b"]);

        registry.flush_all().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_same_name_replaces_hook() {
        let registry = FlushRegistry::new();
        let stale = Arc::new(AtomicUsize::new(0));
        let fresh = Arc::new(AtomicUsize::new(0));
        registry.register("q".to_string(), counting_hook(stale.clone()));
        registry.register("other".to_string(), counting_hook(fresh.clone()));
        registry.register("q".to_string(), counting_hook(fresh.clone()));

        assert_eq!(registry.names(), vec!["q", "other"]);

        registry.flush_all().await;
        assert_eq!(stale.load(Ordering::SeqCst), 0);
        assert_eq!(fresh.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_registry_flush_is_noop() {
        let registry = FlushRegistry::new();
        assert!(registry.is_empty());
        registry.flush_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_interval_fires_periodically() {
        let registry = Arc::new(FlushRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register("tick".to_string(), counting_hook(counter.clone()));

        let handle = registry.clone().spawn_interval(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        handle.abort();
    }
}
