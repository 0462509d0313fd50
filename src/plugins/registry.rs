//! Plugin registration and the ordered run loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, trace};

use super::{Plugin, PluginContext, PluginError, Result};

struct Registration {
    key: String,
    priority: i32,
    seq: u64,
    plugin: Arc<dyn Plugin>,
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    /// A plugin cancelled the event; the key names it.
    Cancelled { by: String },
}

impl PipelineOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineOutcome::Cancelled { .. })
    }
}

/// Ordered set of plugins keyed by name.
///
/// Plugins run in ascending priority; equal priorities run in registration
/// order. Registering an existing key replaces (and disposes) the previous
/// plugin.
#[derive(Default)]
pub struct PluginRegistry {
    entries: RwLock<Vec<Registration>>,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructed plugin under `key`.
    pub fn add(&self, key: impl Into<String>, priority: i32, plugin: impl Plugin + 'static) {
        self.insert(key.into(), priority, Arc::new(plugin));
    }

    /// Builds a plugin with `factory` and registers it.
    ///
    /// A factory that fails or panics leaves the registry untouched.
    pub fn register<P, F>(&self, key: impl Into<String>, priority: i32, factory: F) -> Result<()>
    where
        P: Plugin + 'static,
        F: FnOnce() -> std::result::Result<P, String>,
    {
        let key = key.into();
        let plugin = match catch_unwind(AssertUnwindSafe(factory)) {
            Ok(Ok(plugin)) => plugin,
            Ok(Err(reason)) => return Err(PluginError::Construction { key, reason }),
            Err(panic) => {
                return Err(PluginError::Construction {
                    key,
                    reason: panic_message(panic.as_ref()),
                });
            }
        };
        self.insert(key, priority, Arc::new(plugin));
        Ok(())
    }

    fn insert(&self, key: String, priority: i32, plugin: Arc<dyn Plugin>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let replaced = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let replaced = entries
                .iter()
                .position(|r| r.key == key)
                .map(|pos| entries.remove(pos));
            entries.push(Registration {
                key: key.clone(),
                priority,
                seq,
                plugin,
            });
            entries.sort_by_key(|r| (r.priority, r.seq));
            replaced
        };

        if let Some(old) = replaced {
            debug!(plugin = %key, "Replacing plugin");
            old.plugin.dispose();
        } else {
            debug!(plugin = %key, priority, "Registered plugin");
        }
    }

    /// Removes and disposes the plugin under `key`.
    pub fn remove(&self, key: &str) -> bool {
        let removed = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries
                .iter()
                .position(|r| r.key == key)
                .map(|pos| entries.remove(pos))
        };
        match removed {
            Some(old) => {
                old.plugin.dispose();
                true
            }
            None => false,
        }
    }

    /// Removes and disposes every plugin.
    pub fn dispose_all(&self) {
        let entries = std::mem::take(
            &mut *self.entries.write().unwrap_or_else(PoisonError::into_inner),
        );
        for entry in entries {
            entry.plugin.dispose();
        }
    }

    /// Registered keys in execution order.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.key.clone())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|r| r.key == key)
    }

    /// Runs every plugin over `ctx` until one cancels.
    ///
    /// The plugin list is snapshotted up front, so plugins may add or remove
    /// plugins without deadlocking; changes apply to the next event.
    pub fn run(&self, ctx: &mut PluginContext) -> PipelineOutcome {
        self.run_where(ctx, |_| true)
    }

    /// Runs only the plugins whose priority is above `priority`.
    ///
    /// Used for events that already went through the earlier stages, such as
    /// merged duplicates released by the deduplicator.
    pub fn run_after(&self, priority: i32, ctx: &mut PluginContext) -> PipelineOutcome {
        self.run_where(ctx, |p| p > priority)
    }

    fn run_where(&self, ctx: &mut PluginContext, include: impl Fn(i32) -> bool) -> PipelineOutcome {
        let plugins: Vec<(String, Arc<dyn Plugin>)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| include(r.priority))
            .map(|r| (r.key.clone(), r.plugin.clone()))
            .collect();

        for (key, plugin) in plugins {
            match catch_unwind(AssertUnwindSafe(|| plugin.run(ctx))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(plugin = %key, error = %e, "Plugin failed, continuing"),
                Err(panic) => {
                    let e = PluginError::Panicked {
                        key: key.clone(),
                        message: panic_message(panic.as_ref()),
                    };
                    error!(plugin = %key, error = %e, "Plugin panicked, continuing");
                }
            }

            if ctx.is_cancelled() {
                trace!(plugin = %key, "Event cancelled");
                return PipelineOutcome::Cancelled { by: key };
            }
        }
        PipelineOutcome::Completed
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::ContextData;
    use crate::types::EventBuilder;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn ctx() -> PluginContext {
        PluginContext::new(EventBuilder::log("test", "hello").build(), ContextData::new())
    }

    /// Appends its label to a shared trace when run.
    struct Recorder {
        label: &'static str,
        trace: Arc<Mutex<Vec<&'static str>>>,
        cancel: bool,
    }

    impl Plugin for Recorder {
        fn run(&self, ctx: &mut PluginContext) -> Result<()> {
            self.trace.lock().unwrap().push(self.label);
            if self.cancel {
                ctx.cancel();
            }
            Ok(())
        }
    }

    struct Disposable(Arc<AtomicUsize>);

    impl Plugin for Disposable {
        fn run(&self, _ctx: &mut PluginContext) -> Result<()> {
            Ok(())
        }

        fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recorder(label: &'static str, trace: &Arc<Mutex<Vec<&'static str>>>) -> Recorder {
        Recorder {
            label,
            trace: trace.clone(),
            cancel: false,
        }
    }

    #[test]
    fn runs_in_ascending_priority() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let registry = PluginRegistry::new();
        registry.add("three", 3, recorder("3", &trace));
        registry.add("one", 1, recorder("1", &trace));
        registry.add("two", 2, recorder("2", &trace));

        assert_eq!(registry.run(&mut ctx()), PipelineOutcome::Completed);
        assert_eq!(*trace.lock().unwrap(), ["1", "2", "3"]);
        assert_eq!(registry.keys(), ["one", "two", "three"]);
    }

    #[test]
    fn equal_priorities_run_in_registration_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let registry = PluginRegistry::new();
        registry.add("b", 5, recorder("b", &trace));
        registry.add("a", 5, recorder("a", &trace));

        registry.run(&mut ctx());
        assert_eq!(*trace.lock().unwrap(), ["b", "a"]);
    }

    #[test]
    fn run_after_skips_earlier_stages() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let registry = PluginRegistry::new();
        registry.add("early", 10, recorder("early", &trace));
        registry.add("gate", 90, recorder("gate", &trace));
        registry.add("late", 100, recorder("late", &trace));

        assert_eq!(registry.run_after(90, &mut ctx()), PipelineOutcome::Completed);
        assert_eq!(*trace.lock().unwrap(), ["late"]);
    }

    #[test]
    fn cancellation_stops_the_chain() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let registry = PluginRegistry::new();
        registry.add("first", 1, recorder("first", &trace));
        registry.add(
            "gate",
            2,
            Recorder {
                label: "gate",
                trace: trace.clone(),
                cancel: true,
            },
        );
        registry.add("never", 3, recorder("never", &trace));

        let mut ctx = ctx();
        let outcome = registry.run(&mut ctx);
        assert_eq!(
            outcome,
            PipelineOutcome::Cancelled {
                by: "gate".to_string()
            }
        );
        assert!(ctx.is_cancelled());
        assert_eq!(*trace.lock().unwrap(), ["first", "gate"]);
    }

    #[test]
    fn failing_and_panicking_plugins_do_not_abort() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let registry = PluginRegistry::new();
        registry.add("fails", 1, |_: &mut PluginContext| -> Result<()> {
            Err(PluginError::Failed("nope".to_string()))
        });
        registry.add("panics", 2, |_: &mut PluginContext| -> Result<()> {
            panic!("plugin bug")
        });
        registry.add("after", 3, recorder("after", &trace));

        assert_eq!(registry.run(&mut ctx()), PipelineOutcome::Completed);
        assert_eq!(*trace.lock().unwrap(), ["after"]);
    }

    #[test]
    fn failed_construction_is_not_registered() {
        let registry = PluginRegistry::new();
        let result = registry.register("broken", 1, || -> std::result::Result<Disposable, String> {
            Err("missing dependency".to_string())
        });
        assert!(matches!(result, Err(PluginError::Construction { .. })));

        let result = registry.register("exploding", 1, || -> std::result::Result<Disposable, String> {
            panic!("constructor bug")
        });
        assert!(matches!(result, Err(PluginError::Construction { reason, .. }) if reason == "constructor bug"));
        assert!(registry.keys().is_empty());
    }

    #[test]
    fn replacing_a_key_disposes_the_old_plugin() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let registry = PluginRegistry::new();

        registry.add("p", 1, Disposable(first.clone()));
        registry.add("p", 1, Disposable(second.clone()));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(registry.keys(), ["p"]);

        assert!(registry.remove("p"));
        assert!(!registry.remove("p"));
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_all_empties_registry() {
        let count = Arc::new(AtomicUsize::new(0));
        let registry = PluginRegistry::new();
        registry.add("a", 1, Disposable(count.clone()));
        registry.add("b", 2, Disposable(count.clone()));

        registry.dispose_all();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(registry.keys().is_empty());
    }
}
