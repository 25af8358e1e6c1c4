use cadence_core::domain::CRON_ENTRY_PREFIX;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::Watcher;

/// Registry of the watchers this process can run
///
/// Filled during start-up wiring and read by the orchestrator at every
/// leadership epoch.
#[derive(Default)]
pub struct WatcherRegistry {
    watchers: RwLock<BTreeMap<String, Arc<dyn Watcher>>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a watcher under `name`
    ///
    /// # Panics
    /// Panics if the name is taken or uses the prefix reserved for CronJob
    /// entries. Both are wiring mistakes.
    pub fn register(&self, name: &str, watcher: Arc<dyn Watcher>) {
        if name.starts_with(CRON_ENTRY_PREFIX) {
            panic!(
                "Watcher name '{}' uses the reserved prefix '{}'",
                name, CRON_ENTRY_PREFIX
            );
        }

        let mut watchers = self
            .watchers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if watchers.contains_key(name) {
            panic!("Watcher '{}' is already registered", name);
        }
        watchers.insert(name.to_string(), watcher);
    }

    /// Snapshot of the registered watchers, sorted by name
    pub fn list_watchers(&self) -> Vec<(String, Arc<dyn Watcher>)> {
        self.watchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, watcher)| (name.clone(), Arc::clone(watcher)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.watchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
