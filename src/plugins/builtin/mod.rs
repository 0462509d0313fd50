//! Plugins every client registers by default.

use std::sync::Arc;

use crate::config::Configuration;
use crate::dedupe::Deduplicator;
use crate::settings::SettingsManager;

use super::PluginRegistry;

pub mod defaults;
pub mod duplicate;
pub mod error;
pub mod exclusion;
pub mod reference;

pub use defaults::ConfigurationDefaultsPlugin;
pub use duplicate::DuplicateCheckerPlugin;
pub use error::ErrorPlugin;
pub use exclusion::EventExclusionPlugin;
pub use reference::ReferenceIdPlugin;

pub const CONFIGURATION_DEFAULTS: (&str, i32) = ("configuration-defaults", 10);
pub const ERROR: (&str, i32) = ("error", 30);
pub const EVENT_EXCLUSION: (&str, i32) = ("event-exclusion", 45);
pub const DUPLICATE_CHECKER: (&str, i32) = ("duplicate-checker", 90);
pub const REFERENCE_ID: (&str, i32) = ("reference-id", 100);

/// Registers the built-in plugins.
pub fn register_defaults(
    registry: &PluginRegistry,
    config: &Configuration,
    settings: Arc<SettingsManager>,
    dedup: Arc<Deduplicator>,
) {
    let (key, priority) = CONFIGURATION_DEFAULTS;
    registry.add(
        key,
        priority,
        ConfigurationDefaultsPlugin::new(config.default_tags.clone(), config.default_data.clone()),
    );

    let (key, priority) = ERROR;
    registry.add(key, priority, ErrorPlugin);

    let (key, priority) = EVENT_EXCLUSION;
    registry.add(
        key,
        priority,
        EventExclusionPlugin::new(settings, config.exclusions.clone()),
    );

    let (key, priority) = DUPLICATE_CHECKER;
    registry.add(key, priority, DuplicateCheckerPlugin::new(dedup));

    let (key, priority) = REFERENCE_ID;
    registry.add(key, priority, ReferenceIdPlugin);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::InMemoryStorage;
    use crate::types::Namespace;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn defaults_register_in_priority_order() {
        let clock = Arc::new(ManualClock::starting_now());
        let settings = Arc::new(SettingsManager::load(
            Arc::new(InMemoryStorage::new(clock.clone())),
            Namespace::new("ns"),
            BTreeMap::new(),
        ));
        let dedup = Arc::new(Deduplicator::new(clock, Duration::from_secs(60), 50));
        let registry = PluginRegistry::new();

        register_defaults(&registry, &Configuration::new(), settings, dedup);
        assert_eq!(
            registry.keys(),
            [
                "configuration-defaults",
                "error",
                "event-exclusion",
                "duplicate-checker",
                "reference-id"
            ]
        );
    }
}
