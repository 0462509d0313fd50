//! Drops events the settings or the caller do not want.
//!
//! - log events below the minimum level for their source (`@@log:<source>`)
//! - events whose `@@<type>:<source>` setting is `false`
//! - events matched by a caller supplied exclusion predicate

use std::sync::Arc;

use tracing::trace;

use crate::config::ExclusionFn;
use crate::plugins::{Plugin, PluginContext, Result};
use crate::settings::SettingsManager;
use crate::types::{EventType, LogLevel};

pub struct EventExclusionPlugin {
    settings: Arc<SettingsManager>,
    exclusions: Vec<ExclusionFn>,
}

impl std::fmt::Debug for EventExclusionPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventExclusionPlugin")
            .field("exclusions", &self.exclusions.len())
            .finish_non_exhaustive()
    }
}

impl EventExclusionPlugin {
    pub fn new(settings: Arc<SettingsManager>, exclusions: Vec<ExclusionFn>) -> Self {
        EventExclusionPlugin {
            settings,
            exclusions,
        }
    }
}

impl Plugin for EventExclusionPlugin {
    fn run(&self, ctx: &mut PluginContext) -> Result<()> {
        let event = &ctx.event;

        if self.exclusions.iter().any(|exclude| exclude(event)) {
            trace!(kind = %event.kind, "Excluded by callback");
            ctx.cancel();
            return Ok(());
        }

        let settings = self.settings.current();
        let source = event.source.as_deref();

        if event.kind == EventType::Log
            && let Some(minimum) = settings.minimum_log_level(source)
        {
            // Events without a level are only dropped when logging is off.
            let excluded = match event.level() {
                Some(level) => level < minimum,
                None => minimum == LogLevel::Off,
            };
            if excluded {
                trace!(source = ?source, %minimum, "Excluded below minimum log level");
                ctx.cancel();
                return Ok(());
            }
        }

        if !settings.type_enabled(event.kind, source) {
            trace!(kind = %event.kind, source = ?source, "Excluded by type setting");
            ctx.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::ContextData;
    use crate::storage::InMemoryStorage;
    use crate::types::{Event, EventBuilder, Namespace};
    use std::collections::BTreeMap;

    fn settings(pairs: &[(&str, &str)]) -> Arc<SettingsManager> {
        let manager = SettingsManager::load(
            Arc::new(InMemoryStorage::default()),
            Namespace::new("ns"),
            BTreeMap::new(),
        );
        manager
            .apply(
                1,
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            )
            .unwrap();
        Arc::new(manager)
    }

    fn run(plugin: &EventExclusionPlugin, event: Event) -> bool {
        let mut ctx = PluginContext::new(event, ContextData::new());
        plugin.run(&mut ctx).unwrap();
        ctx.is_cancelled()
    }

    #[test]
    fn filters_logs_below_minimum_level() {
        let plugin = EventExclusionPlugin::new(
            settings(&[("@@log:*", "info"), ("@@log:app::db", "warn")]),
            Vec::new(),
        );
        let log = |source: &str, level| EventBuilder::log(source, "m").level(level).build();

        assert!(run(&plugin, log("app::http", LogLevel::Debug)));
        assert!(!run(&plugin, log("app::http", LogLevel::Info)));
        assert!(run(&plugin, log("app::db", LogLevel::Info)));
        assert!(!run(&plugin, log("app::db", LogLevel::Error)));
        // No level: only an `off` rule drops it.
        assert!(!run(&plugin, EventBuilder::log("app::db", "m").build()));
    }

    #[test]
    fn off_drops_all_logs_for_source() {
        let plugin = EventExclusionPlugin::new(settings(&[("@@log:noisy*", "off")]), Vec::new());
        assert!(run(&plugin, EventBuilder::log("noisy::x", "m").build()));
        assert!(run(
            &plugin,
            EventBuilder::log("noisy::x", "m").level(LogLevel::Fatal).build()
        ));
        assert!(!run(&plugin, EventBuilder::log("quiet", "m").build()));
    }

    #[test]
    fn type_setting_disables_events() {
        let plugin =
            EventExclusionPlugin::new(settings(&[("@@error:TimeoutError", "false")]), Vec::new());
        assert!(run(
            &plugin,
            EventBuilder::error("slow").source("TimeoutError").build()
        ));
        assert!(!run(
            &plugin,
            EventBuilder::error("boom").source("IoError").build()
        ));
    }

    #[test]
    fn user_exclusions_apply() {
        let exclusion: ExclusionFn = Arc::new(|event: &Event| event.tags.contains("internal"));
        let plugin = EventExclusionPlugin::new(settings(&[]), vec![exclusion]);
        assert!(run(&plugin, EventBuilder::feature_usage("x").tag("internal").build()));
        assert!(!run(&plugin, EventBuilder::feature_usage("x").build()));
    }
}
