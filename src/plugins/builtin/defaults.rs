//! Merges configured default tags and data into every event.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::plugins::{Plugin, PluginContext, Result};

#[derive(Debug, Clone, Default)]
pub struct ConfigurationDefaultsPlugin {
    tags: BTreeSet<String>,
    data: BTreeMap<String, Value>,
}

impl ConfigurationDefaultsPlugin {
    pub fn new(tags: BTreeSet<String>, data: BTreeMap<String, Value>) -> Self {
        ConfigurationDefaultsPlugin { tags, data }
    }
}

impl Plugin for ConfigurationDefaultsPlugin {
    fn run(&self, ctx: &mut PluginContext) -> Result<()> {
        ctx.event.tags.extend(self.tags.iter().cloned());
        for (key, value) in &self.data {
            // Values set on the event itself win.
            ctx.event
                .data
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        Ok(())
    }
}
