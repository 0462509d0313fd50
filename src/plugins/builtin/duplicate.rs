//! Runs the deduplicator as a pipeline stage.

use std::sync::Arc;

use crate::dedupe::Deduplicator;
use crate::plugins::{Plugin, PluginContext, Result};

#[derive(Debug)]
pub struct DuplicateCheckerPlugin {
    dedup: Arc<Deduplicator>,
}

impl DuplicateCheckerPlugin {
    pub fn new(dedup: Arc<Deduplicator>) -> Self {
        DuplicateCheckerPlugin { dedup }
    }
}

impl Plugin for DuplicateCheckerPlugin {
    fn run(&self, ctx: &mut PluginContext) -> Result<()> {
        if self.dedup.check(&ctx.event).is_suppressed() {
            ctx.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::plugins::ContextData;
    use crate::types::EventBuilder;
    use std::time::Duration;

    #[test]
    fn second_identical_event_is_cancelled() {
        let clock = Arc::new(ManualClock::starting_now());
        let dedup = Arc::new(Deduplicator::new(clock, Duration::from_secs(60), 50));
        let plugin = DuplicateCheckerPlugin::new(dedup.clone());

        let event = EventBuilder::error("boom").build();
        let mut first = PluginContext::new(event.clone(), ContextData::new());
        let mut second = PluginContext::new(event, ContextData::new());

        plugin.run(&mut first).unwrap();
        plugin.run(&mut second).unwrap();

        assert!(!first.is_cancelled());
        assert!(second.is_cancelled());
        assert_eq!(dedup.pending(), 1);
    }
}
