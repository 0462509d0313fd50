//! Gives error and not-found events a reference id users can quote.

use crate::plugins::{Plugin, PluginContext, Result};
use crate::types::{EventType, ReferenceId};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceIdPlugin;

impl Plugin for ReferenceIdPlugin {
    fn run(&self, ctx: &mut PluginContext) -> Result<()> {
        let wants_reference = matches!(ctx.event.kind, EventType::Error | EventType::NotFound);
        if wants_reference && ctx.event.reference_id.is_none() {
            ctx.event.reference_id = Some(ReferenceId::generate());
        }
        Ok(())
    }
}
