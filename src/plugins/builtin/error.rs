//! Describes a live error attached to the context.
//!
//! The `@error` payload records the error's type, message and the messages
//! of its `source()` chain, outermost first.

use serde::Serialize;

use crate::plugins::{Plugin, PluginContext, Result};
use crate::types::{EventType, keys};

/// Serialized form of an error and its causes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub type_name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorPlugin;

impl Plugin for ErrorPlugin {
    fn run(&self, ctx: &mut PluginContext) -> Result<()> {
        let Some(error) = ctx.data.error().cloned() else {
            return Ok(());
        };

        let mut causes = Vec::new();
        let mut source = error.error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        let payload = ErrorPayload {
            type_name: error.type_name.to_string(),
            message: error.error.to_string(),
            causes,
        };

        ctx.event.kind = EventType::Error;
        if ctx.event.source.is_none() {
            ctx.event.source = Some(payload.type_name.clone());
        }
        if ctx.event.message.is_none() {
            ctx.event.message = Some(payload.message.clone());
        }
        let value = serde_json::to_value(&payload)
            .map_err(|e| crate::plugins::PluginError::Failed(e.to_string()))?;
        ctx.event.data.insert(keys::ERROR.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::ContextData;
    use crate::types::EventBuilder;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("connection reset")]
    struct ConnectionReset;

    #[derive(Debug, Error)]
    #[error("failed to load invoice")]
    struct LoadInvoice(#[source] ConnectionReset);

    #[test]
    fn no_error_leaves_event_untouched() {
        let event = EventBuilder::log("app", "hi").build();
        let mut ctx = PluginContext::new(event.clone(), ContextData::new());
        ErrorPlugin.run(&mut ctx).unwrap();
        assert_eq!(ctx.event, event);
    }

    #[test]
    fn records_error_chain() {
        let event = EventBuilder::new(EventType::Log).build();
        let mut ctx = PluginContext::new(
            event,
            ContextData::new().with_error(LoadInvoice(ConnectionReset)),
        );

        ErrorPlugin.run(&mut ctx).unwrap();

        assert_eq!(ctx.event.kind, EventType::Error);
        assert_eq!(ctx.event.message.as_deref(), Some("failed to load invoice"));
        assert_eq!(ctx.event.source.as_deref(), Some("LoadInvoice"));
        let payload = &ctx.event.data[keys::ERROR];
        assert_eq!(payload["type"], "LoadInvoice");
        assert_eq!(payload["causes"][0], "connection reset");
    }

    #[test]
    fn explicit_message_is_kept() {
        let event = EventBuilder::error("checkout failed").build();
        let mut ctx = PluginContext::new(event, ContextData::new().with_error(ConnectionReset));
        ErrorPlugin.run(&mut ctx).unwrap();
        assert_eq!(ctx.event.message.as_deref(), Some("checkout failed"));
    }
}
