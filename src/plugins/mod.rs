//! The plugin pipeline.
//!
//! Every event passes through an ordered chain of plugins before it is
//! queued. A plugin may enrich the event, rewrite it, or cancel it; once
//! cancelled, later plugins do not run and the event is dropped.
//!
//! ```text
//! configuration-defaults (10) -> error (30) -> event-exclusion (45)
//!   -> duplicate-checker (90) -> reference-id (100) -> queue
//! ```
//!
//! A failing or panicking plugin is logged and skipped; it cannot take the
//! producer down with it.

use std::any::Any;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::types::Event;

pub mod builtin;
pub mod registry;

pub use registry::{PipelineOutcome, PluginRegistry};

/// Errors raised by plugins and their registration.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin factory failed; the plugin was not registered.
    #[error("failed to construct plugin {key}: {reason}")]
    Construction { key: String, reason: String },

    /// The plugin reported a failure while processing an event.
    #[error("plugin failed: {0}")]
    Failed(String),

    /// The plugin panicked.
    #[error("plugin {key} panicked: {message}")]
    Panicked { key: String, message: String },
}

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;

/// A pipeline stage.
pub trait Plugin: Send + Sync {
    /// Processes one event. Call [`PluginContext::cancel`] to drop it.
    fn run(&self, ctx: &mut PluginContext) -> Result<()>;

    /// Releases resources when the plugin is removed or the client shuts down.
    fn dispose(&self) {}
}

impl<F> Plugin for F
where
    F: Fn(&mut PluginContext) -> Result<()> + Send + Sync,
{
    fn run(&self, ctx: &mut PluginContext) -> Result<()> {
        self(ctx)
    }
}

/// A live error attached to the context, with the name of its type.
#[derive(Clone)]
pub struct ContextError {
    pub type_name: &'static str,
    pub error: Arc<dyn StdError + Send + Sync>,
}

impl std::fmt::Debug for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextError")
            .field("type_name", &self.type_name)
            .field("error", &self.error.to_string())
            .finish()
    }
}

/// Side-channel inputs for plugins that are not part of the serialized event.
#[derive(Default, Clone)]
pub struct ContextData {
    error: Option<ContextError>,
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for ContextData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextData")
            .field("error", &self.error)
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ContextData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a live error for the error plugin to describe.
    pub fn with_error<E>(mut self, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.set_error(error);
        self
    }

    pub fn set_error<E>(&mut self, error: E)
    where
        E: StdError + Send + Sync + 'static,
    {
        self.error = Some(ContextError {
            type_name: short_type_name::<E>(),
            error: Arc::new(error),
        });
    }

    pub fn error(&self) -> Option<&ContextError> {
        self.error.as_ref()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Arc::new(value));
    }

    /// Returns the value under `key` if it has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref()
    }
}

/// Per-event pipeline state.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub event: Event,
    pub data: ContextData,
    cancelled: bool,
}

impl PluginContext {
    pub fn new(event: Event, data: ContextData) -> Self {
        PluginContext {
            event,
            data,
            cancelled: false,
        }
    }

    /// Drops the event. No later plugin will see it.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn into_event(self) -> Event {
        self.event
    }
}

/// Last path segment of a type name (`std::io::Error` becomes `Error`).
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
