//! Core domain types for the telemetry pipeline.
//!
//! The event model is deliberately small: a kind, some free text, a date, an
//! optional merge count, tags, and an ordered map of structured data.

pub mod builder;
pub mod event;
pub mod ids;
pub mod user;

pub use builder::EventBuilder;
pub use event::{Event, EventType, LogLevel, UnknownLogLevel, keys};
pub use ids::{ItemId, Namespace, ReferenceId};
pub use user::{UserDescription, UserIdentity};
