//! Telemetry Pipeline - an offline-durable client-side telemetry pipeline.
//!
//! Events pass through a plugin pipeline, are deduplicated within a time
//! window, land in a crash-safe file queue, and are delivered in batches by a
//! background loop that also keeps server-driven settings up to date.

pub mod client;
pub mod clock;
pub mod config;
pub mod dedupe;
pub mod plugins;
pub mod queue;
pub mod settings;
pub mod storage;
pub mod submission;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use client::{DrainReport, SubmitOutcome, TelemetryClient};
pub use config::Configuration;
pub use types::{Event, EventBuilder, EventType, LogLevel};
