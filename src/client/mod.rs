//! The telemetry client.
//!
//! [`TelemetryClient`] ties the pieces together:
//!
//! ```text
//! submit(event) -> plugins -> queue
//!                     |
//!                     +-- duplicate-checker -> deduplicator --(flush)--> queue
//!
//! queue loop:     queue -> batch -> SubmissionClient::submit -> delete | release
//! settings loop:  SubmissionClient::get_settings -> SettingsManager
//! ```
//!
//! None of the public entry points return errors. Failures are logged and
//! the event is dropped or left queued, so telemetry can never take the host
//! application down. An invalid configuration turns the client into a no-op.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Configuration;
use crate::dedupe::Deduplicator;
use crate::plugins::{
    ContextData, PipelineOutcome, Plugin, PluginContext, PluginRegistry, builtin,
};
use crate::queue::EventQueue;
use crate::settings::{SettingsManager, SyncOutcome};
use crate::storage::{FileStorage, InMemoryStorage, ObjectStorage};
use crate::submission::{BackoffConfig, SubmissionClient};
use crate::types::{Event, EventBuilder, Namespace, ReferenceId, UserDescription};

pub mod processor;
pub mod session;
pub mod timers;

pub use processor::{DrainReport, SkipReason};

/// Namespace used when the API key is unusable; nothing is ever written to it.
const DISABLED_NAMESPACE: &str = "disabled";

/// What happened to a submitted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Written to the durable queue.
    Queued { reference_id: Option<ReferenceId> },
    /// A plugin cancelled the event.
    Cancelled { by: String },
    /// The client is disabled or misconfigured.
    Disabled,
    /// The queue could not store the event.
    Dropped,
}

pub(crate) struct Inner<S> {
    pub(crate) config: Arc<Configuration>,
    pub(crate) enabled: bool,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) queue: EventQueue,
    pub(crate) dedup: Arc<Deduplicator>,
    pub(crate) settings: Arc<SettingsManager>,
    pub(crate) plugins: PluginRegistry,
    pub(crate) submission: S,
    pub(crate) processor: tokio::sync::Mutex<processor::ProcessorState>,
    /// Bumped whenever an event is queued; wakes the idle timers.
    pub(crate) activity: watch::Sender<u64>,
    pub(crate) last_reference_id: Mutex<Option<ReferenceId>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) sessions: Mutex<std::collections::HashMap<String, CancellationToken>>,
}

/// Client-side telemetry pipeline.
///
/// Cheap to clone; clones share the same queue, plugins and loops.
pub struct TelemetryClient<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for TelemetryClient<S> {
    fn clone(&self) -> Self {
        TelemetryClient {
            inner: self.inner.clone(),
        }
    }
}

impl<S> std::fmt::Debug for TelemetryClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("enabled", &self.inner.enabled)
            .field("namespace", self.inner.queue.namespace())
            .finish_non_exhaustive()
    }
}

impl<S: SubmissionClient> TelemetryClient<S> {
    /// Creates a client with the system clock and storage chosen by
    /// `config.storage_path`.
    pub fn new(config: Configuration, submission: S) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let storage: Arc<dyn ObjectStorage> = match &config.storage_path {
            Some(path) => match FileStorage::new(path) {
                Ok(storage) => Arc::new(storage),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Falling back to in-memory queue");
                    Arc::new(InMemoryStorage::new(clock.clone()))
                }
            },
            None => Arc::new(InMemoryStorage::new(clock.clone())),
        };
        Self::with_parts(config, submission, storage, clock)
    }

    /// Creates a client over explicit storage and clock.
    pub fn with_parts(
        config: Configuration,
        submission: S,
        storage: Arc<dyn ObjectStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let enabled = match config.validate() {
            Ok(()) => config.enabled,
            Err(e) => {
                warn!(error = %e, "Invalid configuration, telemetry disabled");
                false
            }
        };
        let namespace = if enabled {
            config.queue_namespace()
        } else {
            Namespace::new(DISABLED_NAMESPACE)
        };

        let queue = EventQueue::new(storage.clone(), namespace.clone(), clock.clone());
        let settings = Arc::new(SettingsManager::load(
            storage,
            namespace,
            config.local_settings.clone(),
        ));
        let dedup = Arc::new(Deduplicator::new(
            clock.clone(),
            config.dedup_window,
            config.dedup_capacity,
        ));

        let plugins = PluginRegistry::new();
        builtin::register_defaults(&plugins, &config, settings.clone(), dedup.clone());

        let processor = processor::ProcessorState::new(config.batch_size, BackoffConfig::DEFAULT);
        let (activity, _) = watch::channel(0);

        TelemetryClient {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                enabled,
                clock,
                queue,
                dedup,
                settings,
                plugins,
                submission,
                processor: tokio::sync::Mutex::new(processor),
                activity,
                last_reference_id: Mutex::new(None),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                sessions: Mutex::new(std::collections::HashMap::new()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    /// Runs `event` through the plugins and queues it.
    pub fn submit(&self, event: Event) -> SubmitOutcome {
        self.submit_with_context(event, ContextData::new())
    }

    /// Like [`submit`](Self::submit), with side-channel data for plugins.
    pub fn submit_with_context(&self, event: Event, data: ContextData) -> SubmitOutcome {
        self.inner.submit(event, data)
    }

    /// Submits an error event describing `error`.
    pub fn submit_error<E>(&self, error: E) -> SubmitOutcome
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let event = EventBuilder::new(crate::types::EventType::Error).build();
        self.submit_with_context(event, ContextData::new().with_error(error))
    }

    /// Runs one drain cycle now.
    pub async fn process_queue(&self) -> DrainReport {
        self.inner.process_queue().await
    }

    /// Flushes merged duplicates into the queue, then drains it.
    pub async fn flush(&self) -> DrainReport {
        self.inner.flush_merged();
        self.inner.process_queue().await
    }

    /// Fetches newer server settings now.
    pub async fn update_settings(&self) -> SyncOutcome {
        self.inner.sync_settings().await
    }

    /// Posts a user's description of what happened for `reference_id`.
    ///
    /// Returns whether the collector accepted it.
    pub async fn update_user_description(
        &self,
        reference_id: &ReferenceId,
        description: &UserDescription,
    ) -> bool {
        if !self.inner.enabled || description.is_empty() {
            return false;
        }
        let response = tokio::time::timeout(
            self.inner.config.submission_timeout,
            self.inner
                .submission
                .post_user_description(reference_id, description, &self.inner.config),
        )
        .await;
        match response {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                warn!(
                    reference_id = %reference_id,
                    status = ?response.status_code,
                    "User description rejected"
                );
                false
            }
            Err(_) => {
                warn!(reference_id = %reference_id, "User description timed out");
                false
            }
        }
    }

    /// The reference id of the most recently queued event that had one.
    pub fn last_reference_id(&self) -> Option<ReferenceId> {
        self.inner
            .last_reference_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Adds or replaces a plugin.
    pub fn add_plugin(&self, key: impl Into<String>, priority: i32, plugin: impl Plugin + 'static) {
        self.inner.plugins.add(key, priority, plugin);
    }

    /// Removes and disposes a plugin.
    pub fn remove_plugin(&self, key: &str) -> bool {
        self.inner.plugins.remove(key)
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.inner.plugins
    }

    pub fn queue(&self) -> &EventQueue {
        &self.inner.queue
    }

    pub fn settings(&self) -> &SettingsManager {
        &self.inner.settings
    }

    pub fn deduplicator(&self) -> &Deduplicator {
        &self.inner.dedup
    }
}

impl<S: SubmissionClient> Inner<S> {
    fn submit(&self, event: Event, data: ContextData) -> SubmitOutcome {
        if !self.enabled {
            return SubmitOutcome::Disabled;
        }

        let mut ctx = PluginContext::new(event, data);
        if let PipelineOutcome::Cancelled { by } = self.plugins.run(&mut ctx) {
            return SubmitOutcome::Cancelled { by };
        }
        self.enqueue(ctx.into_event())
    }

    /// Queues a finished event and records its side effects.
    pub(crate) fn enqueue(&self, event: Event) -> SubmitOutcome {
        match self.queue.enqueue(&event) {
            Ok(_) => {
                if let Some(reference_id) = &event.reference_id {
                    *self
                        .last_reference_id
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(reference_id.clone());
                }
                self.activity.send_modify(|n| *n = n.wrapping_add(1));
                SubmitOutcome::Queued {
                    reference_id: event.reference_id,
                }
            }
            Err(e) => {
                error!(kind = %event.kind, error = %e, "Failed to queue event, dropping it");
                SubmitOutcome::Dropped
            }
        }
    }

    /// Moves merged duplicates into the queue.
    ///
    /// Merged events were captured mid-pipeline, so they finish the stages
    /// after the duplicate checker before being queued.
    pub(crate) fn flush_merged(&self) -> usize {
        let (_, dedup_priority) = builtin::DUPLICATE_CHECKER;
        let mut count = 0;
        for event in self.dedup.flush() {
            let mut ctx = PluginContext::new(event, ContextData::new());
            if let PipelineOutcome::Cancelled { by } = self.plugins.run_after(dedup_priority, &mut ctx) {
                debug!(plugin = %by, "Merged event cancelled");
                continue;
            }
            if matches!(self.enqueue(ctx.into_event()), SubmitOutcome::Queued { .. }) {
                count += 1;
            }
        }
        if count > 0 {
            debug!(count, "Queued merged events");
        }
        count
    }

    pub(crate) async fn sync_settings(&self) -> SyncOutcome {
        if !self.enabled {
            return SyncOutcome::Failed;
        }
        match tokio::time::timeout(
            self.config.submission_timeout,
            self.settings.sync(&self.submission, &self.config),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Settings sync timed out");
                SyncOutcome::Failed
            }
        }
    }

    /// Syncs settings when a response reports a newer version.
    pub(crate) async fn check_settings_version(&self, response: &crate::submission::SubmissionResponse) {
        if let Some(version) = response.settings_version
            && self.settings.is_stale(version)
        {
            debug!(version, current = self.settings.version(), "Server settings changed");
            self.sync_settings().await;
        }
    }
}
