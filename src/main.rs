//! Reads lines from stdin and delivers each as a log event to stdout.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telemetry_pipeline::client::TelemetryClient;
use telemetry_pipeline::config::Configuration;
use telemetry_pipeline::submission::{SettingsResponse, SubmissionClient, SubmissionResponse};
use telemetry_pipeline::types::{Event, EventBuilder, ReferenceId, UserDescription};

/// Key used when `TELEMETRY_API_KEY` is unset; the stdout sink ignores it.
const LOCAL_API_KEY: &str = "local-stdout";

/// Writes every accepted batch to stdout, one JSON event per line.
struct StdoutSubmission;

impl SubmissionClient for StdoutSubmission {
    async fn submit(&self, events: &[Event], _config: &Configuration) -> SubmissionResponse {
        let mut out = std::io::stdout().lock();
        for event in events {
            let written = serde_json::to_writer(&mut out, event)
                .map_err(std::io::Error::from)
                .and_then(|()| out.write_all(b"\n"));
            if let Err(e) = written {
                return SubmissionResponse::transport_error(e.to_string());
            }
        }
        match out.flush() {
            Ok(()) => SubmissionResponse::accepted(),
            Err(e) => SubmissionResponse::transport_error(e.to_string()),
        }
    }

    async fn get_settings(&self, version: u64, _config: &Configuration) -> SettingsResponse {
        SettingsResponse::unchanged(version)
    }

    async fn post_user_description(
        &self,
        _reference_id: &ReferenceId,
        _description: &UserDescription,
        _config: &Configuration,
    ) -> SubmissionResponse {
        SubmissionResponse::accepted()
    }

    async fn send_heartbeat(
        &self,
        _session_id: &str,
        _is_end: bool,
        _config: &Configuration,
    ) -> SubmissionResponse {
        SubmissionResponse::accepted()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telemetry_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Configuration::from_env();
    config.api_key.get_or_insert_with(|| LOCAL_API_KEY.to_string());

    let client = TelemetryClient::new(config, StdoutSubmission);
    client.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                client.submit(EventBuilder::log("stdin", line).build());
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }

    let report = client.shutdown().await;
    tracing::info!(delivered = report.delivered, "Done");
}
