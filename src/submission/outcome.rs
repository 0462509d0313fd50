//! Classification of submission responses.
//!
//! The distinction drives what happens to a batch:
//!
//! - **Transient** failures (5xx, 429, no response) release the batch and
//!   back off exponentially.
//! - **Permanent** failures (400, 401, 402, 403, 404) release the batch and
//!   pause for a long, flat period. Retrying sooner would fail the same way.
//! - **PayloadTooLarge** (413) shrinks the batch so the next attempt fits.

use std::fmt;

use super::SubmissionResponse;

/// The kind of delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionErrorKind {
    /// Retry later with backoff.
    Transient,
    /// Needs a configuration change (bad key, suspended account).
    Permanent,
    /// The batch was too large for the collector.
    PayloadTooLarge,
}

impl fmt::Display for SubmissionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubmissionErrorKind::Transient => "transient",
            SubmissionErrorKind::Permanent => "permanent",
            SubmissionErrorKind::PayloadTooLarge => "payload too large",
        })
    }
}

/// What a response means for the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Delivered,
    Failed(SubmissionErrorKind),
}

/// Classifies a submission response.
pub fn classify(response: &SubmissionResponse) -> SubmissionOutcome {
    match response.status_code {
        Some(200..=299) => SubmissionOutcome::Delivered,
        Some(413) => SubmissionOutcome::Failed(SubmissionErrorKind::PayloadTooLarge),
        Some(400..=404) => SubmissionOutcome::Failed(SubmissionErrorKind::Permanent),
        _ => SubmissionOutcome::Failed(SubmissionErrorKind::Transient),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        use SubmissionErrorKind::*;
        use SubmissionOutcome::*;

        let cases = [
            (Some(200), Delivered),
            (Some(202), Delivered),
            (Some(400), Failed(Permanent)),
            (Some(401), Failed(Permanent)),
            (Some(402), Failed(Permanent)),
            (Some(403), Failed(Permanent)),
            (Some(404), Failed(Permanent)),
            (Some(408), Failed(Transient)),
            (Some(413), Failed(PayloadTooLarge)),
            (Some(429), Failed(Transient)),
            (Some(500), Failed(Transient)),
            (Some(503), Failed(Transient)),
            (None, Failed(Transient)),
        ];
        for (status, expected) in cases {
            let response = SubmissionResponse {
                status_code: status,
                ..Default::default()
            };
            assert_eq!(classify(&response), expected, "status {status:?}");
        }
    }
}
