//! Stable content hash for events.
//!
//! The hash covers the event kind, source, message and structured data. The
//! date, count, reference id and tags are left out so that repeats of the
//! same occurrence hash identically. `data` is a `BTreeMap`, so its JSON
//! form is key-ordered and the digest is stable across runs and processes.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::{Event, EventType};

/// Truncated SHA-256 of an event's identifying content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub u64);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.to_be_bytes()))
    }
}

#[derive(Serialize)]
struct HashedFields<'a> {
    kind: EventType,
    source: Option<&'a str>,
    message: Option<&'a str>,
    data: &'a std::collections::BTreeMap<String, serde_json::Value>,
}

impl ContentHash {
    pub fn of(event: &Event) -> Self {
        let fields = HashedFields {
            kind: event.kind,
            source: event.source.as_deref(),
            message: event.message.as_deref(),
            data: &event.data,
        };

        let mut hasher = Sha256::new();
        // Serializing plain maps and strings cannot fail; fall back to the
        // debug form rather than panic if it ever does.
        match serde_json::to_vec(&fields) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(format!("{event:?}").as_bytes()),
        }
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        ContentHash(u64::from_be_bytes(prefix))
    }
}
