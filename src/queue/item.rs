//! Queue item naming.
//!
//! An item's whole state lives in its file name:
//!
//! ```text
//! <id>.<attempts>.json        - pending
//! <id>.<attempts>.json.lock   - locked by a consumer
//! ```
//!
//! Every state change is a single rename, so the storage backend's rename
//! atomicity is the only synchronisation the queue relies on.

use std::fmt;

use crate::types::{ItemId, Namespace};

use super::{QueueError, Result};

/// Payload extension for queue items.
pub const ITEM_EXTENSION: &str = "json";

/// Marker suffix for locked items.
pub const LOCK_SUFFIX: &str = "lock";

/// Directory holding queue items inside a namespace.
pub const QUEUE_DIR: &str = "q";

/// A queue item identified by its path-encoded state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueItem {
    pub id: ItemId,
    pub attempts: u32,
    pub locked: bool,
}

impl QueueItem {
    /// A fresh, unlocked item with no attempts.
    pub fn new(id: ItemId) -> Self {
        QueueItem {
            id,
            attempts: 0,
            locked: false,
        }
    }

    /// Parses a storage path or bare file name.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = || QueueError::InvalidItemPath(path.to_string());
        let name = path.rsplit('/').next().unwrap_or(path);

        let (name, locked) = match name.strip_suffix(LOCK_SUFFIX) {
            Some(rest) => (rest.strip_suffix('.').ok_or_else(invalid)?, true),
            None => (name, false),
        };
        let stem = name
            .strip_suffix(ITEM_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(invalid)?;
        let (id, attempts) = stem.rsplit_once('.').ok_or_else(invalid)?;

        if id.is_empty() || id.contains('.') {
            return Err(invalid());
        }
        if attempts.is_empty() || !attempts.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let attempts = attempts.parse().map_err(|_| invalid())?;

        Ok(QueueItem {
            id: ItemId::new(id),
            attempts,
            locked,
        })
    }

    pub fn file_name(&self) -> String {
        if self.locked {
            format!("{}.{}.{ITEM_EXTENSION}.{LOCK_SUFFIX}", self.id, self.attempts)
        } else {
            format!("{}.{}.{ITEM_EXTENSION}", self.id, self.attempts)
        }
    }

    /// Full storage path inside `namespace`.
    pub fn path(&self, namespace: &Namespace) -> String {
        format!("{}/{QUEUE_DIR}/{}", namespace, self.file_name())
    }

    pub fn to_locked(&self) -> Self {
        QueueItem {
            locked: true,
            ..self.clone()
        }
    }

    pub fn to_unlocked(&self) -> Self {
        QueueItem {
            locked: false,
            ..self.clone()
        }
    }

    /// The same item with one more recorded attempt, lock state unchanged.
    pub fn to_next_attempt(&self) -> Self {
        QueueItem {
            attempts: self.attempts.saturating_add(1),
            ..self.clone()
        }
    }
}

impl fmt::Display for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Listing pattern for pending (unlocked) items.
pub fn pending_pattern(namespace: &Namespace) -> String {
    format!("{namespace}/{QUEUE_DIR}/*.{ITEM_EXTENSION}")
}

/// Listing pattern for locked items.
pub fn locked_pattern(namespace: &Namespace) -> String {
    format!("{namespace}/{QUEUE_DIR}/*.{ITEM_EXTENSION}.{LOCK_SUFFIX}")
}

/// Listing pattern for everything in the queue directory.
pub fn all_pattern(namespace: &Namespace) -> String {
    format!("{namespace}/{QUEUE_DIR}/*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_pending_and_locked_names() {
        let item = QueueItem::parse("ns/q/abc123.0.json").unwrap();
        assert_eq!(item.id.as_str(), "abc123");
        assert_eq!(item.attempts, 0);
        assert!(!item.locked);

        let item = QueueItem::parse("abc123.7.json.lock").unwrap();
        assert_eq!(item.attempts, 7);
        assert!(item.locked);
    }

    #[test]
    fn rejects_foreign_names() {
        for name in [
            "ns/q/abc.json",
            "ns/q/abc.x.json",
            "ns/q/.0.json",
            "ns/q/a.b.0.json",
            "ns/q/abc.0.json.tmp-123",
            "ns/q/abc.0.jsonlock",
            "ns/q/abc.-1.json",
            "ns/q/abc.+1.json",
            "ns/q/abc.99999999999.json",
        ] {
            assert!(
                matches!(QueueItem::parse(name), Err(QueueError::InvalidItemPath(_))),
                "{name} should not parse"
            );
        }
    }

    #[test]
    fn path_layout() {
        let ns = Namespace::new("LhhP1C9g");
        let item = QueueItem::new(ItemId::new("abc"));
        assert_eq!(item.path(&ns), "LhhP1C9g/q/abc.0.json");
        assert_eq!(item.to_locked().path(&ns), "LhhP1C9g/q/abc.0.json.lock");
        assert_eq!(
            item.to_locked().to_next_attempt().path(&ns),
            "LhhP1C9g/q/abc.1.json.lock"
        );
    }

    #[test]
    fn patterns_select_by_lock_state() {
        use crate::storage::wildcard_match;

        let ns = Namespace::new("ns");
        let pending = pending_pattern(&ns);
        let locked = locked_pattern(&ns);
        let pending_name = pending.rsplit('/').next().unwrap();
        let locked_name = locked.rsplit('/').next().unwrap();

        assert!(wildcard_match(pending_name, "a.0.json"));
        assert!(!wildcard_match(pending_name, "a.0.json.lock"));
        assert!(wildcard_match(locked_name, "a.0.json.lock"));
        assert!(!wildcard_match(locked_name, "a.0.json"));
    }

    fn arb_item() -> impl Strategy<Value = QueueItem> {
        ("[a-f0-9]{1,32}", any::<u32>(), any::<bool>()).prop_map(|(id, attempts, locked)| {
            QueueItem {
                id: ItemId::new(id),
                attempts,
                locked,
            }
        })
    }

    proptest! {
        /// The file name is a faithful encoding of the item state.
        #[test]
        fn file_name_encodes_state(item in arb_item()) {
            let parsed = QueueItem::parse(&item.path(&Namespace::new("ns"))).unwrap();
            prop_assert_eq!(parsed, item);
        }

        /// Attempt increments never decrease the counter and keep the lock state.
        #[test]
        fn next_attempt_is_monotonic(item in arb_item()) {
            let next = item.to_next_attempt();
            prop_assert!(next.attempts >= item.attempts);
            prop_assert_eq!(next.locked, item.locked);
            prop_assert_eq!(next.id, item.id);
        }

        /// Lock and unlock are inverse renames.
        #[test]
        fn lock_unlock_roundtrip(item in arb_item()) {
            let unlocked = item.to_unlocked();
            prop_assert_eq!(unlocked.to_locked().to_unlocked(), unlocked);
        }
    }
}
