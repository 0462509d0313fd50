//! Newtype wrappers for identifiers.
//!
//! These keep correlation ids, queue item ids and storage namespaces from
//! being mixed up with arbitrary strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a generated reference id.
const REFERENCE_ID_LEN: usize = 10;

/// Number of API key characters used for the storage namespace.
const NAMESPACE_LEN: usize = 8;

/// Opaque correlation id handed back to users so they can quote an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceId(pub String);

impl ReferenceId {
    pub fn new(s: impl Into<String>) -> Self {
        ReferenceId(s.into())
    }

    /// Generates a short random reference id.
    pub fn generate() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        ReferenceId(simple[..REFERENCE_ID_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReferenceId {
    fn from(s: &str) -> Self {
        ReferenceId(s.to_string())
    }
}

/// Unique id of a queue item, the first segment of its file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(s: impl Into<String>) -> Self {
        ItemId(s.into())
    }

    /// Generates a random id that is safe to use as a file name segment.
    pub fn generate() -> Self {
        ItemId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-API-key storage namespace, so clients sharing a machine do not collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(pub String);

impl Namespace {
    pub fn new(s: impl Into<String>) -> Self {
        Namespace(s.into())
    }

    /// Derives the namespace from the first characters of an API key.
    pub fn from_api_key(api_key: &str) -> Self {
        Namespace(api_key.chars().take(NAMESPACE_LEN).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn generated_reference_ids_are_short_and_distinct() {
        let a = ReferenceId::generate();
        let b = ReferenceId::generate();
        assert_eq!(a.as_str().len(), REFERENCE_ID_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn generated_item_ids_have_no_dots() {
        let id = ItemId::generate();
        assert!(!id.as_str().contains('.'));
        assert!(!id.as_str().contains('/'));
    }

    #[test]
    fn namespace_handles_short_keys() {
        assert_eq!(Namespace::from_api_key("abc").as_str(), "abc");
    }

    proptest! {
        #[test]
        fn namespace_is_key_prefix(key in "[A-Za-z0-9]{8,40}") {
            let ns = Namespace::from_api_key(&key);
            prop_assert_eq!(ns.as_str(), &key[..8]);
        }

        #[test]
        fn reference_id_serde_roundtrip(s in "[a-z0-9]{1,20}") {
            let id = ReferenceId::new(&s);
            let json = serde_json::to_string(&id).unwrap();
            prop_assert_eq!(json, format!("\"{}\"", s));
        }
    }
}
