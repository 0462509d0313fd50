//! User identity and user supplied descriptions.

use serde::{Deserialize, Serialize};

/// Who was using the application when the event happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub identity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UserIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        UserIdentity {
            identity: identity.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A user's own account of an error, posted against its reference id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,

    pub description: String,
}

impl UserDescription {
    pub fn new(description: impl Into<String>) -> Self {
        UserDescription {
            email_address: None,
            description: description.into(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email_address = Some(email.into());
        self
    }

    /// A description with neither text nor an email address carries nothing.
    pub fn is_empty(&self) -> bool {
        self.description.trim().is_empty()
            && self
                .email_address
                .as_deref()
                .is_none_or(|e| e.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_description_detection() {
        assert!(UserDescription::new("  ").is_empty());
        assert!(!UserDescription::new("it broke").is_empty());
        assert!(!UserDescription::new("").with_email("a@example.com").is_empty());
    }

    #[test]
    fn identity_omits_missing_name() {
        let json = serde_json::to_value(UserIdentity::new("u-1")).unwrap();
        assert_eq!(json, serde_json::json!({ "identity": "u-1" }));
    }
}
