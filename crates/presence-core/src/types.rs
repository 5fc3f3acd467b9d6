use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Identity ─────────────────────────────────────────────────────

/// Who a client claims to be while online.
///
/// `username` is the registry key and must satisfy
/// [`validate_format`](crate::identity::validate_format). `session_id`
/// distinguishes concurrent logins of the same username and is not
/// required to be unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub is_anonymous: bool,
}

impl Identity {
    pub fn new(
        username: impl Into<String>,
        display_name: impl Into<String>,
        is_anonymous: bool,
    ) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
            session_id: String::new(),
            is_anonymous,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.username)
    }
}

// ─── Presence entry ───────────────────────────────────────────────

/// One online user as held by the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub identity: Identity,
    pub last_seen: DateTime<Utc>,
}

impl PresenceEntry {
    pub fn username(&self) -> &str {
        &self.identity.username
    }

    /// True when no heartbeat arrived at or after `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen < cutoff
    }
}

/// Wire view of a [`PresenceEntry`]. The session id stays server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub username: String,
    pub display_name: String,
    pub is_anonymous: bool,
    /// RFC 3339, UTC, millisecond precision.
    pub last_seen: String,
}

impl From<&PresenceEntry> for PresenceUser {
    fn from(entry: &PresenceEntry) -> Self {
        Self {
            username: entry.identity.username.clone(),
            display_name: entry.identity.display_name.clone(),
            is_anonymous: entry.identity.is_anonymous,
            last_seen: entry.last_seen.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

// ─── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    /// Malformed or missing required field; nothing was mutated.
    #[error("validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn identity_serializes_camel_case() {
        let id = Identity::new("swift_otter", "Swift Otter", true).with_session_id("s-1");
        let json = serde_json::to_value(&id).expect("serialize");
        assert_eq!(json["username"], "swift_otter");
        assert_eq!(json["displayName"], "Swift Otter");
        assert_eq!(json["sessionId"], "s-1");
        assert_eq!(json["isAnonymous"], true);
    }

    #[test]
    fn identity_deserialize_defaults_optional_fields() {
        let id: Identity =
            serde_json::from_str(r#"{"username":"alice","displayName":"Alice"}"#).expect("parse");
        assert_eq!(id.session_id, "");
        assert!(!id.is_anonymous);
    }

    #[test]
    fn presence_user_hides_session_id() {
        let entry = PresenceEntry {
            identity: Identity::new("alice", "Alice", false).with_session_id("secret"),
            last_seen: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        };
        let user = PresenceUser::from(&entry);
        assert_eq!(user.last_seen, "2026-01-02T03:04:05.000Z");

        let json = serde_json::to_value(&user).expect("serialize");
        assert!(json.get("sessionId").is_none());
        assert_eq!(json["lastSeen"], "2026-01-02T03:04:05.000Z");
    }

    #[test]
    fn stale_is_strictly_before_cutoff() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let entry = PresenceEntry {
            identity: Identity::new("bob", "Bob", false),
            last_seen: t,
        };
        assert!(!entry.is_stale(t));
        assert!(entry.is_stale(t + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn validation_error_message() {
        let err = PresenceError::Validation("username is required".into());
        assert_eq!(err.to_string(), "validation error: username is required");
    }
}
