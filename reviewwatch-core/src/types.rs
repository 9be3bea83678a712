//! Domain types for tracked review changes.
//!
//! Field names on the wire follow the persisted JSON layout (`codeReview`,
//! `refreshTimeSeconds`), which viewers read directly.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Remote identifier of a change. Stable and unique within the tracked set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(pub String);

impl ChangeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ChangeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChangeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Review status reported by the remote. Open-ended: unknown values are kept
/// verbatim so they survive a store round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeStatus {
    New,
    Merged,
    Abandoned,
    Other(String),
}

impl ChangeStatus {
    /// Merged and abandoned changes can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChangeStatus::Merged | ChangeStatus::Abandoned)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ChangeStatus::New => "NEW",
            ChangeStatus::Merged => "MERGED",
            ChangeStatus::Abandoned => "ABANDONED",
            ChangeStatus::Other(other) => other,
        }
    }
}

impl From<String> for ChangeStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "NEW" => ChangeStatus::New,
            "MERGED" => ChangeStatus::Merged,
            "ABANDONED" => ChangeStatus::Abandoned,
            _ => ChangeStatus::Other(s),
        }
    }
}

impl From<&str> for ChangeStatus {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<ChangeStatus> for String {
    fn from(status: ChangeStatus) -> Self {
        match status {
            ChangeStatus::Other(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One remote change the user has opted to monitor.
///
/// `updated` and `error` are transient annotations: `updated` only appears on
/// copies handed to viewers or the pending buffer, `error` marks a failed
/// query on a placeholder and is evicted before the tracked set is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedChange {
    pub id: ChangeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ChangeStatus>,
    #[serde(default)]
    pub code_review: i8,
    #[serde(default)]
    pub verified: i8,
    #[serde(default, skip_serializing_if = "is_false")]
    pub updated: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub error: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl TrackedChange {
    /// A freshly added change that has never been fetched.
    pub fn placeholder(id: impl Into<ChangeId>) -> Self {
        Self {
            id: id.into(),
            subject: None,
            status: None,
            code_review: 0,
            verified: 0,
            updated: false,
            error: false,
        }
    }

    /// Marker recorded when a placeholder could not be fetched.
    pub fn failed(id: impl Into<ChangeId>) -> Self {
        Self {
            error: true,
            ..Self::placeholder(id)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.as_ref().is_some_and(ChangeStatus::is_terminal)
    }

    /// Copy handed to viewers, flagged as updated.
    pub fn to_updated(&self) -> Self {
        Self {
            updated: true,
            ..self.clone()
        }
    }

    /// Copy with both transient flags cleared, as persisted in the tracked set.
    pub fn without_transient(&self) -> Self {
        Self {
            updated: false,
            error: false,
            ..self.clone()
        }
    }
}

/// Credentials used for basic authentication against the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub secret: String,
}

/// Connection settings for the remote review service.
///
/// A missing `refresh_time_seconds` means the service is unconfigured and
/// will not arm a timer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_time_seconds: Option<u64>,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub credentials: Credentials,
}

impl ConnectionOptions {
    /// Endpoint and both credential fields must be non-empty.
    pub fn is_valid(&self) -> bool {
        !self.endpoint.is_empty()
            && !self.credentials.identity.is_empty()
            && !self.credentials.secret.is_empty()
    }

    /// Timer period, if configured. Zero is clamped to one second.
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_time_seconds
            .map(|secs| Duration::from_secs(secs.max(1)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
