//! Records produced by card operations and error reports sent to the UI shell.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Result of a single write attempt.
///
/// Produced exactly once per attempt, forwarded to the UI shell, and then
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub success: bool,
    /// Human-readable summary suitable for a toast or status line.
    pub message: String,
    /// The text that was written, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// The underlying failure, on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WriteResult {
    /// A successful write of `data` to the tag `uid`.
    pub fn succeeded(uid: &str, data: impl Into<String>) -> Self {
        Self {
            success: true,
            message: format!("data written to tag {uid}"),
            data: Some(data.into()),
            error: None,
        }
    }

    /// A failed write to the tag `uid`.
    pub fn failed(uid: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: format!("failed to write to tag {uid}"),
            data: None,
            error: Some(error.into()),
        }
    }
}

/// A tag seen while the bridge is in Search mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub uid: String,
    /// Text decoded from the tag.
    pub data: String,
    /// Milliseconds since the Unix epoch when the tag was read.
    pub timestamp: u64,
}

impl SearchResult {
    /// Creates a search hit stamped with the current wall-clock time.
    pub fn now(uid: impl Into<String>, data: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            uid: uid.into(),
            data: data.into(),
            timestamp,
        }
    }
}

/// Category of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Reader unavailable, card removed mid-operation, I/O failure.
    Hardware,
    /// Tag contents do not match the frame layout.
    Format,
    /// A command was malformed or asked for something impossible.
    Validation,
    /// Anything unexpected inside the bridge itself.
    Service,
}

/// Payload of the `operation-error` and `service-error` channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// The tag involved, for card-scoped failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            uid: None,
        }
    }

    /// Attaches the uid of the tag the failure relates to.
    pub fn for_card(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }
}
