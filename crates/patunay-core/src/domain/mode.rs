//! Operating modes of the bridge and the validated requests that change them.
//!
//! The bridge always has exactly one mode.  The mode decides what happens the
//! next time a tag enters the reader's field:
//!
//! | Mode     | On card detected                                  | Afterwards     |
//! |----------|---------------------------------------------------|----------------|
//! | `Idle`   | nothing beyond reporting the card                 | stays `Idle`   |
//! | `Read`   | decode the tag and report its text                | stays `Read`   |
//! | `Write`  | encode and write the pending text                 | `Idle` on success |
//! | `Search` | decode the tag and report a search hit            | stays `Search` |
//!
//! Mode changes are validated when the [`ModeRequest`] is built, so a caller
//! that asks for `Write` without any text gets a [`ValidationError`] back
//! immediately instead of an asynchronous failure later.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a command asks for an impossible mode change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `Write` was requested without any text to write.
    #[error("write mode requires a non-empty payload")]
    EmptyWritePayload,

    /// The mode name is not one of `idle`, `read`, `write`, `search`.
    #[error("unknown mode: '{0}'")]
    UnknownMode(String),
}

/// The mode name without any payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    Idle,
    Read,
    Write,
    Search,
}

impl ModeKind {
    /// The lowercase name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            ModeKind::Idle => "idle",
            ModeKind::Read => "read",
            ModeKind::Write => "write",
            ModeKind::Search => "search",
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModeKind {
    type Err = ValidationError;

    /// Parses a mode name case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(ModeKind::Idle),
            "read" => Ok(ModeKind::Read),
            "write" => Ok(ModeKind::Write),
            "search" => Ok(ModeKind::Search),
            _ => Err(ValidationError::UnknownMode(s.to_string())),
        }
    }
}

/// The active mode, including the pending text when writing.
///
/// The text only exists in the `Write` variant, so a `Read` mode can never
/// carry a stale payload around.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Idle,
    Read,
    Write {
        /// Text to write on the next tag tap.
        text: String,
    },
    Search,
}

impl Mode {
    /// Returns the payload-free name of this mode.
    pub fn kind(&self) -> ModeKind {
        match self {
            Mode::Idle => ModeKind::Idle,
            Mode::Read => ModeKind::Read,
            Mode::Write { .. } => ModeKind::Write,
            Mode::Search => ModeKind::Search,
        }
    }

    /// Returns the pending write text, if this is `Write`.
    pub fn write_text(&self) -> Option<&str> {
        match self {
            Mode::Write { text } => Some(text),
            _ => None,
        }
    }
}

/// A mode change that has already passed validation.
///
/// The only way to obtain one is through the constructors below, which is
/// what guarantees that a `Write` request always carries text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeRequest(Mode);

impl ModeRequest {
    /// Builds a request from a mode name and an optional payload.
    ///
    /// The payload is only meaningful for `Write`; it is ignored for the
    /// other modes.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyWritePayload`] when `kind` is `Write`
    /// and `payload` is absent or empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use patunay_core::{ModeKind, ModeRequest, ValidationError};
    ///
    /// assert!(ModeRequest::new(ModeKind::Write, Some("hello".into())).is_ok());
    /// assert_eq!(
    ///     ModeRequest::new(ModeKind::Write, None),
    ///     Err(ValidationError::EmptyWritePayload)
    /// );
    /// ```
    pub fn new(kind: ModeKind, payload: Option<String>) -> Result<Self, ValidationError> {
        match kind {
            ModeKind::Idle => Ok(Self(Mode::Idle)),
            ModeKind::Read => Ok(Self(Mode::Read)),
            ModeKind::Search => Ok(Self(Mode::Search)),
            ModeKind::Write => match payload {
                Some(text) if !text.is_empty() => Ok(Self(Mode::Write { text })),
                _ => Err(ValidationError::EmptyWritePayload),
            },
        }
    }

    /// Parses the wire form (`{"mode": "...", "data": ...}`) of a request.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownMode`] for an unrecognised mode name
    /// and [`ValidationError::EmptyWritePayload`] as for [`ModeRequest::new`].
    pub fn parse(mode: &str, payload: Option<String>) -> Result<Self, ValidationError> {
        Self::new(mode.parse()?, payload)
    }

    /// Shorthand for a `Write` request.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyWritePayload`] if `text` is empty.
    pub fn write(text: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(ModeKind::Write, Some(text.into()))
    }

    pub fn read() -> Self {
        Self(Mode::Read)
    }

    pub fn search() -> Self {
        Self(Mode::Search)
    }

    pub fn idle() -> Self {
        Self(Mode::Idle)
    }

    /// Borrows the validated mode.
    pub fn mode(&self) -> &Mode {
        &self.0
    }

    /// Consumes the request and returns the validated mode.
    pub fn into_mode(self) -> Mode {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_request_without_payload_is_rejected() {
        assert_eq!(
            ModeRequest::new(ModeKind::Write, None),
            Err(ValidationError::EmptyWritePayload)
        );
    }

    #[test]
    fn test_write_request_with_empty_payload_is_rejected() {
        assert_eq!(
            ModeRequest::write(""),
            Err(ValidationError::EmptyWritePayload)
        );
    }

    #[test]
    fn test_write_request_keeps_payload() {
        let req = ModeRequest::write("hello").unwrap();
        assert_eq!(req.mode().write_text(), Some("hello"));
        assert_eq!(req.mode().kind(), ModeKind::Write);
    }

    #[test]
    fn test_read_request_drops_payload() {
        // Arrange / Act
        let req = ModeRequest::new(ModeKind::Read, Some("ignored".to_string())).unwrap();

        // Assert: the payload must not leak into a non-write mode
        assert_eq!(req.into_mode(), Mode::Read);
    }

    #[test]
    fn test_parse_accepts_mixed_case_names() {
        assert_eq!(ModeRequest::parse("SEARCH", None).unwrap(), ModeRequest::search());
        assert_eq!(ModeRequest::parse(" Read ", None).unwrap(), ModeRequest::read());
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        let err = ModeRequest::parse("format", None).unwrap_err();
        assert_eq!(err, ValidationError::UnknownMode("format".to_string()));
        assert!(err.to_string().contains("format"));
    }

    #[test]
    fn test_default_mode_is_idle() {
        assert_eq!(Mode::default(), Mode::Idle);
        assert_eq!(Mode::default().write_text(), None);
    }

    #[test]
    fn test_mode_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ModeKind::Search).unwrap(), r#""search""#);
        assert_eq!(ModeKind::Write.to_string(), "write");
    }
}
