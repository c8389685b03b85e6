//! The physical tag currently in the reader's field.

use serde::{Deserialize, Serialize};

/// A tag detected by the reader.
///
/// A `Card` exists only while the tag is physically present.  Its `uid` is
/// fixed for as long as the tag stays in the field; `raw_data` is filled in
/// once the tag's blocks have been read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Hex-encoded unique identifier reported by the tag (e.g. `"04A1B2C3"`).
    pub uid: String,
    /// Raw block contents, when they have been read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Vec<u8>>,
}

impl Card {
    /// Creates a card that has been detected but not read yet.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            raw_data: None,
        }
    }
}
