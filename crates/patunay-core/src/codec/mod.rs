//! Tag block codec: frames application text onto raw tag storage.

pub mod checksum;
pub mod tag;

pub use tag::{FormatError, TagCodec, TagLayout};
