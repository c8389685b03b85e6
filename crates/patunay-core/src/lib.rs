//! # patunay-core
//!
//! Shared library for the Patunay NFC bridge containing the domain entities,
//! the tag block codec, and the JSON message types exchanged with the UI
//! shell.
//!
//! It has zero dependencies on async runtimes, card-reader drivers, or I/O.
//!
//! # Architecture overview
//!
//! Patunay registers physical artworks and binds each one to an NFC tag.  A
//! separate bridge process owns the card reader and talks to the desktop UI
//! over a message-passing boundary.  This crate is the vocabulary both sides
//! of that boundary agree on:
//!
//! - **`domain`** – Cards, modes, device status, and the result records the
//!   bridge produces (write results, search results, error reports).
//!
//! - **`codec`** – How application text is framed onto a tag's raw block
//!   storage and recovered from it.  Raw blocks are not self-describing, so
//!   the frame header and checksum are what stop a blank or corrupted tag from
//!   decoding into garbage.
//!
//! - **`protocol`** – The named channels and JSON payload shapes for inbound
//!   commands and outbound events.

pub mod codec;
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `patunay_core::DeviceStatus` instead of `patunay_core::domain::status::DeviceStatus`.
pub use codec::tag::{FormatError, TagCodec, TagLayout};
pub use domain::card::Card;
pub use domain::mode::{Mode, ModeKind, ModeRequest, ValidationError};
pub use domain::outcome::{ErrorKind, ErrorReport, SearchResult, WriteResult};
pub use domain::status::DeviceStatus;
pub use protocol::messages::{
    CardEvent, CommandResult, EventChannel, InboundCommand, InboundMessage, NfcEvent,
    OutboundMessage, ReaderInfo,
};
