//! Card-reader adapters.
//!
//! A reader adapter wraps one physical NFC reader subsystem.  It reports
//! reader attach/detach and card presence/removal as a stream of
//! [`ReaderEvent`]s and performs raw block reads and writes on the card that
//! is currently in the field.
//!
//! # Backends
//!
//! - [`mock::MockReader`] – in-memory tags with event and failure injection.
//!   Used by every test and by `--backend mock`.
//! - `pcsc::PcscReader` – PC/SC readers (ACR122U and friends), behind the
//!   `pcsc` cargo feature.
//!
//! # Error contract
//!
//! Every hardware call is a single attempt.  Failures come back verbatim as
//! [`HardwareError`]; nothing in this layer retries.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mock;

#[cfg(feature = "pcsc")]
pub mod pcsc;

/// Error type for reader hardware operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    /// The reader is not attached or the reader subsystem is not running.
    #[error("reader unavailable: {0}")]
    ReaderUnavailable(String),

    /// The card left the field before the operation completed.
    #[error("card removed during operation")]
    CardRemoved,

    /// The reader reported a transport or command failure.
    #[error("reader I/O failure: {0}")]
    Io(String),

    /// The reader did not answer in time.
    #[error("reader operation timed out")]
    Timeout,

    /// The reader answered with something we could not interpret.
    #[error("malformed reader response: {0}")]
    MalformedResponse(String),
}

/// Notification produced by a running reader adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// A reader with this name became available.
    ReaderAttached(String),
    /// The named reader went away.
    ReaderDetached(String),
    /// A card entered the field of `reader`.
    CardDetected { reader: String, uid: String },
    /// The card left the field of `reader`.
    CardRemoved { reader: String, uid: String },
    /// The monitor itself failed (e.g. the smart-card service stopped).
    Fault(HardwareError),
}

/// Abstraction over a reader backend.
///
/// Block addressing is absolute: `block` is the tag's own page/block number
/// and `block_size` the number of bytes per block, so `length` bytes starting
/// at `block` cover `length.div_ceil(block_size)` blocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReaderAdapter: Send + Sync {
    /// Starts monitoring and returns the event stream.
    ///
    /// Must be called before any other method.  Called again only after a
    /// failed start or once the previous stream has closed.
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<ReaderEvent>, HardwareError>;

    /// Enumerates the readers that are currently attached.
    async fn list_readers(&self) -> Result<Vec<String>, HardwareError>;

    /// Reads `length` bytes starting at `block` from the card on `reader`.
    async fn read_blocks(
        &self,
        reader: &str,
        block: u8,
        length: usize,
        block_size: usize,
    ) -> Result<Vec<u8>, HardwareError>;

    /// Writes `data` starting at `block` to the card on `reader`.
    ///
    /// `data` is always a whole number of blocks.
    async fn write_blocks(
        &self,
        reader: &str,
        block: u8,
        data: &[u8],
        block_size: usize,
    ) -> Result<(), HardwareError>;
}
