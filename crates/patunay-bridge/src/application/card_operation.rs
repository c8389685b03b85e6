//! Tag reads and writes: block I/O through a [`ReaderAdapter`], framed by the
//! [`TagCodec`].
//!
//! A read is two-phase: the blocks covering the frame header are fetched
//! first, the header says how long the frame is, and then exactly the
//! remaining blocks are fetched.  A write encodes first, so text that does
//! not fit is rejected before the tag is touched.

use patunay_core::{ErrorKind, FormatError, TagCodec};
use thiserror::Error;
use tracing::debug;

use crate::infrastructure::reader::{HardwareError, ReaderAdapter};

/// Why a card operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Format(#[from] FormatError),
}

impl CardError {
    /// Category reported to the UI shell.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CardError::Hardware(_) => ErrorKind::Hardware,
            CardError::Format(_) => ErrorKind::Format,
        }
    }
}

/// What one read of a tag produced: the frame bytes and what they decode to.
///
/// The bytes are kept even when they do not decode, so a foreign or blank
/// tag still leaves a record of what was on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRead {
    pub raw: Vec<u8>,
    pub text: Result<String, FormatError>,
}

impl TagRead {
    pub fn into_text(self) -> Result<String, CardError> {
        self.text.map_err(CardError::from)
    }
}

/// Reads the frame stored on the card in `reader`.
///
/// Stops after the header blocks when the header is not ours.
///
/// # Errors
///
/// [`HardwareError`] if any block read fails.  Format problems are carried
/// in [`TagRead::text`].
pub async fn read_tag(
    adapter: &dyn ReaderAdapter,
    codec: &TagCodec,
    reader: &str,
) -> Result<TagRead, HardwareError> {
    let layout = codec.layout();

    let mut bytes = adapter
        .read_blocks(
            reader,
            layout.start_block,
            codec.header_read_len(),
            layout.block_size,
        )
        .await?;

    let total = match codec.frame_len(&bytes) {
        Ok(total) => total,
        Err(e) => {
            return Ok(TagRead {
                raw: bytes,
                text: Err(e),
            })
        }
    };
    if total > bytes.len() {
        let next = match block_after(codec, bytes.len()) {
            Ok(next) => next,
            Err(e) => {
                return Ok(TagRead {
                    raw: bytes,
                    text: Err(e),
                })
            }
        };
        let rest = adapter
            .read_blocks(reader, next, total - bytes.len(), layout.block_size)
            .await?;
        bytes.extend_from_slice(&rest);
    }

    let text = codec.decode(&bytes);
    debug!(reader, frame_len = total, decoded = text.is_ok(), "tag read");
    Ok(TagRead { raw: bytes, text })
}

/// Encodes `text` and writes it to the card in `reader`.
///
/// Returns the text that was written.
///
/// # Errors
///
/// [`CardError::Format`] if the text does not fit (the tag is untouched),
/// [`CardError::Hardware`] if the block write fails.
pub async fn write_text(
    adapter: &dyn ReaderAdapter,
    codec: &TagCodec,
    reader: &str,
    text: &str,
) -> Result<String, CardError> {
    let layout = codec.layout();
    let frame = codec.encode(text)?;
    adapter
        .write_blocks(reader, layout.start_block, &frame, layout.block_size)
        .await?;
    debug!(reader, bytes = frame.len(), "tag written");
    Ok(text.to_string())
}

/// Absolute block number that follows the first `offset` bytes of the frame.
fn block_after(codec: &TagCodec, offset: usize) -> Result<u8, FormatError> {
    let layout = codec.layout();
    let block = layout.start_block as usize + layout.blocks_for(offset);
    u8::try_from(block)
        .map_err(|_| FormatError::InvalidLayout(format!("block {block} is beyond addressable range")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
