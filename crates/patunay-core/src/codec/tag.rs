//! Framing of UTF-8 text onto fixed-size tag blocks.
//!
//! Frame layout (all multi-byte integers big-endian), starting at the first
//! user block of the tag:
//!
//! ```text
//! [magic:1 = 0x50][version:1 = 0x01][length:2][header check:1][payload:length][checksum:1][zero padding]
//! ```
//!
//! The header check covers the four bytes before it and the trailing
//! checksum covers the payload, both as the two's-complement of the 8-bit
//! sum.  Any single corrupted byte in the frame therefore fails to decode,
//! including one in the length field.
//!
//! The frame is padded with zeros up to a whole number of blocks.  A reader
//! fetches the first block(s) covering the 5-byte header, learns the total
//! frame size from it via [`TagCodec::frame_len`], and then fetches exactly
//! the remaining blocks.
//!
//! A blank tag (all zeros), a tag written by another application, or a tag
//! whose write was interrupted fails to decode with a [`FormatError`] instead
//! of producing a truncated or garbled string.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::checksum;

/// First byte of every frame (`'P'`).
pub const FRAME_MAGIC: u8 = 0x50;

/// Current frame version.
pub const FRAME_VERSION: u8 = 0x01;

/// Size of the frame header in bytes, header check included.
pub const HEADER_LEN: usize = 5;

/// Size of the trailing checksum in bytes.
pub const CHECKSUM_LEN: usize = 1;

/// Errors produced while framing or unframing tag contents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The text does not fit in the tag's user area.
    #[error("payload of {needed} bytes exceeds tag capacity of {capacity} bytes")]
    TooLarge { needed: usize, capacity: usize },

    /// The header bytes are all zero.
    #[error("tag is blank")]
    BlankTag,

    /// The first byte is not [`FRAME_MAGIC`].
    #[error("unrecognised tag format: magic byte 0x{0:02X}")]
    BadMagic(u8),

    /// The frame version is not supported by this codec.
    #[error("unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    /// The header check byte does not match the header.
    #[error("corrupt frame header: stored check 0x{stored:02X}, computed 0x{computed:02X}")]
    CorruptHeader { stored: u8, computed: u8 },

    /// The declared payload length cannot fit on the tag.
    #[error("declared length {declared} exceeds maximum payload of {max} bytes")]
    LengthOutOfRange { declared: usize, max: usize },

    /// Fewer bytes were read than the header says the frame occupies.
    #[error("truncated frame: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// The stored checksum does not match the payload.
    #[error("checksum mismatch: stored 0x{stored:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch { stored: u8, computed: u8 },

    /// The payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// The tag layout itself is unusable.
    #[error("invalid tag layout: {0}")]
    InvalidLayout(String),
}

/// Physical geometry of the tag's user memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagLayout {
    /// First block (page) of user memory.
    #[serde(default = "default_start_block")]
    pub start_block: u8,
    /// Bytes per block.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Total user memory in bytes, starting at `start_block`.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_start_block() -> u8 {
    4
}
fn default_block_size() -> usize {
    4
}
fn default_capacity() -> usize {
    144
}

impl Default for TagLayout {
    /// NTAG213: 4-byte pages, user memory at pages 4..=39 (144 bytes).
    fn default() -> Self {
        Self {
            start_block: default_start_block(),
            block_size: default_block_size(),
            capacity: default_capacity(),
        }
    }
}

impl TagLayout {
    /// Checks that the geometry can hold at least an empty frame.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidLayout`] describing the first problem found.
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.block_size == 0 {
            return Err(FormatError::InvalidLayout("block_size must be non-zero".into()));
        }
        if self.capacity % self.block_size != 0 {
            return Err(FormatError::InvalidLayout(format!(
                "capacity {} is not a multiple of block_size {}",
                self.capacity, self.block_size
            )));
        }
        if self.capacity < HEADER_LEN + CHECKSUM_LEN {
            return Err(FormatError::InvalidLayout(format!(
                "capacity {} cannot hold a {}-byte frame header and checksum",
                self.capacity,
                HEADER_LEN + CHECKSUM_LEN
            )));
        }
        Ok(())
    }

    /// Rounds `len` up to a whole number of blocks.
    pub fn padded_len(&self, len: usize) -> usize {
        len.div_ceil(self.block_size) * self.block_size
    }

    /// Number of blocks spanned by `len` bytes.
    pub fn blocks_for(&self, len: usize) -> usize {
        len.div_ceil(self.block_size)
    }
}

/// Encoder/decoder bound to one tag layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagCodec {
    layout: TagLayout,
}

impl Default for TagCodec {
    fn default() -> Self {
        Self {
            layout: TagLayout::default(),
        }
    }
}

impl TagCodec {
    /// Creates a codec for `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidLayout`] if the layout fails validation.
    pub fn new(layout: TagLayout) -> Result<Self, FormatError> {
        layout.validate()?;
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &TagLayout {
        &self.layout
    }

    /// Longest payload, in UTF-8 bytes, that fits on the tag.
    pub fn max_payload_len(&self) -> usize {
        (self.layout.capacity - HEADER_LEN - CHECKSUM_LEN).min(u16::MAX as usize)
    }

    /// Number of bytes to read first so that the whole header is covered.
    pub fn header_read_len(&self) -> usize {
        self.layout.padded_len(HEADER_LEN)
    }

    /// Frames `text` into block-padded bytes ready to be written at
    /// `layout.start_block`.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::TooLarge`] when the text does not fit; the text
    /// is never truncated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use patunay_core::TagCodec;
    ///
    /// let codec = TagCodec::default();
    /// let bytes = codec.encode("hello").unwrap();
    /// assert_eq!(bytes.len() % 4, 0);
    /// assert_eq!(codec.decode(&bytes).unwrap(), "hello");
    /// ```
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, FormatError> {
        let payload = text.as_bytes();
        if payload.len() > self.max_payload_len() {
            return Err(FormatError::TooLarge {
                needed: payload.len() + HEADER_LEN + CHECKSUM_LEN,
                capacity: self.layout.capacity,
            });
        }

        let frame_len = HEADER_LEN + payload.len() + CHECKSUM_LEN;
        let mut buf = Vec::with_capacity(self.layout.padded_len(frame_len));
        buf.push(FRAME_MAGIC);
        buf.push(FRAME_VERSION);
        buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        buf.push(checksum::compute(&buf));
        buf.extend_from_slice(payload);
        buf.push(checksum::compute(payload));
        buf.resize(self.layout.padded_len(frame_len), 0x00);
        Ok(buf)
    }

    /// Validates the header at the start of `header` and returns the total
    /// block-padded frame length in bytes.
    ///
    /// `header` only needs to contain the first [`HEADER_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::BlankTag`], [`FormatError::BadMagic`],
    /// [`FormatError::UnsupportedVersion`], [`FormatError::CorruptHeader`],
    /// [`FormatError::LengthOutOfRange`], or [`FormatError::Truncated`] if
    /// the header is shorter than [`HEADER_LEN`] bytes.
    pub fn frame_len(&self, header: &[u8]) -> Result<usize, FormatError> {
        let payload_len = self.parse_header(header)?;
        Ok(self
            .layout
            .padded_len(HEADER_LEN + payload_len + CHECKSUM_LEN))
    }

    /// Recovers the original text from bytes read starting at
    /// `layout.start_block`.
    ///
    /// Bytes after the frame (padding or stale data from an earlier, longer
    /// write) are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] if the bytes do not hold a complete, intact
    /// frame.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, FormatError> {
        let payload_len = self.parse_header(bytes)?;
        let needed = HEADER_LEN + payload_len + CHECKSUM_LEN;
        if bytes.len() < needed {
            return Err(FormatError::Truncated {
                needed,
                available: bytes.len(),
            });
        }

        let payload = &bytes[HEADER_LEN..HEADER_LEN + payload_len];
        let stored = bytes[HEADER_LEN + payload_len];
        if !checksum::verify(payload, stored) {
            return Err(FormatError::ChecksumMismatch {
                stored,
                computed: checksum::compute(payload),
            });
        }

        let text = String::from_utf8(payload.to_vec()).map_err(|_| FormatError::InvalidUtf8)?;
        tracing::trace!(payload_len, "decoded tag frame");
        Ok(text)
    }

    /// Returns the declared payload length after checking the header fields.
    fn parse_header(&self, bytes: &[u8]) -> Result<usize, FormatError> {
        if bytes.len() < HEADER_LEN {
            if !bytes.is_empty() && bytes.iter().all(|&b| b == 0) {
                return Err(FormatError::BlankTag);
            }
            return Err(FormatError::Truncated {
                needed: HEADER_LEN,
                available: bytes.len(),
            });
        }

        let header = &bytes[..HEADER_LEN];
        if header.iter().all(|&b| b == 0) {
            return Err(FormatError::BlankTag);
        }
        if header[0] != FRAME_MAGIC {
            return Err(FormatError::BadMagic(header[0]));
        }
        if header[1] != FRAME_VERSION {
            return Err(FormatError::UnsupportedVersion(header[1]));
        }

        let stored = header[4];
        if !checksum::verify(&header[..4], stored) {
            return Err(FormatError::CorruptHeader {
                stored,
                computed: checksum::compute(&header[..4]),
            });
        }

        let declared = u16::from_be_bytes([header[2], header[3]]) as usize;
        if declared > self.max_payload_len() {
            return Err(FormatError::LengthOutOfRange {
                declared,
                max: self.max_payload_len(),
            });
        }
        Ok(declared)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn codec() -> TagCodec {
        TagCodec::default()
    }

    #[test]
    fn test_encode_writes_header_payload_and_checksum() {
        // Arrange / Act
        let bytes = codec().encode("hi").unwrap();

        // Assert: 5 header + 2 payload + 1 checksum = 8, already block-aligned
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &[FRAME_MAGIC, FRAME_VERSION, 0x00, 0x02]);
        assert_eq!(bytes[4], checksum::compute(&bytes[..4]));
        assert_eq!(&bytes[5..7], b"hi");
        assert_eq!(bytes[7], checksum::compute(b"hi"));
    }

    #[test]
    fn test_encode_decode_round_trip_ascii() {
        let c = codec();
        let text = "artwork:7f3c9e2a";
        assert_eq!(c.decode(&c.encode(text).unwrap()).unwrap(), text);
    }

    #[test]
    fn test_encode_decode_round_trip_multibyte_utf8() {
        let c = codec();
        let text = "Likha ng sining: 芸術 🎨";
        assert_eq!(c.decode(&c.encode(text).unwrap()).unwrap(), text);
    }

    #[test]
    fn test_round_trip_empty_string() {
        let c = codec();
        assert_eq!(c.decode(&c.encode("").unwrap()).unwrap(), "");
    }

    #[test]
    fn test_round_trip_at_exact_capacity() {
        // Arrange: the largest payload that fits (144 - 5 - 1 = 138 bytes)
        let c = codec();
        let text = "x".repeat(c.max_payload_len());

        // Act
        let bytes = c.encode(&text).unwrap();

        // Assert
        assert_eq!(bytes.len(), c.layout().capacity);
        assert_eq!(c.decode(&bytes).unwrap(), text);
    }

    #[test]
    fn test_encode_rejects_text_over_capacity() {
        let c = codec();
        let text = "x".repeat(c.max_payload_len() + 1);
        assert!(matches!(c.encode(&text), Err(FormatError::TooLarge { .. })));
    }

    #[test]
    fn test_decode_blank_tag_fails() {
        assert_eq!(codec().decode(&[0u8; 16]), Err(FormatError::BlankTag));
    }

    #[test]
    fn test_decode_foreign_data_fails_with_bad_magic() {
        // An NDEF TLV (0x03) where our frame should start
        let bytes = [0x03, 0x0C, 0xD1, 0x01, 0x08, 0x55, 0x01, 0x61];
        assert_eq!(codec().decode(&bytes), Err(FormatError::BadMagic(0x03)));
    }

    #[test]
    fn test_decode_unknown_version_fails() {
        let mut bytes = codec().encode("hello").unwrap();
        bytes[1] = 0x09;
        assert_eq!(codec().decode(&bytes), Err(FormatError::UnsupportedVersion(0x09)));
    }

    /// A header for `len` with a valid check byte.
    fn header(len: u16) -> Vec<u8> {
        let mut bytes = vec![FRAME_MAGIC, FRAME_VERSION];
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.push(checksum::compute(&bytes));
        bytes
    }

    #[test]
    fn test_decode_rejects_length_beyond_capacity() {
        let mut bytes = header(0xFFFF);
        bytes.resize(8, 0);
        assert!(matches!(
            codec().decode(&bytes),
            Err(FormatError::LengthOutOfRange { declared: 0xFFFF, .. })
        ));
    }

    #[test]
    fn test_decode_detects_corrupted_length() {
        // Arrange: one more byte declared, so the checksum would land in the
        // zero padding
        let mut bytes = codec().encode("hey").unwrap();
        bytes[3] += 1;

        // Act / Assert
        assert!(matches!(
            codec().decode(&bytes),
            Err(FormatError::CorruptHeader { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_read() {
        // Arrange: only the first block of a longer frame was read
        let bytes = codec().encode("hello world").unwrap();

        // Act
        let result = codec().decode(&bytes[..8]);

        // Assert
        assert!(matches!(result, Err(FormatError::Truncated { .. })));
    }

    #[test]
    fn test_decode_detects_corrupted_payload() {
        let mut bytes = codec().encode("hello").unwrap();
        bytes[5] ^= 0x20;
        assert!(matches!(
            codec().decode(&bytes),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8_with_valid_checksum() {
        // Arrange: build a frame by hand around bytes that are not UTF-8
        let payload = [0xC3, 0x28];
        let mut bytes = header(2);
        bytes.extend_from_slice(&payload);
        bytes.push(checksum::compute(&payload));

        // Act / Assert
        assert_eq!(codec().decode(&bytes), Err(FormatError::InvalidUtf8));
    }

    #[test]
    fn test_decode_ignores_stale_bytes_after_frame() {
        // Arrange: a short write over a previously longer one
        let c = codec();
        let mut bytes = c.encode("a much longer previous value").unwrap();
        let short = c.encode("new").unwrap();
        bytes[..short.len()].copy_from_slice(&short);

        // Act / Assert
        assert_eq!(c.decode(&bytes).unwrap(), "new");
    }

    #[test]
    fn test_frame_len_from_header_block() {
        let c = codec();
        let bytes = c.encode("hello world").unwrap();
        let len = c.frame_len(&bytes[..c.header_read_len()]).unwrap();
        assert_eq!(len, bytes.len());
    }

    #[test]
    fn test_header_read_len_covers_header_for_large_blocks() {
        let c = TagCodec::new(TagLayout {
            start_block: 4,
            block_size: 16,
            capacity: 752,
        })
        .unwrap();
        assert_eq!(c.header_read_len(), 16);
    }

    #[test]
    fn test_layout_validation_rejects_zero_block_size() {
        let layout = TagLayout {
            block_size: 0,
            ..TagLayout::default()
        };
        assert!(matches!(TagCodec::new(layout), Err(FormatError::InvalidLayout(_))));
    }

    #[test]
    fn test_layout_validation_rejects_misaligned_capacity() {
        let layout = TagLayout {
            capacity: 145,
            ..TagLayout::default()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_layout_blocks_for_rounds_up() {
        let layout = TagLayout::default();
        assert_eq!(layout.blocks_for(1), 1);
        assert_eq!(layout.blocks_for(4), 1);
        assert_eq!(layout.blocks_for(5), 2);
    }

    /// Arbitrary UTF-8 text of at most `max` bytes.
    fn text_within(max: usize) -> impl Strategy<Value = String> {
        prop::collection::vec(any::<char>(), 0..=max).prop_map(move |chars| {
            let mut text = String::new();
            for ch in chars {
                if text.len() + ch.len_utf8() > max {
                    break;
                }
                text.push(ch);
            }
            text
        })
    }

    proptest! {
        #[test]
        fn test_round_trip_for_any_text_within_capacity(
            text in text_within(TagCodec::default().max_payload_len())
        ) {
            let c = codec();
            let bytes = c.encode(&text).unwrap();
            prop_assert_eq!(bytes.len() % c.layout().block_size, 0);
            prop_assert_eq!(c.decode(&bytes), Ok(text));
        }

        #[test]
        fn test_any_single_byte_corruption_fails_to_decode(
            text in text_within(TagCodec::default().max_payload_len()),
            position in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            // Arrange: corrupt one byte of header, payload or checksum
            let c = codec();
            let mut bytes = c.encode(&text).unwrap();
            let frame_len = HEADER_LEN + text.len() + CHECKSUM_LEN;
            let at = position.index(frame_len);
            bytes[at] ^= flip;

            // Act
            let result = c.decode(&bytes);

            // Assert
            prop_assert!(result.is_err(), "byte {} ^ 0x{:02X} decoded as {:?}", at, flip, result);
        }
    }
}
