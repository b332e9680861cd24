//! Core types for nonce handling
//!
//! The searchable part of a target is the extra-nonce-2 window inside the
//! encoded record. [`NonceWindow`] locates it and [`NonceCounter`] walks it as a
//! fixed-width big-endian integer.

use crate::{Error, Result};
use std::fmt;
use std::ops::Range;

/// Bytes the record encoding places in front of the nonce field
///
/// Constructor tag (2 bytes), indefinite-array marker (1 byte) and the nonce
/// byte-string header (1 byte, valid while the nonce is shorter than 24 bytes).
pub const RECORD_HEADER_LEN: usize = 4;

/// Longest nonce whose byte-string header still fits in a single byte
pub const MAX_INLINE_NONCE_LEN: usize = 23;

/// Location of the mutable extra-nonce-2 bytes within an encoded record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NonceWindow {
    offset: usize,
    len: usize,
}

impl NonceWindow {
    /// Derive the window from the two pool-assigned nonce-part lengths
    pub const fn new(extra_nonce_1_len: usize, extra_nonce_2_len: usize) -> Self {
        Self {
            offset: RECORD_HEADER_LEN + extra_nonce_1_len,
            len: extra_nonce_2_len,
        }
    }

    /// First byte of the window
    pub const fn start(&self) -> usize {
        self.offset
    }

    /// One past the last byte of the window
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Window width in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the window has no searchable bytes
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte range of the window
    pub fn range(&self) -> Range<usize> {
        self.start()..self.end()
    }
}

/// Pure form of [`NonceWindow::new`] returning `(start, end)`
pub fn nonce_window(extra_nonce_1_len: usize, extra_nonce_2_len: usize) -> (usize, usize) {
    let window = NonceWindow::new(extra_nonce_1_len, extra_nonce_2_len);
    (window.start(), window.end())
}

/// Increment a big-endian integer in place
///
/// Returns `true` when the value wrapped around to zero.
pub fn increment_be(bytes: &mut [u8]) -> bool {
    for byte in bytes.iter_mut().rev() {
        let (next, carry) = byte.overflowing_add(1);
        *byte = next;
        if !carry {
            return false;
        }
    }
    true
}

/// Fixed-width big-endian counter over a nonce window
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonceCounter {
    bytes: Vec<u8>,
}

impl NonceCounter {
    /// Zero counter of the given width
    pub fn zero(width: usize) -> Self {
        Self {
            bytes: vec![0u8; width],
        }
    }

    /// Counter holding exactly these bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Interpret `bytes` as a big-endian integer and re-serialize it to `width` bytes
    ///
    /// Leading zero bytes beyond the width are dropped; a value that needs more
    /// than `width` bytes is rejected.
    pub fn from_be_slice(bytes: &[u8], width: usize) -> Result<Self> {
        let significant = bytes
            .iter()
            .position(|b| *b != 0)
            .map(|first| &bytes[first..])
            .unwrap_or(&[]);

        if significant.len() > width {
            return Err(Error::stratum(format!(
                "Nonce 0x{} does not fit in {} bytes",
                hex::encode(bytes),
                width
            )));
        }

        let mut padded = vec![0u8; width];
        padded[width - significant.len()..].copy_from_slice(significant);
        Ok(Self { bytes: padded })
    }

    /// Width in bytes
    pub fn width(&self) -> usize {
        self.bytes.len()
    }

    /// Big-endian bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex form, zero-padded to the width
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Display for NonceCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
