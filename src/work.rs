//! Mutable working buffer for the search
//!
//! The target is encoded once per job. After that, nonce values are written
//! straight into the nonce window of the encoded bytes and the buffer is
//! re-hashed, without going back through the record codec.

use crate::crypto::{sha256d, Sha256dHasher};
use crate::record::TargetRecord;
use crate::types::{increment_be, NonceCounter, NonceWindow, MAX_INLINE_NONCE_LEN, RECORD_HEADER_LEN};
use crate::{Error, Result};

/// Encoded target plus the location of its searchable nonce bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkBuffer {
    bytes: Vec<u8>,
    window: NonceWindow,
}

impl WorkBuffer {
    /// Encode `record` and attach the window
    ///
    /// The record's nonce must be exactly extra-nonce-1 plus the window, and
    /// short enough for the fixed header to hold.
    pub fn new(record: &TargetRecord, window: NonceWindow) -> Result<Self> {
        if record.nonce.len() > MAX_INLINE_NONCE_LEN {
            return Err(Error::stratum(format!(
                "nonce of {} bytes exceeds the {}-byte inline limit",
                record.nonce.len(),
                MAX_INLINE_NONCE_LEN
            )));
        }
        if record.nonce.len() != window.end() - RECORD_HEADER_LEN {
            return Err(Error::stratum(format!(
                "nonce of {} bytes does not match window {:?}",
                record.nonce.len(),
                window
            )));
        }

        Ok(Self {
            bytes: record.encode(),
            window,
        })
    }

    pub fn window(&self) -> NonceWindow {
        self.window
    }

    /// Full encoded bytes, the hash input
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Current contents of the nonce window
    pub fn nonce(&self) -> &[u8] {
        &self.bytes[self.window.range()]
    }

    /// Lowercase hex of the nonce window, the value submitted to the pool
    pub fn nonce_hex(&self) -> String {
        hex::encode(self.nonce())
    }

    /// Overwrite the nonce window
    pub fn write_nonce(&mut self, nonce: &NonceCounter) -> Result<()> {
        if nonce.width() != self.window.len() {
            return Err(Error::worker(format!(
                "nonce width {} does not match window width {}",
                nonce.width(),
                self.window.len()
            )));
        }
        let range = self.window.range();
        self.bytes[range].copy_from_slice(nonce.as_bytes());
        Ok(())
    }

    /// Advance the window by one as a big-endian integer
    ///
    /// Returns `true` if the window wrapped around, meaning the whole nonce
    /// space has been used.
    pub fn increment_nonce(&mut self) -> bool {
        let range = self.window.range();
        increment_be(&mut self.bytes[range])
    }

    /// Like [`increment_nonce`](Self::increment_nonce) but surfaces overflow as an error
    pub fn advance(&mut self) -> Result<()> {
        if self.increment_nonce() {
            return Err(Error::NonceSpaceExhausted {
                width: self.window.len(),
            });
        }
        Ok(())
    }

    pub fn digest(&self) -> [u8; 32] {
        sha256d(&self.bytes)
    }

    /// Digest using a reusable hasher
    pub fn digest_with(&self, hasher: &mut Sha256dHasher) -> [u8; 32] {
        hasher.hash(&self.bytes)
    }

    /// Decode the buffer back into a record
    pub fn to_record(&self) -> Result<TargetRecord> {
        TargetRecord::decode(&self.bytes)
    }
}
