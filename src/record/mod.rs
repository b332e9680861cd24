//! Target record codec
//!
//! A [`TargetRecord`] is the unit of work: the pool ships it encoded inside
//! every `mining.notify`, and its encoded bytes are what the search hashes. The
//! encoding is a constructor-tagged CBOR array whose first field is the nonce, so
//! the nonce bytes always sit right after a fixed 4-byte header (see
//! [`crate::types::NonceWindow`]).

pub mod cbor;

use crate::types::MAX_INLINE_NONCE_LEN;
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cbor::{CborReader, CborWriter, Length, CONSTRUCTOR_0_TAG};
use std::fmt;

/// Number of fields in the record schema
pub const FIELD_COUNT: u64 = 7;

/// The hashed work record
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TargetRecord {
    pub nonce: Vec<u8>,
    pub miner: Vec<u8>,
    pub block_number: u64,
    pub current_hash: [u8; 32],
    pub leading_zeros: u64,
    pub target_number: u64,
    pub epoch_time: u64,
}

impl TargetRecord {
    /// Encode to the canonical byte form
    ///
    /// Encoding is deterministic: equal records always yield equal bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = CborWriter::new();
        writer.write_tag(CONSTRUCTOR_0_TAG);
        writer.begin_indefinite_array();
        writer.write_bytes(&self.nonce);
        writer.write_bytes(&self.miner);
        writer.write_uint(self.block_number);
        writer.write_bytes(&self.current_hash);
        writer.write_uint(self.leading_zeros);
        writer.write_uint(self.target_number);
        writer.write_uint(self.epoch_time);
        writer.write_break();
        writer.into_bytes()
    }

    /// Decode from bytes, rejecting truncated or mismatched input
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = CborReader::new(data);
        reader.expect_tag(CONSTRUCTOR_0_TAG)?;
        let layout = reader.expect_array(FIELD_COUNT)?;

        let nonce = reader.read_bytes()?;
        let miner = reader.read_bytes()?;
        let block_number = reader.read_uint()?;
        let current_hash: [u8; 32] = reader.read_bytes()?.try_into().map_err(|v: Vec<u8>| {
            Error::malformed(format!("current_hash must be 32 bytes, got {}", v.len()))
        })?;
        let leading_zeros = reader.read_uint()?;
        let target_number = reader.read_uint()?;
        let epoch_time = reader.read_uint()?;

        if layout == Length::Indefinite {
            reader.expect_break()?;
        }
        reader.finish()?;

        Ok(Self {
            nonce,
            miner,
            block_number,
            current_hash,
            leading_zeros,
            target_number,
            epoch_time,
        })
    }

    /// Decode a `mining.notify` payload given as hex or base64
    pub fn from_payload(payload: &str) -> Result<Self> {
        let payload = payload.trim();
        let bytes = if payload.len() % 2 == 0 && payload.bytes().all(|b| b.is_ascii_hexdigit()) {
            hex::decode(payload).map_err(|e| Error::malformed(format!("invalid hex payload: {}", e)))?
        } else {
            BASE64
                .decode(payload)
                .map_err(|e| Error::malformed(format!("payload is neither hex nor base64: {}", e)))?
        };
        Self::decode(&bytes)
    }

    /// Same record with the nonce replaced
    pub fn with_nonce(mut self, nonce: Vec<u8>) -> Self {
        self.nonce = nonce;
        self
    }

    /// Whether the nonce keeps the fixed 4-byte header in front of its bytes
    pub fn has_inline_nonce(&self) -> bool {
        self.nonce.len() <= MAX_INLINE_NONCE_LEN
    }

    /// Lowercase hex of the encoded form
    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }
}

impl fmt::Debug for TargetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetRecord")
            .field("nonce", &hex::encode(&self.nonce))
            .field("miner", &hex::encode(&self.miner))
            .field("block_number", &self.block_number)
            .field("current_hash", &hex::encode(self.current_hash))
            .field("leading_zeros", &self.leading_zeros)
            .field("target_number", &self.target_number)
            .field("epoch_time", &self.epoch_time)
            .finish()
    }
}
