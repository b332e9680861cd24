//! Proof-of-work hashing
//!
//! The digest is SHA-256 applied twice. A digest qualifies for a difficulty `d`
//! when the first `d` characters of its lowercase hex form are all `'0'`.

use sha2::{Digest, Sha256};

/// Number of hex characters in a 32-byte digest
pub const DIGEST_HEX_LEN: u32 = 64;

/// Compute `SHA256(SHA256(payload))`
pub fn sha256d(payload: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(payload);
    Sha256::digest(first).into()
}

/// Reusable double-SHA256 hasher for tight search loops
#[derive(Clone, Default)]
pub struct Sha256dHasher {
    hasher: Sha256,
}

impl Sha256dHasher {
    /// Create a new hasher
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash data and return the digest
    pub fn hash(&mut self, data: &[u8]) -> [u8; 32] {
        self.hasher.update(data);
        let first = self.hasher.finalize_reset();
        self.hasher.update(first);
        self.hasher.finalize_reset().into()
    }
}

/// Count leading `'0'` characters of the digest's hex representation
pub fn leading_zero_nibbles(digest: &[u8; 32]) -> u32 {
    let mut count = 0;
    for byte in digest {
        if *byte == 0 {
            count += 2;
            continue;
        }
        if byte >> 4 == 0 {
            count += 1;
        }
        break;
    }
    count
}

/// Check whether a digest has at least `difficulty` leading zero hex characters
pub fn meets_difficulty(digest: &[u8; 32], difficulty: u32) -> bool {
    difficulty == 0 || leading_zero_nibbles(digest) >= difficulty
}
