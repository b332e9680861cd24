//! Exhaustive CPU search
//!
//! Walks the nonce window one value at a time, re-hashing the whole encoded
//! buffer after each increment, until a digest meets the difficulty.

use super::{compute_hash_rate, SearchContext, SearchOutcome, SearchStrategy};
use crate::crypto::{meets_difficulty, Sha256dHasher};
use crate::types::NonceCounter;
use crate::work::WorkBuffer;
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Instant;
use tokio::task;
use tracing::debug;

/// Default number of hashes between cancellation checks
pub const DEFAULT_CHECK_INTERVAL: u64 = 65_536;

/// How an exhaustive search ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchProgress {
    /// The window now holds a qualifying nonce
    Found { hashes: u64 },
    /// `should_stop` returned true before a nonce was found
    Interrupted { hashes: u64 },
}

impl SearchProgress {
    pub fn hashes(&self) -> u64 {
        match self {
            Self::Found { hashes } | Self::Interrupted { hashes } => *hashes,
        }
    }
}

/// Search `work` in place
///
/// The current window value is tested first, so a buffer that already meets
/// the difficulty is returned unchanged. Wrapping past the largest window
/// value fails with [`Error::NonceSpaceExhausted`].
pub fn exhaustive_search(
    work: &mut WorkBuffer,
    difficulty: u32,
    check_interval: u64,
    should_stop: impl Fn() -> bool,
) -> Result<SearchProgress> {
    let mut hasher = Sha256dHasher::new();
    let check_interval = check_interval.max(1);
    let mut hashes = 1u64;

    let mut digest = work.digest_with(&mut hasher);
    while !meets_difficulty(&digest, difficulty) {
        if hashes % check_interval == 0 && should_stop() {
            return Ok(SearchProgress::Interrupted { hashes });
        }
        work.advance()?;
        digest = work.digest_with(&mut hasher);
        hashes += 1;
    }

    Ok(SearchProgress::Found { hashes })
}

/// CPU strategy running [`exhaustive_search`] on the blocking pool
#[derive(Debug, Clone)]
pub struct CpuStrategy {
    check_interval: u64,
}

impl CpuStrategy {
    pub fn new(check_interval: u64) -> Self {
        Self {
            check_interval: check_interval.max(1),
        }
    }
}

impl Default for CpuStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_INTERVAL)
    }
}

#[async_trait]
impl SearchStrategy for CpuStrategy {
    fn name(&self) -> &'static str {
        "cpu"
    }

    async fn search(&self, mut work: WorkBuffer, ctx: SearchContext) -> Result<SearchOutcome> {
        let check_interval = self.check_interval;
        let started = Instant::now();

        let (work, progress) = task::spawn_blocking(move || {
            let progress = exhaustive_search(&mut work, ctx.difficulty, check_interval, || ctx.should_stop());
            (work, progress)
        })
        .await
        .map_err(|e| Error::worker(format!("CPU search task failed: {}", e)))?;

        let progress = progress?;
        debug!(
            hashes = progress.hashes(),
            rate = compute_hash_rate(progress.hashes(), started.elapsed()),
            nonce = %work.nonce_hex(),
            "CPU search finished"
        );

        Ok(match progress {
            SearchProgress::Found { hashes } => SearchOutcome {
                candidates: vec![NonceCounter::from_bytes(work.nonce())],
                work,
                hashes,
                interrupted: false,
            },
            SearchProgress::Interrupted { hashes } => SearchOutcome {
                candidates: Vec::new(),
                work,
                hashes,
                interrupted: true,
            },
        })
    }
}
