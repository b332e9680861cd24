//! Batch search through an external accelerator kernel
//!
//! The kernel is opaque: it receives the encoded target, the difficulty and a
//! loop budget, and returns candidate byte strings. Each candidate starts with a
//! fixed-size header that is stripped before the rest is used as the nonce.

use super::{SearchContext, SearchOutcome, SearchStrategy};
use crate::config::Config;
use crate::types::NonceCounter;
use crate::work::WorkBuffer;
use crate::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Hashes one kernel loop covers
pub const DEFAULT_HASHES_PER_LOOP: u64 = 256 * 32 * 32;

/// Opaque batch search
#[async_trait]
pub trait BatchKernel: Send + Sync {
    /// Search for nonces of `encoded_target` meeting `difficulty`
    ///
    /// Candidates still carry the kernel's header bytes.
    async fn search(&self, encoded_target: &[u8], difficulty: u32, loops: u32) -> Result<Vec<Vec<u8>>>;
}

/// Kernel run as a child process
///
/// The program is invoked as `<program> <args..> <target_hex> <difficulty> <loops>`
/// and must print one hex candidate per line on stdout.
#[derive(Debug, Clone)]
pub struct ExternalKernel {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalKernel {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let command = config
            .external_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::config("external strategy requires --external-command"))?;

        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::config("empty external command"))?;
        let args = parts.chain(config.external_args.iter().cloned()).collect();

        info!(program = %program, "Using external search kernel");
        Ok(Self::new(program, args, config.external_timeout))
    }

    fn parse_output(stdout: &[u8]) -> Vec<Vec<u8>> {
        String::from_utf8_lossy(stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match hex::decode(line.trim_start_matches("0x")) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(line, error = %e, "Ignoring malformed kernel output line");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl BatchKernel for ExternalKernel {
    async fn search(&self, encoded_target: &[u8], difficulty: u32, loops: u32) -> Result<Vec<Vec<u8>>> {
        debug!(program = %self.program, args = ?self.args, difficulty, loops, "Running kernel");

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(hex::encode(encoded_target))
            .arg(difficulty.to_string())
            .arg(loops.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::external_process(format!("Failed to spawn {}: {}", self.program, e)))?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::timeout("external kernel"))?
            .map_err(|e| Error::external_process(format!("Kernel process failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::external_process(format!(
                "Kernel exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(Self::parse_output(&output.stdout))
    }
}

/// Strategy that delegates each search to a [`BatchKernel`]
pub struct BatchStrategy<K> {
    kernel: K,
    loops: u32,
    hashes_per_loop: u64,
    header_len: usize,
}

impl<K: BatchKernel> BatchStrategy<K> {
    pub fn new(kernel: K, loops: u32, hashes_per_loop: u64, header_len: usize) -> Self {
        Self {
            kernel,
            loops,
            hashes_per_loop,
            header_len,
        }
    }

    /// Hashes credited for one kernel call
    pub fn hashes_per_batch(&self) -> u64 {
        self.hashes_per_loop.saturating_mul(self.loops as u64)
    }

    /// Strip the header and fit each candidate to the window width
    ///
    /// Candidates that are too short or too large are dropped.
    pub fn normalize_candidates(&self, raw: Vec<Vec<u8>>, width: usize) -> Vec<NonceCounter> {
        raw.into_iter()
            .filter_map(|candidate| {
                let Some(body) = candidate.get(self.header_len..) else {
                    warn!(candidate = %hex::encode(&candidate), "Candidate shorter than its header");
                    return None;
                };
                match NonceCounter::from_be_slice(body, width) {
                    Ok(nonce) => Some(nonce),
                    Err(e) => {
                        warn!(candidate = %hex::encode(&candidate), error = %e, "Dropping candidate");
                        None
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
impl<K: BatchKernel> SearchStrategy for BatchStrategy<K> {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn search(&self, work: WorkBuffer, ctx: SearchContext) -> Result<SearchOutcome> {
        let started = Instant::now();
        let raw = tokio::select! {
            raw = self.kernel.search(work.as_bytes(), ctx.difficulty, self.loops) => Some(raw?),
            _ = ctx.cancellation.cancelled() => None,
        };
        let Some(raw) = raw else {
            debug!("Kernel search cancelled");
            return Ok(SearchOutcome {
                work,
                candidates: Vec::new(),
                hashes: 0,
                interrupted: true,
            });
        };

        let candidates = self.normalize_candidates(raw, work.window().len());
        debug!(
            candidates = candidates.len(),
            elapsed = ?started.elapsed(),
            "Kernel search finished"
        );

        Ok(SearchOutcome {
            work,
            candidates,
            hashes: self.hashes_per_batch(),
            interrupted: false,
        })
    }
}
