//! Nonce search strategies
//!
//! A [`SearchStrategy`] takes an encoded work buffer and returns candidate
//! nonces for its window. Two strategies exist: an exhaustive CPU walk and a
//! batch strategy that hands the whole target to an external kernel.

use crate::config::{Config, StrategyKind};
use crate::stratum::SessionState;
use crate::types::NonceCounter;
use crate::work::WorkBuffer;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Span;

pub mod cpu;
pub mod external;

pub use cpu::CpuStrategy;
pub use external::{BatchKernel, BatchStrategy, ExternalKernel};

/// Job a search was started for, used to detect staleness mid-search
#[derive(Debug, Clone)]
pub struct JobFence {
    session: Arc<SessionState>,
    job_id: String,
}

impl JobFence {
    pub fn new(session: Arc<SessionState>, job_id: impl Into<String>) -> Self {
        Self {
            session,
            job_id: job_id.into(),
        }
    }

    /// Whether a newer job has replaced this one
    pub fn is_stale(&self) -> bool {
        !self.session.is_current(&self.job_id)
    }
}

/// Inputs shared by every strategy
#[derive(Debug, Clone)]
pub struct SearchContext {
    /// Required leading zero hex characters
    pub difficulty: u32,
    pub cancellation: CancellationToken,
    pub fence: Option<JobFence>,
}

impl SearchContext {
    pub fn new(difficulty: u32, cancellation: CancellationToken) -> Self {
        Self {
            difficulty,
            cancellation,
            fence: None,
        }
    }

    pub fn with_fence(mut self, fence: JobFence) -> Self {
        self.fence = Some(fence);
        self
    }

    /// Whether the search should give up early
    pub fn should_stop(&self) -> bool {
        self.cancellation.is_cancelled() || self.fence.as_ref().is_some_and(JobFence::is_stale)
    }
}

/// Result of one search call
#[derive(Debug)]
pub struct SearchOutcome {
    /// Buffer handed back to the caller, nonce window at its last searched value
    pub work: WorkBuffer,
    /// Window-width nonces believed to meet the difficulty
    pub candidates: Vec<NonceCounter>,
    /// Hashes computed or estimated for this call
    pub hashes: u64,
    /// Search ended early due to cancellation or a newer job
    pub interrupted: bool,
}

/// Nonce search strategy
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    /// Strategy name for logging
    fn name(&self) -> &'static str;

    /// Search the window of `work` for nonces meeting `ctx.difficulty`
    async fn search(&self, work: WorkBuffer, ctx: SearchContext) -> Result<SearchOutcome>;
}

/// Build the configured strategy
pub fn create_strategy(config: &Config) -> Result<Box<dyn SearchStrategy>> {
    match config.strategy {
        StrategyKind::Cpu => Ok(Box::new(CpuStrategy::new(config.check_interval))),
        StrategyKind::External => {
            let kernel = ExternalKernel::from_config(config)?;
            Ok(Box::new(BatchStrategy::new(
                kernel,
                config.loops,
                config.hashes_per_loop,
                config.candidate_header_len,
            )))
        }
    }
}

/// Hashes per second over a time period
pub fn compute_hash_rate(hashes: u64, elapsed: Duration) -> f64 {
    if elapsed.as_secs_f64() > 0.0 {
        hashes as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    }
}

/// Tracing span for one search iteration
pub fn search_span(strategy: &str, job_id: &str) -> Span {
    tracing::info_span!("job", job_id = job_id, strategy = strategy)
}
