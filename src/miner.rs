//! Search and submit loop
//!
//! Each iteration drains the session inbox, checks the listener is still
//! alive, snapshots the current job, searches it and submits the results.
//! Results are dropped whenever the job they were computed for is no longer
//! current.

use crate::config::{Config, MAX_DIFFICULTY};
use crate::stratum::messages::{Message, StratumMethod, SUBMIT_ACK_ID};
use crate::stratum::{Connection, JobSnapshot};
use crate::utils::format_hash_rate;
use crate::work::WorkBuffer;
use crate::worker::{compute_hash_rate, search_span, JobFence, SearchContext, SearchStrategy};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Settings for the mining loop
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Difficulty used unless the pool's value is followed
    pub difficulty: u32,
    pub follow_pool_difficulty: bool,
    /// Sleep while no job is available
    pub idle_delay: Duration,
    pub report_interval: Duration,
}

impl MinerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            difficulty: config.difficulty,
            follow_pool_difficulty: config.follow_pool_difficulty,
            idle_delay: config.idle_delay,
            report_interval: config.report_interval,
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            difficulty: 8,
            follow_pool_difficulty: false,
            idle_delay: Duration::from_secs(1),
            report_interval: Duration::from_secs(10),
        }
    }
}

/// Throughput counters for the current job
#[derive(Debug, Clone)]
pub struct JobStats {
    pub hashes: u64,
    pub submissions: u64,
    pub accepted: u64,
    pub rejected: u64,
    started: Instant,
    next_report: Instant,
    report_interval: Duration,
}

impl JobStats {
    pub fn new(report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            hashes: 0,
            submissions: 0,
            accepted: 0,
            rejected: 0,
            started: now,
            next_report: now + report_interval,
            report_interval,
        }
    }

    /// Start counting for a new job
    pub fn reset(&mut self) {
        *self = Self::new(self.report_interval);
    }

    pub fn record_hashes(&mut self, hashes: u64) {
        self.hashes = self.hashes.saturating_add(hashes);
    }

    pub fn record_submission(&mut self) {
        self.submissions += 1;
    }

    pub fn record_ack(&mut self, accepted: bool) {
        if accepted {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Hashes per second since the job started
    pub fn hash_rate(&self) -> f64 {
        compute_hash_rate(self.hashes, self.elapsed())
    }

    /// Whether a periodic report is due, advancing the schedule if so
    pub fn report_due(&mut self, now: Instant) -> bool {
        if now < self.next_report {
            return false;
        }
        while self.next_report <= now {
            self.next_report += self.report_interval.max(Duration::from_millis(1));
        }
        true
    }
}

/// The foreground mining driver
pub struct Miner {
    connection: Arc<Connection>,
    strategy: Box<dyn SearchStrategy>,
    config: MinerConfig,
    stats: JobStats,
    shutdown: CancellationToken,
}

impl Miner {
    pub fn new(
        connection: Arc<Connection>,
        strategy: Box<dyn SearchStrategy>,
        config: MinerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let stats = JobStats::new(config.report_interval);
        Self {
            connection,
            strategy,
            config,
            stats,
            shutdown,
        }
    }

    pub fn stats(&self) -> &JobStats {
        &self.stats
    }

    /// Run until shutdown is requested or a fatal error occurs
    ///
    /// Listener failures, oversized submissions and nonce-space exhaustion
    /// end the loop with an error.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            strategy = self.strategy.name(),
            difficulty = self.config.difficulty,
            follow_pool = self.config.follow_pool_difficulty,
            "Mining loop started"
        );

        loop {
            if self.shutdown.is_cancelled() {
                info!("Mining loop stopped");
                return Ok(());
            }

            self.drain_inbox();
            self.connection.check_listener()?;

            let Some(job) = self.connection.session().read_job() else {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.idle_delay) => {}
                    _ = self.shutdown.cancelled() => {}
                }
                continue;
            };

            let span = search_span(self.strategy.name(), &job.job_id);
            self.mine_job(job).instrument(span).await?;
        }
    }

    /// Difficulty for the next search
    pub fn effective_difficulty(&self) -> u32 {
        if self.config.follow_pool_difficulty {
            if let Some(pool) = self.connection.session().difficulty() {
                return pool.min(MAX_DIFFICULTY as u64) as u32;
            }
        }
        self.config.difficulty
    }

    fn drain_inbox(&mut self) {
        for message in self.connection.session().drain_inbox() {
            match message {
                Message::Notification(notification) => match notification.method {
                    StratumMethod::Notify => {
                        info!(
                            "New job: {} ({}, submissions={}, time={:.3}s)",
                            notification.job_id().unwrap_or_default(),
                            format_hash_rate(self.stats.hash_rate()),
                            self.stats.submissions,
                            self.stats.elapsed().as_secs_f64()
                        );
                        info!(
                            difficulty = self.effective_difficulty(),
                            pool_difficulty = ?self.connection.session().difficulty(),
                            "Difficulty"
                        );
                        self.stats.reset();
                    }
                    StratumMethod::SetDifficulty => {
                        debug!(difficulty = ?notification.difficulty(), "New difficulty");
                    }
                    other => debug!(method = %other, "Ignoring message"),
                },
                Message::Ack(ack) if ack.id == SUBMIT_ACK_ID => {
                    self.stats.record_ack(ack.accepted());
                    if ack.accepted() {
                        debug!("Successfully submitted nonce");
                    } else {
                        let err = Error::SubmissionRejected {
                            id: ack.id,
                            reason: ack.reason(),
                        };
                        error!(error = %err, "Error submitting nonce");
                    }
                }
                Message::Ack(ack) => {
                    if ack.accepted() {
                        info!(identity = %self.connection.identity(), "Authorized");
                    } else {
                        warn!(reason = %ack.reason(), "Authorization rejected");
                    }
                }
                Message::Subscribed(result) => debug!(id = result.id, "Subscription acknowledged"),
            }
        }
    }

    async fn mine_job(&mut self, job: JobSnapshot) -> Result<()> {
        let session = Arc::clone(self.connection.session());
        let difficulty = self.effective_difficulty();
        let work = WorkBuffer::new(&job.target, job.window)?;

        let ctx = SearchContext::new(difficulty, self.shutdown.child_token())
            .with_fence(JobFence::new(Arc::clone(&session), job.job_id.clone()));
        let outcome = self.strategy.search(work, ctx).await?;
        self.stats.record_hashes(outcome.hashes);

        if self.stats.report_due(Instant::now()) {
            info!("{}", format_hash_rate(self.stats.hash_rate()));
        }

        if outcome.interrupted || !session.is_current(&job.job_id) {
            debug!(candidates = outcome.candidates.len(), "Discarding results for stale job");
            return Ok(());
        }

        let mut work = outcome.work;
        for candidate in outcome.candidates {
            if !session.is_current(&job.job_id) {
                debug!("Job changed between submissions");
                break;
            }

            work.write_nonce(&candidate)?;
            let digest = work.digest();
            let nonce_hex = work.nonce_hex();
            info!(
                nonce = %nonce_hex,
                hash = %hex::encode(digest),
                identity = %self.connection.identity(),
                "Submitting nonce"
            );
            self.connection.submit(&job.job_id, &nonce_hex).await?;
            self.stats.record_submission();

            work.advance()?;
            let next_target = work.to_record()?;
            if !session.advance_target(&job.job_id, next_target) {
                debug!("Job replaced before target advance");
            }
        }

        Ok(())
    }
}
