//! Session state shared between the listener and the search loop
//!
//! The job id and its target live behind one lock and are only ever read or
//! written together, so a reader can never pair a job id with another job's
//! target. Difficulty, extra-nonce and the inbox are advisory and use their own
//! locks.

use crate::record::TargetRecord;
use crate::stratum::messages::Message;
use crate::types::{NonceWindow, MAX_INLINE_NONCE_LEN};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;

/// Pool-assigned nonce prefix and the width of the searchable suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraNonce {
    pub extra_nonce_1: Vec<u8>,
    pub extra_nonce_2_len: usize,
}

impl ExtraNonce {
    pub fn window(&self) -> NonceWindow {
        NonceWindow::new(self.extra_nonce_1.len(), self.extra_nonce_2_len)
    }

    /// `extra_nonce_1` followed by a zero-filled extra-nonce-2
    pub fn initial_nonce(&self) -> Vec<u8> {
        let mut nonce = Vec::with_capacity(self.extra_nonce_1.len() + self.extra_nonce_2_len);
        nonce.extend_from_slice(&self.extra_nonce_1);
        nonce.resize(self.extra_nonce_1.len() + self.extra_nonce_2_len, 0);
        nonce
    }
}

/// Consistent view of the current job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub job_id: String,
    pub target: TargetRecord,
    pub window: NonceWindow,
}

/// Mutable state of one pool session
#[derive(Debug, Default)]
pub struct SessionState {
    job: Mutex<Option<JobSnapshot>>,
    difficulty: RwLock<Option<u64>>,
    extra_nonce: RwLock<Option<ExtraNonce>>,
    inbox: Mutex<VecDeque<Message>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the subscription's extra-nonce parts
    pub fn set_extranonce(&self, extra_nonce_1: Vec<u8>, extra_nonce_2_len: usize) -> Result<()> {
        let total = extra_nonce_1.len() + extra_nonce_2_len;
        if total > MAX_INLINE_NONCE_LEN {
            return Err(Error::stratum(format!(
                "extra-nonce of {} bytes exceeds the {}-byte limit",
                total, MAX_INLINE_NONCE_LEN
            )));
        }
        *self.extra_nonce.write() = Some(ExtraNonce {
            extra_nonce_1,
            extra_nonce_2_len,
        });
        Ok(())
    }

    pub fn extranonce(&self) -> Option<ExtraNonce> {
        self.extra_nonce.read().clone()
    }

    /// Install a new job
    ///
    /// The target's nonce is replaced by the session's extra-nonce, then job id,
    /// target and window are swapped in under a single lock.
    pub fn apply_notify(&self, job_id: impl Into<String>, target: TargetRecord) -> Result<()> {
        let extra_nonce = self
            .extranonce()
            .ok_or_else(|| Error::stratum("mining.notify received before subscription result"))?;

        let snapshot = JobSnapshot {
            job_id: job_id.into(),
            target: target.with_nonce(extra_nonce.initial_nonce()),
            window: extra_nonce.window(),
        };
        *self.job.lock() = Some(snapshot);
        Ok(())
    }

    /// Current job id and target, read together
    pub fn read_job(&self) -> Option<JobSnapshot> {
        self.job.lock().clone()
    }

    pub fn current_job_id(&self) -> Option<String> {
        self.job.lock().as_ref().map(|job| job.job_id.clone())
    }

    /// Whether `job_id` is still the current job
    pub fn is_current(&self, job_id: &str) -> bool {
        self.job
            .lock()
            .as_ref()
            .is_some_and(|job| job.job_id == job_id)
    }

    pub fn has_target(&self) -> bool {
        self.job.lock().is_some()
    }

    /// Replace the target only if `expected_job_id` is still current
    ///
    /// Returns whether the replacement happened.
    pub fn advance_target(&self, expected_job_id: &str, target: TargetRecord) -> bool {
        let mut job = self.job.lock();
        match job.as_mut() {
            Some(current) if current.job_id == expected_job_id => {
                current.target = target;
                true
            }
            _ => false,
        }
    }

    pub fn set_difficulty(&self, difficulty: u64) {
        *self.difficulty.write() = Some(difficulty);
    }

    pub fn difficulty(&self) -> Option<u64> {
        *self.difficulty.read()
    }

    pub fn push_message(&self, message: Message) {
        self.inbox.lock().push_back(message);
    }

    /// Take every queued message in arrival order
    pub fn drain_inbox(&self) -> Vec<Message> {
        self.inbox.lock().drain(..).collect()
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.lock().len()
    }
}
