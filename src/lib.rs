//! Tuna Miner
//!
//! An async proof-of-work mining client for Stratum-style pools:
//! - Line-delimited JSON session with subscribe, authorize and submit
//! - Plutus-data target records with an in-place nonce window
//! - Exhaustive CPU search or an external batch kernel
//! - Stale-job fencing so results are only submitted for the current job

pub mod config;
pub mod crypto;
pub mod error;
pub mod miner;
pub mod record;
pub mod stratum;
pub mod types;
pub mod utils;
pub mod work;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use miner::{JobStats, Miner, MinerConfig};
pub use record::TargetRecord;
pub use types::{NonceCounter, NonceWindow};
pub use work::WorkBuffer;

/// Application information
pub const APP_NAME: &str = "tuna-miner";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
