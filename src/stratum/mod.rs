//! Stratum-style pool protocol
//!
//! Newline-delimited JSON over a stream socket. The [`Connection`] owns the
//! socket and spawns a listener that keeps the shared [`SessionState`] up to
//! date; the search loop reads that state and submits through the connection.

pub mod connection;
pub mod listener;
pub mod messages;
pub mod session;

pub use connection::{Connection, ConnectionConfig, ConnectionState, MAX_PAYLOAD_SIZE};
pub use messages::{Ack, Message, Notification, StratumMethod, StratumRequest, SubscriptionResult};
pub use session::{ExtraNonce, JobSnapshot, SessionState};
