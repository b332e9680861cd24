//! Pool connection
//!
//! Owns the duplex stream. The read half is handed to a background listener
//! task; the write half sits behind an async mutex so outbound lines never
//! interleave.

use crate::stratum::listener::run_listener;
use crate::stratum::messages::StratumRequest;
use crate::stratum::session::SessionState;
use crate::{Error, Result};
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Largest serialized request, excluding the newline
pub const MAX_PAYLOAD_SIZE: usize = 1024;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection life-cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Subscribed,
    Authorized,
    Streaming,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::Authorized => "authorized",
            Self::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Connection settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Identity used for authorize and submit (`address` or `address.worker`)
    pub identity: String,
    pub password: String,
    /// Bound on a single listener read
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    /// How long shutdown waits for the listener before aborting it
    pub shutdown_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(identity: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            password: password.into(),
            read_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Live session with a pool
pub struct Connection {
    session_id: Uuid,
    session: Arc<SessionState>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    listener: parking_lot::Mutex<Option<JoinHandle<Result<()>>>>,
    shutdown: CancellationToken,
    phase: parking_lot::Mutex<ConnectionState>,
    config: ConnectionConfig,
}

impl Connection {
    /// Open a TCP connection to the pool and start listening
    pub async fn connect(host: &str, port: u16, config: ConnectionConfig) -> Result<Self> {
        info!(host, port, "Connecting to pool");
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::timeout(format!("connect to {}:{}", host, port)))??;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream, config))
    }

    /// Wrap an already-open duplex stream and start listening
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_stream<S>(stream: S, config: ConnectionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session_id = Uuid::new_v4();
        let session = Arc::new(SessionState::new());
        let shutdown = CancellationToken::new();
        let (reader, writer) = tokio::io::split(stream);

        let span = info_span!("stratum_listener", session = %session_id);
        let handle = tokio::spawn(
            run_listener(
                reader,
                Arc::clone(&session),
                config.read_timeout,
                shutdown.child_token(),
            )
            .instrument(span),
        );

        debug!(session = %session_id, "Connection established");

        Self {
            session_id,
            session,
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            listener: parking_lot::Mutex::new(Some(handle)),
            shutdown,
            phase: parking_lot::Mutex::new(ConnectionState::Connected),
            config,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Shared session state fed by the listener
    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub fn state(&self) -> ConnectionState {
        let phase = *self.phase.lock();
        if phase == ConnectionState::Authorized && self.session.has_target() {
            ConnectionState::Streaming
        } else {
            phase
        }
    }

    /// Serialize and write one request
    ///
    /// Requests larger than [`MAX_PAYLOAD_SIZE`] are refused before any bytes
    /// are written.
    pub async fn send(&self, request: &StratumRequest) -> Result<()> {
        let json = request.to_json()?;
        if json.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                size: json.len(),
                limit: MAX_PAYLOAD_SIZE,
            });
        }

        let mut line = json.into_bytes();
        line.push(b'\n');

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::Disconnected)?;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send `mining.subscribe`
    pub async fn subscribe(&self) -> Result<()> {
        self.send(&StratumRequest::subscribe()).await?;
        *self.phase.lock() = ConnectionState::Subscribed;
        debug!("Sent subscribe");
        Ok(())
    }

    /// Send `mining.authorize`
    pub async fn authorize(&self) -> Result<()> {
        let request = StratumRequest::authorize(&self.config.identity, &self.config.password);
        self.send(&request).await?;
        *self.phase.lock() = ConnectionState::Authorized;
        debug!(identity = %self.config.identity, "Sent authorize");
        Ok(())
    }

    /// Send `mining.submit` for a nonce
    pub async fn submit(&self, job_id: &str, nonce_hex: &str) -> Result<()> {
        let request = StratumRequest::submit(&self.config.identity, job_id, nonce_hex);
        self.send(&request).await
    }

    /// Non-blocking liveness check of the listener task
    ///
    /// Returns the listener's error once it has ended.
    pub fn check_listener(&self) -> Result<()> {
        let mut slot = self.listener.lock();
        match slot.as_ref() {
            None => return Err(Error::listener("listener is not running")),
            Some(handle) if !handle.is_finished() => return Ok(()),
            Some(_) => {}
        }

        match slot.take().and_then(|handle| handle.now_or_never()) {
            Some(Ok(Ok(()))) => Err(Error::listener("listener stopped")),
            Some(Ok(Err(e))) => Err(e),
            Some(Err(join_err)) => Err(Error::listener(format!("listener task failed: {}", join_err))),
            None => Err(Error::listener("listener state unavailable")),
        }
    }

    /// Close the stream, then cancel and join the listener
    pub async fn shutdown(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Error closing write half");
            }
        }

        self.shutdown.cancel();
        *self.phase.lock() = ConnectionState::Disconnected;

        let handle = self.listener.lock().take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
                Ok(Ok(Ok(()))) | Ok(Ok(Err(Error::Disconnected))) => {}
                Ok(Ok(Err(e))) => debug!(error = %e, "Listener ended with error"),
                Ok(Err(e)) => warn!(error = %e, "Listener task failed"),
                Err(_) => {
                    warn!(
                        timeout = ?self.config.shutdown_timeout,
                        "Listener did not stop in time, aborting"
                    );
                    handle.abort();
                }
            }
        }
        info!(session = %self.session_id, "Disconnected from pool");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn config() -> ConnectionConfig {
        let mut config = ConnectionConfig::new("addr1.rig", "x");
        config.read_timeout = Duration::from_millis(20);
        config.shutdown_timeout = Duration::from_millis(500);
        config
    }

    #[tokio::test]
    async fn test_handshake_lines() {
        let (client, pool) = tokio::io::duplex(4096);
        let connection = Connection::from_stream(client, config());
        assert_eq!(connection.state(), ConnectionState::Connected);

        connection.subscribe().await.unwrap();
        connection.authorize().await.unwrap();
        connection.submit("job-1", "00ff").await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Authorized);

        let mut lines = BufReader::new(pool).lines();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"{"id":1,"method":"mining.subscribe","params":[""]}"#
        );
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"{"id":2,"method":"mining.authorize","params":["addr1.rig","x"]}"#
        );
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"{"id":3,"method":"mining.submit","params":["addr1.rig","job-1","00ff"]}"#
        );

        connection.shutdown().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_write() {
        let (client, pool) = tokio::io::duplex(8192);
        let connection = Connection::from_stream(client, config());

        let job_id = "j".repeat(1100);
        assert_matches!(
            connection.submit(&job_id, "00").await,
            Err(Error::PayloadTooLarge { limit: 1024, .. })
        );

        connection.submit("ok", "00").await.unwrap();
        let mut lines = BufReader::new(pool).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        assert!(first.contains("\"ok\""));

        connection.shutdown().await;
    }

    #[tokio::test]
    async fn test_check_listener_reports_disconnect() {
        let (client, pool) = tokio::io::duplex(1024);
        let connection = Connection::from_stream(client, config());
        assert!(connection.check_listener().is_ok());

        drop(pool);
        let mut outcome = Ok(());
        for _ in 0..100 {
            outcome = connection.check_listener();
            if outcome.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_matches!(outcome, Err(Error::Disconnected));
        assert_matches!(connection.check_listener(), Err(Error::ListenerFailed { .. }));
    }

    #[tokio::test]
    async fn test_send_after_shutdown() {
        let (client, _pool) = tokio::io::duplex(1024);
        let connection = Connection::from_stream(client, config());
        connection.shutdown().await;
        assert_matches!(connection.subscribe().await, Err(Error::Disconnected));
        assert_matches!(connection.check_listener(), Err(Error::ListenerFailed { .. }));
    }
}
