//! Background reader for the pool connection
//!
//! Frames the inbound half of the stream into lines with a bounded
//! [`LinesCodec`] and dispatches each parsed message into the
//! [`SessionState`]. Each read is bounded by a timeout so cancellation is
//! noticed promptly.

use crate::stratum::messages::{Message, StratumMethod};
use crate::stratum::session::SessionState;
use crate::{Error, Result};
use futures::StreamExt;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Longest inbound line kept; longer lines are discarded up to their newline
pub const MAX_LINE_LENGTH: usize = 1 << 16;

/// Run until cancelled or the peer goes away
///
/// Returns `Ok(())` on cancellation. Read timeouts, transient read errors,
/// overlong lines and malformed messages are logged and never end the loop.
/// The one exception is the end of the stream: a zero-byte read (or a reset,
/// aborted or broken-pipe error) means the pool closed the connection and the
/// listener returns [`Error::Disconnected`].
pub async fn run_listener<R>(
    reader: R,
    session: Arc<SessionState>,
    read_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    // after a decode error the stream yields `None` once before resuming
    let mut resuming = false;

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Listener cancelled");
                return Ok(());
            }
            next = tokio::time::timeout(read_timeout, lines.next()) => next,
        };

        match next {
            Err(_) => {
                trace!("Read timed out, polling again");
            }
            Ok(None) if resuming => {
                resuming = false;
            }
            Ok(None) => {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                warn!(pending = lines.read_buffer().len(), "Pool closed the connection");
                return Err(Error::Disconnected);
            }
            Ok(Some(Ok(line))) => {
                resuming = false;
                if line.trim().is_empty() {
                    continue;
                }
                trace!(rx = %line, "Received line");
                if let Err(e) = dispatch(&session, &line) {
                    if e.is_transient() {
                        debug!(error = %e, "Dropping inbound message");
                    } else {
                        warn!(error = %e, category = e.category(), "Dropping inbound message");
                    }
                }
            }
            Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                resuming = true;
                debug!(limit = MAX_LINE_LENGTH, "Dropping overlong inbound line");
            }
            Ok(Some(Err(LinesCodecError::Io(e)))) => match e.kind() {
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                    warn!(error = %e, "Connection lost");
                    return Err(Error::Disconnected);
                }
                _ => {
                    resuming = true;
                    debug!(error = %e, "Transient read error");
                }
            },
        }
    }
}

/// Parse one line and apply it to the session
///
/// The message only reaches the inbox once its session effects are applied.
pub fn dispatch(session: &SessionState, line: &str) -> Result<()> {
    let message = Message::from_json(line).map_err(|e| match e {
        Error::Json(json) => Error::parse(format!("invalid JSON: {}", json)),
        other => other,
    })?;

    match &message {
        Message::Subscribed(result) => {
            let extra_nonce_1 = result.extra_nonce_1()?;
            let extra_nonce_2_len = result.extra_nonce_2_len()?;
            info!(
                extra_nonce_1 = %hex::encode(&extra_nonce_1),
                extra_nonce_2_len,
                "Subscribed"
            );
            session.set_extranonce(extra_nonce_1, extra_nonce_2_len)?;
        }
        Message::Notification(notification) => match notification.method {
            StratumMethod::Notify => {
                let job_id = notification
                    .job_id()
                    .ok_or_else(|| Error::parse("mining.notify params[0] must be a job id"))?;
                let target = notification.target()?;
                session.apply_notify(job_id, target)?;
            }
            StratumMethod::SetDifficulty => {
                let difficulty = notification
                    .difficulty()
                    .ok_or_else(|| Error::parse("mining.set_difficulty params[0] must be a number"))?;
                if notification.has_fractional_difficulty() {
                    warn!(
                        requested = %notification.params[0],
                        difficulty,
                        "Rounded fractional pool difficulty up"
                    );
                }
                session.set_difficulty(difficulty);
            }
            other => debug!(method = %other, "Ignoring client-side method from pool"),
        },
        Message::Ack(ack) => trace!(id = ack.id, result = ?ack.result, "Acknowledgement"),
    }

    session.push_message(message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample_record;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    const SUBSCRIBED: &str = r#"{"id":1,"result":[[],"0a0b",2],"error":null}"#;

    fn notify_line(job_id: &str) -> String {
        json!({"id": null, "method": "mining.notify", "params": [job_id, sample_record().to_hex()]})
            .to_string()
    }

    #[test]
    fn test_dispatch_subscription_then_notify() {
        let session = SessionState::new();
        dispatch(&session, SUBSCRIBED).unwrap();
        dispatch(&session, &notify_line("j1")).unwrap();

        let job = session.read_job().unwrap();
        assert_eq!(job.job_id, "j1");
        assert_eq!(job.target.nonce, vec![0x0a, 0x0b, 0, 0]);
        assert_eq!(session.inbox_len(), 2);
    }

    #[test]
    fn test_dispatch_notify_before_subscription_is_dropped() {
        let session = SessionState::new();
        assert_matches!(dispatch(&session, &notify_line("j1")), Err(Error::Stratum { .. }));
        assert!(!session.has_target());
        assert_eq!(session.inbox_len(), 0);
    }

    #[test]
    fn test_dispatch_difficulty_and_garbage() {
        let session = SessionState::new();
        dispatch(&session, r#"{"id":null,"method":"mining.set_difficulty","params":[12]}"#).unwrap();
        assert_eq!(session.difficulty(), Some(12));

        dispatch(&session, r#"{"id":null,"method":"mining.set_difficulty","params":[0.5]}"#).unwrap();
        assert_eq!(session.difficulty(), Some(1));

        assert_matches!(dispatch(&session, "{oops"), Err(Error::Parse { .. }));
        assert_matches!(
            dispatch(&session, r#"{"id":7,"method":"mining.reconnect","params":[]}"#),
            Err(Error::Parse { .. })
        );
        assert_eq!(session.inbox_len(), 2);
    }

    #[tokio::test]
    async fn test_listener_reads_split_lines() {
        let (client, mut pool) = tokio::io::duplex(1024);
        let session = Arc::new(SessionState::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_listener(
            client,
            Arc::clone(&session),
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        let line = notify_line("j9");
        let (head, tail) = line.split_at(10);
        pool.write_all(format!("{}\n{}", SUBSCRIBED, head).as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!session.has_target());

        pool.write_all(format!("{}\n", tail).as_bytes()).await.unwrap();
        for _ in 0..50 {
            if session.has_target() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(session.current_job_id().as_deref(), Some("j9"));

        shutdown.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_listener_survives_timeouts_and_reports_eof() {
        let (client, pool) = tokio::io::duplex(64);
        let session = Arc::new(SessionState::new());
        let task = tokio::spawn(run_listener(
            client,
            session,
            Duration::from_millis(5),
            CancellationToken::new(),
        ));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!task.is_finished());

        drop(pool);
        assert_matches!(task.await.unwrap(), Err(Error::Disconnected));
    }

    #[tokio::test]
    async fn test_listener_with_mock_reader() {
        let reader = tokio_test::io::Builder::new()
            .read(SUBSCRIBED.as_bytes())
            .read(b"\n{\"id\":4,\"result\":true}\n")
            .build();
        let session = Arc::new(SessionState::new());

        let result = run_listener(
            reader,
            Arc::clone(&session),
            Duration::from_secs(1),
            CancellationToken::new(),
        )
        .await;

        assert_matches!(result, Err(Error::Disconnected));
        assert!(session.extranonce().is_some());
        assert_eq!(session.inbox_len(), 2);
    }

    #[tokio::test]
    async fn test_listener_drops_overlong_line() {
        let (client, mut pool) = tokio::io::duplex(8192);
        let session = Arc::new(SessionState::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_listener(
            client,
            Arc::clone(&session),
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        // no newline for well past the limit
        let chunk = vec![b'x'; 4096];
        for _ in 0..(MAX_LINE_LENGTH / chunk.len() + 4) {
            pool.write_all(&chunk).await.unwrap();
        }
        pool.write_all(format!("\n{}\n", SUBSCRIBED).as_bytes()).await.unwrap();

        for _ in 0..100 {
            if session.extranonce().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(session.extranonce().is_some());
        assert_eq!(session.inbox_len(), 1);
        assert!(!task.is_finished());

        shutdown.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_listener_skips_blank_lines() {
        let reader = tokio_test::io::Builder::new()
            .read(b"\r\n\n")
            .read(SUBSCRIBED.as_bytes())
            .read(b"\r\n")
            .build();
        let session = Arc::new(SessionState::new());

        let result = run_listener(
            reader,
            Arc::clone(&session),
            Duration::from_secs(1),
            CancellationToken::new(),
        )
        .await;

        assert_matches!(result, Err(Error::Disconnected));
        assert_eq!(session.inbox_len(), 1);
    }
}
