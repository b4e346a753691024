//! Per-connection ingestion session.
//!
//! Each accepted WebSocket gets one [`Session`], running as its own tokio
//! task. The session owns the receive loop for that connection and moves
//! through:
//!
//! ```text
//! Open ──► Receiving ──► Closing ──► Closed
//!             │  ▲
//!             └──┘ one message: decode → validate → sink
//! ```
//!
//! Decode and validation failures drop the offending message and keep the
//! connection open. Only transport failures, a closed sink, the idle
//! timeout, or server shutdown end the session, and they end only this one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::codec::{self, RawFrame};
use crate::constants::CLOSE_TIMEOUT;
use crate::pose::Pose;
use crate::sink::{BackpressurePolicy, PoseSink, SinkError};
use crate::validator::PoseValidator;
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Connection-level failure. Ends the affected session only.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The WebSocket upgrade failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    /// The client did not finish the upgrade in time.
    #[error("handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),
    /// Reading from the socket failed.
    #[error("read failed: {0:#}")]
    Read(anyhow::Error),
    /// Writing to the socket failed.
    #[error("write failed: {0:#}")]
    Write(anyhow::Error),
    /// No message arrived within the idle timeout.
    #[error("idle for {0:?}")]
    IdleTimeout(Duration),
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, receive loop not started.
    Open,
    /// Processing inbound messages.
    Receiving,
    /// Shutting the socket down.
    Closing,
    /// Terminal; socket released.
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// Client sent a close frame.
    ClientClosed {
        /// Close code sent by the client.
        code: u16,
    },
    /// Stream ended without a close frame.
    StreamEnded,
    /// Transport failure or idle timeout.
    Transport(TransportError),
    /// The sink stopped accepting poses.
    SinkClosed,
    /// Server shutdown cancelled the session.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed { code } => write!(f, "client closed ({code})"),
            Self::StreamEnded => write!(f, "stream ended"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::SinkClosed => write!(f, "sink closed"),
            Self::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Per-session message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Data messages received (text or binary).
    pub received: u64,
    /// Poses accepted by the sink.
    pub accepted: u64,
    /// Messages that failed to decode.
    pub decode_errors: u64,
    /// Poses that failed validation.
    pub validation_errors: u64,
    /// Valid poses dropped because of backpressure or shutdown.
    pub dropped: u64,
    /// Times forwarding had to wait for sink capacity.
    pub backpressure_waits: u64,
}

/// Per-session behaviour knobs, derived from [`Config`](crate::config::Config).
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// What to do when the sink is full.
    pub backpressure: BackpressurePolicy,
    /// Close the session after this long without a message.
    pub idle_timeout: Option<Duration>,
}

/// One client connection's ingestion pipeline.
pub struct Session {
    id: String,
    sink: Arc<dyn PoseSink>,
    validator: Arc<PoseValidator>,
    options: SessionOptions,
    cancel: CancellationToken,
    state: SessionState,
    stats: SessionStats,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session in the `Open` state.
    ///
    /// `cancel` is this session's own token; cancelling it closes only
    /// this connection.
    pub fn new(
        id: String,
        sink: Arc<dyn PoseSink>,
        validator: Arc<PoseValidator>,
        options: SessionOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            sink,
            validator,
            options,
            cancel,
            state: SessionState::Open,
            stats: SessionStats::default(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Message counters so far.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Drive the connection until it closes, then release the socket.
    pub async fn run<S>(&mut self, ws: WebSocketStream<S>) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut writer, mut reader) = ws::split(ws);

        self.transition(SessionState::Receiving);
        let reason = self.receive_loop(&mut writer, &mut reader).await;

        self.transition(SessionState::Closing);
        let send_close = matches!(
            reason,
            CloseReason::Shutdown
                | CloseReason::SinkClosed
                | CloseReason::Transport(TransportError::IdleTimeout(_))
        );
        let id = &self.id;
        let closing = async {
            if send_close {
                if let Err(e) = writer.send_close().await {
                    log::debug!("[Session] {id} close frame not sent: {e:#}");
                }
            }
            if let Err(e) = writer.close().await {
                log::debug!("[Session] {id} socket close: {e:#}");
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
            log::warn!("[Session] {id} peer not reading, abandoning close after {CLOSE_TIMEOUT:?}");
        }
        drop(reader);

        self.transition(SessionState::Closed);
        let s = self.stats;
        log::info!(
            "[Session] {} closed ({}): received={} accepted={} decode_errors={} validation_errors={} dropped={}",
            self.id,
            reason,
            s.received,
            s.accepted,
            s.decode_errors,
            s.validation_errors,
            s.dropped
        );
        reason
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("[Session] {} {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    /// Receive loop: returns the reason the connection must close.
    async fn receive_loop<S>(
        &mut self,
        writer: &mut WsWriter<S>,
        reader: &mut WsReader<S>,
    ) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let idle_timeout = self.options.idle_timeout;

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return CloseReason::Shutdown,
                next = next_message(reader, idle_timeout) => next,
            };

            let msg = match next {
                Err(elapsed) => return CloseReason::Transport(TransportError::IdleTimeout(elapsed)),
                Ok(None) => return CloseReason::StreamEnded,
                Ok(Some(Err(e))) => return CloseReason::Transport(TransportError::Read(e)),
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                WsMessage::Ping(data) => {
                    let sent = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return CloseReason::Shutdown,
                        sent = writer.send_pong(data) => sent,
                    };
                    if let Err(e) = sent {
                        return CloseReason::Transport(TransportError::Write(e));
                    }
                }
                WsMessage::Pong(_) => {}
                WsMessage::Close { code, reason } => {
                    log::debug!("[Session] {} close frame {code}: {reason}", self.id);
                    return CloseReason::ClientClosed { code };
                }
                data => {
                    if let Some(raw) = data.into_raw_frame() {
                        if let Some(stop) = self.handle_frame(&raw).await {
                            return stop;
                        }
                    }
                }
            }
        }
    }

    /// Decode, validate and forward one message.
    ///
    /// Returns `Some` only when the session has to stop.
    async fn handle_frame(&mut self, raw: &RawFrame) -> Option<CloseReason> {
        self.stats.received += 1;

        let pose = match codec::decode(raw) {
            Ok(pose) => pose,
            Err(e) => {
                self.stats.decode_errors += 1;
                log::warn!("[Session] {} dropped undecodable message: {e}", self.id);
                return None;
            }
        };

        let pose = match self.validator.validate(pose) {
            Ok(pose) => pose,
            Err(e) => {
                self.stats.validation_errors += 1;
                log::warn!("[Session] {} dropped invalid pose: {e}", self.id);
                return None;
            }
        };

        self.forward(pose).await
    }

    /// Submit to the sink, applying the backpressure policy.
    async fn forward(&mut self, pose: Pose) -> Option<CloseReason> {
        let mut pending = pose;
        loop {
            let rejected = match self.sink.submit(pending) {
                Ok(()) => {
                    self.stats.accepted += 1;
                    log::debug!("[Session] {} accepted {pending}", self.id);
                    return None;
                }
                Err(SinkError::Closed) => return Some(CloseReason::SinkClosed),
                Err(SinkError::Backpressure(rejected)) => rejected,
            };

            match self.options.backpressure {
                BackpressurePolicy::Drop => {
                    self.stats.dropped += 1;
                    log::warn!("[Session] {} sink full, dropped {rejected}", self.id);
                    return None;
                }
                BackpressurePolicy::Wait => {
                    self.stats.backpressure_waits += 1;
                    log::debug!("[Session] {} sink full, waiting", self.id);
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => {
                            self.stats.dropped += 1;
                            return Some(CloseReason::Shutdown);
                        }
                        ready = self.sink.ready() => {
                            if ready.is_err() {
                                return Some(CloseReason::SinkClosed);
                            }
                        }
                    }
                    pending = rejected;
                }
            }
        }
    }
}

/// Next message from the reader, bounded by the idle timeout if set.
///
/// `Err` carries the elapsed timeout.
async fn next_message<S>(
    reader: &mut WsReader<S>,
    idle_timeout: Option<Duration>,
) -> Result<Option<anyhow::Result<WsMessage>>, Duration>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, reader.recv())
            .await
            .map_err(|_elapsed| limit),
        None => Ok(reader.recv().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, WireFormat};
    use crate::pose::Orientation;
    use crate::sink::ChannelSink;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::tungstenite::Message;

    type Outcome = (CloseReason, SessionStats, SessionState);

    fn pose(x: f64) -> Pose {
        Pose::new([x, 0.0, 0.0], Orientation::IDENTITY)
    }

    /// Spawn a session on one end of an in-memory socket with `buffer`
    /// bytes of capacity, returning the raw client stream and the session task.
    async fn start_raw_session(
        buffer: usize,
        sink: Arc<dyn PoseSink>,
        options: SessionOptions,
        cancel: CancellationToken,
    ) -> (WebSocketStream<DuplexStream>, JoinHandle<Outcome>) {
        let (client_io, server_io) = tokio::io::duplex(buffer);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;

        let mut session = Session::new(
            "session:test".to_string(),
            sink,
            Arc::new(PoseValidator::default()),
            options,
            cancel,
        );
        assert_eq!(session.state(), SessionState::Open);

        let handle = tokio::spawn(async move {
            let reason = session.run(server).await;
            (reason, session.stats(), session.state())
        });

        (client, handle)
    }

    /// Like [`start_raw_session`] with a roomy buffer, split into the
    /// crate's writer/reader halves.
    async fn start_session(
        sink: Arc<dyn PoseSink>,
        options: SessionOptions,
        cancel: CancellationToken,
    ) -> (WsWriter<DuplexStream>, WsReader<DuplexStream>, JoinHandle<Outcome>) {
        let (client, handle) = start_raw_session(64 * 1024, sink, options, cancel).await;
        let (writer, reader) = ws::split(client);
        (writer, reader, handle)
    }

    async fn finish(handle: JoinHandle<Outcome>) -> Outcome {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Timed out waiting for session to close")
            .expect("Session task panicked")
    }

    async fn recv_pose(rx: &mut mpsc::Receiver<Pose>) -> Pose {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Timed out waiting for pose")
            .expect("Sink channel closed")
    }

    fn text(s: &str) -> RawFrame {
        RawFrame::Text(s.to_string())
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_close_session() {
        let (sink, mut rx) = ChannelSink::new(8);
        let (mut client, _client_rx, handle) =
            start_session(Arc::new(sink), SessionOptions::default(), CancellationToken::new()).await;

        client.send_frame(text("abc")).await.unwrap();
        client
            .send_frame(text(r#"{"pos":[0,0,0],"rot":[0,0,0,1]}"#))
            .await
            .unwrap();

        assert_eq!(recv_pose(&mut rx).await, Pose::origin());

        client.send_close().await.unwrap();
        let (reason, stats, state) = finish(handle).await;

        assert!(matches!(reason, CloseReason::ClientClosed { .. }), "{reason}");
        assert_eq!(state, SessionState::Closed);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.accepted, 1);
        assert!(rx.try_recv().is_err(), "pose must be submitted exactly once");
    }

    #[tokio::test]
    async fn test_invalid_pose_dropped_and_session_continues() {
        let (sink, mut rx) = ChannelSink::new(8);
        let (mut client, _client_rx, handle) =
            start_session(Arc::new(sink), SessionOptions::default(), CancellationToken::new()).await;

        client.send_frame(text("NaN,0,0,0,0,0,1")).await.unwrap();
        client.send_frame(text("0,0,0,0,0,0,5")).await.unwrap();
        client
            .send_frame(encode(&pose(3.0), WireFormat::Binary))
            .await
            .unwrap();

        assert_eq!(recv_pose(&mut rx).await, pose(3.0));

        client.send_close().await.unwrap();
        let (_, stats, _) = finish(handle).await;
        assert_eq!(stats.validation_errors, 2);
        assert_eq!(stats.accepted, 1);
    }

    #[tokio::test]
    async fn test_backpressure_suspends_without_dropping() {
        let (sink, mut rx) = ChannelSink::new(1);
        let (mut client, _client_rx, handle) =
            start_session(Arc::new(sink), SessionOptions::default(), CancellationToken::new()).await;

        for x in [1.0, 2.0, 3.0] {
            client.send_frame(encode(&pose(x), WireFormat::Json)).await.unwrap();
        }

        // Let the session fill the sink and park on the second pose.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        for x in [1.0, 2.0, 3.0] {
            assert_eq!(recv_pose(&mut rx).await, pose(x));
        }

        client.send_close().await.unwrap();
        let (_, stats, _) = finish(handle).await;
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.dropped, 0);
        assert!(stats.backpressure_waits >= 1);
    }

    #[tokio::test]
    async fn test_drop_policy_discards_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        let options = SessionOptions {
            backpressure: BackpressurePolicy::Drop,
            idle_timeout: None,
        };
        let (mut client, _client_rx, handle) =
            start_session(Arc::new(sink), options, CancellationToken::new()).await;

        for x in [1.0, 2.0, 3.0] {
            client.send_frame(encode(&pose(x), WireFormat::Text)).await.unwrap();
        }
        client.send_close().await.unwrap();
        let (_, stats, _) = finish(handle).await;

        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.dropped, 2);
        assert_eq!(recv_pose(&mut rx).await, pose(1.0));
    }

    #[tokio::test]
    async fn test_cancel_closes_session_and_notifies_client() {
        let (sink, _rx) = ChannelSink::new(1);
        let cancel = CancellationToken::new();
        let (_client, mut client_rx, handle) =
            start_session(Arc::new(sink), SessionOptions::default(), cancel.clone()).await;

        cancel.cancel();
        let (reason, _, state) = finish(handle).await;
        assert!(matches!(reason, CloseReason::Shutdown), "{reason}");
        assert_eq!(state, SessionState::Closed);

        match client_rx.recv().await {
            Some(Ok(WsMessage::Close { .. })) => {}
            other => panic!("Expected Close, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_session() {
        let (sink, _rx) = ChannelSink::new(1);
        let options = SessionOptions {
            backpressure: BackpressurePolicy::Wait,
            idle_timeout: Some(Duration::from_millis(50)),
        };
        let (_client, _client_rx, handle) =
            start_session(Arc::new(sink), options, CancellationToken::new()).await;

        let (reason, _, _) = finish(handle).await;
        assert!(
            matches!(reason, CloseReason::Transport(TransportError::IdleTimeout(_))),
            "{reason}"
        );
    }

    #[tokio::test]
    async fn test_closed_sink_ends_session() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        let (mut client, _client_rx, handle) =
            start_session(Arc::new(sink), SessionOptions::default(), CancellationToken::new()).await;

        client.send_frame(encode(&Pose::origin(), WireFormat::Json)).await.unwrap();
        let (reason, _, _) = finish(handle).await;
        assert!(matches!(reason, CloseReason::SinkClosed), "{reason}");
    }

    #[tokio::test]
    async fn test_dropped_client_ends_session() {
        let (sink, _rx) = ChannelSink::new(1);
        let (client, client_rx, handle) =
            start_session(Arc::new(sink), SessionOptions::default(), CancellationToken::new()).await;

        drop(client);
        drop(client_rx);
        let (reason, _, state) = finish(handle).await;
        assert!(
            matches!(reason, CloseReason::StreamEnded | CloseReason::Transport(_)),
            "{reason}"
        );
        assert_eq!(state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_ping_answered_and_pong_ignored() {
        let (sink, mut rx) = ChannelSink::new(8);
        let (client, handle) = start_raw_session(
            64 * 1024,
            Arc::new(sink),
            SessionOptions::default(),
            CancellationToken::new(),
        )
        .await;
        let (mut client_tx, mut client_rx) = client.split();

        client_tx.send(Message::Ping(b"x".to_vec().into())).await.unwrap();
        match tokio::time::timeout(Duration::from_secs(2), client_rx.next()).await {
            Ok(Some(Ok(Message::Pong(data)))) => assert_eq!(data.to_vec(), b"x".to_vec()),
            other => panic!("Expected Pong, got: {other:?}"),
        }

        client_tx.send(Message::Pong(b"y".to_vec().into())).await.unwrap();
        client_tx
            .send(Message::Text(r#"{"pos":[1,0,0],"rot":[0,0,0,1]}"#.into()))
            .await
            .unwrap();
        assert_eq!(recv_pose(&mut rx).await, pose(1.0));

        client_tx.send(Message::Close(None)).await.unwrap();
        let (reason, stats, _) = finish(handle).await;
        assert!(matches!(reason, CloseReason::ClientClosed { .. }), "{reason}");
        assert_eq!(stats.received, 1);
        assert_eq!(stats.accepted, 1);
    }

    #[tokio::test]
    async fn test_cancel_finishes_when_client_stops_reading() {
        let (sink, _rx) = ChannelSink::new(8);
        let cancel = CancellationToken::new();
        let (client, handle) =
            start_raw_session(64, Arc::new(sink), SessionOptions::default(), cancel.clone()).await;
        let (mut client_tx, _client_rx) = client.split();

        // Pings force pong writes into a socket nobody drains.
        let flood = tokio::spawn(async move {
            for _ in 0..64 {
                if client_tx.send(Message::Ping(vec![0u8; 100].into())).await.is_err() {
                    break;
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        cancel.cancel();
        let (reason, _, state) = finish(handle).await;
        assert!(matches!(reason, CloseReason::Shutdown), "{reason}");
        assert_eq!(state, SessionState::Closed);

        flood.abort();
    }
}
