//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. Server sessions and the `send` client both go
//! through this module rather than `tokio-tungstenite` directly.
//!
//! # Architecture
//!
//! [`split`] turns any handshaken `WebSocketStream` into a
//! ([`WsWriter`], [`WsReader`]) pair; [`connect`] does the client-side
//! handshake (plain or TLS) first. Readers yield [`WsMessage`], so callers
//! never match on raw tungstenite frames.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::codec::RawFrame;

/// Transport used by client connections.
pub type ClientTransport = MaybeTlsStream<tokio::net::TcpStream>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

impl WsMessage {
    /// Convert a tungstenite message. Raw `Frame` variants yield `None`.
    fn from_tungstenite(msg: tungstenite::Message) -> Option<Self> {
        match msg {
            tungstenite::Message::Text(text) => Some(Self::Text(text.to_string())),
            tungstenite::Message::Binary(data) => Some(Self::Binary(data.to_vec())),
            tungstenite::Message::Ping(data) => Some(Self::Ping(data.to_vec())),
            tungstenite::Message::Pong(data) => Some(Self::Pong(data.to_vec())),
            tungstenite::Message::Close(close_frame) => {
                let (code, reason) = close_frame
                    .map(|cf| (cf.code.into(), cf.reason.to_string()))
                    .unwrap_or((1005, String::new()));
                Some(Self::Close { code, reason })
            }
            tungstenite::Message::Frame(_) => None,
        }
    }

    /// Data payload of a text or binary message, `None` for control frames.
    pub fn into_raw_frame(self) -> Option<RawFrame> {
        match self {
            Self::Text(text) => Some(RawFrame::Text(text)),
            Self::Binary(data) => Some(RawFrame::Binary(data)),
            Self::Ping(_) | Self::Pong(_) | Self::Close { .. } => None,
        }
    }
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter<S = ClientTransport> {
    sink: SplitSink<WebSocketStream<S>, tungstenite::Message>,
}

impl<S> WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send a pose payload as a text or binary frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_frame(&mut self, frame: RawFrame) -> Result<()> {
        let msg = match frame {
            RawFrame::Text(text) => tungstenite::Message::Text(text.into()),
            RawFrame::Binary(data) => tungstenite::Message::Binary(data.into()),
        };
        self.sink.send(msg).await.context("WebSocket send_frame failed")
    }

    /// Send a pong frame in response to a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data.into()))
            .await
            .context("WebSocket send_pong failed")
    }

    /// Send a close frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .context("WebSocket send_close failed")
    }

    /// Flush pending writes and close the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader<S = ClientTransport> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(msg)) => {
                    if let Some(msg) = WsMessage::from_tungstenite(msg) {
                        return Some(Ok(msg));
                    }
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Split a handshaken WebSocket into independent writer/reader halves.
pub fn split<S>(ws: WebSocketStream<S>) -> (WsWriter<S>, WsReader<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = ws.split();
    (WsWriter { sink }, WsReader { stream })
}

/// Connect to a pose-ingest server.
///
/// Performs the WebSocket handshake (TLS for `wss://`) and returns split
/// (writer, reader) halves.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let url = http_to_ws_scheme(url);
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("WebSocket connect to {url} failed"))?;

    Ok(split(ws_stream))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://")
            .replace("http://", "ws://")
    }
}
