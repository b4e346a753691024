//! WebSocket server accepting pose-stream clients.
//!
//! Binds a `TcpListener` and spawns an accept loop that upgrades each
//! connection and runs a [`Session`] for it in its own task. The listener
//! is owned by the [`PoseServer`] handle; [`PoseServer::shutdown`] closes
//! it, cancels every session and waits for them to finish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::constants::ACCEPT_RETRY_DELAY;
use crate::session::{Session, SessionOptions, TransportError};
use crate::sink::PoseSink;
use crate::validator::PoseValidator;

/// Everything a connection task needs, shared across the accept loop.
#[derive(Debug)]
struct ConnectionContext {
    sink: Arc<dyn PoseSink>,
    validator: Arc<PoseValidator>,
    options: SessionOptions,
    handshake_timeout: Duration,
    max_message_size: usize,
}

/// Running pose-ingest server.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) leaves
/// the accept loop running until the runtime stops.
#[derive(Debug)]
pub struct PoseServer {
    /// Address the listener is actually bound to.
    local_addr: SocketAddr,
    /// Cancels the accept loop and, through child tokens, every session.
    shutdown: CancellationToken,
    /// Handle to the accept loop task.
    accept_handle: JoinHandle<()>,
}

impl PoseServer {
    /// Bind the listener and spawn the accept loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is invalid or cannot be bound.
    pub fn start(config: &Config, sink: Arc<dyn PoseSink>) -> Result<Self> {
        let addr = config.bind_addr()?;

        let listener = std::net::TcpListener::bind(addr)
            .with_context(|| format!("Failed to bind {addr}"))?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;

        log::info!("[Server] Listening on ws://{local_addr}");

        let ctx = Arc::new(ConnectionContext {
            sink,
            validator: Arc::new(PoseValidator::new(&config.validation)),
            options: config.session_options(),
            handshake_timeout: config.handshake_timeout(),
            max_message_size: config.max_message_size,
        });

        let shutdown = CancellationToken::new();
        let accept_handle = tokio::spawn(Self::accept_loop(listener, ctx, shutdown.clone()));

        Ok(Self {
            local_addr,
            shutdown,
            accept_handle,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every session, and wait for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.accept_handle.await {
            log::error!("[Server] Accept loop failed: {e}");
        }
    }

    /// Accept loop, runs as a tokio task.
    async fn accept_loop(
        listener: TcpListener,
        ctx: Arc<ConnectionContext>,
        shutdown: CancellationToken,
    ) {
        let mut sessions = JoinSet::new();

        loop {
            // Reap finished sessions so the set doesn't grow unbounded.
            while sessions.try_join_next().is_some() {}

            let accepted = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let id = generate_session_id();
                    log::info!("[Server] Client connected: {id} from {peer}");
                    sessions.spawn(Self::serve_connection(
                        stream,
                        peer,
                        id,
                        Arc::clone(&ctx),
                        shutdown.child_token(),
                    ));
                }
                Err(e) => {
                    log::error!("[Server] Accept error: {e}");
                    if !retry_backoff(&shutdown).await {
                        break;
                    }
                }
            }
        }

        drop(listener);
        log::info!(
            "[Server] Stopped accepting, waiting for {} session(s)",
            sessions.len()
        );
        while sessions.join_next().await.is_some() {}
        log::info!("[Server] Shutdown complete");
    }

    /// Upgrade one TCP connection and run its session to completion.
    async fn serve_connection(
        stream: TcpStream,
        peer: SocketAddr,
        id: String,
        ctx: Arc<ConnectionContext>,
        cancel: CancellationToken,
    ) {
        let handshake = tokio::time::timeout(
            ctx.handshake_timeout,
            tokio_tungstenite::accept_async_with_config(
                stream,
                Some(ws_config(ctx.max_message_size)),
            ),
        );

        let upgraded = tokio::select! {
            () = cancel.cancelled() => return,
            upgraded = handshake => upgraded,
        };

        let ws = match upgraded {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                log::warn!("[Server] {id} from {peer}: {}", TransportError::from(e));
                return;
            }
            Err(_) => {
                let err = TransportError::HandshakeTimeout(ctx.handshake_timeout);
                log::warn!("[Server] {id} from {peer}: {err}");
                return;
            }
        };

        let mut session = Session::new(
            id,
            Arc::clone(&ctx.sink),
            Arc::clone(&ctx.validator),
            ctx.options,
            cancel,
        );
        session.run(ws).await;
    }
}

/// Sleep before retrying `accept()`. Returns `false` if shutdown
/// interrupted the wait.
async fn retry_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(ACCEPT_RETRY_DELAY) => true,
    }
}

/// WebSocket limits for server connections.
fn ws_config(max_message_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);
    config
}

/// Generate a unique session ID using a monotonic counter + random suffix.
fn generate_session_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let rand: u16 = rand::random();
    format!("session:{seq:x}{rand:04x}")
}
