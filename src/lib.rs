//! pose-ingest - WebSocket pose-stream ingestion service.
//!
//! Clients stream one pose update per WebSocket message. Every message is
//! decoded, validated and handed to a downstream sink, with backpressure
//! and per-message error isolation.
//!
//! # Architecture
//!
//! ```text
//! PoseServer ── accept ──► Session (one task per connection)
//!                             │ WsReader → codec::decode → PoseValidator
//!                             ▼
//!                        Arc<dyn PoseSink>  (shared, bounded)
//!                             ▼
//!                          consumer
//! ```
//!
//! # Modules
//!
//! - [`pose`] - Pose data model
//! - [`codec`] - Wire formats (JSON, delimited text, binary)
//! - [`validator`] - Finite/range/normalization checks
//! - [`sink`] - Sink trait and bounded queue implementation
//! - [`session`] - Per-connection state machine
//! - [`server`] - Listener and accept loop
//! - [`ws`] - WebSocket reader/writer halves and client connect
//! - [`config`] - Configuration loading

pub mod codec;
pub mod config;
pub mod constants;
pub mod pose;
pub mod server;
pub mod session;
pub mod sink;
pub mod validator;
pub mod ws;

// Re-export commonly used types
pub use codec::{decode, encode, DecodeError, RawFrame, WireFormat};
pub use config::Config;
pub use pose::{Orientation, Pose};
pub use server::PoseServer;
pub use session::{CloseReason, Session, SessionState, SessionStats, TransportError};
pub use sink::{BackpressurePolicy, ChannelSink, PoseSink, SinkError};
pub use validator::{PoseValidator, ValidationConfig, ValidationError};
