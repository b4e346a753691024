//! Application-wide constants for pose-ingest.
//!
//! Defaults for every [`Config`](crate::config::Config) field live here so
//! the config layer, the CLI and the tests agree on a single value.
//!
//! # Categories
//!
//! - **Network**: listen address and WebSocket limits
//! - **Timeouts**: handshake, idle-read and close timeouts
//! - **Sink**: downstream queue sizing
//! - **Validation**: pose sanity thresholds

use std::time::Duration;

// ============================================================================
// Network
// ============================================================================

/// Default listen address for the WebSocket server.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8765";

/// Largest WebSocket message accepted from a client (64 KiB).
///
/// A pose update is well under 1 KiB in every wire format; anything larger
/// is rejected by the transport before it reaches the decoder.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

// ============================================================================
// Timeouts
// ============================================================================

/// Time allowed for a client to complete the WebSocket upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Idle-read timeout for sessions. `0` disables it.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 0;

/// Upper bound on sending the close frame and flushing the socket when a
/// session ends. A client that stopped reading cannot hold shutdown hostage.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Back-off after a failed `accept()` before retrying.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// Sink
// ============================================================================

/// Capacity of the bounded pose queue between sessions and the consumer.
pub const DEFAULT_SINK_CAPACITY: usize = 256;

// ============================================================================
// Validation
// ============================================================================

/// Allowed deviation of a quaternion's norm from 1.0.
pub const DEFAULT_QUATERNION_TOLERANCE: f64 = 1e-3;
