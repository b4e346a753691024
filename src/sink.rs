//! Ingestion sink abstraction.
//!
//! Sessions hand every validated pose to a [`PoseSink`]. The sink is the
//! only state shared between sessions, so implementations must accept
//! concurrent submissions.
//!
//! # Backpressure
//!
//! [`PoseSink::submit`] never blocks. A full sink returns
//! [`SinkError::Backpressure`] carrying the pose back to the caller, which
//! then awaits [`PoseSink::ready`] and retries (or drops the pose, depending
//! on [`BackpressurePolicy`]).
//!
//! ```text
//! Session ──submit──► PoseSink ──► consumer
//!    ▲                   │
//!    └──Backpressure(p)──┘  ready().await, retry with p
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::pose::Pose;

/// Failure to hand a pose to the sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Sink is at capacity. The rejected pose is returned to the caller.
    #[error("sink is at capacity")]
    Backpressure(Pose),
    /// Downstream consumer is gone; nothing will ever be accepted again.
    #[error("sink is closed")]
    Closed,
}

/// What a session does when the sink reports backpressure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackpressurePolicy {
    /// Suspend the session until the sink has room. No pose is lost.
    #[default]
    Wait,
    /// Drop the pose and keep reading.
    Drop,
}

/// Downstream consumer of validated poses.
#[async_trait]
pub trait PoseSink: Send + Sync + std::fmt::Debug {
    /// Offer a pose without waiting.
    fn submit(&self, pose: Pose) -> Result<(), SinkError>;

    /// Wait until the sink can plausibly accept another pose.
    ///
    /// Capacity is not reserved: a concurrent session may take the slot
    /// first, so callers retry `submit` in a loop.
    async fn ready(&self) -> Result<(), SinkError>;
}

/// Bounded in-memory queue sink backed by a tokio mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Pose>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Pose>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PoseSink for ChannelSink {
    fn submit(&self, pose: Pose) -> Result<(), SinkError> {
        match self.tx.try_send(pose) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(pose)) => Err(SinkError::Backpressure(pose)),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    async fn ready(&self) -> Result<(), SinkError> {
        // Dropping the permit releases the slot again; submit() retakes it.
        match self.tx.reserve().await {
            Ok(_permit) => Ok(()),
            Err(_) => Err(SinkError::Closed),
        }
    }
}
