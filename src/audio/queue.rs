//! Bounded capture-to-network queue
//!
//! The capture side never waits: when the queue is full the newest frame is
//! dropped and counted. Frames leave in the order they were pushed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::AudioFrame;
use super::stats::{PipelineStats, bump};

/// Constructor for the two queue halves
pub struct OutboundQueue;

impl OutboundQueue {
    /// Create a queue holding at most `capacity` frames
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero
    #[must_use]
    pub fn bounded(capacity: usize, stats: Arc<PipelineStats>) -> (FrameSender, FrameReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (FrameSender { tx, stats }, FrameReceiver { rx })
    }
}

/// Producer half, used from the capture thread
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<AudioFrame>,
    stats: Arc<PipelineStats>,
}

impl FrameSender {
    /// Enqueue a frame without blocking
    ///
    /// Returns false if the frame was dropped (queue full or consumer gone).
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                bump(&self.stats.queue_drops);
                tracing::warn!(bytes = frame.len(), "outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                bump(&self.stats.queue_drops);
                tracing::debug!("outbound queue closed, dropping frame");
                false
            }
        }
    }
}

/// Consumer half, owned by the uplink task
pub struct FrameReceiver {
    rx: mpsc::Receiver<AudioFrame>,
}

impl FrameReceiver {
    /// Wait for the next frame; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }
}
