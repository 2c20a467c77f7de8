//! Outbound queue consumer
//!
//! Sends captured frames as binary messages in queue order. Frames that come
//! off the queue while the connection is down are dropped and counted.

use std::sync::Arc;

use super::Connection;
use crate::audio::stats::{PipelineStats, bump};
use crate::audio::FrameReceiver;

/// Moves frames from the outbound queue onto the connection
pub struct Uplink {
    frames: FrameReceiver,
    connection: Arc<dyn Connection>,
    stats: Arc<PipelineStats>,
}

impl Uplink {
    #[must_use]
    pub fn new(frames: FrameReceiver, connection: Arc<dyn Connection>, stats: Arc<PipelineStats>) -> Self {
        Self {
            frames,
            connection,
            stats,
        }
    }

    /// Run until every frame sender is gone
    pub async fn run(mut self) {
        tracing::debug!("uplink started");

        while let Some(frame) = self.frames.recv().await {
            if !self.connection.is_connected() {
                bump(&self.stats.frames_unsent);
                tracing::trace!(bytes = frame.len(), "not connected, dropping frame");
                continue;
            }

            match self.connection.send_binary(frame.into_bytes()).await {
                Ok(bytes) => {
                    bump(&self.stats.frames_sent);
                    tracing::trace!(bytes, "frame sent");
                }
                Err(e) => {
                    bump(&self.stats.frames_unsent);
                    tracing::debug!(error = %e, "frame send failed");
                }
            }
        }

        tracing::debug!("uplink stopped");
    }
}
