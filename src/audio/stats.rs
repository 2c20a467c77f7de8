//! Pipeline counters
//!
//! Every drop and hardware failure is counted here; failures are otherwise only
//! visible in logs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::Result;

/// Shared counters, updated lock-free from every task
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) frames_captured: AtomicU64,
    pub(crate) capture_errors: AtomicU64,
    pub(crate) recording_overflows: AtomicU64,
    pub(crate) queue_drops: AtomicU64,
    pub(crate) frames_sent: AtomicU64,
    pub(crate) frames_unsent: AtomicU64,
    pub(crate) chunks_accepted: AtomicU64,
    pub(crate) chunks_rejected: AtomicU64,
    pub(crate) chunks_silent: AtomicU64,
    pub(crate) ring_overflows: AtomicU64,
    pub(crate) chunks_discarded: AtomicU64,
    pub(crate) bytes_played: AtomicU64,
    pub(crate) sink_errors: AtomicU64,
    pub(crate) tails_flushed: AtomicU64,
    pub(crate) tails_discarded: AtomicU64,
    pub(crate) sessions_started: AtomicU64,
    pub(crate) reconnects: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub capture_errors: u64,
    pub recording_overflows: u64,
    pub queue_drops: u64,
    pub frames_sent: u64,
    pub frames_unsent: u64,
    pub chunks_accepted: u64,
    pub chunks_rejected: u64,
    pub chunks_silent: u64,
    pub ring_overflows: u64,
    pub chunks_discarded: u64,
    pub bytes_played: u64,
    pub sink_errors: u64,
    pub tails_flushed: u64,
    pub tails_discarded: u64,
    pub sessions_started: u64,
    pub reconnects: u64,
}

/// Increment a counter by one
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Increment a counter by `n`
pub(crate) fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

impl PipelineStats {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy every counter
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_captured: get(&self.frames_captured),
            capture_errors: get(&self.capture_errors),
            recording_overflows: get(&self.recording_overflows),
            queue_drops: get(&self.queue_drops),
            frames_sent: get(&self.frames_sent),
            frames_unsent: get(&self.frames_unsent),
            chunks_accepted: get(&self.chunks_accepted),
            chunks_rejected: get(&self.chunks_rejected),
            chunks_silent: get(&self.chunks_silent),
            ring_overflows: get(&self.ring_overflows),
            chunks_discarded: get(&self.chunks_discarded),
            bytes_played: get(&self.bytes_played),
            sink_errors: get(&self.sink_errors),
            tails_flushed: get(&self.tails_flushed),
            tails_discarded: get(&self.tails_discarded),
            sessions_started: get(&self.sessions_started),
            reconnects: get(&self.reconnects),
        }
    }
}

impl StatsSnapshot {
    /// Render as a single-line JSON object for the periodic stats log
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if encoding fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
