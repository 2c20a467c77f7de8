//! Streaming playback jitter buffer
//!
//! Inbound reply audio arrives in irregular chunks; the drain loop plays it out
//! in fixed 25 ms slices. The network side is the only writer of the ring and
//! the output side is the only reader. Every path that touches the sink (fast
//! path, drain, tail flush) holds the output lock, so sink writes never
//! interleave.
//!
//! Lifecycle per reply: [`JitterBuffer::start`], any number of
//! [`JitterBuffer::feed`] calls, then [`JitterBuffer::finish`] on end-of-reply
//! or [`JitterBuffer::stop`] on teardown. Both exits flush a short tail, power
//! the sink down and leave the ring zeroed for the next `start`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::ring::RingBuffer;
use super::stats::{PipelineStats, add, bump};
use crate::config::PlaybackConfig;
use crate::voice::PlaybackSink;
use crate::{Error, Result, audio};

/// Wait when less than one chunk is buffered
const PARTIAL_WAIT: Duration = Duration::from_millis(3);

/// Wait when nothing is buffered
const EMPTY_WAIT: Duration = Duration::from_millis(8);

/// Wait while no reply is streaming
const IDLE_WAIT: Duration = Duration::from_millis(20);

/// Back-off after the sink rejects a chunk
const WRITE_FAILURE_BACKOFF: Duration = Duration::from_millis(50);

/// What happened to a chunk handed to [`JitterBuffer::feed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// No reply is streaming
    NotStreaming,
    /// Shorter than the minimum audio chunk; treated as a control artifact
    TooShort,
    /// Odd byte count cannot be PCM16
    OddLength,
    /// Failed the silence/garbage screen
    Silent,
    /// Not enough free space in the ring; the whole chunk was dropped
    Overflow,
    /// Stored for the drain loop
    Buffered { bytes: usize },
    /// Whole chunks went straight to the sink; the remainder was stored
    PlayedDirect { played: usize, buffered: usize },
}

impl FeedOutcome {
    /// Whether any of the chunk reached the ring or the sink
    #[must_use]
    pub const fn accepted(self) -> bool {
        matches!(self, Self::Buffered { .. } | Self::PlayedDirect { .. })
    }
}

/// Result of one drain step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStep {
    /// Not streaming
    Stopped,
    /// One chunk written to the sink
    Played(usize),
    /// One chunk failed the screen and was skipped
    Discarded,
    /// Some audio buffered, less than a chunk
    Partial,
    /// Nothing buffered
    Empty,
    /// The sink rejected the chunk
    WriteFailed,
}

/// Single-session playback buffer between the network and the sink
pub struct JitterBuffer {
    ring: RingBuffer,
    streaming: AtomicBool,
    /// Reusable drain scratch; holding it grants exclusive use of the sink
    output: Mutex<Vec<u8>>,
    sink: Arc<dyn PlaybackSink>,
    stats: Arc<PipelineStats>,
    chunk_bytes: usize,
    max_tail_bytes: usize,
    min_chunk_bytes: usize,
    variation_threshold: i32,
    fast_path: bool,
}

impl JitterBuffer {
    /// Allocate the ring and drain scratch
    ///
    /// # Errors
    ///
    /// Returns error if the ring cannot hold two playback chunks
    pub fn new(
        config: &PlaybackConfig,
        sample_rate: u32,
        sink: Arc<dyn PlaybackSink>,
        stats: Arc<PipelineStats>,
    ) -> Result<Self> {
        let chunk_bytes = config.chunk_bytes(sample_rate);
        let ring_bytes = config.ring_bytes(sample_rate);
        if chunk_bytes < 2 || ring_bytes < chunk_bytes * 2 {
            return Err(Error::Config(format!(
                "ring of {ring_bytes} bytes cannot hold two {chunk_bytes} byte chunks"
            )));
        }

        tracing::debug!(ring_bytes, chunk_bytes, fast_path = config.fast_path, "jitter buffer allocated");

        Ok(Self {
            ring: RingBuffer::new(ring_bytes),
            streaming: AtomicBool::new(false),
            output: Mutex::new(vec![0u8; chunk_bytes.max(config.max_tail_bytes)]),
            sink,
            stats,
            chunk_bytes,
            max_tail_bytes: config.max_tail_bytes,
            min_chunk_bytes: config.min_chunk_bytes,
            variation_threshold: config.variation_threshold,
            fast_path: config.fast_path,
        })
    }

    /// Whether a reply is currently streaming
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Bytes waiting in the ring
    #[must_use]
    pub fn available(&self) -> usize {
        self.ring.available()
    }

    /// Bytes per playback slice
    #[must_use]
    pub const fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Ring read/write cursors, for inspection
    #[must_use]
    pub fn cursors(&self) -> (usize, usize) {
        (self.ring.read_pos(), self.ring.write_pos())
    }

    /// Prime the buffer for a new reply
    ///
    /// Stops whatever was playing, zeroes the ring and resets both cursors.
    pub fn start(&self) {
        self.stop();
        self.streaming.store(true, Ordering::Release);
        tracing::debug!("streaming playback started");
    }

    /// Accept one inbound audio chunk
    pub fn feed(&self, chunk: &[u8]) -> FeedOutcome {
        if !self.is_streaming() {
            bump(&self.stats.chunks_rejected);
            tracing::debug!(bytes = chunk.len(), "audio while not streaming, dropping");
            return FeedOutcome::NotStreaming;
        }
        if chunk.len() < self.min_chunk_bytes {
            bump(&self.stats.chunks_rejected);
            tracing::debug!(bytes = chunk.len(), "chunk too short, dropping");
            return FeedOutcome::TooShort;
        }
        if chunk.len() % 2 != 0 {
            bump(&self.stats.chunks_rejected);
            tracing::warn!(bytes = chunk.len(), "odd-length audio chunk, dropping");
            return FeedOutcome::OddLength;
        }
        if !audio::has_variation(chunk, self.variation_threshold) {
            bump(&self.stats.chunks_silent);
            tracing::trace!(bytes = chunk.len(), "silent chunk, dropping");
            return FeedOutcome::Silent;
        }
        bump(&self.stats.chunks_accepted);

        let mut rest = chunk;
        let mut played = 0;

        if self.fast_path && chunk.len() >= self.chunk_bytes {
            let _output = self.lock_output();
            // Only bypass the ring when nothing older is queued ahead of us
            if self.ring.available() == 0 {
                while rest.len() >= self.chunk_bytes && self.is_streaming() {
                    let (head, tail) = rest.split_at(self.chunk_bytes);
                    if let Err(e) = self.sink.write_streaming(head) {
                        bump(&self.stats.sink_errors);
                        tracing::warn!(error = %e, "direct playback failed, buffering remainder");
                        break;
                    }
                    add(&self.stats.bytes_played, head.len());
                    played += head.len();
                    rest = tail;
                }
            }
        }

        if rest.is_empty() {
            tracing::trace!(played, "chunk played directly");
            return FeedOutcome::PlayedDirect { played, buffered: 0 };
        }

        if self.ring.free() < rest.len() {
            bump(&self.stats.ring_overflows);
            tracing::warn!(
                bytes = rest.len(),
                available = self.ring.available(),
                "playback buffer full, dropping chunk"
            );
            return FeedOutcome::Overflow;
        }

        let buffered = self.ring.write(rest);
        tracing::trace!(played, buffered, available = self.ring.available(), "chunk buffered");

        if played > 0 {
            FeedOutcome::PlayedDirect { played, buffered }
        } else {
            FeedOutcome::Buffered { bytes: buffered }
        }
    }

    /// Move at most one chunk from the ring to the sink
    pub fn drain_once(&self) -> DrainStep {
        if !self.is_streaming() {
            return DrainStep::Stopped;
        }

        let mut scratch = self.lock_output();
        // finish/stop may have run while we waited for the lock
        if !self.is_streaming() {
            return DrainStep::Stopped;
        }

        let mut available = self.ring.available();
        if available >= self.chunk_bytes && self.ring.align_read() {
            available = self.ring.available();
        }
        if available == 0 {
            return DrainStep::Empty;
        }
        if available < self.chunk_bytes {
            return DrainStep::Partial;
        }

        let chunk = &mut scratch[..self.chunk_bytes];
        let n = self.ring.read(chunk);
        let chunk = &chunk[..n];

        if !audio::has_variation(chunk, self.variation_threshold) {
            bump(&self.stats.chunks_discarded);
            tracing::trace!(bytes = n, "discarding invalid chunk");
            return DrainStep::Discarded;
        }

        if !self.is_streaming() {
            return DrainStep::Stopped;
        }

        match self.sink.write_streaming(chunk) {
            Ok(()) => {
                add(&self.stats.bytes_played, n);
                DrainStep::Played(n)
            }
            Err(e) => {
                bump(&self.stats.sink_errors);
                tracing::warn!(error = %e, "playback write failed");
                if let Err(e) = self.sink.stop() {
                    tracing::warn!(error = %e, "failed to silence sink");
                }
                DrainStep::WriteFailed
            }
        }
    }

    /// End of reply: flush a short tail, then silence the sink
    pub fn finish(&self) {
        self.flush_tail("finish");
    }

    /// Forced stop; same contract as [`Self::finish`], safe at any time
    pub fn stop(&self) {
        self.flush_tail("stop");
    }

    fn flush_tail(&self, reason: &'static str) {
        let was_streaming = self.streaming.swap(false, Ordering::AcqRel);
        let mut scratch = self.lock_output();

        if was_streaming {
            let tail = self.ring.available();
            if tail > self.max_tail_bytes {
                bump(&self.stats.tails_discarded);
                tracing::warn!(bytes = tail, reason, "tail too large, discarding");
            } else if tail > 0 {
                if scratch.len() < tail {
                    scratch.resize(tail, 0);
                }
                let n = self.ring.read(&mut scratch[..tail]);
                match self.sink.write(&scratch[..n]) {
                    Ok(()) => {
                        bump(&self.stats.tails_flushed);
                        add(&self.stats.bytes_played, n);
                        tracing::debug!(bytes = n, reason, "tail flushed");
                    }
                    Err(e) => {
                        bump(&self.stats.sink_errors);
                        tracing::warn!(error = %e, reason, "tail flush failed");
                    }
                }
            }

            if let Err(e) = self.sink.stop() {
                tracing::warn!(error = %e, reason, "failed to silence sink");
            }
            tracing::debug!(reason, "streaming playback stopped");
        } else if self.sink.is_enabled() {
            if let Err(e) = self.sink.stop() {
                tracing::warn!(error = %e, reason, "failed to silence sink");
            }
        }

        self.ring.clear();
    }

    fn lock_output(&self) -> MutexGuard<'_, Vec<u8>> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run [`Self::drain_once`] on a dedicated thread until `shutdown` is set
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn_drain_loop(self: &Arc<Self>, shutdown: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let jitter = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("playback-drain".to_string())
            .spawn(move || {
                tracing::debug!("playback drain loop started");
                while !shutdown.load(Ordering::Acquire) {
                    let pause = match jitter.drain_once() {
                        DrainStep::Played(_) | DrainStep::Discarded => continue,
                        DrainStep::Partial => PARTIAL_WAIT,
                        DrainStep::Empty => EMPTY_WAIT,
                        DrainStep::Stopped => IDLE_WAIT,
                        DrainStep::WriteFailed => WRITE_FAILURE_BACKOFF,
                    };
                    std::thread::sleep(pause);
                }
                jitter.stop();
                tracing::debug!("playback drain loop stopped");
            })?;
        Ok(handle)
    }
}

impl std::fmt::Debug for JitterBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitterBuffer")
            .field("ring", &self.ring)
            .field("streaming", &self.is_streaming())
            .field("chunk_bytes", &self.chunk_bytes)
            .finish_non_exhaustive()
    }
}
