//! Audio pipeline
//!
//! Everything between the hardware traits in [`crate::voice`] and the network:
//! - Capture pipeline feeding a bounded outbound queue
//! - Jitter buffer absorbing inbound reply audio ahead of fixed-rate playback
//! - Confirmation cue and pipeline counters
//!
//! All audio is mono PCM16 little-endian. There is no codec layer.

pub mod capture;
pub mod cue;
pub mod jitter;
pub mod queue;
pub mod ring;
pub mod stats;

pub use capture::{CapturePipeline, TickOutcome};
pub use cue::Cue;
pub use jitter::{DrainStep, FeedOutcome, JitterBuffer};
pub use queue::{FrameReceiver, FrameSender, OutboundQueue};
pub use ring::RingBuffer;
pub use stats::{PipelineStats, StatsSnapshot};

/// System sample rate (16kHz mono for speech)
pub const SAMPLE_RATE: u32 = 16_000;

/// Bytes per PCM16 sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// A fixed-duration block of captured mono PCM16 audio
///
/// Owned by the capture pipeline until pushed onto the outbound queue, then by
/// the queue consumer, which drops it after the send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pcm: Vec<u8>,
}

impl AudioFrame {
    /// Wrap raw little-endian PCM16 bytes
    #[must_use]
    pub const fn new(pcm: Vec<u8>) -> Self {
        Self { pcm }
    }

    /// Copy a frame out of a reusable capture buffer
    #[must_use]
    pub fn copy_from(pcm: &[u8]) -> Self {
        Self { pcm: pcm.to_vec() }
    }

    /// Raw bytes as sent on the wire
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.pcm
    }

    /// Consume the frame, yielding its bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.pcm
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    /// Whether the frame holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}

/// Iterate the PCM16 samples in a little-endian byte slice
///
/// A trailing odd byte is ignored.
pub fn samples(pcm: &[u8]) -> impl Iterator<Item = i16> + '_ {
    pcm.chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// Encode PCM16 samples as little-endian bytes
#[must_use]
pub fn to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Silence/garbage screen
///
/// True when at least one pair of adjacent samples differs by more than
/// `threshold`. Constant or near-constant buffers (silence padding, stuck
/// DMA output) fail the screen.
#[must_use]
pub fn has_variation(pcm: &[u8], threshold: i32) -> bool {
    let mut iter = samples(pcm);
    let Some(mut prev) = iter.next() else {
        return false;
    };

    for sample in iter {
        if (i32::from(sample) - i32::from(prev)).abs() > threshold {
            return true;
        }
        prev = sample;
    }

    false
}

/// RMS level of PCM16 audio normalised to 0.0..=1.0
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(pcm: &[u8]) -> f32 {
    let mut count = 0usize;
    let sum_squares: f64 = samples(pcm)
        .map(|s| {
            count += 1;
            let v = f64::from(s) / 32768.0;
            v * v
        })
        .sum();

    if count == 0 {
        return 0.0;
    }

    #[allow(clippy::cast_possible_truncation)]
    let level = (sum_squares / count as f64).sqrt() as f32;
    level
}
