//! Wake word detection
//!
//! The detector model is pluggable behind [`WakeDetector`]. The orchestrator
//! only sees a [`WakeTrigger`], which is either a detector fed from the
//! capture source or a fixed-interval timer for bench testing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::CaptureSource;
use crate::Result;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to trigger (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Per-frame wake word model
pub trait WakeDetector: Send {
    /// Samples the model expects per call
    fn frame_samples(&self) -> usize;

    /// Run the model on one frame of mono samples
    fn detect(&mut self, frame: &[i16]) -> bool;

    /// Forget any partial detection
    fn reset(&mut self) {}
}

/// Something that decides when a session should start
pub trait WakeTrigger: Send + Sync {
    /// Evaluate the trigger once; may block for one frame of audio
    ///
    /// # Errors
    ///
    /// Returns error if the underlying audio read fails
    fn poll(&mut self) -> Result<bool>;

    /// Restart the trigger's bookkeeping
    fn reset(&mut self);
}

/// State of the energy detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Detected potential speech, accumulating
    Listening,
}

/// Speech-then-silence energy detector
///
/// Fires once a burst of speech of at least 0.3 s is followed by 0.5 s of
/// silence. Stands in for a trained wake word model.
pub struct EnergyDetector {
    state: DetectorState,
    frame_samples: usize,
    speech_samples: usize,
    silence_counter: usize,
}

impl EnergyDetector {
    /// Create a detector consuming frames of `frame_samples`
    #[must_use]
    pub const fn new(frame_samples: usize) -> Self {
        Self {
            state: DetectorState::Idle,
            frame_samples,
            speech_samples: 0,
            silence_counter: 0,
        }
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }
}

impl WakeDetector for EnergyDetector {
    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn detect(&mut self, frame: &[i16]) -> bool {
        let energy = calculate_energy(frame);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.speech_samples = frame.len();
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected, listening");
                }
            }
            DetectorState::Listening => {
                if is_speech {
                    self.speech_samples += frame.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += frame.len();
                }

                if self.silence_counter > SILENCE_SAMPLES
                    && self.speech_samples > MIN_SPEECH_SAMPLES
                {
                    tracing::debug!(samples = self.speech_samples, "speech segment complete");
                    self.reset();
                    return true;
                }

                // Timeout: too much silence without enough speech
                if self.silence_counter > SILENCE_SAMPLES * 2 {
                    tracing::trace!("timeout - resetting");
                    self.reset();
                }
            }
        }

        false
    }

    fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.speech_samples = 0;
        self.silence_counter = 0;
    }
}

/// Trigger driven by a detector reading from the capture source
pub struct DetectorTrigger<D> {
    source: Arc<dyn CaptureSource>,
    detector: D,
    raw: Vec<u8>,
    mono: Vec<i16>,
}

impl<D: WakeDetector> DetectorTrigger<D> {
    /// Wrap `detector`, sized to its frame length
    #[must_use]
    pub fn new(source: Arc<dyn CaptureSource>, detector: D) -> Self {
        let channels = source.channel_count().max(1);
        let samples = detector.frame_samples();
        Self {
            raw: vec![0u8; samples * channels * 2],
            mono: Vec::with_capacity(samples),
            source,
            detector,
        }
    }
}

impl<D: WakeDetector + Sync> WakeTrigger for DetectorTrigger<D> {
    fn poll(&mut self) -> Result<bool> {
        self.source.read(&mut self.raw)?;

        let channels = self.source.channel_count().max(1);
        self.mono.clear();
        self.mono.extend(
            self.raw
                .chunks_exact(2 * channels)
                .map(|frame| i16::from_le_bytes([frame[0], frame[1]])),
        );

        Ok(self.detector.detect(&self.mono))
    }

    fn reset(&mut self) {
        self.detector.reset();
    }
}

/// Fires every `interval`, substituting for a wake word in test mode
pub struct IntervalTrigger {
    interval: Duration,
    last: Instant,
}

impl IntervalTrigger {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }
}

impl WakeTrigger for IntervalTrigger {
    fn poll(&mut self) -> Result<bool> {
        if self.last.elapsed() >= self.interval {
            self.last = Instant::now();
            tracing::debug!(interval_secs = self.interval.as_secs(), "interval trigger fired");
            return Ok(true);
        }
        Ok(false)
    }

    fn reset(&mut self) {
        self.last = Instant::now();
    }
}

/// Calculate RMS energy of PCM16 samples, normalised to 0.0..=1.0
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|s| {
            let v = f32::from(*s) / 32768.0;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}
