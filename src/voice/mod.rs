//! Voice hardware boundary
//!
//! Capture source, playback sink and wake trigger. The traits are what the
//! pipeline depends on; the cpal types are the default hardware backends.

mod capture;
mod playback;
mod wake_word;

pub use capture::{AudioCapture, CaptureSource};
pub use playback::{AudioPlayback, PlaybackSink};
pub use wake_word::{
    DetectorState, DetectorTrigger, EnergyDetector, IntervalTrigger, WakeDetector, WakeTrigger,
};
