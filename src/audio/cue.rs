//! Confirmation cue played when a session opens

use std::path::Path;

use crate::voice::PlaybackSink;
use crate::{Error, Result};

/// Default cue tone
const TONE_HZ: f32 = 880.0;
const TONE_MS: u32 = 150;

/// Short PCM16 clip played synchronously through the sink
#[derive(Debug, Clone)]
pub struct Cue {
    pcm: Vec<u8>,
}

impl Cue {
    /// Sine tone with 10 ms fade in and out
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn tone(sample_rate: u32, freq_hz: f32, duration_ms: u32) -> Self {
        let total = (u64::from(sample_rate) * u64::from(duration_ms) / 1000) as usize;
        let fade = (sample_rate as usize / 100).min(total / 2).max(1);
        let rate = sample_rate as f32;

        let pcm = (0..total)
            .map(|i| {
                let edge = i.min(total - 1 - i);
                let gain = (edge as f32 / fade as f32).min(1.0);
                let phase = 2.0 * std::f32::consts::PI * freq_hz * i as f32 / rate;
                (phase.sin() * gain * 0.4 * 32767.0) as i16
            })
            .flat_map(i16::to_le_bytes)
            .collect();

        Self { pcm }
    }

    /// The built-in cue
    #[must_use]
    pub fn default_tone(sample_rate: u32) -> Self {
        Self::tone(sample_rate, TONE_HZ, TONE_MS)
    }

    /// Load a 16-bit mono WAV at the system sample rate
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or has the wrong format
    pub fn from_wav(path: &Path, sample_rate: u32) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        if spec.channels != 1
            || spec.bits_per_sample != 16
            || spec.sample_format != hound::SampleFormat::Int
            || spec.sample_rate != sample_rate
        {
            return Err(Error::Audio(format!(
                "cue {} must be 16-bit mono at {sample_rate} Hz, got {} ch {} bit at {} Hz",
                path.display(),
                spec.channels,
                spec.bits_per_sample,
                spec.sample_rate
            )));
        }

        let pcm = reader
            .samples::<i16>()
            .map(|s| s.map(i16::to_le_bytes))
            .collect::<std::result::Result<Vec<_>, _>>()?
            .concat();

        tracing::debug!(path = %path.display(), bytes = pcm.len(), "cue loaded");
        Ok(Self { pcm })
    }

    /// Cue from `path` if configured, otherwise the built-in tone
    ///
    /// # Errors
    ///
    /// Returns error if a configured file cannot be loaded
    pub fn load(path: Option<&Path>, sample_rate: u32) -> Result<Self> {
        path.map_or_else(
            || Ok(Self::default_tone(sample_rate)),
            |p| Self::from_wav(p, sample_rate),
        )
    }

    #[must_use]
    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    /// Play the whole cue, blocking until the sink has finished
    ///
    /// # Errors
    ///
    /// Returns error if the sink rejects the write
    pub fn play(&self, sink: &dyn PlaybackSink) -> Result<()> {
        sink.write(&self.pcm)
    }
}
