//! Capture pipeline
//!
//! Pulls fixed 20 ms frames from the capture source while recording, keeps a
//! bounded copy of the session audio and forwards each frame to the outbound
//! queue. Nothing here blocks on the network.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::queue::FrameSender;
use super::stats::{PipelineStats, bump};
use super::AudioFrame;
use crate::config::AudioConfig;
use crate::voice::CaptureSource;
use crate::Result;

/// Sleep between ticks while not recording
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Result of one capture tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not recording; the tick slept
    Idle,
    /// A frame was read; `queued` is false if the outbound queue dropped it
    Captured { queued: bool },
    /// The hardware read failed and the tick was skipped
    ReadFailed,
}

struct Buffers {
    /// Raw interleaved read buffer, reused every tick
    raw: Vec<u8>,
    /// Channel 0 of `raw`
    mono: Vec<u8>,
}

/// Turns hardware capture into queued frames plus a session recording
pub struct CapturePipeline {
    source: Arc<dyn CaptureSource>,
    outbound: FrameSender,
    stats: Arc<PipelineStats>,
    recording: AtomicBool,
    accumulator: Mutex<Vec<u8>>,
    buffers: Mutex<Buffers>,
    max_recording_bytes: usize,
    sample_rate: u32,
}

impl CapturePipeline {
    /// Preallocate frame buffers and the recording accumulator
    #[must_use]
    pub fn new(
        config: &AudioConfig,
        source: Arc<dyn CaptureSource>,
        outbound: FrameSender,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let frame_bytes = config.frame_bytes();
        let channels = source.channel_count().max(1);

        if channels > 1 {
            tracing::info!(channels, "multi-channel capture, keeping channel 0");
        }

        Self {
            source,
            outbound,
            stats,
            recording: AtomicBool::new(false),
            accumulator: Mutex::new(Vec::with_capacity(config.max_recording_bytes())),
            buffers: Mutex::new(Buffers {
                raw: vec![0u8; frame_bytes * channels],
                mono: vec![0u8; frame_bytes],
            }),
            max_recording_bytes: config.max_recording_bytes(),
            sample_rate: config.sample_rate,
        }
    }

    /// Whether frames are being captured
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Begin capturing; clears the previous recording
    pub fn start_recording(&self) {
        if self.recording.load(Ordering::Acquire) {
            return;
        }
        self.lock_accumulator().clear();
        self.recording.store(true, Ordering::Release);
        tracing::info!("recording started");
    }

    /// Stop capturing; the recording stays available until the next start
    pub fn stop_recording(&self) {
        if self.recording.swap(false, Ordering::AcqRel) {
            tracing::info!(bytes = self.lock_accumulator().len(), "recording stopped");
        }
    }

    /// Resume capturing without clearing the recording
    pub fn resume_recording(&self) {
        if !self.recording.swap(true, Ordering::AcqRel) {
            tracing::info!("recording resumed");
        }
    }

    /// Copy of the audio accumulated this session
    #[must_use]
    pub fn recording(&self) -> Vec<u8> {
        self.lock_accumulator().clone()
    }

    /// Bytes accumulated this session
    #[must_use]
    pub fn recorded_bytes(&self) -> usize {
        self.lock_accumulator().len()
    }

    /// Run one capture step
    pub fn tick(&self) -> TickOutcome {
        if !self.is_recording() {
            std::thread::sleep(IDLE_WAIT);
            return TickOutcome::Idle;
        }

        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        let Buffers { raw, mono } = &mut *buffers;

        if let Err(e) = self.source.read(raw) {
            bump(&self.stats.capture_errors);
            tracing::warn!(error = %e, "capture read failed, skipping frame");
            return TickOutcome::ReadFailed;
        }

        let frame: &[u8] = if raw.len() == mono.len() {
            raw
        } else {
            let stride = raw.len() / mono.len() * 2;
            for (dst, src) in mono.chunks_exact_mut(2).zip(raw.chunks_exact(stride)) {
                dst.copy_from_slice(&src[..2]);
            }
            mono
        };

        bump(&self.stats.frames_captured);

        {
            let mut accumulator = self.lock_accumulator();
            if accumulator.len() + frame.len() <= self.max_recording_bytes {
                accumulator.extend_from_slice(frame);
            } else {
                bump(&self.stats.recording_overflows);
                tracing::warn!(
                    bytes = accumulator.len(),
                    max = self.max_recording_bytes,
                    "recording buffer full, frame not recorded"
                );
            }
        }

        let queued = self.outbound.push(AudioFrame::copy_from(frame));
        tracing::trace!(bytes = frame.len(), queued, "frame captured");
        TickOutcome::Captured { queued }
    }

    /// Write the current recording as a 16-bit mono WAV file in `dir`
    ///
    /// Returns `None` if nothing was recorded.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written
    pub fn export_wav(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let pcm = self.recording();
        if pcm.is_empty() {
            return Ok(None);
        }

        std::fs::create_dir_all(dir)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let path = dir.join(format!("session-{stamp}.wav"));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for sample in super::samples(&pcm) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;

        tracing::info!(path = %path.display(), bytes = pcm.len(), "recording exported");
        Ok(Some(path))
    }

    /// Run [`Self::tick`] on a dedicated thread until `shutdown` is set
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn(self: &Arc<Self>, shutdown: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let pipeline = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                tracing::debug!("capture loop started");
                while !shutdown.load(Ordering::Acquire) {
                    pipeline.tick();
                }
                pipeline.stop_recording();
                tracing::debug!("capture loop stopped");
            })?;
        Ok(handle)
    }

    fn lock_accumulator(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.accumulator.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
