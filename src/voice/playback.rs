//! Audio playback to speakers

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use crate::{Error, Result};

/// Hardware audio output
///
/// Accepts mono PCM16 little-endian audio. All methods block the caller, so
/// async code reaches them through `spawn_blocking`.
pub trait PlaybackSink: Send + Sync {
    /// Configure the output format
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened in this format
    fn init(&self, sample_rate: u32, channels: u16, bits_per_sample: u16) -> Result<()>;

    /// Play a complete clip, powering down the amplifier afterwards
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the audio
    fn write(&self, pcm: &[u8]) -> Result<()>;

    /// Queue audio for continuous playback, leaving the amplifier powered
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the audio
    fn write_streaming(&self, pcm: &[u8]) -> Result<()>;

    /// Mute and power down, discarding anything still queued
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be stopped
    fn stop(&self) -> Result<()>;

    /// Whether the amplifier is currently powered
    fn is_enabled(&self) -> bool;
}

/// How much audio the device queue may hold ahead of the callback
const MAX_QUEUED_MS: u64 = 200;

/// Extra time allowed past a clip's duration before `write` gives up
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Default)]
struct PlayState {
    queue: VecDeque<i16>,
    enabled: bool,
}

struct Shared {
    state: Mutex<PlayState>,
    changed: Condvar,
}

struct Stream {
    sample_rate: u32,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Plays audio to the default output device
///
/// The cpal stream runs for as long as this value is initialized. While the
/// amplifier is disabled the callback outputs silence.
pub struct AudioPlayback {
    shared: Arc<Shared>,
    stream: Mutex<Option<Stream>>,
}

impl AudioPlayback {
    /// Create an uninitialized playback device
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PlayState::default()),
                changed: Condvar::new(),
            }),
            stream: Mutex::new(None),
        }
    }

    fn sample_rate(&self) -> Result<u32> {
        self.stream
            .lock()
            .map_err(|_| Error::Playback("stream state poisoned".to_string()))?
            .as_ref()
            .map(|s| s.sample_rate)
            .ok_or_else(|| Error::Playback("playback not initialized".to_string()))
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, PlayState>> {
        self.shared
            .state
            .lock()
            .map_err(|_| Error::Playback("playback queue poisoned".to_string()))
    }

    /// Push samples, waiting for room in the device queue
    fn enqueue(&self, pcm: &[u8], sample_rate: u32) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let max_queued = ((u64::from(sample_rate) * MAX_QUEUED_MS / 1000) as usize).max(1);
        let mut state = self.lock_state()?;
        state.enabled = true;

        for chunk in pcm.chunks(max_queued * 2) {
            let needed = chunk.len() / 2;
            let (guard, timeout) = self
                .shared
                .changed
                .wait_timeout_while(state, Duration::from_secs(1), |s| {
                    s.queue.len() + needed > max_queued
                })
                .map_err(|_| Error::Playback("playback queue poisoned".to_string()))?;
            state = guard;

            if timeout.timed_out() {
                return Err(Error::Playback("timed out waiting for device".to_string()));
            }

            state.queue.extend(
                chunk
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
            );
        }

        Ok(())
    }
}

impl Default for AudioPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSink for AudioPlayback {
    fn init(&self, sample_rate: u32, channels: u16, bits_per_sample: u16) -> Result<()> {
        if channels != 1 || bits_per_sample != 16 {
            return Err(Error::Playback(format!(
                "unsupported format: {channels} channels, {bits_per_sample} bits"
            )));
        }

        let mut slot = self
            .stream
            .lock()
            .map_err(|_| Error::Playback("stream state poisoned".to_string()))?;
        if let Some(existing) = slot.as_ref() {
            if existing.sample_rate == sample_rate {
                return Ok(());
            }
        }
        if let Some(old) = slot.take() {
            old.stop.store(true, Ordering::Release);
            old.thread.thread().unpark();
            let _ = old.thread.join();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let thread_shared = Arc::clone(&self.shared);
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("playback-stream".to_string())
            .spawn(move || {
                let stream = match build_output_stream(sample_rate, &thread_shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while !thread_stop.load(Ordering::Acquire) {
                    std::thread::park_timeout(Duration::from_millis(100));
                }
                drop(stream);
                tracing::debug!("playback stream closed");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Playback("playback thread exited during setup".to_string()))??;

        *slot = Some(Stream {
            sample_rate,
            stop,
            thread,
        });
        Ok(())
    }

    fn write(&self, pcm: &[u8]) -> Result<()> {
        let sample_rate = self.sample_rate()?;
        self.enqueue(pcm, sample_rate)?;

        let samples = (pcm.len() / 2) as u64;
        let deadline = Duration::from_millis(samples * 1000 / u64::from(sample_rate)) + DRAIN_GRACE;
        let start = Instant::now();

        let state = self.lock_state()?;
        let (mut state, timeout) = self
            .shared
            .changed
            .wait_timeout_while(state, deadline, |s| !s.queue.is_empty())
            .map_err(|_| Error::Playback("playback queue poisoned".to_string()))?;

        state.queue.clear();
        state.enabled = false;
        drop(state);

        if timeout.timed_out() {
            tracing::warn!(elapsed_ms = start.elapsed().as_millis(), "clip playback timed out");
        } else {
            tracing::debug!(samples, "playback complete");
        }
        Ok(())
    }

    fn write_streaming(&self, pcm: &[u8]) -> Result<()> {
        let sample_rate = self.sample_rate()?;
        self.enqueue(pcm, sample_rate)
    }

    fn stop(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        state.queue.clear();
        state.enabled = false;
        drop(state);
        self.shared.changed.notify_all();
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.shared.state.lock().is_ok_and(|s| s.enabled)
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.stream.lock() {
            if let Some(stream) = slot.take() {
                stream.stop.store(true, Ordering::Release);
                stream.thread.thread().unpark();
                let _ = stream.thread.join();
            }
        }
    }
}

fn build_output_stream(sample_rate: u32, shared: &Arc<Shared>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
        c.min_sample_rate() <= SampleRate(sample_rate) && c.max_sample_rate() >= SampleRate(sample_rate)
    };

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| c.channels() == 1 && supports_rate(c))
        .or_else(|| {
            // Fallback: try stereo
            device
                .supported_output_configs()
                .ok()?
                .find(|c| c.channels() == 2 && supports_rate(c))
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = config.channels as usize;

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let callback_shared = Arc::clone(shared);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut state) = callback_shared.state.lock() else {
                    data.fill(0.0);
                    return;
                };

                for frame in data.chunks_mut(channels) {
                    let sample = if state.enabled {
                        state.queue.pop_front().map_or(0.0, |s| f32::from(s) / 32768.0)
                    } else {
                        0.0
                    };
                    frame.fill(sample);
                }
                drop(state);
                callback_shared.changed.notify_all();
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}
