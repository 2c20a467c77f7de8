//! Audio capture from microphone

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use crate::{Error, Result};

/// Hardware audio input
///
/// Yields interleaved PCM16 little-endian audio on demand.
pub trait CaptureSource: Send + Sync {
    /// Fill `buf` completely, blocking until enough audio is available
    ///
    /// # Errors
    ///
    /// Returns error if the hardware times out or fails
    fn read(&self, buf: &mut [u8]) -> Result<()>;

    /// Interleaved channels in each read
    fn channel_count(&self) -> usize;
}

/// Seconds of audio kept while nobody is reading
const MAX_BUFFERED_SECS: usize = 2;

/// Samples shared between the cpal callback and readers
struct Shared {
    samples: Mutex<VecDeque<i16>>,
    ready: Condvar,
}

/// Captures audio from the default input device
///
/// The cpal stream is not `Send`, so it lives on its own thread for the life of
/// this value and hands samples over through a condvar-guarded queue.
pub struct AudioCapture {
    shared: Arc<Shared>,
    channels: usize,
    sample_rate: u32,
    read_timeout: Duration,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioCapture {
    /// Open the default input device at `sample_rate`
    ///
    /// Prefers a mono configuration; falls back to any channel count that
    /// supports the rate.
    ///
    /// # Errors
    ///
    /// Returns error if no suitable input device can be opened
    pub fn open(sample_rate: u32) -> Result<Self> {
        let channels_hint = usize::from(pick_input_channels(sample_rate)?);
        let shared = Arc::new(Shared {
            samples: Mutex::new(VecDeque::with_capacity(
                sample_rate as usize * MAX_BUFFERED_SECS * channels_hint,
            )),
            ready: Condvar::new(),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let thread_shared = Arc::clone(&shared);
        let thread_stop = Arc::clone(&stop);
        #[allow(clippy::cast_possible_truncation)]
        let channels_u16 = channels_hint as u16;
        let thread = std::thread::Builder::new()
            .name("capture-stream".to_string())
            .spawn(move || {
                let stream = match build_input_stream(sample_rate, channels_u16, &thread_shared) {
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
                tracing::debug!("capture stream closed");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during setup".to_string()))??;

        tracing::debug!(sample_rate, channels = channels_hint, "audio capture initialized");

        Ok(Self {
            shared,
            channels: channels_hint,
            sample_rate,
            read_timeout: Duration::from_millis(500),
            stop,
            thread: Some(thread),
        })
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl CaptureSource for AudioCapture {
    fn read(&self, buf: &mut [u8]) -> Result<()> {
        let needed = buf.len() / 2;
        let guard = self
            .shared
            .samples
            .lock()
            .map_err(|_| Error::Capture("capture buffer poisoned".to_string()))?;

        let (mut samples, timeout) = self
            .shared
            .ready
            .wait_timeout_while(guard, self.read_timeout, |s| s.len() < needed)
            .map_err(|_| Error::Capture("capture buffer poisoned".to_string()))?;

        if timeout.timed_out() {
            return Err(Error::Capture(format!(
                "timed out waiting for {needed} samples"
            )));
        }

        for (pair, sample) in buf.chunks_exact_mut(2).zip(samples.drain(..needed)) {
            pair.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(())
    }

    fn channel_count(&self) -> usize {
        self.channels
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

/// Pick a channel count the default input device supports at `sample_rate`
fn pick_input_channels(sample_rate: u32) -> Result<u16> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| {
            c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .collect();

    supported
        .iter()
        .find(|c| c.channels() == 1)
        .or_else(|| supported.first())
        .map(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))
}

fn build_input_stream(sample_rate: u32, channels: u16, shared: &Arc<Shared>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device".to_string()))?;

    let config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?
        .with_sample_rate(SampleRate(sample_rate))
        .config();

    let limit = sample_rate as usize * MAX_BUFFERED_SECS * usize::from(channels);
    let callback_shared = Arc::clone(shared);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut samples) = callback_shared.samples.lock() {
                    #[allow(clippy::cast_possible_truncation)]
                    samples.extend(
                        data.iter()
                            .map(|s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16),
                    );
                    let excess = samples.len().saturating_sub(limit);
                    samples.drain(..excess);
                }
                callback_shared.ready.notify_all();
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}
