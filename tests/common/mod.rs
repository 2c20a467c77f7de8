//! Shared test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use beacon_satellite::audio::{
    CapturePipeline, Cue, FrameReceiver, JitterBuffer, OutboundQueue, PipelineStats,
};
use beacon_satellite::config::{AudioConfig, PlaybackConfig, SessionConfig};
use beacon_satellite::net::{Connection, ConnectionState};
use beacon_satellite::session::{Orchestrator, SessionParts};
use beacon_satellite::voice::{CaptureSource, PlaybackSink, WakeTrigger};
use beacon_satellite::{Error, Result};

/// Audio with a steep sawtooth; always passes the silence screen
///
/// `offset` continues the pattern across calls so concatenated chunks stay
/// distinguishable.
#[must_use]
pub fn voiced(bytes: usize, offset: usize) -> Vec<u8> {
    (offset..offset + bytes / 2)
        .flat_map(|i| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let sample = ((i % 300) * 100) as i16;
            sample.to_le_bytes()
        })
        .collect()
}

/// A call made on [`MockSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Write(Vec<u8>),
    Stream(Vec<u8>),
    Stop,
}

/// Playback sink that records every call
#[derive(Default)]
pub struct MockSink {
    calls: Mutex<Vec<SinkCall>>,
    enabled: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl MockSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of `write` calls (cue plays and tail flushes)
    #[must_use]
    pub fn writes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Write(_)))
            .count()
    }

    /// Every byte that reached the speaker, in order
    #[must_use]
    pub fn played(&self) -> Vec<u8> {
        self.calls()
            .into_iter()
            .flat_map(|c| match c {
                SinkCall::Write(b) | SinkCall::Stream(b) => b,
                SinkCall::Stop => Vec::new(),
            })
            .collect()
    }
}

impl PlaybackSink for MockSink {
    fn init(&self, _sample_rate: u32, _channels: u16, _bits: u16) -> Result<()> {
        Ok(())
    }

    fn write(&self, pcm: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Playback("i2s write timeout".to_string()));
        }
        self.calls.lock().unwrap().push(SinkCall::Write(pcm.to_vec()));
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn write_streaming(&self, pcm: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Playback("i2s write timeout".to_string()));
        }
        self.calls.lock().unwrap().push(SinkCall::Stream(pcm.to_vec()));
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.calls.lock().unwrap().push(SinkCall::Stop);
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Capture source returning voiced audio immediately
pub struct MockSource {
    channels: usize,
    reads: AtomicUsize,
}

impl MockSource {
    #[must_use]
    pub fn new(channels: usize) -> Arc<Self> {
        Arc::new(Self {
            channels,
            reads: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl CaptureSource for MockSource {
    fn read(&self, buf: &mut [u8]) -> Result<()> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        buf.copy_from_slice(&voiced(buf.len(), n * buf.len() / 2));
        Ok(())
    }

    fn channel_count(&self) -> usize {
        self.channels
    }
}

/// Connection whose connect outcome is scripted
pub struct MockConnection {
    state: watch::Sender<ConnectionState>,
    connect_succeeds: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    sent: Mutex<Vec<Vec<u8>>>,
    observed: Mutex<Option<(Arc<CapturePipeline>, Arc<JitterBuffer>)>>,
    at_connect: Mutex<Vec<(bool, bool)>>,
}

impl MockConnection {
    #[must_use]
    pub fn new(connected: bool) -> Arc<Self> {
        let initial = if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        Arc::new(Self {
            state: watch::channel(initial).0,
            connect_succeeds: AtomicBool::new(true),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            observed: Mutex::new(None),
            at_connect: Mutex::new(Vec::new()),
        })
    }

    /// Record capture and playback activity at every `connect` call
    pub fn observe(&self, capture: &Arc<CapturePipeline>, jitter: &Arc<JitterBuffer>) {
        *self.observed.lock().unwrap() = Some((Arc::clone(capture), Arc::clone(jitter)));
    }

    /// `(recording, streaming)` as seen by each `connect` call
    #[must_use]
    pub fn state_at_connect(&self) -> Vec<(bool, bool)> {
        self.at_connect.lock().unwrap().clone()
    }

    pub fn set_connect_succeeds(&self, succeeds: bool) {
        self.connect_succeeds.store(succeeds, Ordering::SeqCst);
    }

    /// Simulate the peer going away
    pub fn drop_link(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
    }

    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((capture, jitter)) = self.observed.lock().unwrap().as_ref() {
            self.at_connect
                .lock()
                .unwrap()
                .push((capture.is_recording(), jitter.is_streaming()));
        }
        if self.connect_succeeds.load(Ordering::SeqCst) {
            self.state.send_replace(ConnectionState::Connected);
            Ok(())
        } else {
            self.state.send_replace(ConnectionState::Error);
            Err(Error::Connection("connection refused".to_string()))
        }
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Disconnected);
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    async fn send_binary(&self, data: Vec<u8>) -> Result<usize> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let len = data.len();
        self.sent.lock().unwrap().push(data);
        Ok(len)
    }

    async fn send_text(&self, text: String) -> Result<usize> {
        self.send_binary(text.into_bytes()).await
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

/// Wake trigger fired by flipping a shared flag
pub struct MockTrigger {
    fire: Arc<AtomicBool>,
    resets: Arc<AtomicUsize>,
}

impl WakeTrigger for MockTrigger {
    fn poll(&mut self) -> Result<bool> {
        Ok(self.fire.swap(false, Ordering::SeqCst))
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Session timings short enough for tests
#[must_use]
pub fn fast_session_config() -> SessionConfig {
    SessionConfig {
        wake_connect_timeout: Duration::from_millis(200),
        startup_connect_timeout: Duration::from_millis(200),
        reconnect_delay: Duration::from_millis(10),
        reconnect_wait: Duration::from_millis(200),
        reply_idle_timeout: Duration::from_millis(100),
        tick_interval: Duration::from_millis(5),
        ..SessionConfig::default()
    }
}

/// An orchestrator wired to mocks, with handles to everything it drives
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub connection: Arc<MockConnection>,
    pub sink: Arc<MockSink>,
    pub source: Arc<MockSource>,
    pub capture: Arc<CapturePipeline>,
    pub jitter: Arc<JitterBuffer>,
    pub stats: Arc<PipelineStats>,
    pub frames: FrameReceiver,
    pub fire: Arc<AtomicBool>,
    pub resets: Arc<AtomicUsize>,
}

/// Build a harness; `recording_dir` enables WAV export at session end
#[must_use]
pub fn harness(connected: bool, recording_dir: Option<std::path::PathBuf>) -> Harness {
    let stats = Arc::new(PipelineStats::new());
    let sink = MockSink::new();
    let source = MockSource::new(1);
    let connection = MockConnection::new(connected);

    let (frames_tx, frames) = OutboundQueue::bounded(20, Arc::clone(&stats));
    let capture = Arc::new(CapturePipeline::new(
        &AudioConfig::default(),
        Arc::clone(&source) as Arc<dyn CaptureSource>,
        frames_tx,
        Arc::clone(&stats),
    ));
    let jitter = Arc::new(
        JitterBuffer::new(
            &PlaybackConfig::default(),
            16_000,
            Arc::clone(&sink) as Arc<dyn PlaybackSink>,
            Arc::clone(&stats),
        )
        .unwrap(),
    );

    connection.observe(&capture, &jitter);

    let fire = Arc::new(AtomicBool::new(false));
    let resets = Arc::new(AtomicUsize::new(0));
    let trigger = MockTrigger {
        fire: Arc::clone(&fire),
        resets: Arc::clone(&resets),
    };

    let orchestrator = Orchestrator::new(
        fast_session_config(),
        recording_dir,
        SessionParts {
            connection: Arc::clone(&connection) as Arc<dyn Connection>,
            capture: Arc::clone(&capture),
            jitter: Arc::clone(&jitter),
            sink: Arc::clone(&sink) as Arc<dyn PlaybackSink>,
            cue: Cue::tone(16_000, 880.0, 50),
            trigger: Box::new(trigger),
            stats: Arc::clone(&stats),
        },
    );

    Harness {
        orchestrator,
        connection,
        sink,
        source,
        capture,
        jitter,
        stats,
        frames,
        fire,
        resets,
    }
}
