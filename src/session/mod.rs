//! Session orchestrator
//!
//! Single owner of the Idle/Active state. Wake triggers, connection events and
//! control messages all arrive here and are handled one at a time, so no
//! transition ever races another.
//!
//! Blocking pipeline calls (cue playback, jitter start/feed/finish/stop, wake
//! polling) run on tokio's blocking pool.

mod control;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

pub use control::{ControlMessage, classify};

use crate::audio::stats::{PipelineStats, bump};
use crate::audio::{CapturePipeline, Cue, JitterBuffer};
use crate::config::SessionConfig;
use crate::net::{Connection, ConnectionEvent, wait_connected};
use crate::voice::{PlaybackSink, WakeTrigger};

/// Whether a session is open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Capture and playback stopped, listening for a wake trigger
    #[default]
    Idle,
    /// Capturing, playback primed, bound to the connection
    Active,
}

/// Everything the orchestrator drives
pub struct SessionParts {
    pub connection: Arc<dyn Connection>,
    pub capture: Arc<CapturePipeline>,
    pub jitter: Arc<JitterBuffer>,
    pub sink: Arc<dyn PlaybackSink>,
    pub cue: Cue,
    pub trigger: Box<dyn WakeTrigger>,
    pub stats: Arc<PipelineStats>,
}

/// The wake/session state machine
pub struct Orchestrator {
    config: SessionConfig,
    recording_dir: Option<PathBuf>,
    state: SessionState,
    connection: Arc<dyn Connection>,
    capture: Arc<CapturePipeline>,
    jitter: Arc<JitterBuffer>,
    sink: Arc<dyn PlaybackSink>,
    cue: Arc<Cue>,
    trigger: Option<Box<dyn WakeTrigger>>,
    stats: Arc<PipelineStats>,
    /// Set by end-of-reply, cleared when the next reply starts
    reply_finished_at: Option<Instant>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: SessionConfig, recording_dir: Option<PathBuf>, parts: SessionParts) -> Self {
        Self {
            config,
            recording_dir,
            state: SessionState::Idle,
            connection: parts.connection,
            capture: parts.capture,
            jitter: parts.jitter,
            sink: parts.sink,
            cue: Arc::new(parts.cue),
            trigger: Some(parts.trigger),
            stats: parts.stats,
            reply_finished_at: None,
        }
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Initial connect with the long startup timeout
    ///
    /// Failure is not fatal: the orchestrator stays Idle and a later wake
    /// trigger retries.
    pub async fn startup(&mut self) -> bool {
        let timeout = self.config.startup_connect_timeout;
        if self.connect_within(timeout).await {
            tracing::info!("connected at startup");
            true
        } else {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "server not reachable at startup, listening anyway"
            );
            false
        }
    }

    /// Handle a positive wake trigger
    ///
    /// Returns true if a session was opened.
    pub async fn on_wake(&mut self) -> bool {
        if self.state == SessionState::Active {
            return false;
        }
        tracing::info!("wake trigger fired");

        if !self.connection.is_connected() {
            tracing::info!("not connected, connecting before session");
            let timeout = self.config.wake_connect_timeout;
            if !self.connect_within(timeout).await {
                tracing::warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "connection unavailable, staying idle"
                );
                self.reset_bookkeeping();
                return false;
            }
        }

        let cue = Arc::clone(&self.cue);
        let sink = Arc::clone(&self.sink);
        if let Some(Err(e)) = blocking(move || cue.play(sink.as_ref())).await {
            tracing::warn!(error = %e, "confirmation cue failed");
        }

        self.capture.start_recording();
        let jitter = Arc::clone(&self.jitter);
        blocking(move || jitter.start()).await;

        self.state = SessionState::Active;
        self.reply_finished_at = None;
        bump(&self.stats.sessions_started);
        tracing::info!("session active");
        true
    }

    /// React to one connection event
    pub async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => tracing::debug!("connection up"),
            ConnectionEvent::Error(reason) => tracing::warn!(%reason, "connection error"),
            ConnectionEvent::Disconnected => self.on_disconnected().await,
            ConnectionEvent::Text(payload) => self.on_text(&payload).await,
            ConnectionEvent::Binary(data) => self.on_audio(data).await,
        }
    }

    /// Periodic work: poll the wake trigger while Idle, end idle sessions
    pub async fn tick(&mut self) {
        match self.state {
            SessionState::Idle => {
                if self.poll_trigger().await {
                    self.on_wake().await;
                }
            }
            SessionState::Active => {
                let idle_for = self.reply_finished_at.map(|at| at.elapsed());
                if idle_for.is_some_and(|d| d >= self.config.reply_idle_timeout) {
                    tracing::info!("no further reply, ending session");
                    self.end_session().await;
                }
            }
        }
    }

    /// Drive the state machine until `shutdown` flips or the event channel closes
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ConnectionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::debug!("orchestrator started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::warn!("event channel closed");
                        break;
                    }
                },
                _ = ticker.tick() => self.tick().await,
            }
        }

        if self.state == SessionState::Active {
            self.end_session().await;
        }
        tracing::debug!("orchestrator stopped");
    }

    async fn on_disconnected(&mut self) {
        tracing::info!("connection lost");

        // Nobody will drain or send while disconnected
        self.capture.stop_recording();
        let jitter = Arc::clone(&self.jitter);
        blocking(move || jitter.stop()).await;

        if self.state != SessionState::Active {
            self.reset_bookkeeping();
            return;
        }

        bump(&self.stats.reconnects);
        tracing::info!("reconnecting session");
        self.connection.disconnect().await;
        tokio::time::sleep(self.config.reconnect_delay).await;

        if self.connect_within(self.config.reconnect_wait).await {
            self.capture.resume_recording();
            let jitter = Arc::clone(&self.jitter);
            blocking(move || jitter.start()).await;
            self.reply_finished_at = None;
            tracing::info!("session resumed");
        } else {
            tracing::warn!("reconnect failed, ending session");
            self.end_session().await;
        }
    }

    async fn on_text(&mut self, payload: &str) {
        match classify(payload) {
            ControlMessage::ReplyEnd => {
                if self.state == SessionState::Active && self.jitter.is_streaming() {
                    let jitter = Arc::clone(&self.jitter);
                    blocking(move || jitter.finish()).await;
                    self.reply_finished_at = Some(Instant::now());
                    tracing::info!("reply finished");
                } else {
                    tracing::debug!(state = ?self.state, "end of reply with nothing streaming");
                }
            }
            ControlMessage::Ready => tracing::info!("server ready"),
            ControlMessage::Other(kind) => {
                tracing::info!(kind = kind.as_deref().unwrap_or("unknown"), "control message ignored");
            }
        }
    }

    async fn on_audio(&mut self, data: Vec<u8>) {
        let jitter = Arc::clone(&self.jitter);
        let active = self.state == SessionState::Active;

        let outcome = blocking(move || {
            // A new reply after end-of-reply re-primes the buffer
            if active && !jitter.is_streaming() {
                jitter.start();
            }
            jitter.feed(&data)
        })
        .await;

        if outcome.is_some_and(crate::audio::FeedOutcome::accepted) {
            self.reply_finished_at = None;
        }
    }

    async fn end_session(&mut self) {
        self.capture.stop_recording();
        let jitter = Arc::clone(&self.jitter);
        blocking(move || jitter.stop()).await;

        self.state = SessionState::Idle;
        self.reset_bookkeeping();
        tracing::info!("session ended");

        if let Some(dir) = self.recording_dir.clone() {
            let capture = Arc::clone(&self.capture);
            if let Some(Err(e)) = blocking(move || capture.export_wav(&dir)).await {
                tracing::warn!(error = %e, "failed to export recording");
            }
        }
    }

    fn reset_bookkeeping(&mut self) {
        self.reply_finished_at = None;
        if let Some(trigger) = self.trigger.as_mut() {
            trigger.reset();
        }
    }

    async fn poll_trigger(&mut self) -> bool {
        let Some(mut trigger) = self.trigger.take() else {
            return false;
        };

        match tokio::task::spawn_blocking(move || {
            let fired = trigger.poll();
            (trigger, fired)
        })
        .await
        {
            Ok((trigger, fired)) => {
                self.trigger = Some(trigger);
                fired.unwrap_or_else(|e| {
                    tracing::debug!(error = %e, "wake trigger poll failed");
                    false
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "wake trigger panicked, wake detection disabled");
                false
            }
        }
    }

    /// Request a connect and wait for `Connected`, all within `limit`
    async fn connect_within(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        let mut state = self.connection.subscribe_state();

        match tokio::time::timeout(limit, self.connection.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "connect attempt failed"),
            Err(_) => tracing::debug!("connect attempt timed out"),
        }

        wait_connected(&mut state, deadline.saturating_duration_since(Instant::now())).await
    }
}

/// Run a blocking pipeline call off the async workers
async fn blocking<F, T>(f: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(error = %e, "blocking pipeline call failed");
            None
        }
    }
}
