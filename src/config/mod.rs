//! Configuration management for the Beacon satellite

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};
use file::SatelliteConfigFile;

/// Bytes per PCM16 sample
const BYTES_PER_SAMPLE: usize = 2;

/// Satellite configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Speech service connection
    pub server: ServerConfig,

    /// Capture pipeline
    pub audio: AudioConfig,

    /// Streaming playback (jitter buffer)
    pub playback: PlaybackConfig,

    /// Wake/session state machine
    pub session: SessionConfig,

    /// Network association
    pub link: LinkConfig,
}

/// Speech service connection configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// WebSocket URL of the speech service
    pub url: String,

    /// Keep retrying in the background while disconnected
    pub auto_reconnect: bool,

    /// Background reconnect interval
    pub reconnect_interval: Duration,

    /// Handshake timeout
    pub network_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8888".to_string(),
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs(5),
            network_timeout: Duration::from_secs(10),
        }
    }
}

/// Capture pipeline configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// System sample rate (mono PCM16)
    pub sample_rate: u32,

    /// Capture frame duration
    pub frame_ms: u32,

    /// Upper bound of the recording accumulator
    pub max_recording_secs: u32,

    /// Outbound queue capacity in frames
    pub queue_capacity: usize,

    /// Where finished sessions are exported as WAV (disabled when `None`)
    pub recording_dir: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_ms: 20,
            max_recording_secs: 10,
            queue_capacity: 20,
            recording_dir: None,
        }
    }
}

impl AudioConfig {
    /// Bytes in one capture frame (640 at 16 kHz / 20 ms)
    #[must_use]
    pub const fn frame_bytes(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize / 1000) * BYTES_PER_SAMPLE
    }

    /// Bytes the recording accumulator may hold
    #[must_use]
    pub const fn max_recording_bytes(&self) -> usize {
        self.sample_rate as usize * self.max_recording_secs as usize * BYTES_PER_SAMPLE
    }
}

/// Streaming playback configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Requested ring capacity; rounded down to a whole number of chunks
    pub ring_capacity: usize,

    /// Playback chunk duration
    pub chunk_ms: u32,

    /// Largest tail flushed at stream end; larger tails are discarded
    pub max_tail_bytes: usize,

    /// Inbound chunks shorter than this are treated as control artifacts
    pub min_chunk_bytes: usize,

    /// Adjacent-sample delta a chunk must exceed somewhere to count as audio
    pub variation_threshold: i32,

    /// Play chunk-aligned inbound audio directly when nothing is buffered
    pub fast_path: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 64 * 1024,
            chunk_ms: 25,
            max_tail_bytes: 16 * 1024,
            min_chunk_bytes: 128,
            variation_threshold: 30,
            fast_path: true,
        }
    }
}

impl PlaybackConfig {
    /// Bytes in one playback chunk (800 at 16 kHz / 25 ms)
    #[must_use]
    pub const fn chunk_bytes(&self, sample_rate: u32) -> usize {
        (sample_rate as usize * self.chunk_ms as usize / 1000) * BYTES_PER_SAMPLE
    }

    /// Ring capacity rounded down to a whole number of chunks
    #[must_use]
    pub const fn ring_bytes(&self, sample_rate: u32) -> usize {
        let chunk = self.chunk_bytes(sample_rate);
        if chunk == 0 {
            return 0;
        }
        (self.ring_capacity / chunk) * chunk
    }
}

/// How the Idle state is left
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriggerMode {
    /// Wake detector fed from the capture source
    #[default]
    Detector,
    /// Fixed-interval timer standing in for the detector
    Interval(Duration),
}

/// Wake/session state machine configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wake trigger source
    pub trigger: TriggerMode,

    /// Connect budget when waking with no connection
    pub wake_connect_timeout: Duration,

    /// Connect budget at process start
    pub startup_connect_timeout: Duration,

    /// Pause between disconnect cleanup and reconnect
    pub reconnect_delay: Duration,

    /// Connect budget for the single mid-session reconnect
    pub reconnect_wait: Duration,

    /// Session ends when no reply audio follows `tts_end` within this window
    pub reply_idle_timeout: Duration,

    /// Orchestrator tick period
    pub tick_interval: Duration,

    /// Optional WAV cue played on wake
    pub cue_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerMode::Detector,
            wake_connect_timeout: Duration::from_secs(5),
            startup_connect_timeout: Duration::from_secs(15),
            reconnect_delay: Duration::from_millis(100),
            reconnect_wait: Duration::from_secs(5),
            reply_idle_timeout: Duration::from_secs(15),
            tick_interval: Duration::from_millis(10),
            cue_path: None,
        }
    }
}

/// Network association configuration
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Association attempts before giving up
    pub max_retry: u32,

    /// Pause between association attempts
    pub retry_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_retry: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from the TOML file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::from_sources(fc, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Assemble configuration with precedence env > toml > default
    #[must_use]
    pub fn from_sources<F>(fc: SatelliteConfigFile, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_env = |key: &str| env(key).and_then(|v| v.trim().parse::<u64>().ok());
        let bool_env = |key: &str| env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        let ms = Duration::from_millis;

        let server = ServerConfig {
            url: env("SATELLITE_SERVER_URL")
                .or(fc.server.url)
                .unwrap_or(defaults.server.url),
            auto_reconnect: bool_env("SATELLITE_AUTO_RECONNECT")
                .or(fc.server.auto_reconnect)
                .unwrap_or(defaults.server.auto_reconnect),
            reconnect_interval: fc
                .server
                .reconnect_interval_ms
                .map_or(defaults.server.reconnect_interval, ms),
            network_timeout: fc
                .server
                .network_timeout_ms
                .map_or(defaults.server.network_timeout, ms),
        };

        let audio = AudioConfig {
            sample_rate: parse_env("SATELLITE_SAMPLE_RATE")
                .and_then(|v| u32::try_from(v).ok())
                .or(fc.audio.sample_rate)
                .unwrap_or(defaults.audio.sample_rate),
            frame_ms: fc.audio.frame_ms.unwrap_or(defaults.audio.frame_ms),
            max_recording_secs: fc
                .audio
                .max_recording_secs
                .unwrap_or(defaults.audio.max_recording_secs),
            queue_capacity: fc
                .audio
                .queue_capacity
                .unwrap_or(defaults.audio.queue_capacity),
            recording_dir: env("SATELLITE_RECORDING_DIR")
                .or(fc.audio.recording_dir)
                .map(PathBuf::from),
        };

        let playback = PlaybackConfig {
            ring_capacity: fc
                .playback
                .ring_capacity
                .unwrap_or(defaults.playback.ring_capacity),
            chunk_ms: fc.playback.chunk_ms.unwrap_or(defaults.playback.chunk_ms),
            max_tail_bytes: fc
                .playback
                .max_tail_bytes
                .unwrap_or(defaults.playback.max_tail_bytes),
            min_chunk_bytes: fc
                .playback
                .min_chunk_bytes
                .unwrap_or(defaults.playback.min_chunk_bytes),
            variation_threshold: fc
                .playback
                .variation_threshold
                .unwrap_or(defaults.playback.variation_threshold),
            fast_path: bool_env("SATELLITE_FAST_PATH")
                .or(fc.playback.fast_path)
                .unwrap_or(defaults.playback.fast_path),
        };

        let interval_secs = parse_env("SATELLITE_TRIGGER_INTERVAL_SECS")
            .or(fc.session.trigger_interval_secs)
            .unwrap_or(30);
        let trigger = match env("SATELLITE_TRIGGER")
            .or(fc.session.trigger)
            .as_deref()
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("interval" | "timer") => TriggerMode::Interval(Duration::from_secs(interval_secs)),
            Some("detector" | "wake") | None => TriggerMode::Detector,
            Some(other) => {
                tracing::warn!(trigger = other, "unknown trigger mode, using detector");
                TriggerMode::Detector
            }
        };

        let session = SessionConfig {
            trigger,
            wake_connect_timeout: fc
                .session
                .wake_connect_timeout_ms
                .map_or(defaults.session.wake_connect_timeout, ms),
            startup_connect_timeout: fc
                .session
                .startup_connect_timeout_ms
                .map_or(defaults.session.startup_connect_timeout, ms),
            reconnect_delay: fc
                .session
                .reconnect_delay_ms
                .map_or(defaults.session.reconnect_delay, ms),
            reconnect_wait: fc
                .session
                .reconnect_wait_ms
                .map_or(defaults.session.reconnect_wait, ms),
            reply_idle_timeout: fc
                .session
                .reply_idle_timeout_ms
                .map_or(defaults.session.reply_idle_timeout, ms),
            tick_interval: defaults.session.tick_interval,
            cue_path: env("SATELLITE_CUE_PATH")
                .or(fc.session.cue_path)
                .map(PathBuf::from),
        };

        let link = LinkConfig {
            max_retry: fc.link.max_retry.unwrap_or(defaults.link.max_retry),
            retry_delay: fc
                .link
                .retry_delay_ms
                .map_or(defaults.link.retry_delay, ms),
        };

        Self {
            server,
            audio,
            playback,
            session,
            link,
        }
    }

    /// Check the configuration for values the pipeline cannot run with
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("sample rate must be non-zero".to_string()));
        }
        if self.audio.frame_bytes() == 0 {
            return Err(Error::Config("capture frame is empty".to_string()));
        }
        if self.audio.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be non-zero".to_string()));
        }

        let chunk = self.playback.chunk_bytes(self.audio.sample_rate);
        if chunk == 0 {
            return Err(Error::Config("playback chunk is empty".to_string()));
        }
        if self.playback.ring_bytes(self.audio.sample_rate) < chunk * 2 {
            return Err(Error::Config(format!(
                "ring capacity {} must hold at least two {chunk} byte chunks",
                self.playback.ring_capacity
            )));
        }
        if self.playback.min_chunk_bytes < 2 {
            return Err(Error::Config("min chunk must be at least one sample".to_string()));
        }
        crate::net::server_endpoint(&self.server.url)?;

        let durations = [
            ("reconnect interval", self.server.reconnect_interval),
            ("network timeout", self.server.network_timeout),
            ("wake connect timeout", self.session.wake_connect_timeout),
            ("startup connect timeout", self.session.startup_connect_timeout),
            ("reconnect wait", self.session.reconnect_wait),
            ("reply idle timeout", self.session.reply_idle_timeout),
            ("tick interval", self.session.tick_interval),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::Config(format!("{name} must be non-zero")));
        }
        if self.session.trigger == TriggerMode::Interval(Duration::ZERO) {
            return Err(Error::Config("trigger interval must be non-zero".to_string()));
        }

        Ok(())
    }
}
