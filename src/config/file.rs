//! TOML configuration file loading
//!
//! Supports `~/.config/omni/satellite/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SatelliteConfigFile {
    /// Speech service connection
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Capture configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Streaming playback configuration
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// Wake/session configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Network association
    #[serde(default)]
    pub link: LinkFileConfig,
}

/// Speech service connection
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// WebSocket URL (e.g. "ws://192.168.1.100:8888")
    pub url: Option<String>,

    /// Keep retrying in the background after the connection drops
    pub auto_reconnect: Option<bool>,

    /// Background reconnect interval in milliseconds
    pub reconnect_interval_ms: Option<u64>,

    /// Handshake timeout in milliseconds
    pub network_timeout_ms: Option<u64>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_ms: Option<u32>,
    pub max_recording_secs: Option<u32>,
    pub queue_capacity: Option<usize>,

    /// Directory for WAV exports of finished sessions
    pub recording_dir: Option<String>,
}

/// Streaming playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    pub ring_capacity: Option<usize>,
    pub chunk_ms: Option<u32>,
    pub max_tail_bytes: Option<usize>,
    pub min_chunk_bytes: Option<usize>,
    pub variation_threshold: Option<i32>,
    pub fast_path: Option<bool>,
}

/// Wake/session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// "detector" or "interval"
    pub trigger: Option<String>,

    /// Fallback trigger period in seconds
    pub trigger_interval_secs: Option<u64>,

    pub wake_connect_timeout_ms: Option<u64>,
    pub startup_connect_timeout_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub reconnect_wait_ms: Option<u64>,
    pub reply_idle_timeout_ms: Option<u64>,

    /// Path to a PCM16 mono WAV played on wake
    pub cue_path: Option<String>,
}

/// Network association
#[derive(Debug, Default, Deserialize)]
pub struct LinkFileConfig {
    pub max_retry: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `SatelliteConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SatelliteConfigFile {
    config_file_path().map_or_else(SatelliteConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files yield defaults with a warning.
pub fn load_from(path: &Path) -> SatelliteConfigFile {
    if !path.exists() {
        return SatelliteConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                SatelliteConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SatelliteConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/satellite/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("satellite")
            .join("config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let content = r#"
            [server]
            url = "ws://10.0.0.2:8888"

            [playback]
            fast_path = false
            chunk_ms = 20
        "#;

        let file: SatelliteConfigFile = toml::from_str(content).unwrap();
        assert_eq!(file.server.url.as_deref(), Some("ws://10.0.0.2:8888"));
        assert_eq!(file.playback.fast_path, Some(false));
        assert_eq!(file.playback.chunk_ms, Some(20));
        assert!(file.audio.sample_rate.is_none());
        assert!(file.session.trigger.is_none());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let file = load_from(Path::new("/nonexistent/satellite/config.toml"));
        assert!(file.server.url.is_none());
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nurl = ").unwrap();

        let file = load_from(&path);
        assert!(file.server.url.is_none());
    }
}
