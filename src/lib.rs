//! Beacon Satellite - streaming voice endpoint for Beacon
//!
//! Runs on the device next to the microphone and speaker:
//! - Wake trigger and session state machine
//! - Bounded capture pipeline streaming PCM to the speech service
//! - Jitter-buffered playback of streamed replies
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames  ┌────────────────┐  binary   ┌──────────────┐
//! │ CaptureSource├─────────►│ CapturePipeline├──queue───►│              │
//! └──────────────┘          └────────────────┘  uplink   │  Connection  │
//!                                   ▲                    │  (WebSocket) │
//!                          start/stop                    │              │
//!                           ┌───────┴──────┐   events    │              │
//!                           │ Orchestrator │◄────────────┤              │
//!                           └───────┬──────┘             └──────────────┘
//!                          start/feed/finish
//!                                   ▼
//! ┌──────────────┐  chunks  ┌────────────────┐
//! │ PlaybackSink │◄─────────┤  JitterBuffer  │
//! └──────────────┘          └────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod daemon;
pub mod error;
pub mod net;
pub mod session;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
