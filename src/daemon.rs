//! Daemon - the satellite service
//!
//! Builds the pipeline, spawns the capture and drain threads plus the network
//! tasks, and runs the orchestrator until interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::audio::{BYTES_PER_SAMPLE, CapturePipeline, Cue, JitterBuffer, OutboundQueue, PipelineStats};
use crate::config::TriggerMode;
use crate::net::{Connection, HostLink, NetworkLink, Uplink, WsConnection};
use crate::session::{Orchestrator, SessionParts};
use crate::voice::{
    AudioCapture, AudioPlayback, CaptureSource, DetectorTrigger, EnergyDetector, IntervalTrigger,
    PlaybackSink, WakeTrigger,
};
use crate::{Config, Result};

/// Connection events buffered ahead of the orchestrator
const EVENT_CAPACITY: usize = 256;

/// How often pipeline counters are logged
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// The satellite daemon
pub struct Daemon {
    config: Config,
    source: Arc<dyn CaptureSource>,
    sink: Arc<dyn PlaybackSink>,
}

impl Daemon {
    /// Open the default audio devices
    ///
    /// # Errors
    ///
    /// Returns error if the capture device cannot be opened
    pub fn new(config: Config) -> Result<Self> {
        let source = Arc::new(AudioCapture::open(config.audio.sample_rate)?);
        let sink = Arc::new(AudioPlayback::new());
        Ok(Self::with_hardware(config, source, sink))
    }

    /// Use the given capture source and playback sink
    #[must_use]
    pub fn with_hardware(
        config: Config,
        source: Arc<dyn CaptureSource>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Self {
        Self {
            config,
            source,
            sink,
        }
    }

    /// Run until ctrl-c
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline cannot be constructed
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
        });

        self.run_until(shutdown_rx).await
    }

    /// Run until `shutdown` becomes true
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the pipeline cannot
    /// be constructed
    pub async fn run_until(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Self {
            config,
            source,
            sink,
        } = self;
        config.validate()?;
        let sample_rate = config.audio.sample_rate;

        #[allow(clippy::cast_possible_truncation)]
        sink.init(sample_rate, 1, (BYTES_PER_SAMPLE * 8) as u16)?;

        let stats = Arc::new(PipelineStats::new());
        let (frames_tx, frames_rx) =
            OutboundQueue::bounded(config.audio.queue_capacity, Arc::clone(&stats));

        let capture = Arc::new(CapturePipeline::new(
            &config.audio,
            Arc::clone(&source),
            frames_tx,
            Arc::clone(&stats),
        ));
        let jitter = Arc::new(JitterBuffer::new(
            &config.playback,
            sample_rate,
            Arc::clone(&sink),
            Arc::clone(&stats),
        )?);
        let cue = Cue::load(config.session.cue_path.as_deref(), sample_rate)?;

        let trigger: Box<dyn WakeTrigger> = match config.session.trigger {
            TriggerMode::Detector => {
                let frame_samples = config.audio.frame_bytes() / BYTES_PER_SAMPLE;
                Box::new(DetectorTrigger::new(
                    Arc::clone(&source),
                    EnergyDetector::new(frame_samples),
                ))
            }
            TriggerMode::Interval(interval) => {
                tracing::info!(interval_secs = interval.as_secs(), "using interval trigger");
                Box::new(IntervalTrigger::new(interval))
            }
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let connection = Arc::new(WsConnection::new(&config.server, events_tx));

        // Hardware threads
        let threads_shutdown = Arc::new(AtomicBool::new(false));
        let capture_thread = capture.spawn(Arc::clone(&threads_shutdown))?;
        let drain_thread = jitter.spawn_drain_loop(Arc::clone(&threads_shutdown))?;

        // Network tasks
        let uplink = tokio::spawn(
            Uplink::new(
                frames_rx,
                Arc::clone(&connection) as Arc<dyn Connection>,
                Arc::clone(&stats),
            )
            .run(),
        );
        let watchdog = config
            .server
            .auto_reconnect
            .then(|| connection.spawn_watchdog(config.server.reconnect_interval));

        let stats_logger = {
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(STATS_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match stats.snapshot().to_json() {
                        Ok(json) => tracing::debug!(stats = %json, "pipeline stats"),
                        Err(e) => tracing::warn!(error = %e, "cannot encode pipeline stats"),
                    }
                }
            })
        };

        let mut orchestrator = Orchestrator::new(
            config.session.clone(),
            config.audio.recording_dir.clone(),
            SessionParts {
                connection: Arc::clone(&connection) as Arc<dyn Connection>,
                capture: Arc::clone(&capture),
                jitter: Arc::clone(&jitter),
                sink: Arc::clone(&sink),
                cue,
                trigger,
                stats: Arc::clone(&stats),
            },
        );

        tracing::info!(url = %config.server.url, sample_rate, "satellite starting");

        let startup = async {
            match HostLink::from_url(&config.server.url, &config.link) {
                Ok(link) => {
                    if let Err(e) = link.connect().await {
                        tracing::warn!(error = %e, "network link down, continuing");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "cannot check network link"),
            }
            orchestrator.startup().await;
        };

        let interrupted = tokio::select! {
            () = startup => false,
            _ = shutdown.changed() => true,
        };

        if interrupted {
            drop(orchestrator);
        } else {
            tracing::info!("satellite ready, listening for wake trigger");
            orchestrator.run(events_rx, shutdown).await;
        }

        // Teardown
        threads_shutdown.store(true, Ordering::Release);
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        stats_logger.abort();
        connection.disconnect().await;

        for (name, handle) in [("capture", capture_thread), ("playback-drain", drain_thread)] {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                _ => tracing::warn!(thread = name, "thread did not exit cleanly"),
            }
        }

        // Last frame sender goes with the capture pipeline; the uplink then drains out
        drop(capture);
        if tokio::time::timeout(Duration::from_secs(1), uplink).await.is_err() {
            tracing::debug!("uplink still running at shutdown");
        }

        tracing::info!(stats = ?stats.snapshot(), "satellite stopped");
        Ok(())
    }
}
