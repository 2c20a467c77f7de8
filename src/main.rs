use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_satellite::audio::{self, Cue, SAMPLE_RATE};
use beacon_satellite::config::TriggerMode;
use beacon_satellite::voice::{AudioCapture, AudioPlayback, CaptureSource, PlaybackSink};
use beacon_satellite::{Config, Daemon};

/// Beacon Satellite - streaming voice endpoint
#[derive(Parser)]
#[command(name = "satellite", version, about)]
struct Cli {
    /// WebSocket URL of the speech service
    #[arg(short, long, env = "SATELLITE_SERVER_URL")]
    server_url: Option<String>,

    /// Open a session every N seconds instead of listening for a wake word
    #[arg(long)]
    trigger_interval: Option<u64>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_satellite=info",
        1 => "info,beacon_satellite=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration),
            Command::TestSpeaker => test_speaker(),
        };
    }

    let mut config = Config::load()?;
    if let Some(url) = cli.server_url {
        config.server.url = url;
    }
    if let Some(secs) = cli.trigger_interval {
        config.session.trigger = TriggerMode::Interval(Duration::from_secs(secs));
    }
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config)?;

    // Run until interrupted
    daemon.run().await?;

    Ok(())
}

/// Test microphone input
fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let capture = AudioCapture::open(SAMPLE_RATE)?;
    let channels = capture.channel_count();
    println!("Sample rate: {} Hz, channels: {channels}", capture.sample_rate());
    println!("---");

    // 20 ms reads, summarised once per second
    let mut frame = vec![0u8; SAMPLE_RATE as usize / 50 * channels * audio::BYTES_PER_SAMPLE];
    let mut second = Vec::with_capacity(frame.len() * 50);

    for i in 0..duration {
        second.clear();
        let started = Instant::now();
        while started.elapsed() < Duration::from_secs(1) {
            match capture.read(&mut frame) {
                Ok(()) => second.extend_from_slice(&frame),
                Err(e) => println!("read failed: {e}"),
            }
        }

        let energy = audio::rms(&second);
        let peak = audio::samples(&second)
            .map(|s| f32::from(s.unsigned_abs()) / 32768.0)
            .fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new();
    playback.init(SAMPLE_RATE, 1, 16)?;

    let tone = Cue::tone(SAMPLE_RATE, 440.0, 2000);
    println!("Playing {} bytes at {SAMPLE_RATE} Hz...", tone.pcm().len());
    tone.play(&playback)?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: aplay -l (to list devices)");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}
