use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voicewire::audio::{self, AudioFrame, CapturePipeline, PlaybackPipeline, pcm};
use voicewire::{Config, VoiceSession};

/// Voicewire - real-time voice streaming client
#[derive(Parser)]
#[command(name = "voicewire", version, about)]
struct Cli {
    /// WebSocket endpoint of the voice backend
    #[arg(short, long, env = "VOICEWIRE_ENDPOINT")]
    endpoint: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input and report voice levels
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Write the captured audio to this WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Play a test tone through the playback pipeline
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voicewire=info",
        1 => "info,voicewire=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.endpoint)?;

    match cli.command {
        Some(Command::TestMic { duration, output }) => test_mic(duration, output),
        Some(Command::TestSpeaker) => test_speaker(),
        None => run_session(config).await,
    }
}

/// Run the full voice session until interrupted.
#[allow(clippy::future_not_send)]
async fn run_session(config: Config) -> anyhow::Result<()> {
    tracing::info!(endpoint = %config.endpoint, "starting voice session");

    let mut session = VoiceSession::new(&config);

    session.on_status_change(|state| {
        tracing::info!(status = %state, "connection status changed");
    });
    session.on_error(|message| {
        tracing::error!("{message}");
    });
    session.on_voice_level(|level| {
        tracing::trace!(level, "voice level");
    });

    session.request_permission()?;
    session.connect().await?;
    session.start_capture()?;

    tracing::info!("session running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    session.dispose();
    Ok(())
}

/// Capture from the default microphone for a few seconds, reporting levels.
fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut capture = CapturePipeline::new();
    capture.request_permission()?;

    let frames: Arc<Mutex<Vec<AudioFrame>>> = Arc::new(Mutex::new(Vec::new()));
    let frames_sink = Arc::clone(&frames);

    capture.start(
        move |frame| {
            if let Ok(mut collected) = frames_sink.lock() {
                collected.push(frame);
            }
        },
        |level| {
            tracing::info!(level, "voice level");
        },
    )?;

    tracing::info!(duration, "recording...");
    std::thread::sleep(Duration::from_secs(duration));
    capture.stop();

    let frames = frames.lock().map(|f| f.clone()).unwrap_or_default();
    let samples: usize = frames.iter().map(AudioFrame::sample_count).sum();
    tracing::info!(frames = frames.len(), samples, "capture complete");

    if let Some(path) = output {
        write_wav(&path, &frames)?;
        tracing::info!(path = %path.display(), "wrote capture to wav");
    }

    Ok(())
}

/// Write captured PCM frames to a WAV file for inspection.
fn write_wav(path: &Path, frames: &[AudioFrame]) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio::SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for frame in frames {
        for pair in frame.as_bytes().chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
    }
    writer.finalize()?;

    Ok(())
}

/// Play a one-second 440Hz tone through the playback queue.
fn test_speaker() -> anyhow::Result<()> {
    let mut playback = PlaybackPipeline::new();

    let rate = audio::PLAYBACK_SAMPLE_RATE;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..rate)
        .map(|i| {
            let t = i as f32 / rate as f32;
            0.4 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();

    let frame = pcm::encode(&samples);
    playback.enqueue(frame.as_bytes())?;
    tracing::info!("playing test tone");

    // Poll for completion with a timeout margin
    let deadline = std::time::Instant::now() + Duration::from_millis(1500);
    while playback.is_playing() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    std::thread::sleep(Duration::from_millis(100));

    playback.dispose();
    Ok(())
}
