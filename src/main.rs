use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use sous_live::audio::{
    AudioCapture, AudioOutput, CaptureEvent, CpalOutput, OUTPUT_SAMPLE_RATE, PlaybackScheduler,
    encode_chunk, float_to_pcm16, samples_to_wav,
};
use sous_live::{
    Config, HttpMemoryStore, HttpTokenProvider, InMemoryStore, MemoryStore, SessionController,
    SessionDeps, SessionEvent, SessionState, StaticTokenProvider, SystemDevices, TokenProvider,
    WebSocketConnector,
};

/// Sous - hands-free voice assistant for the kitchen
#[derive(Parser)]
#[command(name = "sous", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Remote model (overrides config)
    #[arg(long, env = "SOUS_MODEL")]
    model: Option<String>,

    /// Stream camera frames
    #[arg(long)]
    video: bool,

    /// Image file re-read as the camera on every frame
    #[arg(long, env = "SOUS_CAMERA_SNAPSHOT")]
    camera: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run a live session until Ctrl-C (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the recording as a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,sous_live=info",
        1 => "info,sous_live=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Command::TestMic { duration, output }) => test_mic(duration, output).await,
        Some(Command::TestSpeaker) => test_speaker().await,
        Some(Command::Run) | None => {
            let mut config = Config::load()?;
            if let Some(model) = cli.model {
                config.session.model = model;
            }
            if cli.video {
                config.session.video.enabled = true;
            }
            if cli.camera.is_some() {
                config.camera_snapshot = cli.camera;
            }
            live(config).await
        }
    }
}

/// Run one live session, printing transcripts as they arrive
async fn live(config: Config) -> anyhow::Result<()> {
    let tokens: Arc<dyn TokenProvider> = match (&config.token_url, config.token) {
        (Some(url), _) => Arc::new(HttpTokenProvider::new(url.clone())),
        (None, Some(token)) => {
            use secrecy::ExposeSecret as _;
            Arc::new(StaticTokenProvider::new(token.expose_secret()))
        }
        (None, None) => {
            anyhow::bail!("no session token configured; set SOUS_TOKEN or SOUS_TOKEN_URL")
        }
    };

    let memory: Arc<dyn MemoryStore> = match &config.memory_url {
        Some(url) => Arc::new(HttpMemoryStore::new(url.clone())),
        None => {
            tracing::info!("no memory service configured, using in-process memory");
            Arc::new(InMemoryStore::new())
        }
    };

    let controller = SessionController::new(
        config.session,
        SessionDeps {
            tokens,
            connector: Arc::new(WebSocketConnector::new()),
            devices: Arc::new(SystemDevices::new(config.camera_snapshot)),
            memory,
        },
    );

    let mut events = controller.subscribe();
    controller.start().await.context("failed to start session")?;
    println!("Listening... press Ctrl-C to stop.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                tracing::info!("interrupt received, stopping session");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if print_event(&event) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    controller.stop();
    if controller.state() == SessionState::Error {
        anyhow::bail!("session ended with an error");
    }
    Ok(())
}

/// Print an event; returns true once the session has ended
fn print_event(event: &SessionEvent) -> bool {
    match event {
        SessionEvent::Transcript { text, is_final: false } => println!("you: {text}"),
        SessionEvent::Transcript { text, is_final: true } => println!("sous: {text}"),
        SessionEvent::ModelText(text) => println!("sous (text): {text}"),
        SessionEvent::MemorySaved(text) => println!("[remembered] {text}"),
        SessionEvent::Error(message) => eprintln!("[error] {message}"),
        SessionEvent::GoAway { time_left } => {
            println!("[service ending session in {}]", time_left.as_deref().unwrap_or("?"));
        }
        SessionEvent::StateChanged { to, .. } => {
            tracing::debug!(state = %to, "state");
            return matches!(to, SessionState::Idle | SessionState::Error);
        }
    }
    false
}

async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (mut stream, guard) = AudioCapture::open()?;
    let sample_rate = stream.sample_rate();
    let channels = usize::from(stream.channels().max(1));
    println!("Sample rate: {sample_rate} Hz, channels: {channels}");
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        let mut second = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);

        while let Ok(event) = tokio::time::timeout_at(deadline, stream.next()).await {
            match event {
                Some(CaptureEvent::Buffer(buffer)) => {
                    // First channel only
                    second.extend(buffer.iter().step_by(channels));
                }
                Some(CaptureEvent::Failed(message)) => {
                    anyhow::bail!("microphone failed: {message}")
                }
                None => anyhow::bail!("microphone closed"),
            }
        }

        let energy = calculate_rms(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
        recording.extend(second);
    }

    drop(guard);

    if let Some(path) = output {
        let wav = samples_to_wav(&recording, sample_rate)?;
        std::fs::write(&path, wav).with_context(|| format!("failed to write {}", path.display()))?;
        println!("\nSaved recording to {}", path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check your input device and its levels.");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave split into scheduled chunks
#[allow(clippy::cast_precision_loss)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
    let (output, guard) = CpalOutput::open(finished_tx)?;
    let mut scheduler = PlaybackScheduler::default();

    let frequency = 440.0_f32;
    let chunk_frames = OUTPUT_SAMPLE_RATE as usize / 4;

    // 8 chunks of 250 ms, scheduled back to back
    for chunk in 0..8 {
        let pcm: Vec<i16> = (0..chunk_frames)
            .map(|i| {
                let t = (chunk * chunk_frames + i) as f32 / OUTPUT_SAMPLE_RATE as f32;
                float_to_pcm16((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3)
            })
            .collect();
        if let Some(placed) = scheduler.enqueue(output.as_ref(), &encode_chunk(&pcm))? {
            tracing::debug!(start = placed.start, end = placed.end(), "tone chunk scheduled");
        }
    }

    while finished_rx.recv().await.is_some() {
        if scheduler.is_drained(output.current_time()) {
            break;
        }
    }

    drop(guard);
    println!("Speaker test complete!");

    Ok(())
}
