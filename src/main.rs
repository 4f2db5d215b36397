use anyhow::{Context, Result};
use aussie_voice::audio::{AudioOutput, AudioPipeline, AudioSource, WavOutput};
use aussie_voice::session::{
    Message, MessageSource, PracticeMode, Session, SessionController, SessionObserver,
    TransportKind,
};
use aussie_voice::{Config, SessionError};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aussie-voice")]
#[command(about = "Practice spoken Aussie English with an AI character")]
struct Cli {
    /// Config file (extension optional; missing file means defaults)
    #[arg(short, long, default_value = "config/aussie-voice")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hold an interactive conversation
    Talk {
        #[arg(long, value_enum)]
        mode: Option<PracticeMode>,

        #[arg(long, value_enum)]
        transport: Option<TransportKind>,

        /// WAV file standing in for the microphone
        #[arg(long, conflicts_with = "tone")]
        input: Option<PathBuf>,

        /// Sine tone (Hz) standing in for the microphone
        #[arg(long)]
        tone: Option<f32>,

        /// Write everything the AI says to this WAV file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Check backend readiness
    Status,
}

/// Prints the conversation to the terminal
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_connect(&self, session: &Session) {
        println!("-- connected ({}, {}) --", session.mode, session.transport);
    }

    fn on_disconnect(&self) {
        println!("-- disconnected --");
    }

    fn on_message(&self, message: &Message) {
        let who = match message.source {
            MessageSource::User => "you",
            MessageSource::Ai => "mate",
        };
        println!("{:>4}: {}", who, message.text);
    }

    fn on_error(&self, error: &SessionError) {
        eprintln!("error: {}", error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Aussie Voice v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Status => status(&cfg).await,
        Commands::Talk {
            mode,
            transport,
            input,
            tone,
            output,
        } => {
            let source = match (input, tone) {
                (Some(path), _) => AudioSource::File(path),
                (None, Some(frequency_hz)) => AudioSource::Tone { frequency_hz },
                (None, None) => AudioSource::Silence,
            };
            talk(cfg, mode, transport, source, output).await
        }
    }
}

async fn status(cfg: &Config) -> Result<()> {
    let api = cfg.voice_api()?;
    let status = api.status().await.context("Backend status request failed")?;

    println!("backend: {}", api.base_url());
    println!("ready:   {}", status.ready);
    for (key, value) in &status.services {
        println!("  {}: {}", key, value);
    }
    Ok(())
}

async fn talk(
    cfg: Config,
    mode: Option<PracticeMode>,
    transport: Option<TransportKind>,
    source: AudioSource,
    output: Option<PathBuf>,
) -> Result<()> {
    let api = cfg.voice_api()?;
    let audio_config = cfg.audio_backend_config();

    let mut session_config = cfg.session_config();
    if let Some(transport) = transport {
        session_config.transport = transport;
    }
    let mode = mode.unwrap_or(cfg.session.mode);

    let mut pipeline = AudioPipeline::new(source, audio_config.clone());
    if let Some(path) = output {
        let rate = audio_config.target_sample_rate;
        pipeline = pipeline.with_output(move || {
            Ok(Box::new(WavOutput::create(path.clone(), rate)?) as Box<dyn AudioOutput>)
        });
    }

    let controller = SessionController::new(api, pipeline, session_config, Arc::new(ConsoleObserver));

    let session = controller
        .start_session(mode)
        .await
        .context("Failed to start session")?;
    info!("Session {} started", session.id);

    println!("Type to chat. Empty line starts/stops recording, /mute toggles the mic, /quit ends.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut recording = false;

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        let result = match line.trim() {
            "/quit" => break,
            "/mute" => {
                let muted = controller.toggle_mute();
                println!("-- {} --", if muted { "muted" } else { "listening" });
                Ok(())
            }
            "" if recording => {
                recording = false;
                controller.stop_recording().await.map(|_| ())
            }
            "" => {
                recording = true;
                println!("-- recording, press enter to send --");
                controller.start_recording().await
            }
            text => controller.send_text(text).await.map(|_| ()),
        };

        match result {
            Ok(()) => {}
            // Already reported through the observer
            Err(SessionError::Turn(_)) | Err(SessionError::Playback(_)) => {}
            Err(e) if e.is_fatal() => {
                warn!("Session ended: {}", e);
                break;
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }

    controller.end_session().await;
    Ok(())
}
