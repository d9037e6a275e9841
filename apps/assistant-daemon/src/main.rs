use anyhow::{Context, Result};
use assistant_core::{Collaborators, Control, Orchestrator, UpdateLoop, WakeWordWatcher};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::time::Duration;
use termcolor::ColorChoice;
use tracing::{error, info, warn};
use voice_local::plugin::{
    new_wake_audio_backend, select_audio_backend, select_reply_backend, select_speech_backend,
    select_transcriber, select_wake_detector, AudioBackendKind, ReplyBackendKind,
    SpeechBackendKind, TranscriberKind,
};

mod config;
mod input;
mod presenter;

use config::Config;

#[derive(Parser)]
#[command(name = "assistant-daemon")]
#[command(about = "Wake-word voice assistant with local speech and reply backends")]
struct Args {
    /// Configuration file, created with defaults if missing
    #[arg(short, long, default_value = "assistant.json")]
    config: PathBuf,

    /// Audio input backend (microphone, mock)
    #[arg(long)]
    audio_backend: Option<AudioBackendKind>,

    /// Speech-to-text backend (kyutai, mock)
    #[arg(long)]
    transcriber: Option<TranscriberKind>,

    /// Reply backend (ollama, mock)
    #[arg(long)]
    reply_backend: Option<ReplyBackendKind>,

    /// Speech backend (piper, mock)
    #[arg(long)]
    speech_backend: Option<SpeechBackendKind>,

    /// Only start turns from the keyboard
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_wake_word: bool,

    /// Orchestrator update rate
    #[arg(long)]
    fps: Option<u32>,

    /// Plain status output without colours
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_color: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing(args.verbose);

    let mut config = Config::load(&args.config)?;
    apply_overrides(&mut config, &args);
    info!(config = %args.config.display(), "assistant-daemon starting");

    let (controls_tx, controls_rx) = mpsc::channel();
    let color = if args.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    // Backends block on I/O and the reply client carries its own runtime,
    // so everything below runs off the async executor.
    let quit_tx = controls_tx.clone();
    let mut session =
        tokio::task::spawn_blocking(move || run_session(config, controls_tx, controls_rx, color));

    let outcome = tokio::select! {
        joined = &mut session => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            let _ = quit_tx.send(Control::Quit);
            session.await
        }
    };
    outcome.context("assistant session thread failed")??;

    info!("assistant-daemon stopped");
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(kind) = args.audio_backend {
        config.audio_backend = kind;
    }
    if let Some(kind) = args.transcriber {
        config.transcriber = kind;
    }
    if let Some(kind) = args.reply_backend {
        config.reply_backend = kind;
    }
    if let Some(kind) = args.speech_backend {
        config.speech_backend = kind;
    }
    if args.no_wake_word {
        config.wake_word_enabled = false;
    }
    if let Some(fps) = args.fps {
        config.ticks_per_second = fps;
    }
}

fn run_session(
    config: Config,
    controls_tx: Sender<Control>,
    controls_rx: mpsc::Receiver<Control>,
    color: ColorChoice,
) -> Result<()> {
    let sample_rate = config.wake.sample_rate_hz;
    let (audio_kind, audio) = select_audio_backend(config.audio_backend, sample_rate);
    let (reply_kind, replier) = select_reply_backend(config.reply_backend, &config.ollama);
    let (speech_kind, speech) =
        select_speech_backend(config.speech_backend, &config.tts, &config.piper);
    let (transcriber_kind, transcriber) =
        select_transcriber(config.transcriber, &config.stt, sample_rate);
    info!(
        ?audio_kind,
        ?transcriber_kind,
        ?reply_kind,
        ?speech_kind,
        "backends selected"
    );

    let collaborators = Collaborators::new(audio, transcriber, replier, speech.clone());
    let mut orchestrator = Orchestrator::new(collaborators, config.assistant.clone());
    let mut present = presenter::stdout_presenter(color);
    present(orchestrator.current_state());
    orchestrator.on_state_changed(present);

    let watcher = if config.wake_word_enabled {
        start_watcher(&config, audio_kind, &orchestrator, controls_tx.clone())
    } else {
        info!("wake word disabled");
        None
    };

    input::spawn_stdin_reader(controls_tx).context("starting keyboard input")?;
    println!("Press Enter to talk or interrupt, 'q' then Enter to quit.");

    let result = UpdateLoop::new(orchestrator, controls_rx, config.ticks_per_second).run();

    if let Some(watcher) = watcher {
        watcher.stop();
    }
    speech.cancel();
    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("assistant stopped: {e}");
            Err(e.into())
        }
    }
}

fn start_watcher(
    config: &Config,
    audio_kind: AudioBackendKind,
    orchestrator: &Orchestrator,
    controls: Sender<Control>,
) -> Option<WakeWordWatcher> {
    let source = match new_wake_audio_backend(audio_kind, config.wake.sample_rate_hz) {
        Ok(source) => source,
        Err(e) => {
            warn!("wake word audio unavailable ({e}), keyboard only");
            return None;
        }
    };
    let (detector_kind, detector) =
        select_wake_detector(config.transcriber, config.wake.clone(), &config.stt);
    let spawned = WakeWordWatcher::spawn(
        source,
        detector,
        orchestrator.gate(),
        Duration::from_millis(200),
        move || {
            let _ = controls.send(Control::Start);
        },
    );
    match spawned {
        Ok(watcher) => {
            info!(words = ?config.wake.wake_words, ?detector_kind, "wake word watcher started");
            Some(watcher)
        }
        Err(e) => {
            warn!("wake word watcher failed to start ({e}), keyboard only");
            None
        }
    }
}

fn setup_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
