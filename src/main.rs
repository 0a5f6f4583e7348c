//! Application entry point — console voice commander.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create a current-thread [`tokio`] runtime.
//! 4. Build the recognizer, resolver, synthesizer and playback engine.
//! 5. Construct the single [`VoiceSession`].
//! 6. Spawn the stdin reader thread: Enter toggles, `q` quits.
//! 7. Print every status change until quit.

use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::mpsc;
use voice_commander::{
    audio::{CpalOutput, PlaybackEngine},
    config::AppConfig,
    resolver::ApiResolver,
    session::{Navigator, SessionOptions, SessionParts, VoiceSession, VoiceState},
    speech::MicRecognizer,
    synth::ApiSynthesizer,
};

// ---------------------------------------------------------------------------
// Console navigator
// ---------------------------------------------------------------------------

/// Logs navigation intents; the console host has no pages to switch.
struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn navigate(&self, route: &str) {
        log::info!("navigate: {route}");
        println!("  [route] {route}");
    }
}

// ---------------------------------------------------------------------------
// Console input
// ---------------------------------------------------------------------------

enum ConsoleCommand {
    Toggle,
    Quit,
}

/// Blocking stdin reader on its own thread.
fn spawn_stdin_reader(tx: mpsc::UnboundedSender<ConsoleCommand>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let command = match line {
                    Ok(line) if matches!(line.trim(), "q" | "quit" | "exit") => ConsoleCommand::Quit,
                    Ok(_) => ConsoleCommand::Toggle,
                    Err(_) => ConsoleCommand::Quit,
                };
                let quit = matches!(command, ConsoleCommand::Quit);
                if tx.send(command).is_err() || quit {
                    return;
                }
            }
            let _ = tx.send(ConsoleCommand::Quit);
        })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice-commander starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Single-threaded runtime; capture and output run on their own threads.
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    rt.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 4. Collaborators
    let parts = SessionParts {
        recognizer: Arc::new(MicRecognizer::from_config(&config.recognizer)),
        resolver: Arc::new(ApiResolver::from_config(&config.resolver)),
        synthesizer: Arc::new(ApiSynthesizer::from_config(&config.synthesis)),
        playback: PlaybackEngine::new(CpalOutput::opener()),
        navigator: Arc::new(LoggingNavigator),
    };

    // 5. Session
    let session = VoiceSession::new(parts, SessionOptions::from_config(&config));
    let mut snapshots = session.subscribe();

    // 6. Console input
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(command_tx)?;
    println!("Press Enter to talk (Enter again to cancel), 'q' to quit.");

    // 7. Event loop
    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(ConsoleCommand::Toggle) => {
                    session.toggle();
                }
                Some(ConsoleCommand::Quit) | None => break,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.status.is_empty() {
                    println!("[{}]", snapshot.state);
                } else {
                    println!("[{}] {}", snapshot.state, snapshot.status);
                }
            }
        }
    }

    if session.state() != VoiceState::Idle {
        session.toggle();
    }
    log::info!("voice-commander shutting down");
    Ok(())
}
