//! Voice session state machine.
//!
//! This module wires the speech → resolver → synthesis → playback turn and
//! exposes the read-only snapshot a UI binds to.
//!
//! # Architecture
//!
//! ```text
//! toggle() ─▶ VoiceSession (Arc<Mutex<Core>>, generation counter)
//!                │
//!                ├─ SpeechInputController ─ SpeechEvent ─▶ on_speech_event
//!                ├─ FallbackResolver (tokio task)        ─▶ on_reply ─▶ Navigator
//!                ├─ SpeechSynthesizer → decode (task)    ─▶ on_audio
//!                └─ PlaybackEngine ─ completion          ─▶ on_playback_complete
//!
//! watch::Receiver<SessionSnapshot> ←── read by the host UI
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_commander::audio::{CpalOutput, PlaybackEngine};
//! use voice_commander::config::AppConfig;
//! use voice_commander::resolver::ApiResolver;
//! use voice_commander::session::{Navigator, SessionOptions, SessionParts, VoiceSession};
//! use voice_commander::speech::MicRecognizer;
//! use voice_commander::synth::ApiSynthesizer;
//!
//! struct PrintNavigator;
//!
//! impl Navigator for PrintNavigator {
//!     fn navigate(&self, route: &str) {
//!         println!("-> {route}");
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let session = VoiceSession::new(
//!         SessionParts {
//!             recognizer: Arc::new(MicRecognizer::from_config(&config.recognizer)),
//!             resolver: Arc::new(ApiResolver::from_config(&config.resolver)),
//!             synthesizer: Arc::new(ApiSynthesizer::from_config(&config.synthesis)),
//!             playback: PlaybackEngine::new(CpalOutput::opener()),
//!             navigator: Arc::new(PrintNavigator),
//!         },
//!         SessionOptions::from_config(&config),
//!     );
//!
//!     session.toggle(); // start listening
//! }
//! ```

pub mod machine;
pub mod state;

pub use machine::{
    Navigator, SessionOptions, SessionParts, VoiceSession, STATUS_DEVICE_UNAVAILABLE, STATUS_INPUT_DENIED,
    STATUS_INPUT_FAILED, STATUS_LISTENING, STATUS_NO_SPEECH, STATUS_OUTPUT_FAILED,
};
pub use state::{SessionSnapshot, VoiceState};
