//! Speech input: one listening session at a time, one outcome per session.
//!
//! * [`SpeechInputController`] — session discipline and cancellation.
//! * [`Recognizer`] — backend trait; [`MicRecognizer`] is the production one.
//! * [`ApiTranscriber`] — remote transcription of a finished utterance.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_commander::config::RecognizerConfig;
//! use voice_commander::speech::{MicRecognizer, SpeechInputController};
//!
//! #[tokio::main]
//! async fn main() {
//!     let recognizer = MicRecognizer::from_config(&RecognizerConfig::default());
//!     let controller = SpeechInputController::new(Arc::new(recognizer));
//!
//!     let (tx, rx) = tokio::sync::oneshot::channel();
//!     controller
//!         .start_listening(move |event| {
//!             let _ = tx.send(event);
//!         })
//!         .unwrap();
//!     println!("{:?}", rx.await);
//! }
//! ```

pub mod controller;
pub mod recognizer;
pub mod transcribe;

pub use controller::{Recognizer, SpeechError, SpeechEvent, SpeechInputController, StopFlag};
pub use recognizer::MicRecognizer;
pub use transcribe::{ApiTranscriber, TranscribeError};
