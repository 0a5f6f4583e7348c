//! Voice command pipeline: listen, resolve intent, speak the reply.
//!
//! * [`audio`] — reply decoding, playback, microphone capture, endpointing.
//! * [`speech`] — single-session speech input.
//! * [`resolver`] — transcript → reply text and optional route.
//! * [`synth`] — reply text → base64 PCM16 speech.
//! * [`session`] — the state machine tying them together.
//! * [`config`] — TOML settings and platform paths.

pub mod audio;
pub mod config;
pub mod resolver;
pub mod session;
pub mod speech;
pub mod synth;
