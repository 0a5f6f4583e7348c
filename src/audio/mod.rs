//! Audio: reply decoding and playback, microphone capture and endpointing.
//!
//! # Reply path
//!
//! ```text
//! base64 PCM16 (24 kHz) → decode → DecodedAudio → PlaybackEngine → OutputDevice
//!                                                               (CpalOutput thread)
//! ```
//!
//! # Listening path
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (mpsc) → downmix_to_mono
//!           → resample_to_16k → Endpointer → utterance
//! ```

pub mod capture;
pub mod decode;
pub mod output;
pub mod playback;
pub mod resample;
pub mod vad;

pub use capture::{AudioCapture, AudioChunk, CaptureError, StreamHandle};
pub use decode::{
    decode, decode_with_rate, encode_wav, pcm16_to_f32, DecodeError, DecodedAudio,
    SYNTHESIS_CHANNELS, SYNTHESIS_SAMPLE_RATE,
};
pub use output::CpalOutput;
pub use playback::{DeviceOpener, EndCallback, OutputDevice, PlaybackEngine, PlaybackError, PlaybackHandle};
pub use resample::{downmix_to_mono, resample, resample_to_16k, TRANSCRIPTION_SAMPLE_RATE};
pub use vad::{Endpoint, Endpointer, VadDetector, FRAME_SAMPLES};

#[cfg(test)]
pub(crate) use playback::MockOutput;
