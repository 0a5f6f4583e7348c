//! Microphone-backed [`Recognizer`].
//!
//! [`MicRecognizer`] records from the default input device on a blocking
//! task, endpoints the stream with [`Endpointer`], and sends the finished
//! utterance to [`ApiTranscriber`].
//!
//! ```text
//! cpal input → AudioChunk → downmix_to_mono → resample_to_16k → Endpointer
//!            → encode_wav → ApiTranscriber → SpeechEvent
//! ```

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use async_trait::async_trait;

use crate::audio::{
    downmix_to_mono, encode_wav, resample_to_16k, AudioCapture, AudioChunk, CaptureError, Endpoint, Endpointer,
    VadDetector, TRANSCRIPTION_SAMPLE_RATE,
};
use crate::config::RecognizerConfig;
use crate::speech::controller::{Recognizer, SpeechEvent, StopFlag};
use crate::speech::transcribe::ApiTranscriber;

/// How often the capture loop re-checks the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capture is abandoned when the device delivers nothing for this long.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one blocking capture run.
#[derive(Debug)]
enum Capture {
    Utterance(Vec<f32>),
    NoSpeech,
    Cancelled,
}

/// Record from the default microphone until the endpointer decides.
fn capture_utterance(config: &RecognizerConfig, stop: &StopFlag) -> Result<Capture, CaptureError> {
    let capture = AudioCapture::new()?;
    let (tx, rx) = mpsc::channel::<AudioChunk>();
    let _stream = capture.start(tx)?;

    let mut endpointer = Endpointer::new(
        VadDetector::new(config.vad_threshold),
        config.no_speech_timeout_secs,
        config.end_silence_ms,
        config.max_utterance_secs,
    );
    let mut idle = Duration::ZERO;

    loop {
        if stop.is_stopped() {
            return Ok(Capture::Cancelled);
        }

        let chunk = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => {
                idle = Duration::ZERO;
                chunk
            }
            Err(RecvTimeoutError::Timeout) => {
                idle += POLL_INTERVAL;
                if idle >= STALL_TIMEOUT {
                    return Err(CaptureError::StreamStalled);
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::StreamStalled),
        };

        let mono = downmix_to_mono(&chunk.samples, chunk.channels);
        let pcm = resample_to_16k(&mono, chunk.sample_rate);

        match endpointer.push(&pcm) {
            Endpoint::Listening => {}
            Endpoint::NoSpeech => return Ok(Capture::NoSpeech),
            Endpoint::Complete => {
                let utterance = endpointer.into_utterance();
                return Ok(if utterance.is_empty() {
                    Capture::NoSpeech
                } else {
                    Capture::Utterance(utterance)
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MicRecognizer
// ---------------------------------------------------------------------------

/// Default microphone plus a remote transcription service.
pub struct MicRecognizer {
    config: RecognizerConfig,
    transcriber: ApiTranscriber,
}

impl MicRecognizer {
    pub fn from_config(config: &RecognizerConfig) -> Self {
        Self {
            config: config.clone(),
            transcriber: ApiTranscriber::from_config(config),
        }
    }
}

#[async_trait]
impl Recognizer for MicRecognizer {
    async fn recognize(&self, stop: StopFlag) -> SpeechEvent {
        let config = self.config.clone();
        let blocking_stop = stop.clone();
        let captured = tokio::task::spawn_blocking(move || capture_utterance(&config, &blocking_stop)).await;

        let utterance = match captured {
            Ok(Ok(Capture::Utterance(samples))) => samples,
            Ok(Ok(Capture::NoSpeech)) => return SpeechEvent::NoSpeechDetected,
            Ok(Ok(Capture::Cancelled)) => return SpeechEvent::Failed("cancelled".into()),
            Ok(Err(e)) if e.is_input_denied() => {
                log::warn!("speech: microphone unavailable: {e}");
                return SpeechEvent::PermissionDenied;
            }
            Ok(Err(e)) => return SpeechEvent::Failed(e.to_string()),
            Err(e) => return SpeechEvent::Failed(format!("capture task failed: {e}")),
        };

        log::debug!(
            "speech: utterance of {:.2}s captured",
            utterance.len() as f32 / TRANSCRIPTION_SAMPLE_RATE as f32
        );

        let wav = match encode_wav(&utterance, TRANSCRIPTION_SAMPLE_RATE, 1) {
            Ok(wav) => wav,
            Err(e) => return SpeechEvent::Failed(e.to_string()),
        };

        if stop.is_stopped() {
            return SpeechEvent::Failed("cancelled".into());
        }

        match self.transcriber.transcribe(wav).await {
            Ok(text) if text.is_empty() => SpeechEvent::NoSpeechDetected,
            Ok(text) => SpeechEvent::TranscriptReady(text),
            Err(e) => {
                log::warn!("speech: transcription failed: {e}");
                SpeechEvent::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizer_is_object_safe() {
        let recognizer: Box<dyn Recognizer> = Box::new(MicRecognizer::from_config(&RecognizerConfig::default()));
        drop(recognizer);
    }

    #[test]
    fn stall_timeout_spans_several_polls() {
        assert!(STALL_TIMEOUT > POLL_INTERVAL * 5);
    }
}
