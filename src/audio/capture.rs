//! Microphone capture via `cpal`.
//!
//! [`AudioCapture`] opens the default input device; [`AudioCapture::start`]
//! streams [`AudioChunk`]s over an mpsc channel until the returned
//! [`StreamHandle`] is dropped.  The handle is not `Send`, so capture lives on
//! whichever thread started it (the recognizer uses a blocking task).

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use thiserror::Error;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// One buffer of interleaved `f32` samples as delivered by the cpal callback.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    /// Sample rate of this chunk in Hz (e.g. 44100, 48000).
    pub sample_rate: u32,
    pub channels: u16,
}

/// RAII guard that keeps the input stream alive; dropping it stops capture.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening or running the microphone.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio stream stopped delivering samples")]
    StreamStalled,
}

impl CaptureError {
    /// Whether the failure means the microphone is missing or refused to the
    /// process, as opposed to a transient stream problem.
    pub fn is_input_denied(&self) -> bool {
        matches!(
            self,
            CaptureError::NoDevice
                | CaptureError::DefaultConfig(cpal::DefaultStreamConfigError::DeviceNotAvailable)
                | CaptureError::BuildStream(cpal::BuildStreamError::DeviceNotAvailable)
                | CaptureError::PlayStream(cpal::PlayStreamError::DeviceNotAvailable)
        )
    }
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// Default input device plus its preferred stream configuration.
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
}

impl AudioCapture {
    /// Open the system default input device.
    ///
    /// # Errors
    ///
    /// [`CaptureError::NoDevice`] when no input device is available, or
    /// [`CaptureError::DefaultConfig`] when it cannot report a configuration.
    pub fn new() -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
        let config: cpal::StreamConfig = device.default_input_config()?.into();

        log::debug!(
            "capture: input '{}' at {} Hz, {} ch",
            device.name().unwrap_or_default(),
            config.sample_rate.0,
            config.channels
        );

        Ok(Self { device, config })
    }

    /// Start recording and send [`AudioChunk`]s to `tx`.
    ///
    /// Send errors (receiver dropped) are ignored so the audio thread never
    /// panics.
    pub fn start(&self, tx: mpsc::Sender<AudioChunk>) -> Result<StreamHandle, CaptureError> {
        let sample_rate = self.sample_rate();
        let channels = self.channels();

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(AudioChunk {
                    samples: data.to_vec(),
                    sample_rate,
                    channels,
                });
            },
            |err: cpal::StreamError| {
                log::error!("capture: cpal stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        Ok(StreamHandle { _stream: stream })
    }

    /// Native sample rate of the capture stream in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Number of interleaved channels in each [`AudioChunk`].
    pub fn channels(&self) -> u16 {
        self.config.channels
    }
}
