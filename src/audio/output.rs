//! Speaker output via `cpal`.
//!
//! `cpal::Stream` is not `Send` on every platform, so [`CpalOutput`] keeps the
//! device and the live stream on a dedicated `audio-output` thread and talks
//! to it over a channel.  The thread renders one stream at a time; starting a
//! new stream drops the old one.
//!
//! ```rust,no_run
//! use voice_commander::audio::{CpalOutput, PlaybackEngine};
//!
//! // The device is opened on the first `play` call.
//! let engine = PlaybackEngine::new(CpalOutput::opener());
//! ```

use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::decode::{DecodedAudio, SYNTHESIS_SAMPLE_RATE};
use super::playback::{DeviceOpener, EndCallback, OutputDevice, PlaybackError};
use super::resample::resample;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

enum OutputCommand {
    Play {
        id: u64,
        audio: DecodedAudio,
        on_end: EndCallback,
        reply: mpsc::Sender<Result<(), PlaybackError>>,
    },
    Halt {
        id: u64,
    },
    Finished {
        id: u64,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// [`OutputDevice`] backed by the system default output device.
pub struct CpalOutput {
    commands: Mutex<mpsc::Sender<OutputCommand>>,
}

impl CpalOutput {
    /// Open the default output device on a new `audio-output` thread.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::DeviceUnavailable`] when there is no output device or
    /// it cannot report a usable configuration.
    pub fn open() -> Result<Self, PlaybackError> {
        let (tx, rx) = mpsc::channel::<OutputCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), PlaybackError>>();
        let loop_tx = tx.clone();

        std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let target = match OutputTarget::open() {
                    Ok(target) => {
                        let _ = ready_tx.send(Ok(()));
                        target
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_output_loop(target, rx, loop_tx);
            })
            .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| PlaybackError::DeviceUnavailable("audio thread exited".into()))??;

        Ok(Self {
            commands: Mutex::new(tx),
        })
    }

    /// [`DeviceOpener`] that opens the default output device when first used.
    pub fn opener() -> DeviceOpener {
        Box::new(|| -> Result<Arc<dyn OutputDevice>, PlaybackError> { Ok(Arc::new(CpalOutput::open()?)) })
    }

    fn send(&self, command: OutputCommand) -> Result<(), PlaybackError> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(command)
            .map_err(|_| PlaybackError::DeviceUnavailable("audio thread exited".into()))
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.send(OutputCommand::Shutdown);
    }
}

impl OutputDevice for CpalOutput {
    fn start(&self, stream_id: u64, audio: DecodedAudio, on_end: EndCallback) -> Result<(), PlaybackError> {
        let (reply, result) = mpsc::channel();
        self.send(OutputCommand::Play {
            id: stream_id,
            audio,
            on_end,
            reply,
        })?;
        result
            .recv()
            .map_err(|_| PlaybackError::DeviceUnavailable("audio thread exited".into()))?
    }

    fn halt(&self, stream_id: u64) {
        if self.send(OutputCommand::Halt { id: stream_id }).is_err() {
            log::debug!("output: halt for stream {stream_id} after audio thread exit");
        }
    }
}

// ---------------------------------------------------------------------------
// Audio thread
// ---------------------------------------------------------------------------

/// Device plus the stream configuration chosen for it.
struct OutputTarget {
    device: cpal::Device,
    config: StreamConfig,
}

impl OutputTarget {
    fn open() -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::DeviceUnavailable("no output device available".into()))?;

        let rate = SampleRate(SYNTHESIS_SAMPLE_RATE);
        let native = device
            .supported_output_configs()
            .ok()
            .and_then(|mut configs| {
                configs.find(|c| {
                    c.channels() <= 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
                })
            })
            .map(|c| c.with_sample_rate(rate).config());

        let config = match native {
            Some(config) => config,
            None => device
                .default_output_config()
                .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?
                .config(),
        };

        log::info!(
            "output: using '{}' at {} Hz, {} ch",
            device.name().unwrap_or_default(),
            config.sample_rate.0,
            config.channels
        );

        Ok(Self { device, config })
    }

    fn build_stream(
        &self,
        id: u64,
        audio: &DecodedAudio,
        events: mpsc::Sender<OutputCommand>,
    ) -> Result<cpal::Stream, PlaybackError> {
        let device_rate = self.config.sample_rate.0;
        let channels = usize::from(self.config.channels.max(1));

        let samples = if audio.sample_rate == device_rate {
            audio.samples.clone()
        } else {
            resample(&audio.samples, audio.sample_rate, device_rate)
        };

        let mut cursor = StreamCursor::new(samples, channels);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if cursor.fill(data) {
                        let _ = events.send(OutputCommand::Finished { id });
                    }
                },
                |err: cpal::StreamError| {
                    log::error!("output: cpal stream error: {err}");
                },
                None,
            )
            .map_err(|e| PlaybackError::Stream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| PlaybackError::Stream(e.to_string()))?;
        Ok(stream)
    }
}

/// Mono sample source that fans each sample out to every device channel.
struct StreamCursor {
    samples: Vec<f32>,
    channels: usize,
    position: usize,
    signalled: bool,
}

impl StreamCursor {
    fn new(samples: Vec<f32>, channels: usize) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            position: 0,
            signalled: false,
        }
    }

    /// Fill one device buffer, padding with silence past the end.
    ///
    /// Returns `true` exactly once: on the first buffer that is entirely
    /// padding, i.e. one buffer after the last real sample was handed over.
    fn fill(&mut self, data: &mut [f32]) -> bool {
        let drained = self.position >= self.samples.len();
        for frame in data.chunks_mut(self.channels) {
            let sample = self.samples.get(self.position).copied().unwrap_or(0.0);
            frame.fill(sample);
            self.position = self.position.saturating_add(1);
        }
        if drained && !self.signalled {
            self.signalled = true;
            return true;
        }
        false
    }
}

struct LiveStream {
    id: u64,
    on_end: EndCallback,
    _stream: cpal::Stream,
}

fn run_output_loop(
    target: OutputTarget,
    commands: mpsc::Receiver<OutputCommand>,
    events: mpsc::Sender<OutputCommand>,
) {
    let mut live: Option<LiveStream> = None;

    while let Ok(command) = commands.recv() {
        match command {
            OutputCommand::Play {
                id,
                audio,
                on_end,
                reply,
            } => {
                // Dropping the previous stream silences it.
                live = None;
                match target.build_stream(id, &audio, events.clone()) {
                    Ok(stream) => {
                        live = Some(LiveStream {
                            id,
                            on_end,
                            _stream: stream,
                        });
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        log::warn!("output: could not start stream {id}: {e}");
                        let _ = reply.send(Err(e));
                    }
                }
            }
            OutputCommand::Halt { id } => {
                if live.as_ref().is_some_and(|s| s.id == id) {
                    live = None;
                }
            }
            OutputCommand::Finished { id } => {
                if live.as_ref().is_some_and(|s| s.id == id) {
                    if let Some(finished) = live.take() {
                        let LiveStream {
                            on_end,
                            _stream: stream,
                            ..
                        } = finished;
                        drop(stream);
                        on_end();
                    }
                }
            }
            OutputCommand::Shutdown => break,
        }
    }
}
