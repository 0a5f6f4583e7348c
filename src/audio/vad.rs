//! Energy-based voice activity detection and utterance endpointing.
//!
//! Audio is split into 30 ms frames (480 samples @ 16 kHz).  A frame is
//! classified as *voice* when its RMS amplitude exceeds the configured
//! threshold.
//!
//! [`VadDetector`] classifies frames and trims silence from a finished clip.
//! [`Endpointer`] runs the same classifier incrementally over live capture
//! and decides when a listening session is over:
//!
//! * no voice frame within the no-speech window → [`Endpoint::NoSpeech`];
//! * voice followed by enough trailing silence, or the utterance reaching
//!   its maximum length → [`Endpoint::Complete`].

use std::collections::VecDeque;

/// Samples per analysis frame: 30 ms at 16 kHz.
pub const FRAME_SAMPLES: usize = 480;

/// Frames of audio kept from before speech onset (300 ms).
const PREROLL_FRAMES: usize = 10;

// ---------------------------------------------------------------------------
// VadDetector
// ---------------------------------------------------------------------------

/// Energy-based voice/silence classifier.
///
/// ```rust
/// use voice_commander::audio::VadDetector;
///
/// let vad = VadDetector::new(0.01);
///
/// let mut audio = vec![0.0_f32; 480];
/// audio.extend(vec![0.5_f32; 480]);
/// audio.extend(vec![0.0_f32; 480]);
///
/// assert_eq!(vad.trim_silence(&audio).len(), 480);
/// ```
#[derive(Debug, Clone)]
pub struct VadDetector {
    rms_threshold: f32,
    frame_size: usize,
}

impl VadDetector {
    /// Create a detector with the given RMS threshold and 30 ms frames.
    pub fn new(rms_threshold: f32) -> Self {
        Self {
            rms_threshold,
            frame_size: FRAME_SAMPLES,
        }
    }

    /// Frame size in samples.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Returns `true` when the frame contains voice activity.
    pub fn is_voice_frame(&self, chunk: &[f32]) -> bool {
        if chunk.is_empty() {
            return false;
        }
        let mean_sq: f32 = chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32;
        mean_sq.sqrt() > self.rms_threshold
    }

    /// Trim leading and trailing silence from `audio`.
    ///
    /// Returns a sub-slice of the input; an all-silent clip yields an empty
    /// slice.
    pub fn trim_silence<'a>(&self, audio: &'a [f32]) -> &'a [f32] {
        let frames: Vec<&[f32]> = audio.chunks(self.frame_size).collect();

        let Some(first) = frames.iter().position(|f| self.is_voice_frame(f)) else {
            return &audio[0..0];
        };
        let last = frames
            .iter()
            .rposition(|f| self.is_voice_frame(f))
            .unwrap_or(first);

        let start = first * self.frame_size;
        let end = ((last + 1) * self.frame_size).min(audio.len());
        &audio[start..end]
    }
}

// ---------------------------------------------------------------------------
// Endpointer
// ---------------------------------------------------------------------------

/// Result of feeding audio into an [`Endpointer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Keep capturing.
    Listening,
    /// The no-speech window elapsed without any voice frame.
    NoSpeech,
    /// An utterance has ended; collect it with [`Endpointer::into_utterance`].
    Complete,
}

/// Incremental end-of-utterance detector for 16 kHz mono audio.
#[derive(Debug)]
pub struct Endpointer {
    vad: VadDetector,
    no_speech_frames: usize,
    end_silence_frames: usize,
    max_frames: usize,

    pending: Vec<f32>,
    preroll: VecDeque<Vec<f32>>,
    utterance: Vec<f32>,
    frames_seen: usize,
    utterance_frames: usize,
    silence_run: usize,
    speech_started: bool,
    state: Endpoint,
}

impl Endpointer {
    /// Create an endpointer.
    ///
    /// * `no_speech_secs` — give up if no voice arrives within this window.
    /// * `end_silence_ms` — trailing silence that ends an utterance.
    /// * `max_utterance_secs` — hard cap on utterance length.
    pub fn new(vad: VadDetector, no_speech_secs: f32, end_silence_ms: u32, max_utterance_secs: f32) -> Self {
        let frame_ms = (vad.frame_size() as u64 * 1_000 / 16_000).max(1);
        let to_frames = |ms: u64| (ms.div_ceil(frame_ms) as usize).max(1);
        let secs_to_ms = |secs: f32| (secs.max(0.0) * 1_000.0).round() as u64;

        Self {
            no_speech_frames: to_frames(secs_to_ms(no_speech_secs)),
            end_silence_frames: to_frames(u64::from(end_silence_ms)),
            max_frames: to_frames(secs_to_ms(max_utterance_secs)),
            vad,
            pending: Vec::with_capacity(FRAME_SAMPLES),
            preroll: VecDeque::with_capacity(PREROLL_FRAMES + 1),
            utterance: Vec::new(),
            frames_seen: 0,
            utterance_frames: 0,
            silence_run: 0,
            speech_started: false,
            state: Endpoint::Listening,
        }
    }

    /// Feed captured samples; returns the decision after consuming them.
    ///
    /// Once a terminal decision is reached, further input is ignored.
    pub fn push(&mut self, samples: &[f32]) -> Endpoint {
        let frame_size = self.vad.frame_size();
        self.pending.extend_from_slice(samples);

        while self.state == Endpoint::Listening && self.pending.len() >= frame_size {
            let frame: Vec<f32> = self.pending.drain(..frame_size).collect();
            self.state = self.process_frame(frame);
        }

        self.state
    }

    /// Whether a voice frame has been seen.
    pub fn speech_started(&self) -> bool {
        self.speech_started
    }

    /// Consume the endpointer and return the captured utterance (pre-roll
    /// included, trailing silence trimmed).
    pub fn into_utterance(self) -> Vec<f32> {
        let trimmed_len = self.vad.trim_silence(&self.utterance).len();
        if trimmed_len == 0 {
            return Vec::new();
        }
        let trailing = self.silence_run * self.vad.frame_size();
        let end = self.utterance.len().saturating_sub(trailing);
        self.utterance[..end].to_vec()
    }

    fn process_frame(&mut self, frame: Vec<f32>) -> Endpoint {
        let voiced = self.vad.is_voice_frame(&frame);
        self.frames_seen += 1;

        if !self.speech_started {
            if voiced {
                self.speech_started = true;
                for earlier in self.preroll.drain(..) {
                    self.utterance.extend_from_slice(&earlier);
                }
                self.utterance.extend_from_slice(&frame);
                self.utterance_frames = 1;
                return Endpoint::Listening;
            }

            self.preroll.push_back(frame);
            if self.preroll.len() > PREROLL_FRAMES {
                self.preroll.pop_front();
            }
            if self.frames_seen >= self.no_speech_frames {
                return Endpoint::NoSpeech;
            }
            return Endpoint::Listening;
        }

        self.utterance.extend_from_slice(&frame);
        self.utterance_frames += 1;
        self.silence_run = if voiced { 0 } else { self.silence_run + 1 };

        if self.silence_run >= self.end_silence_frames || self.utterance_frames >= self.max_frames {
            Endpoint::Complete
        } else {
            Endpoint::Listening
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
