//! Playback engine — at most one active output stream at a time.
//!
//! [`PlaybackEngine`] sits between the voice session and an [`OutputDevice`]
//! backend.  It acquires the device lazily on the first [`play`] call and
//! keeps it for its whole lifetime, so later replies do not need a fresh
//! device handshake.
//!
//! Every stream is identified by a [`PlaybackHandle`].  Only the most recent
//! handle is *active*; starting a new stream halts the previous one and
//! suppresses its completion callback, and [`stop`] does the same for the
//! handle it targets.  A completion callback therefore fires at most once,
//! and only for a stream that ran to its natural end.
//!
//! [`play`]: PlaybackEngine::play
//! [`stop`]: PlaybackEngine::stop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use super::decode::DecodedAudio;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors that can occur while starting playback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// The output device could not be acquired.
    #[error("audio output device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device was acquired but rejected the stream.
    #[error("failed to start audio stream: {0}")]
    Stream(String),
}

// ---------------------------------------------------------------------------
// OutputDevice
// ---------------------------------------------------------------------------

/// Callback invoked by a backend when a stream reaches its natural end.
pub type EndCallback = Box<dyn FnOnce() + Send + 'static>;

/// Backend that renders decoded audio to a physical (or simulated) output.
///
/// Backends identify streams by the numeric id chosen by the engine.
/// `halt` must be idempotent and tolerate ids it has never seen.
pub trait OutputDevice: Send + Sync {
    /// Start rendering `audio`; call `on_end` once the last frame is out.
    fn start(&self, stream_id: u64, audio: DecodedAudio, on_end: EndCallback)
        -> Result<(), PlaybackError>;

    /// Halt the stream `stream_id` without calling its `on_end`.
    fn halt(&self, stream_id: u64);
}

/// Factory used to acquire the output device on first use.
pub type DeviceOpener =
    Box<dyn Fn() -> Result<Arc<dyn OutputDevice>, PlaybackError> + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// PlaybackHandle
// ---------------------------------------------------------------------------

/// Opaque reference to a stream started by [`PlaybackEngine::play`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackHandle(u64);

impl PlaybackHandle {
    /// Numeric id shared with the backend.
    pub fn id(&self) -> u64 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// PlaybackEngine
// ---------------------------------------------------------------------------

/// Owns the shared output device and enforces exclusive playback.
pub struct PlaybackEngine {
    opener: DeviceOpener,
    device: Mutex<Option<Arc<dyn OutputDevice>>>,
    /// Id of the stream whose completion is still wanted.
    active: Arc<Mutex<Option<u64>>>,
    next_id: AtomicU64,
}

impl PlaybackEngine {
    /// Create an engine that acquires its device through `opener` on the
    /// first [`play`](Self::play) call.
    pub fn new(opener: DeviceOpener) -> Self {
        Self {
            opener,
            device: Mutex::new(None),
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create an engine around an already-acquired device.
    pub fn with_device(device: Arc<dyn OutputDevice>) -> Self {
        let shared = Arc::clone(&device);
        let engine = Self::new(Box::new(move || Ok(Arc::clone(&shared))));
        *lock(&engine.device) = Some(device);
        engine
    }

    /// Start playing `audio`, halting any stream that is still active.
    ///
    /// `on_complete` is called exactly once if the stream ends naturally and
    /// never if it is stopped or superseded.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::DeviceUnavailable`] when the device cannot be
    /// acquired, [`PlaybackError::Stream`] when the backend rejects the
    /// stream.  The previous stream is halted in either case.
    pub fn play<F>(&self, audio: DecodedAudio, on_complete: F) -> Result<PlaybackHandle, PlaybackError>
    where
        F: FnOnce() + Send + 'static,
    {
        let device = self.acquire()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = lock(&self.active).replace(id);
        if let Some(previous) = previous {
            log::debug!("playback: stream {previous} superseded by {id}");
            device.halt(previous);
        }

        let active = Arc::clone(&self.active);
        let on_end: EndCallback = Box::new(move || {
            let still_active = {
                let mut current = lock(&active);
                if *current == Some(id) {
                    *current = None;
                    true
                } else {
                    false
                }
            };
            if still_active {
                log::debug!("playback: stream {id} finished");
                on_complete();
            }
        });

        log::debug!(
            "playback: starting stream {id} ({} frames @ {} Hz)",
            audio.frame_count(),
            audio.sample_rate
        );

        if let Err(e) = device.start(id, audio, on_end) {
            let mut current = lock(&self.active);
            if *current == Some(id) {
                *current = None;
            }
            return Err(e);
        }

        Ok(PlaybackHandle(id))
    }

    /// Halt the stream behind `handle` and suppress its completion.
    ///
    /// Stopping a finished or superseded handle is a no-op.
    pub fn stop(&self, handle: PlaybackHandle) {
        let was_active = {
            let mut current = lock(&self.active);
            if *current == Some(handle.0) {
                *current = None;
                true
            } else {
                false
            }
        };

        if !was_active {
            return;
        }

        log::debug!("playback: stopping stream {}", handle.0);
        if let Some(device) = lock(&self.device).as_ref() {
            device.halt(handle.0);
        }
    }

    /// Returns `true` while `handle` is the active, unfinished stream.
    pub fn is_active(&self, handle: PlaybackHandle) -> bool {
        *lock(&self.active) == Some(handle.0)
    }

    /// The currently active handle, if any.
    pub fn active(&self) -> Option<PlaybackHandle> {
        lock(&self.active).map(PlaybackHandle)
    }

    /// Returns `true` once the output device has been acquired.
    pub fn has_device(&self) -> bool {
        lock(&self.device).is_some()
    }

    fn acquire(&self) -> Result<Arc<dyn OutputDevice>, PlaybackError> {
        let mut slot = lock(&self.device);
        if let Some(device) = slot.as_ref() {
            return Ok(Arc::clone(device));
        }

        let device = (self.opener)().map_err(|e| {
            log::warn!("playback: could not acquire output device: {e}");
            e
        })?;
        log::info!("playback: output device acquired");
        *slot = Some(Arc::clone(&device));
        Ok(device)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// In-memory [`OutputDevice`] that records calls and lets tests finish
/// streams by hand.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MockOutput {
    pending: Mutex<Vec<(u64, EndCallback)>>,
    pub started: Mutex<Vec<u64>>,
    pub halted: Mutex<Vec<u64>>,
    pub fail_start: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MockOutput {
    /// Simulate natural end-of-stream for `stream_id`.
    pub fn finish(&self, stream_id: u64) {
        let callback = {
            let mut pending = self.pending.lock().unwrap();
            let pos = pending.iter().position(|(id, _)| *id == stream_id);
            pos.map(|p| pending.remove(p).1)
        };
        if let Some(cb) = callback {
            cb();
        }
    }

    /// Finish every stream the device still holds, oldest first.
    pub fn finish_all(&self) {
        let callbacks: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for (_, cb) in callbacks {
            cb();
        }
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }
}

#[cfg(test)]
impl OutputDevice for MockOutput {
    fn start(&self, stream_id: u64, _audio: DecodedAudio, on_end: EndCallback) -> Result<(), PlaybackError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(PlaybackError::Stream("rejected".into()));
        }
        self.started.lock().unwrap().push(stream_id);
        self.pending.lock().unwrap().push((stream_id, on_end));
        Ok(())
    }

    fn halt(&self, stream_id: u64) {
        self.halted.lock().unwrap().push(stream_id);
        // A real backend may still fire `on_end` after a halt races with the
        // last buffer, so the callback is kept to let tests replay that.
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
