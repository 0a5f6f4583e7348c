//! Single-session speech input.
//!
//! [`SpeechInputController`] runs one [`Recognizer`] session at a time and
//! delivers exactly one [`SpeechEvent`] per session through the callback
//! given to [`start_listening`](SpeechInputController::start_listening).
//! [`stop_listening`](SpeechInputController::stop_listening) cancels the
//! session; whatever the recognizer produces afterwards is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Events and errors
// ---------------------------------------------------------------------------

/// Terminal outcome of a listening session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// A non-empty utterance was recognized.
    TranscriptReady(String),
    /// The session ended without any recognizable speech.
    NoSpeechDetected,
    /// The microphone is missing or access to it was refused.
    PermissionDenied,
    /// Any other failure (transport, remote error, stalled stream).
    Failed(String),
}

/// Caller errors from [`SpeechInputController`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechError {
    #[error("a listening session is already running")]
    AlreadyListening,
}

// ---------------------------------------------------------------------------
// StopFlag
// ---------------------------------------------------------------------------

/// Shared cancellation flag handed to a [`Recognizer`].
///
/// Blocking capture loops poll it; async recognizers are additionally
/// aborted at their next await point.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Recognizer trait
// ---------------------------------------------------------------------------

/// Speech-to-text backend for one session.
///
/// Language and locale come from the backend's own configuration.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Listen until an utterance ends (or `stop` is raised) and report the
    /// outcome.
    async fn recognize(&self, stop: StopFlag) -> SpeechEvent;
}

// ---------------------------------------------------------------------------
// SpeechInputController
// ---------------------------------------------------------------------------

struct ListeningSession {
    id: u64,
    stop: StopFlag,
    task: JoinHandle<()>,
}

/// Owns the recognizer and enforces one session at a time.
pub struct SpeechInputController {
    recognizer: Arc<dyn Recognizer>,
    session: Arc<Mutex<Option<ListeningSession>>>,
    next_id: AtomicU64,
}

impl SpeechInputController {
    pub fn new(recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            recognizer,
            session: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a session on the current tokio runtime.
    ///
    /// `on_event` is called at most once: exactly once if the session runs to
    /// its end, never if [`stop_listening`](Self::stop_listening) cancels it.
    ///
    /// # Errors
    ///
    /// [`SpeechError::AlreadyListening`] when a session is still running.
    ///
    /// # Panics
    ///
    /// Outside a tokio runtime.
    pub fn start_listening<F>(&self, on_event: F) -> Result<(), SpeechError>
    where
        F: FnOnce(SpeechEvent) + Send + 'static,
    {
        let mut slot = lock(&self.session);
        if slot.is_some() {
            return Err(SpeechError::AlreadyListening);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = StopFlag::new();
        let recognizer = Arc::clone(&self.recognizer);
        let session = Arc::clone(&self.session);
        let task_stop = stop.clone();

        // The slot stays locked until the session is stored, so the task
        // cannot observe an empty slot and drop its own result.
        let task = tokio::spawn(async move {
            let event = recognizer.recognize(task_stop.clone()).await;

            let current = {
                let mut slot = lock(&session);
                if slot.as_ref().is_some_and(|s| s.id == id) {
                    slot.take();
                    true
                } else {
                    false
                }
            };

            if current && !task_stop.is_stopped() {
                log::debug!("speech: session {id} ended with {event:?}");
                on_event(event);
            } else {
                log::debug!("speech: dropping result of cancelled session {id}");
            }
        });

        log::debug!("speech: session {id} started");
        *slot = Some(ListeningSession { id, stop, task });
        Ok(())
    }

    /// Cancel the running session, if any.  Returns `true` when one was
    /// cancelled.
    pub fn stop_listening(&self) -> bool {
        let Some(session) = lock(&self.session).take() else {
            return false;
        };
        log::debug!("speech: session {} cancelled", session.id);
        session.stop.stop();
        session.task.abort();
        true
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.session).is_some()
    }
}

impl Drop for SpeechInputController {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    /// Returns a fixed event immediately.
    struct Scripted(SpeechEvent);

    #[async_trait]
    impl Recognizer for Scripted {
        async fn recognize(&self, _stop: StopFlag) -> SpeechEvent {
            self.0.clone()
        }
    }

    /// Waits for `release` before returning a transcript.
    struct Gated {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Recognizer for Gated {
        async fn recognize(&self, _stop: StopFlag) -> SpeechEvent {
            self.release.notified().await;
            SpeechEvent::TranscriptReady("late".into())
        }
    }

    fn collector() -> (
        mpsc::UnboundedReceiver<SpeechEvent>,
        impl Fn() -> Box<dyn FnOnce(SpeechEvent) + Send + 'static>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (rx, move || {
            let tx = tx.clone();
            Box::new(move |event| {
                let _ = tx.send(event);
            })
        })
    }

    #[tokio::test]
    async fn emits_exactly_one_event() {
        let controller = SpeechInputController::new(Arc::new(Scripted(SpeechEvent::TranscriptReady(
            "what do you charge".into(),
        ))));
        let (mut rx, sink) = collector();

        controller.start_listening(sink()).unwrap();
        assert_eq!(
            rx.recv().await,
            Some(SpeechEvent::TranscriptReady("what do you charge".into()))
        );
        assert!(!controller.is_listening());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_listening() {
        let release = Arc::new(Notify::new());
        let controller = SpeechInputController::new(Arc::new(Gated {
            release: Arc::clone(&release),
        }));
        let (_rx, sink) = collector();

        controller.start_listening(sink()).unwrap();
        assert_eq!(controller.start_listening(sink()), Err(SpeechError::AlreadyListening));
        assert!(controller.is_listening());
    }

    #[tokio::test]
    async fn stop_suppresses_late_result() {
        let release = Arc::new(Notify::new());
        let controller = SpeechInputController::new(Arc::new(Gated {
            release: Arc::clone(&release),
        }));
        let (mut rx, sink) = collector();

        controller.start_listening(sink()).unwrap();
        tokio::task::yield_now().await;
        assert!(controller.stop_listening());
        release.notify_one();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert!(!controller.is_listening());
    }

    #[tokio::test]
    async fn can_listen_again_after_completion() {
        let controller = SpeechInputController::new(Arc::new(Scripted(SpeechEvent::NoSpeechDetected)));
        let (mut rx, sink) = collector();

        controller.start_listening(sink()).unwrap();
        assert_eq!(rx.recv().await, Some(SpeechEvent::NoSpeechDetected));
        controller.start_listening(sink()).unwrap();
        assert_eq!(rx.recv().await, Some(SpeechEvent::NoSpeechDetected));
    }

    #[tokio::test]
    async fn stop_without_session_is_noop() {
        let controller = SpeechInputController::new(Arc::new(Scripted(SpeechEvent::PermissionDenied)));
        assert!(!controller.stop_listening());
    }

    #[test]
    fn stop_flag_is_shared_between_clones() {
        let flag = StopFlag::new();
        let clone = flag.clone();
        flag.stop();
        assert!(clone.is_stopped());
    }
}
