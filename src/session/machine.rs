//! The voice session: one turn at a time, cancellable at every step.
//!
//! [`VoiceSession`] is the only component that starts or stops listening,
//! calls the resolver, and starts or stops playback.  Everything else drives
//! it through [`toggle`](VoiceSession::toggle) and reads it through the
//! accessors or a [`subscribe`](VoiceSession::subscribe)d snapshot stream.
//!
//! # Turn flow
//!
//! ```text
//! toggle ──▶ Listening ── SpeechEvent::TranscriptReady ──▶ Processing
//!                                  resolve (fallback on failure) ──▶ Speaking
//!        navigate(route) · synthesize → decode → play ── completion ──▶ Idle
//! ```
//!
//! Every asynchronous result carries the generation that issued it.  The
//! generation advances whenever the session enters `Idle` or `Listening`, so a
//! result is applied only while both its generation and the expected state
//! still match; anything else is dropped.
//!
//! Opening the output device and starting a stream can block, so playback is
//! started on a blocking thread without holding the session lock.  A stream
//! whose turn was cancelled in the meantime is stopped as soon as it starts.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::audio::{decode_with_rate, DecodeError, DecodedAudio, PlaybackEngine, PlaybackError, PlaybackHandle};
use crate::config::{AppConfig, AppPaths};
use crate::resolver::{FallbackResolver, IntentResolver, ResolverReply, Turn, TurnHistory};
use crate::speech::{Recognizer, SpeechEvent, SpeechInputController};
use crate::synth::{SpeechSynthesizer, SynthError, DEFAULT_VOICE};

use super::state::{SessionSnapshot, VoiceState};

// ---------------------------------------------------------------------------
// Status lines
// ---------------------------------------------------------------------------

pub const STATUS_LISTENING: &str = "Listening... Speak Command.";
pub const STATUS_NO_SPEECH: &str = "No speech detected.";
pub const STATUS_INPUT_DENIED: &str = "Microphone access denied.";
pub const STATUS_INPUT_FAILED: &str = "Audio Input Failed.";
pub const STATUS_OUTPUT_FAILED: &str = "Audio Output Failed.";
pub const STATUS_DEVICE_UNAVAILABLE: &str = "Audio output unavailable. Check the output device and try again.";

// ---------------------------------------------------------------------------
// Navigator
// ---------------------------------------------------------------------------

/// Receives navigation intents from resolver replies.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Collaborators owned by a [`VoiceSession`].
pub struct SessionParts {
    pub recognizer: Arc<dyn Recognizer>,
    pub resolver: Arc<dyn IntentResolver>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub playback: PlaybackEngine,
    pub navigator: Arc<dyn Navigator>,
}

/// Behavioural knobs, usually derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Prebuilt voice passed to the synthesizer.
    pub voice: String,
    /// Sample rate of the synthesized PCM payload.
    pub sample_rate: u32,
    pub history_turns: usize,
    /// Start listening again as soon as a reply finishes playing.
    pub auto_listen: bool,
    /// How long an error status stays visible in `Idle`.
    pub error_grace: Duration,
    /// How long the spoken reply stays visible after playback.
    pub reply_grace: Duration,
    /// Write each reply as a WAV file into this directory.
    pub export_dir: Option<PathBuf>,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let voice = config.synthesis.voice.trim();
        Self {
            voice: if voice.is_empty() { DEFAULT_VOICE } else { voice }.to_string(),
            sample_rate: config.playback.sample_rate,
            history_turns: config.session.history_turns,
            auto_listen: config.session.auto_listen,
            error_grace: Duration::from_millis(config.session.error_grace_ms),
            reply_grace: Duration::from_millis(config.session.reply_grace_ms),
            export_dir: config.playback.export_replies.then(|| AppPaths::new().replies_dir),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
enum SpeakError {
    #[error("synthesis failed: {0}")]
    Synth(#[from] SynthError),

    #[error("audio decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("synthesized audio is empty")]
    Empty,
}

struct Core {
    state: VoiceState,
    status: String,
    transcript: String,
    generation: u64,
    /// Set only while `Speaking`.
    playback: Option<PlaybackHandle>,
    /// Resolver or synthesis task of the current turn.
    task: Option<JoinHandle<()>>,
    history: TurnHistory,
}

impl Core {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            status: self.status.clone(),
            transcript: self.transcript.clone(),
        }
    }

    fn is_current(&self, generation: u64, state: VoiceState) -> bool {
        self.generation == generation && self.state == state
    }
}

struct Inner {
    speech: SpeechInputController,
    resolver: Arc<FallbackResolver<Arc<dyn IntentResolver>>>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    playback: PlaybackEngine,
    navigator: Arc<dyn Navigator>,
    options: SessionOptions,
    runtime: Handle,
    core: Mutex<Core>,
    /// Serialises playback starts; taken before `core`, never after.
    starting: Mutex<()>,
    snapshots: watch::Sender<SessionSnapshot>,
}

// ---------------------------------------------------------------------------
// VoiceSession
// ---------------------------------------------------------------------------

/// Shared handle to the voice session.  Cheap to clone.
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<Inner>,
}

impl VoiceSession {
    /// Build a session bound to the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Outside a tokio runtime.
    pub fn new(parts: SessionParts, options: SessionOptions) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        let core = Core {
            state: VoiceState::Idle,
            status: String::new(),
            transcript: String::new(),
            generation: 0,
            playback: None,
            task: None,
            history: TurnHistory::with_capacity(options.history_turns),
        };

        Self {
            inner: Arc::new(Inner {
                speech: SpeechInputController::new(parts.recognizer),
                resolver: Arc::new(FallbackResolver::new(parts.resolver)),
                synthesizer: parts.synthesizer,
                playback: parts.playback,
                navigator: parts.navigator,
                options,
                runtime: Handle::current(),
                core: Mutex::new(core),
                starting: Mutex::new(()),
                snapshots,
            }),
        }
    }

    /// Single user entry point.
    ///
    /// `Idle` starts listening; any other state cancels the running step and
    /// returns to `Idle` before this call returns.  Results of the cancelled
    /// step are dropped when they arrive.
    pub fn toggle(&self) -> VoiceState {
        let mut core = self.lock();
        match core.state {
            VoiceState::Idle => self.begin_listening(&mut core),
            VoiceState::Listening => {
                self.inner.speech.stop_listening();
                log::info!("session: listening cancelled");
                self.cancel(&mut core);
            }
            VoiceState::Processing | VoiceState::Speaking => {
                log::info!("session: {} cancelled", core.state);
                self.cancel(&mut core);
            }
        }
        self.publish(&core);
        core.state
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> VoiceState {
        self.lock().state
    }

    pub fn status(&self) -> String {
        self.lock().status.clone()
    }

    pub fn transcript(&self) -> String {
        self.lock().transcript.clone()
    }

    /// Completed turns, oldest first.
    pub fn history(&self) -> Vec<Turn> {
        self.lock().history.turns().cloned().collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Handle of the reply currently playing.
    pub fn active_playback(&self) -> Option<PlaybackHandle> {
        self.lock().playback
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, core: &Core) {
        self.inner.snapshots.send_replace(core.snapshot());
    }

    /// Commit `next` if the table allows it.  Leaving `Speaking` stops the
    /// reply; entering `Idle` or `Listening` starts a new generation.
    fn commit(&self, core: &mut Core, next: VoiceState) -> bool {
        if !core.state.can_transition_to(next) {
            log::error!("session: refused transition {} -> {}", core.state, next);
            return false;
        }
        log::debug!("session: {} -> {}", core.state, next);
        core.state = next;

        if next != VoiceState::Speaking {
            if let Some(handle) = core.playback.take() {
                self.inner.playback.stop(handle);
            }
        }
        if matches!(next, VoiceState::Idle | VoiceState::Listening) {
            core.generation += 1;
            if let Some(task) = core.task.take() {
                task.abort();
            }
        }
        true
    }

    fn cancel(&self, core: &mut Core) {
        if self.commit(core, VoiceState::Idle) {
            core.status.clear();
        }
    }

    /// Enter `Idle` showing `status`, and clear it after `grace` unless the
    /// session has moved on.
    fn settle_idle(&self, core: &mut Core, status: impl Into<String>, grace: Duration) {
        if !self.commit(core, VoiceState::Idle) {
            return;
        }
        core.status = status.into();
        if core.status.is_empty() {
            return;
        }

        let generation = core.generation;
        let session = self.clone();
        self.inner.runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            session.clear_status(generation);
        });
    }

    fn clear_status(&self, generation: u64) {
        let mut core = self.lock();
        if core.is_current(generation, VoiceState::Idle) && !core.status.is_empty() {
            core.status.clear();
            self.publish(&core);
        }
    }

    fn begin_listening(&self, core: &mut Core) {
        if !self.commit(core, VoiceState::Listening) {
            return;
        }
        let generation = core.generation;
        core.transcript.clear();
        core.status = STATUS_LISTENING.to_string();

        let session = self.clone();
        let _runtime = self.inner.runtime.enter();
        let started = self
            .inner
            .speech
            .start_listening(move |event| session.on_speech_event(generation, event));

        if let Err(e) = started {
            log::error!("session: could not start listening: {e}");
            self.settle_idle(core, STATUS_INPUT_FAILED, self.inner.options.error_grace);
        }
    }

    fn on_speech_event(&self, generation: u64, event: SpeechEvent) {
        let mut core = self.lock();
        if !core.is_current(generation, VoiceState::Listening) {
            log::debug!("session: dropping stale speech event {event:?}");
            return;
        }

        let grace = self.inner.options.error_grace;
        match event {
            SpeechEvent::TranscriptReady(text) if !text.trim().is_empty() => {
                self.begin_processing(&mut core, text.trim().to_string());
            }
            SpeechEvent::TranscriptReady(_) | SpeechEvent::NoSpeechDetected => {
                log::info!("session: no speech detected");
                self.settle_idle(&mut core, STATUS_NO_SPEECH, grace);
            }
            SpeechEvent::PermissionDenied => {
                log::warn!("session: microphone access denied");
                self.settle_idle(&mut core, STATUS_INPUT_DENIED, grace);
            }
            SpeechEvent::Failed(reason) => {
                log::warn!("session: speech input failed: {reason}");
                self.settle_idle(&mut core, STATUS_INPUT_FAILED, grace);
            }
        }
        self.publish(&core);
    }

    fn begin_processing(&self, core: &mut Core, transcript: String) {
        if !self.commit(core, VoiceState::Processing) {
            return;
        }
        log::info!("session: heard \"{transcript}\"");
        let generation = core.generation;
        core.status = format!("Analyzing: \"{transcript}\"");
        core.transcript = transcript.clone();

        let history = core.history.clone();
        let resolver = Arc::clone(&self.inner.resolver);
        let session = self.clone();
        core.task = Some(self.inner.runtime.spawn(async move {
            let reply = resolver
                .resolve(&transcript, &history)
                .await
                .unwrap_or_else(|_| FallbackResolver::<Arc<dyn IntentResolver>>::offline_reply());
            session.on_reply(generation, transcript, reply);
        }));
    }

    fn on_reply(&self, generation: u64, transcript: String, reply: ResolverReply) {
        let route = {
            let mut core = self.lock();
            if !core.is_current(generation, VoiceState::Processing) {
                log::debug!("session: dropping stale resolver reply");
                return;
            }
            core.task = None;
            if !self.commit(&mut core, VoiceState::Speaking) {
                return;
            }

            let text = reply.response_text;
            log::info!("session: replying \"{text}\"");
            core.status = text.clone();
            core.history.push(Turn::user(transcript));
            core.history.push(Turn::assistant(text.clone()));

            let synthesizer = Arc::clone(&self.inner.synthesizer);
            let voice = self.inner.options.voice.clone();
            let sample_rate = self.inner.options.sample_rate;
            let export_dir = self.inner.options.export_dir.clone();
            let session = self.clone();
            core.task = Some(self.inner.runtime.spawn(async move {
                let audio = render(synthesizer.as_ref(), &text, &voice, sample_rate).await;
                if let (Ok(audio), Some(dir)) = (&audio, export_dir) {
                    export_reply(dir, audio);
                }
                session.on_audio(generation, audio);
            }));

            self.publish(&core);
            reply.route
        };

        if let Some(route) = route {
            log::info!("session: navigating to {route}");
            self.inner.navigator.navigate(&route);
        }
    }

    fn on_audio(&self, generation: u64, audio: Result<DecodedAudio, SpeakError>) {
        let mut core = self.lock();
        if !core.is_current(generation, VoiceState::Speaking) || core.playback.is_some() {
            log::debug!("session: dropping stale reply audio");
            return;
        }

        match audio {
            Err(e) => {
                core.task = None;
                log::warn!("session: reply audio unavailable: {e}");
                self.settle_idle(&mut core, STATUS_OUTPUT_FAILED, self.inner.options.error_grace);
                self.publish(&core);
            }
            Ok(audio) => {
                drop(core);
                let session = self.clone();
                self.inner
                    .runtime
                    .spawn_blocking(move || session.start_playback(generation, audio));
            }
        }
    }

    /// Runs on a blocking thread.  The core lock is not held across `play`.
    fn start_playback(&self, generation: u64, audio: DecodedAudio) {
        let _starting = self.inner.starting.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.lock().is_current(generation, VoiceState::Speaking) {
            log::debug!("session: reply cancelled before playback");
            return;
        }

        let session = self.clone();
        let runtime = self.inner.runtime.clone();
        let on_complete = move || {
            runtime.spawn(async move { session.on_playback_complete(generation) });
        };
        let started = self.inner.playback.play(audio, on_complete);

        let mut core = self.lock();
        if !core.is_current(generation, VoiceState::Speaking) {
            if let Ok(handle) = started {
                log::debug!("session: stopping stream {} of a cancelled reply", handle.id());
                self.inner.playback.stop(handle);
            }
            return;
        }
        core.task = None;

        let grace = self.inner.options.error_grace;
        match started {
            Ok(handle) => core.playback = Some(handle),
            Err(PlaybackError::DeviceUnavailable(reason)) => {
                log::warn!("session: output device unavailable: {reason}");
                self.settle_idle(&mut core, STATUS_DEVICE_UNAVAILABLE, grace);
            }
            Err(e) => {
                log::warn!("session: playback failed: {e}");
                self.settle_idle(&mut core, STATUS_OUTPUT_FAILED, grace);
            }
        }
        self.publish(&core);
    }

    fn on_playback_complete(&self, generation: u64) {
        let mut core = self.lock();
        if !core.is_current(generation, VoiceState::Speaking) {
            log::debug!("session: dropping stale playback completion");
            return;
        }
        core.playback = None;

        if self.inner.options.auto_listen {
            log::debug!("session: reply finished, listening again");
            if self.commit(&mut core, VoiceState::Idle) {
                core.status.clear();
                self.begin_listening(&mut core);
            }
        } else {
            let reply = core.status.clone();
            self.settle_idle(&mut core, reply, self.inner.options.reply_grace);
        }
        self.publish(&core);
    }
}

// ---------------------------------------------------------------------------
// Reply audio
// ---------------------------------------------------------------------------

async fn render(
    synthesizer: &dyn SpeechSynthesizer,
    text: &str,
    voice: &str,
    sample_rate: u32,
) -> Result<DecodedAudio, SpeakError> {
    let payload = synthesizer.synthesize(text, voice).await?;
    let audio = decode_with_rate(&payload, sample_rate)?;
    if audio.is_empty() {
        return Err(SpeakError::Empty);
    }
    Ok(audio)
}

fn export_reply(dir: PathBuf, audio: &DecodedAudio) {
    let wav = match audio.to_wav_bytes() {
        Ok(wav) => wav,
        Err(e) => {
            log::warn!("session: could not encode reply for export: {e}");
            return;
        }
    };
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    tokio::task::spawn_blocking(move || {
        let path = dir.join(format!("reply-{stamp}.wav"));
        match write_file(&dir, &path, &wav) {
            Ok(()) => log::debug!("session: reply exported to {}", path.display()),
            Err(e) => log::warn!("session: could not export reply to {}: {e}", path.display()),
        }
    });
}

fn write_file(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(path, bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::audio::{MockOutput, OutputDevice};
    use crate::resolver::{ResolverError, OFFLINE_REPLY};
    use crate::speech::StopFlag;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// Reports whatever the test pushes into its channel.
    struct ChannelRecognizer {
        events: tokio::sync::Mutex<mpsc::UnboundedReceiver<SpeechEvent>>,
    }

    #[async_trait]
    impl Recognizer for ChannelRecognizer {
        async fn recognize(&self, _stop: StopFlag) -> SpeechEvent {
            self.events
                .lock()
                .await
                .recv()
                .await
                .unwrap_or_else(|| SpeechEvent::Failed("closed".into()))
        }
    }

    type Reply = Result<ResolverReply, ResolverError>;

    /// Answers with whatever the test pushes; records history sizes.
    struct ChannelResolver {
        replies: tokio::sync::Mutex<mpsc::UnboundedReceiver<Reply>>,
        seen_history: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl IntentResolver for ChannelResolver {
        async fn resolve(&self, _transcript: &str, history: &TurnHistory) -> Reply {
            self.seen_history.lock().unwrap().push(history.len());
            self.replies
                .lock()
                .await
                .recv()
                .await
                .unwrap_or(Err(ResolverError::EmptyResponse))
        }
    }

    /// Returns `payload` as the synthesized audio, or fails when `fail` is set.
    struct FakeSynth {
        fail: AtomicBool,
        payload: Mutex<String>,
    }

    impl Default for FakeSynth {
        fn default() -> Self {
            Self {
                fail: AtomicBool::new(false),
                payload: Mutex::new("AAD/fw==".into()),
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynth {
        async fn synthesize(&self, _text: &str, _voice: &str) -> Result<String, SynthError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(SynthError::NoAudio)
            } else {
                Ok(self.payload.lock().unwrap().clone())
            }
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        routes: Mutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, route: &str) {
            self.routes.lock().unwrap().push(route.to_string());
        }
    }

    struct Harness {
        session: VoiceSession,
        speech: mpsc::UnboundedSender<SpeechEvent>,
        replies: mpsc::UnboundedSender<Reply>,
        resolver: Arc<ChannelResolver>,
        synth: Arc<FakeSynth>,
        output: Arc<MockOutput>,
        navigator: Arc<RecordingNavigator>,
    }

    impl Harness {
        fn new() -> Self {
            Self::build(options(), None)
        }

        fn build(options: SessionOptions, playback: Option<PlaybackEngine>) -> Self {
            let (speech, speech_rx) = mpsc::unbounded_channel();
            let (replies, replies_rx) = mpsc::unbounded_channel();
            let resolver = Arc::new(ChannelResolver {
                replies: tokio::sync::Mutex::new(replies_rx),
                seen_history: Mutex::new(Vec::new()),
            });
            let synth = Arc::new(FakeSynth::default());
            let output = Arc::new(MockOutput::default());
            let navigator = Arc::new(RecordingNavigator::default());

            let session = VoiceSession::new(
                SessionParts {
                    recognizer: Arc::new(ChannelRecognizer {
                        events: tokio::sync::Mutex::new(speech_rx),
                    }),
                    resolver: resolver.clone(),
                    synthesizer: synth.clone(),
                    playback: playback.unwrap_or_else(|| PlaybackEngine::with_device(output.clone())),
                    navigator: navigator.clone(),
                },
                options,
            );

            Self {
                session,
                speech,
                replies,
                resolver,
                synth,
                output,
                navigator,
            }
        }

        async fn hear(&self, text: &str) {
            self.speech.send(SpeechEvent::TranscriptReady(text.into())).unwrap();
            settle().await;
        }

        async fn answer(&self, reply: Reply) {
            self.replies.send(reply).unwrap();
            settle().await;
            settle_playback(&self.session).await;
        }

        /// Idle → Listening → Processing → Speaking.
        async fn speak(&self, text: &str, route: Option<&str>) {
            self.session.toggle();
            settle().await;
            self.hear("hello").await;
            self.answer(Ok(ResolverReply::new(text, route.map(String::from)))).await;
        }

        fn routes(&self) -> Vec<String> {
            self.navigator.routes.lock().unwrap().clone()
        }
    }

    fn options() -> SessionOptions {
        SessionOptions {
            voice: "Zephyr".into(),
            sample_rate: 24_000,
            history_turns: 10,
            auto_listen: false,
            error_grace: Duration::from_millis(30),
            reply_grace: Duration::from_millis(30),
            export_dir: None,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Wait until a reply's playback start, which runs on a blocking thread,
    /// has landed.
    async fn settle_playback(session: &VoiceSession) {
        for _ in 0..500 {
            if session.state() != VoiceState::Speaking || session.active_playback().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    // -----------------------------------------------------------------------
    // Turn flow
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pricing_question_navigates_speaks_and_returns_idle() {
        let h = Harness::new();

        assert_eq!(h.session.toggle(), VoiceState::Listening);
        assert_eq!(h.session.status(), STATUS_LISTENING);
        settle().await;

        h.hear("what do you charge").await;
        assert_eq!(h.session.state(), VoiceState::Processing);
        assert_eq!(h.session.transcript(), "what do you charge");

        h.answer(Ok(ResolverReply::new(
            "Pricing starts at one hundred fifty.",
            Some("/security-services".into()),
        )))
        .await;
        assert_eq!(h.session.state(), VoiceState::Speaking);
        assert_eq!(h.routes(), ["/security-services"]);
        assert_eq!(h.output.started_count(), 1);
        assert!(h.session.active_playback().is_some());
        assert_eq!(h.session.status(), "Pricing starts at one hundred fifty.");

        h.output.finish_all();
        settle().await;
        assert_eq!(h.session.state(), VoiceState::Idle);
        assert!(h.session.active_playback().is_none());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(h.session.status().is_empty());
        assert_eq!(h.session.history().len(), 2);
    }

    #[tokio::test]
    async fn cancel_mid_speech_stops_playback_synchronously() {
        let h = Harness::new();
        h.speak("Navigating to Security Sector.", None).await;
        let playing = h.session.active_playback().unwrap();

        assert_eq!(h.session.toggle(), VoiceState::Idle);
        assert!(h.output.halted.lock().unwrap().contains(&playing.id()));
        assert!(h.session.status().is_empty());

        // A completion racing the halt must not restart anything.
        h.output.finish_all();
        settle().await;
        assert_eq!(h.session.state(), VoiceState::Idle);
        assert_eq!(h.output.started_count(), 1);
    }

    #[tokio::test]
    async fn cancel_during_processing_discards_late_reply() {
        let h = Harness::new();
        h.session.toggle();
        settle().await;
        h.hear("book a call").await;
        assert_eq!(h.session.state(), VoiceState::Processing);

        assert_eq!(h.session.toggle(), VoiceState::Idle);
        h.answer(Ok(ResolverReply::new("Opening contact.", Some("/contact".into()))))
            .await;

        assert_eq!(h.session.state(), VoiceState::Idle);
        assert_eq!(h.output.started_count(), 0);
        assert!(h.routes().is_empty());
    }

    #[tokio::test]
    async fn stale_generation_reply_is_ignored() {
        let h = Harness::new();
        h.session.toggle();
        settle().await;
        h.hear("pricing").await;
        let stale = h.session.lock().generation;

        h.session.toggle();
        h.session.toggle();
        assert_eq!(h.session.state(), VoiceState::Listening);

        h.session
            .on_reply(stale, "pricing".into(), ResolverReply::new("Late.", Some("/".into())));
        assert_eq!(h.session.state(), VoiceState::Listening);
        assert!(h.routes().is_empty());
        assert!(h.session.history().is_empty());
    }

    #[tokio::test]
    async fn resolver_failures_still_speak_fallback() {
        let failures = [
            ResolverError::Timeout,
            ResolverError::Parse("expected value".into()),
            ResolverError::Remote {
                status: 503,
                body: "unavailable".into(),
            },
        ];
        for failure in failures {
            let h = Harness::new();
            h.session.toggle();
            settle().await;
            h.hear("hello").await;
            h.answer(Err(failure)).await;

            assert_eq!(h.session.state(), VoiceState::Speaking);
            assert_eq!(h.session.status(), OFFLINE_REPLY);
            assert_eq!(h.output.started_count(), 1);
            assert!(h.routes().is_empty());
        }
    }

    #[tokio::test]
    async fn history_is_passed_to_next_turn() {
        let h = Harness::new();
        h.speak("First.", None).await;
        h.output.finish_all();
        settle().await;
        h.speak("Second.", None).await;

        assert_eq!(*h.resolver.seen_history.lock().unwrap(), [0, 2]);
        assert_eq!(h.session.history().len(), 4);
    }

    // -----------------------------------------------------------------------
    // Listening outcomes
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn empty_transcript_counts_as_no_speech() {
        let h = Harness::new();
        h.session.toggle();
        settle().await;
        h.hear("   ").await;

        assert_eq!(h.session.state(), VoiceState::Idle);
        assert_eq!(h.session.status(), STATUS_NO_SPEECH);
        assert!(h.resolver.seen_history.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn permission_denied_returns_idle_with_message() {
        let h = Harness::new();
        h.session.toggle();
        settle().await;
        h.speech.send(SpeechEvent::PermissionDenied).unwrap();
        settle().await;

        assert_eq!(h.session.state(), VoiceState::Idle);
        assert_eq!(h.session.status(), STATUS_INPUT_DENIED);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(h.session.status().is_empty());
    }

    #[tokio::test]
    async fn toggle_while_listening_cancels() {
        let h = Harness::new();
        h.session.toggle();
        settle().await;

        assert_eq!(h.session.toggle(), VoiceState::Idle);
        assert!(h.session.status().is_empty());
        assert!(!h.session.inner.speech.is_listening());
    }

    // -----------------------------------------------------------------------
    // Speaking failures
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn synthesis_failure_returns_idle() {
        let h = Harness::new();
        h.synth.fail.store(true, Ordering::SeqCst);
        h.speak("Hello.", None).await;

        assert_eq!(h.session.state(), VoiceState::Idle);
        assert_eq!(h.session.status(), STATUS_OUTPUT_FAILED);
        assert_eq!(h.output.started_count(), 0);
    }

    #[tokio::test]
    async fn undecodable_audio_returns_idle_without_playing() {
        let h = Harness::new();
        *h.synth.payload.lock().unwrap() = "!!!".into();
        h.speak("Hello.", None).await;

        assert_eq!(h.session.state(), VoiceState::Idle);
        assert_eq!(h.session.status(), STATUS_OUTPUT_FAILED);
        assert_eq!(h.output.started_count(), 0);
    }

    #[tokio::test]
    async fn empty_audio_returns_idle_without_playing() {
        let h = Harness::new();
        *h.synth.payload.lock().unwrap() = String::new();
        h.speak("Hello.", None).await;

        assert_eq!(h.session.state(), VoiceState::Idle);
        assert_eq!(h.session.status(), STATUS_OUTPUT_FAILED);
        assert_eq!(h.output.started_count(), 0);
    }

    #[tokio::test]
    async fn slow_device_open_does_not_block_cancel() {
        let output = Arc::new(MockOutput::default());
        let device = Arc::clone(&output);
        let engine = PlaybackEngine::new(Box::new(move || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(device.clone() as Arc<dyn OutputDevice>)
        }));
        let h = Harness::build(options(), Some(engine));

        h.session.toggle();
        settle().await;
        h.hear("hello").await;
        h.replies.send(Ok(ResolverReply::new("Hello.", None))).unwrap();
        settle().await;
        assert_eq!(h.session.state(), VoiceState::Speaking);

        // The runtime keeps running while the device opens.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.session.active_playback().is_none());

        let began = std::time::Instant::now();
        assert_eq!(h.session.toggle(), VoiceState::Idle);
        assert!(began.elapsed() < Duration::from_millis(100));

        // Once the device is up, the cancelled reply's stream is halted.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(output.started_count(), 1);
        let started = output.started.lock().unwrap()[0];
        assert!(output.halted.lock().unwrap().contains(&started));
        assert_eq!(h.session.inner.playback.active(), None);
        assert_eq!(h.session.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn unavailable_device_is_non_fatal() {
        let engine = PlaybackEngine::new(Box::new(|| Err(PlaybackError::DeviceUnavailable("none".into()))));
        let h = Harness::build(options(), Some(engine));
        h.speak("Hello.", Some("/blog")).await;

        assert_eq!(h.session.state(), VoiceState::Idle);
        assert_eq!(h.session.status(), STATUS_DEVICE_UNAVAILABLE);
        // Navigation happened on entering Speaking regardless.
        assert_eq!(h.routes(), ["/blog"]);

        // The next turn works normally.
        assert_eq!(h.session.toggle(), VoiceState::Listening);
    }

    // -----------------------------------------------------------------------
    // Options and observation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn auto_listen_chains_into_listening() {
        let h = Harness::build(
            SessionOptions {
                auto_listen: true,
                ..options()
            },
            None,
        );
        h.speak("Online.", None).await;
        h.output.finish_all();
        settle().await;

        assert_eq!(h.session.state(), VoiceState::Listening);
        assert_eq!(h.session.status(), STATUS_LISTENING);
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let h = Harness::new();
        let rx = h.session.subscribe();
        h.session.toggle();
        assert_eq!(rx.borrow().state, VoiceState::Listening);
        assert_eq!(rx.borrow().status, STATUS_LISTENING);
    }

    #[tokio::test]
    async fn random_interleavings_only_take_legal_transitions() {
        let h = Harness::new();
        let mut seed: u64 = 0x5eed;

        for step in 0..300 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let before = h.session.state();

            match ((seed >> 33) % 5, before) {
                (1, VoiceState::Listening) => {
                    h.speech.send(SpeechEvent::TranscriptReady("hi".into())).unwrap();
                }
                (2, VoiceState::Listening) => h.speech.send(SpeechEvent::NoSpeechDetected).unwrap(),
                (3, VoiceState::Processing) => {
                    let reply = if step % 2 == 0 {
                        Ok(ResolverReply::new("Ok.", Some("/tools".into())))
                    } else {
                        Err(ResolverError::Timeout)
                    };
                    h.replies.send(reply).unwrap();
                }
                (4, VoiceState::Speaking) => h.output.finish_all(),
                _ => {
                    h.session.toggle();
                }
            }
            settle().await;
            settle_playback(&h.session).await;

            let after = h.session.state();
            assert!(
                after == before || before.can_transition_to(after),
                "step {step}: {before} -> {after}"
            );
            assert_eq!(after == VoiceState::Speaking, h.session.active_playback().is_some());
        }
    }

    #[test]
    fn session_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VoiceSession>();
    }
}
