//! Voice session states and the legal transitions between them.
//!
//! [`VoiceState`] is the single committed state of a [`VoiceSession`].
//! [`VoiceState::can_transition_to`] encodes the transition table; the
//! session checks every transition against it before committing.
//!
//! [`SessionSnapshot`] is the read-only view handed to UI bindings.
//!
//! [`VoiceSession`]: crate::session::VoiceSession

// ---------------------------------------------------------------------------
// VoiceState
// ---------------------------------------------------------------------------

/// States of the voice session.
///
/// The state machine transitions are:
///
/// ```text
/// Idle ──toggle──▶ Listening
///      Listening ──transcript──▶ Processing
///                ──no speech / denied / failure / toggle──▶ Idle
///      Processing ──reply (always)──▶ Speaking
///                 ──toggle──▶ Idle
///      Speaking ──completion / failure / toggle──▶ Idle
/// ```
///
/// Listening is only ever entered from `Idle`; auto-listen after a reply
/// passes through `Idle` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VoiceState {
    /// Waiting for the user to toggle the microphone on.
    #[default]
    Idle,

    /// A speech-input session is running.
    Listening,

    /// The transcript is with the resolver.
    Processing,

    /// The reply is being synthesized and played.
    Speaking,
}

impl VoiceState {
    /// Whether the session may move from `self` to `next`.
    ///
    /// ```
    /// use voice_commander::session::VoiceState;
    ///
    /// assert!(VoiceState::Idle.can_transition_to(VoiceState::Listening));
    /// assert!(VoiceState::Processing.can_transition_to(VoiceState::Speaking));
    /// assert!(!VoiceState::Idle.can_transition_to(VoiceState::Speaking));
    /// assert!(!VoiceState::Listening.can_transition_to(VoiceState::Speaking));
    /// ```
    pub fn can_transition_to(self, next: VoiceState) -> bool {
        use VoiceState::*;
        matches!(
            (self, next),
            (Idle, Listening)
                | (Listening, Processing)
                | (Listening, Idle)
                | (Processing, Speaking)
                | (Processing, Idle)
                | (Speaking, Idle)
        )
    }

    /// Returns `true` in every state except `Idle`.
    pub fn is_active(self) -> bool {
        self != VoiceState::Idle
    }

    /// A short human-readable label for status displays.
    pub fn label(self) -> &'static str {
        match self {
            VoiceState::Idle => "Idle",
            VoiceState::Listening => "Listening",
            VoiceState::Processing => "Processing",
            VoiceState::Speaking => "Speaking",
        }
    }
}

impl std::fmt::Display for VoiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time copy of everything a UI needs to render the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: VoiceState,
    /// Status line; empty when there is nothing to show.
    pub status: String,
    /// Last recognized utterance, or empty.
    pub transcript: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
