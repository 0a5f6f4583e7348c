//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Environment variable that supplies an API key to every remote service
/// whose section in `settings.toml` leaves `api_key` unset.
pub const API_KEY_ENV: &str = "VOICE_COMMANDER_API_KEY";

// ---------------------------------------------------------------------------
// ResolverConfig
// ---------------------------------------------------------------------------

/// Settings for the remote intent-resolution call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Base URL of an OpenAI-compatible API.
    ///
    /// - Ollama default: `http://localhost:11434`
    /// - OpenAI: `https://api.openai.com`
    pub base_url: String,
    /// API key — `None` for local providers.
    pub api_key: Option<String>,
    /// Model identifier sent to the API (e.g. `"qwen2.5:3b"`, `"gpt-4o-mini"`).
    pub model: String,
    /// Sampling temperature (0.0 – 1.0).
    pub temperature: f32,
    /// Maximum seconds to wait for a reply before the turn falls back.
    pub timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            api_key: None,
            model: "qwen2.5:3b".into(),
            temperature: 0.4,
            timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// SynthesisConfig
// ---------------------------------------------------------------------------

/// Settings for the remote text-to-speech call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Base URL of the generateContent-style API.
    pub base_url: String,
    /// API key sent as `x-goog-api-key`.
    pub api_key: Option<String>,
    /// Speech model identifier.
    pub model: String,
    /// Prebuilt voice name (e.g. `"Zephyr"`, `"Kore"`).
    pub voice: String,
    /// Maximum seconds to wait for synthesized audio.
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_key: None,
            model: "gemini-2.5-flash-preview-tts".into(),
            voice: "Zephyr".into(),
            timeout_secs: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// RecognizerConfig
// ---------------------------------------------------------------------------

/// Settings for microphone endpointing and the transcription call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Base URL of an OpenAI-compatible transcription API.
    pub base_url: String,
    /// API key — `None` for local providers.
    pub api_key: Option<String>,
    /// Transcription model (e.g. `"whisper-1"`).
    pub model: String,
    /// ISO-639-1 language hint; `None` lets the service detect it.
    pub language: Option<String>,
    /// RMS threshold above which a 30 ms frame counts as speech.
    pub vad_threshold: f32,
    /// Seconds without any speech before the session reports no speech.
    pub no_speech_timeout_secs: f32,
    /// Trailing silence (ms) that ends an utterance.
    pub end_silence_ms: u32,
    /// Hard cap on a single utterance, in seconds.
    pub max_utterance_secs: f32,
    /// Maximum seconds to wait for the transcription reply.
    pub timeout_secs: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            api_key: None,
            model: "whisper-1".into(),
            language: Some("en".into()),
            vad_threshold: 0.015,
            no_speech_timeout_secs: 6.0,
            end_silence_ms: 900,
            max_utterance_secs: 15.0,
            timeout_secs: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Settings for reply playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Sample rate of synthesized audio in Hz.  The synthesis service always
    /// delivers 24 kHz.
    pub sample_rate: u32,
    /// Write each spoken reply as a WAV file under the replies directory.
    pub export_replies: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            export_replies: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Settings for the voice session state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of turns kept in the history sent to the resolver.
    pub history_turns: usize,
    /// Start listening again as soon as a reply finishes playing.
    pub auto_listen: bool,
    /// How long an error status stays visible after returning to Idle.
    pub error_grace_ms: u64,
    /// How long the spoken reply stays visible after playback completes.
    pub reply_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_turns: 10,
            auto_listen: false,
            error_grace_ms: 2_000,
            reply_grace_ms: 3_000,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use voice_commander::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// assert_eq!(config.playback.sample_rate, 24_000);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub resolver: ResolverConfig,
    pub synthesis: SynthesisConfig,
    pub recognizer: RecognizerConfig,
    pub playback: PlaybackConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml` and
    /// apply the [`API_KEY_ENV`] override.
    ///
    /// Returns the defaults when the file does not exist yet.
    pub fn load() -> Result<Self> {
        let config = Self::load_from(&AppPaths::new().settings_file)?;
        Ok(config.with_api_key_fallback(std::env::var(API_KEY_ENV).ok()))
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Fill every unset or empty `api_key` with `key`.
    ///
    /// Keys set explicitly in the file always win.
    pub fn with_api_key_fallback(mut self, key: Option<String>) -> Self {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return self;
        };
        for slot in [
            &mut self.resolver.api_key,
            &mut self.synthesis.api_key,
            &mut self.recognizer.api_key,
        ] {
            if slot.as_deref().map_or(true, str::is_empty) {
                *slot = Some(key.clone());
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
