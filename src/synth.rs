//! Text-to-speech: reply text in, base64 PCM16 (mono, 24 kHz) out.
//!
//! [`ApiSynthesizer`] calls a `generateContent`-style endpoint with an audio
//! response modality and a prebuilt voice, and returns the base64 payload of
//! the first inline audio part untouched.  Decoding is
//! [`audio::decode`](crate::audio::decode)'s job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SynthesisConfig;

/// Prebuilt voices known to work with the default model.
pub const VOICES: &[&str] = &["Zephyr", "Puck", "Charon", "Kore", "Fenrir"];

/// Voice used when none is configured.
pub const DEFAULT_VOICE: &str = "Zephyr";

// ---------------------------------------------------------------------------
// SynthError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("speech synthesis timed out")]
    Timeout,

    #[error("synthesis service returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("failed to parse synthesis response: {0}")]
    Parse(String),

    /// The response carried no inline audio part.
    #[error("synthesis response contained no audio")]
    NoAudio,
}

impl From<reqwest::Error> for SynthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SynthError::Timeout
        } else {
            SynthError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechSynthesizer trait
// ---------------------------------------------------------------------------

/// Async trait for text-to-speech backends.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice_id`; returns base64 PCM16 mono @ 24 kHz.
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<String, SynthError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoice<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoice<'a> {
    voice_name: &'a str,
}

impl<'a> GenerateRequest<'a> {
    fn new(text: &'a str, voice: &'a str) -> Self {
        Self {
            contents: [Content {
                parts: [TextPart { text }],
            }],
            generation_config: GenerationConfig {
                response_modalities: ["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoice { voice_name: voice },
                    },
                },
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

/// First non-empty inline audio payload of the first candidate.
fn extract_audio(response: GenerateResponse) -> Result<String, SynthError> {
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    parts
        .into_iter()
        .filter_map(|p| p.inline_data)
        .find(|d| !d.data.is_empty())
        .map(|d| {
            log::debug!(
                "synth: {} base64 bytes ({})",
                d.data.len(),
                d.mime_type.as_deref().unwrap_or("unknown type")
            );
            d.data
        })
        .ok_or(SynthError::NoAudio)
}

// ---------------------------------------------------------------------------
// ApiSynthesizer
// ---------------------------------------------------------------------------

/// Calls `{base_url}/v1beta/models/{model}:generateContent`.
pub struct ApiSynthesizer {
    client: reqwest::Client,
    config: SynthesisConfig,
}

impl ApiSynthesizer {
    pub fn from_config(config: &SynthesisConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    /// Configured voice, or [`DEFAULT_VOICE`] when blank.
    pub fn voice(&self) -> &str {
        let voice = self.config.voice.trim();
        if voice.is_empty() {
            DEFAULT_VOICE
        } else {
            voice
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for ApiSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<String, SynthError> {
        if !VOICES.contains(&voice_id) {
            log::debug!("synth: voice '{voice_id}' is not a known prebuilt voice");
        }

        let url = self.endpoint();
        let mut req = self.client.post(&url).json(&GenerateRequest::new(text, voice_id));

        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.header("x-goog-api-key", key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SynthError::Parse(e.to_string()))?;

        extract_audio(parsed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> GenerateResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn request_uses_audio_modality_and_voice() {
        let body = serde_json::to_value(GenerateRequest::new("Online.", "Puck")).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Online.");
        assert_eq!(body["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
    }

    #[test]
    fn extracts_first_inline_audio() {
        let response = parse(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"ignored"},
                {"inlineData":{"mimeType":"audio/L16;codec=pcm;rate=24000","data":"AAD/fw=="}}
            ]}}]}"#,
        );
        assert_eq!(extract_audio(response).unwrap(), "AAD/fw==");
    }

    #[test]
    fn missing_audio_is_no_audio() {
        assert!(matches!(extract_audio(parse(r#"{"candidates":[]}"#)), Err(SynthError::NoAudio)));
        assert!(matches!(extract_audio(parse("{}")), Err(SynthError::NoAudio)));
        assert!(matches!(
            extract_audio(parse(r#"{"candidates":[{"content":{"parts":[{"inlineData":{"data":""}}]}}]}"#)),
            Err(SynthError::NoAudio)
        ));
    }

    #[test]
    fn endpoint_includes_model() {
        let synth = ApiSynthesizer::from_config(&SynthesisConfig {
            base_url: "https://example.test/".into(),
            ..SynthesisConfig::default()
        });
        assert_eq!(
            synth.endpoint(),
            "https://example.test/v1beta/models/gemini-2.5-flash-preview-tts:generateContent"
        );
    }

    #[test]
    fn blank_voice_falls_back_to_default() {
        let synth = ApiSynthesizer::from_config(&SynthesisConfig {
            voice: " ".into(),
            ..SynthesisConfig::default()
        });
        assert_eq!(synth.voice(), DEFAULT_VOICE);
    }

    #[test]
    fn synthesizer_is_object_safe() {
        let synth: Box<dyn SpeechSynthesizer> = Box::new(ApiSynthesizer::from_config(&SynthesisConfig::default()));
        drop(synth);
    }
}
