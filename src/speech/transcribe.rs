//! Remote transcription of a finished utterance.
//!
//! [`ApiTranscriber`] posts a 16 kHz mono WAV clip to an OpenAI-compatible
//! `/v1/audio/transcriptions` endpoint (multipart form) and returns the
//! recognized text.

use serde::Deserialize;
use thiserror::Error;

use crate::config::RecognizerConfig;

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("transcription request timed out")]
    Timeout,

    #[error("transcription service returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("failed to parse transcription response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for TranscribeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TranscribeError::Timeout
        } else {
            TranscribeError::Request(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// Client for `{base_url}/v1/audio/transcriptions`.
pub struct ApiTranscriber {
    client: reqwest::Client,
    config: RecognizerConfig,
}

impl ApiTranscriber {
    pub fn from_config(config: &RecognizerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    fn form(&self, wav: Vec<u8>) -> Result<reqwest::multipart::Form, TranscribeError> {
        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::Request(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.config.model.clone())
            .text("response_format", "json");

        if let Some(language) = self.config.language.as_deref().filter(|l| !l.is_empty()) {
            form = form.text("language", language.to_string());
        }
        Ok(form)
    }

    /// Transcribe a WAV clip; returns the trimmed text (possibly empty).
    pub async fn transcribe(&self, wav: Vec<u8>) -> Result<String, TranscribeError> {
        let url = format!(
            "{}/v1/audio/transcriptions",
            self.config.base_url.trim_end_matches('/')
        );
        log::debug!("transcribe: POST {url} ({} bytes)", wav.len());

        let mut req = self.client.post(&url).multipart(self.form(wav)?);

        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::Parse(e.to_string()))?;

        Ok(parsed.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_without_text_is_empty() {
        let parsed: TranscriptionResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.text.is_empty());
    }

    #[test]
    fn form_builds_with_and_without_language() {
        let mut config = RecognizerConfig::default();
        assert!(ApiTranscriber::from_config(&config).form(vec![0; 44]).is_ok());
        config.language = None;
        assert!(ApiTranscriber::from_config(&config).form(vec![0; 44]).is_ok());
    }
}
