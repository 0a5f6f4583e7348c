//! Core `IntentResolver` trait and `ApiResolver` implementation.
//!
//! `ApiResolver` calls any OpenAI-compatible `/v1/chat/completions` endpoint
//! and asks for a strict JSON-schema reply of the shape
//! `{"response": string, "route": string | null}`.  The reply is deserialized
//! into typed structs at the boundary; anything that does not fit the shape is
//! a [`ResolverError::Parse`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ResolverConfig;
use crate::resolver::history::TurnHistory;
use crate::resolver::persona::Persona;

// ---------------------------------------------------------------------------
// ResolverError
// ---------------------------------------------------------------------------

/// Errors that can occur while resolving a transcript.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("resolver request timed out")]
    Timeout,

    /// The service answered with a non-success status.
    #[error("resolver returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    /// The reply did not match the expected JSON shape.
    #[error("failed to parse resolver reply: {0}")]
    Parse(String),

    /// The service returned no message content at all.
    #[error("resolver returned an empty reply")]
    EmptyResponse,
}

impl From<reqwest::Error> for ResolverError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ResolverError::Timeout
        } else {
            ResolverError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// ResolverReply
// ---------------------------------------------------------------------------

/// Spoken reply plus an optional navigation target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverReply {
    pub response_text: String,
    pub route: Option<String>,
}

impl ResolverReply {
    pub fn new(response_text: impl Into<String>, route: Option<String>) -> Self {
        Self {
            response_text: response_text.into(),
            route,
        }
    }
}

// ---------------------------------------------------------------------------
// IntentResolver trait
// ---------------------------------------------------------------------------

/// Async trait turning a transcript into a reply.
///
/// Implementors must be `Send + Sync` so they can be shared as
/// `Arc<dyn IntentResolver>` between the session and its spawned tasks.
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn resolve(&self, transcript: &str, history: &TurnHistory) -> Result<ResolverReply, ResolverError>;
}

#[async_trait]
impl<T: IntentResolver + ?Sized> IntentResolver for Arc<T> {
    async fn resolve(&self, transcript: &str, history: &TurnHistory) -> Result<ResolverReply, ResolverError> {
        (**self).resolve(transcript, history).await
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Shape the model is constrained to produce.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StructuredReply {
    response: String,
    #[serde(default)]
    route: Option<String>,
}

fn reply_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": "voice_reply",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "response": { "type": "string" },
                    "route":    { "type": ["string", "null"] }
                },
                "required": ["response", "route"],
                "additionalProperties": false
            }
        }
    })
}

/// Parse the model's message content into a [`ResolverReply`].
///
/// Routes outside the persona's table are dropped.  An empty `response` is
/// returned as-is; the fallback layer substitutes a default.
pub(crate) fn parse_reply(content: &str, persona: &Persona) -> Result<ResolverReply, ResolverError> {
    let reply: StructuredReply =
        serde_json::from_str(content.trim()).map_err(|e| ResolverError::Parse(e.to_string()))?;

    let route = reply
        .route
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .and_then(|r| {
            if persona.is_known_route(&r) {
                Some(r)
            } else {
                log::warn!("resolver: dropping unknown route '{r}'");
                None
            }
        });

    Ok(ResolverReply {
        response_text: reply.response.trim().to_string(),
        route,
    })
}

// ---------------------------------------------------------------------------
// ApiResolver
// ---------------------------------------------------------------------------

/// Calls an OpenAI-compatible `/v1/chat/completions` endpoint.
///
/// All connection details come from the [`ResolverConfig`] passed to
/// [`ApiResolver::from_config`].
pub struct ApiResolver {
    client: reqwest::Client,
    config: ResolverConfig,
    persona: Persona,
}

impl ApiResolver {
    /// Build an `ApiResolver` with the default persona.
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::with_persona(config, Persona::default())
    }

    pub fn with_persona(config: &ResolverConfig, persona: Persona) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
            persona,
        }
    }

    fn messages(&self, transcript: &str, history: &TurnHistory) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(serde_json::json!({
            "role": "system",
            "content": self.persona.system_prompt()
        }));
        for turn in history.turns() {
            messages.push(serde_json::json!({
                "role": turn.role.as_str(),
                "content": turn.text
            }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": transcript }));
        messages
    }
}

#[async_trait]
impl IntentResolver for ApiResolver {
    /// One attempt, no retries.  Bearer auth is attached only for a non-empty
    /// `api_key`, so local providers work without one.
    async fn resolve(&self, transcript: &str, history: &TurnHistory) -> Result<ResolverReply, ResolverError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'));

        let body = serde_json::json!({
            "model":           self.config.model,
            "messages":        self.messages(transcript, history),
            "stream":          false,
            "temperature":     self.config.temperature,
            "max_tokens":      128,
            "response_format": reply_schema()
        });

        let mut req = self.client.post(&url).json(&body);

        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        log::debug!("resolver: POST {url} ({} history turns)", history.len());
        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResolverError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ResolverError::Parse(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ResolverError::EmptyResponse)?;

        parse_reply(&content, &self.persona)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::history::Turn;

    fn make_config(api_key: Option<&str>) -> ResolverConfig {
        ResolverConfig {
            api_key: api_key.map(|s| s.to_string()),
            ..ResolverConfig::default()
        }
    }

    #[test]
    fn parses_reply_with_route() {
        let reply = parse_reply(
            r#"{"response": "Navigating to Security Sector.", "route": "/security-services"}"#,
            &Persona::default(),
        )
        .unwrap();
        assert_eq!(reply.response_text, "Navigating to Security Sector.");
        assert_eq!(reply.route.as_deref(), Some("/security-services"));
    }

    #[test]
    fn null_route_is_none() {
        let reply = parse_reply(r#"{"response": "Hello.", "route": null}"#, &Persona::default()).unwrap();
        assert_eq!(reply.route, None);
    }

    #[test]
    fn unknown_route_is_dropped() {
        let reply = parse_reply(r#"{"response": "Sure.", "route": "/wp-admin"}"#, &Persona::default()).unwrap();
        assert_eq!(reply.response_text, "Sure.");
        assert_eq!(reply.route, None);
    }

    #[test]
    fn empty_response_text_passes_through() {
        let reply = parse_reply(r#"{"response": "  ", "route": "/"}"#, &Persona::default()).unwrap();
        assert!(reply.response_text.is_empty());
        assert_eq!(reply.route.as_deref(), Some("/"));
    }

    #[test]
    fn missing_response_is_parse_error() {
        let err = parse_reply(r#"{"route": "/"}"#, &Persona::default()).unwrap_err();
        assert!(matches!(err, ResolverError::Parse(_)));
    }

    #[test]
    fn non_string_route_is_parse_error() {
        let err = parse_reply(r#"{"response": "x", "route": 42}"#, &Persona::default()).unwrap_err();
        assert!(matches!(err, ResolverError::Parse(_)));
    }

    #[test]
    fn prose_is_parse_error() {
        let err = parse_reply("Sure! Here you go: {\"response\": \"x\"}", &Persona::default()).unwrap_err();
        assert!(matches!(err, ResolverError::Parse(_)));
    }

    #[test]
    fn messages_include_persona_history_and_transcript() {
        let resolver = ApiResolver::from_config(&make_config(None));
        let mut history = TurnHistory::new();
        history.push(Turn::user("hi"));
        history.push(Turn::assistant("Online."));

        let messages = resolver.messages("what do you charge", &history);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "what do you charge");
    }

    #[test]
    fn schema_requires_both_fields() {
        let schema = reply_schema();
        assert_eq!(schema["json_schema"]["strict"], true);
        assert_eq!(schema["json_schema"]["schema"]["required"], serde_json::json!(["response", "route"]));
    }

    #[test]
    fn resolver_is_object_safe() {
        let resolver: Box<dyn IntentResolver> = Box::new(ApiResolver::from_config(&make_config(Some("sk-test"))));
        drop(resolver);
    }
}
