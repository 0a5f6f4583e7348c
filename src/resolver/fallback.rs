//! Fallback resolver — wraps any [`IntentResolver`] and always produces a
//! speakable reply.
//!
//! On any failure (`Request`, `Timeout`, `Remote`, `Parse`, `EmptyResponse`)
//! [`FallbackResolver`] returns [`OFFLINE_REPLY`] with no route, so every turn
//! still ends with something spoken.  A reply whose text came back empty is
//! replaced with [`ACKNOWLEDGED_REPLY`], keeping its route.

use async_trait::async_trait;

use crate::resolver::client::{IntentResolver, ResolverError, ResolverReply};
use crate::resolver::history::TurnHistory;

/// Spoken when the resolver fails.
pub const OFFLINE_REPLY: &str = "Neural Link Offline. Try again.";

/// Spoken when the resolver succeeds without any reply text.
pub const ACKNOWLEDGED_REPLY: &str = "Command acknowledged.";

/// A transparent wrapper around any [`IntentResolver`] that never returns an
/// error.
///
/// # Example
/// ```rust
/// use voice_commander::config::ResolverConfig;
/// use voice_commander::resolver::{ApiResolver, FallbackResolver};
///
/// let resolver = FallbackResolver::new(ApiResolver::from_config(&ResolverConfig::default()));
/// // `resolver` answers even when the backend is unreachable.
/// ```
pub struct FallbackResolver<R: IntentResolver> {
    inner: R,
}

impl<R: IntentResolver> FallbackResolver<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// The reply used in place of any error.
    pub fn offline_reply() -> ResolverReply {
        ResolverReply::new(OFFLINE_REPLY, None)
    }
}

#[async_trait]
impl<R: IntentResolver + Send + Sync> IntentResolver for FallbackResolver<R> {
    /// This implementation **never** returns `Err(_)`.
    async fn resolve(&self, transcript: &str, history: &TurnHistory) -> Result<ResolverReply, ResolverError> {
        match self.inner.resolve(transcript, history).await {
            Ok(reply) if reply.response_text.trim().is_empty() => {
                log::debug!("resolver: empty reply text, acknowledging");
                Ok(ResolverReply::new(ACKNOWLEDGED_REPLY, reply.route))
            }
            Ok(reply) => Ok(reply),
            Err(err) => {
                log::warn!("resolver: {err}; speaking offline reply");
                Ok(Self::offline_reply())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
