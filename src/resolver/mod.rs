//! Intent resolution: transcript in, spoken reply and optional route out.
//!
//! This module provides:
//! * [`IntentResolver`] — async trait implemented by all resolver backends.
//! * [`ApiResolver`] — OpenAI-compatible chat-completions backend with a
//!   strict JSON-schema reply.
//! * [`FallbackResolver`] — wraps any resolver; speaks a canned reply on failure.
//! * [`Persona`] — system instruction and route table.
//! * [`TurnHistory`] — bounded conversation history.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use voice_commander::config::AppConfig;
//! use voice_commander::resolver::{ApiResolver, FallbackResolver, IntentResolver, Turn, TurnHistory};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let resolver = FallbackResolver::new(ApiResolver::from_config(&config.resolver));
//!
//!     let mut history = TurnHistory::new();
//!     let reply = resolver.resolve("what do you charge", &history).await.unwrap();
//!
//!     history.push(Turn::user("what do you charge"));
//!     history.push(Turn::assistant(reply.response_text.clone()));
//!     println!("{} -> {:?}", reply.response_text, reply.route);
//! }
//! ```

pub mod client;
pub mod fallback;
pub mod history;
pub mod persona;

pub use client::{ApiResolver, IntentResolver, ResolverError, ResolverReply};
pub use fallback::{FallbackResolver, ACKNOWLEDGED_REPLY, OFFLINE_REPLY};
pub use history::{Turn, TurnHistory, TurnRole};
pub use persona::{Persona, Route, ROUTES};
