//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each subsystem,
//! `AppPaths` for cross-platform directories, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save_to`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, PlaybackConfig, RecognizerConfig, ResolverConfig, SessionConfig, SynthesisConfig,
    API_KEY_ENV,
};
