//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\voice-commander\
//!   macOS:   ~/Library/Application Support/voice-commander/
//!   Linux:   ~/.config/voice-commander/
//!
//! Data dir (exported replies):
//!   Windows: %LOCALAPPDATA%\voice-commander\
//!   macOS:   ~/Library/Application Support/voice-commander/
//!   Linux:   ~/.local/share/voice-commander/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Directory where spoken replies are written when export is enabled.
    pub replies_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "voice-commander";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let settings_file = config_dir.join("settings.toml");
        let replies_dir = data_dir.join("replies");

        Self {
            config_dir,
            settings_file,
            replies_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
