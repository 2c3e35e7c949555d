//! TOML configuration file loading
//!
//! Supports `~/.config/sous/live.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LiveConfigFile {
    /// Remote service settings
    #[serde(default)]
    pub service: ServiceFileConfig,

    /// Credentials and collaborator endpoints
    #[serde(default)]
    pub auth: AuthFileConfig,

    /// Camera settings
    #[serde(default)]
    pub video: VideoFileConfig,
}

/// Remote conversation service
#[derive(Debug, Default, Deserialize)]
pub struct ServiceFileConfig {
    /// WebSocket endpoint
    pub endpoint: Option<String>,

    /// Model identifier (e.g. "models/gemini-2.0-flash-live-001")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Aoede")
    pub voice: Option<String>,

    /// System instruction for the assistant
    pub system_instruction: Option<String>,
}

/// Credentials and collaborator endpoints
#[derive(Debug, Default, Deserialize)]
pub struct AuthFileConfig {
    /// Fixed session token
    pub token: Option<String>,

    /// Token endpoint, POSTed once per session
    pub token_url: Option<String>,

    /// Memory service base URL
    pub memory_url: Option<String>,
}

/// Camera configuration
#[derive(Debug, Default, Deserialize)]
pub struct VideoFileConfig {
    /// Stream camera frames
    pub enabled: Option<bool>,

    /// Snapshot image re-read on every frame
    pub snapshot: Option<PathBuf>,

    /// Milliseconds between frames
    pub interval_ms: Option<u64>,

    /// JPEG quality (1-100)
    pub quality: Option<u8>,

    /// Longest edge of a sent frame in pixels
    pub max_dimension: Option<u32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LiveConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LiveConfigFile {
    let Some(path) = config_file_path() else {
        return LiveConfigFile::default();
    };

    load_config_from(&path)
}

/// Load a TOML config file from `path`
///
/// Returns `LiveConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_from(path: &Path) -> LiveConfigFile {
    if !path.exists() {
        return LiveConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LiveConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LiveConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/sous/live.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("sous").join("live.toml"))
}
