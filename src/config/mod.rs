//! Configuration management for live sessions
//!
//! Values come from, highest priority first: environment variables
//! (`SOUS_*`), the TOML overlay file, then built-in defaults. The binary's
//! command-line flags override the loaded result.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::session::{DEFAULT_ENDPOINT, DEFAULT_MODEL, SessionConfig, VideoSettings};
use crate::{Error, Result};

pub use file::{LiveConfigFile, config_file_path, load_config_file};

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Aoede";

/// Default assistant persona
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Sous, a friendly cooking assistant. \
Keep answers short and conversational; the user is cooking and listening, not reading.";

/// Fully resolved configuration
#[derive(Debug)]
pub struct Config {
    /// Per-session parameters
    pub session: SessionConfig,

    /// Fixed session token
    pub token: Option<SecretString>,

    /// Token endpoint
    pub token_url: Option<String>,

    /// Memory service base URL; in-process memory when unset
    pub memory_url: Option<String>,

    /// Snapshot image used as the camera
    pub camera_snapshot: Option<PathBuf>,
}

impl Config {
    /// Load from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed
    pub fn load() -> Result<Self> {
        Self::from_sources(load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed
    pub fn from_sources(fc: LiveConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = env("SOUS_ENDPOINT")
            .or(fc.service.endpoint)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {endpoint}: {e}")))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "endpoint must use ws or wss, got {}",
                endpoint.scheme()
            )));
        }

        let model = env("SOUS_MODEL")
            .or(fc.service.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let voice = env("SOUS_VOICE")
            .or(fc.service.voice)
            .or_else(|| Some(DEFAULT_VOICE.to_string()))
            .filter(|v| !v.is_empty());

        let system_instruction = env("SOUS_SYSTEM_INSTRUCTION")
            .or(fc.service.system_instruction)
            .or_else(|| Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()))
            .filter(|s| !s.is_empty());

        let defaults = VideoSettings::default();
        let video = VideoSettings {
            enabled: env("SOUS_VIDEO")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.video.enabled)
                .unwrap_or(defaults.enabled),
            interval: env("SOUS_VIDEO_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .or(fc.video.interval_ms)
                .map_or(defaults.interval, Duration::from_millis),
            max_dimension: fc.video.max_dimension.unwrap_or(defaults.max_dimension),
            quality: fc.video.quality.unwrap_or(defaults.quality).clamp(1, 100),
        };

        let camera_snapshot = env("SOUS_CAMERA_SNAPSHOT")
            .map(PathBuf::from)
            .or(fc.video.snapshot);

        Ok(Self {
            session: SessionConfig {
                endpoint,
                model,
                voice,
                system_instruction,
                video,
            },
            token: env("SOUS_TOKEN").or(fc.auth.token).map(SecretString::from),
            token_url: env("SOUS_TOKEN_URL").or(fc.auth.token_url),
            memory_url: env("SOUS_MEMORY_URL").or(fc.auth.memory_url),
            camera_snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(LiveConfigFile::default(), env_from(&[])).unwrap();
        assert_eq!(config.session.model, DEFAULT_MODEL);
        assert_eq!(config.session.voice.as_deref(), Some(DEFAULT_VOICE));
        assert!(!config.session.video.enabled);
        assert!(config.token.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let mut fc = LiveConfigFile::default();
        fc.service.model = Some("models/from-file".to_string());
        fc.auth.token = Some("file-token".to_string());
        fc.video.enabled = Some(true);

        let config = Config::from_sources(
            fc,
            env_from(&[("SOUS_MODEL", "models/from-env"), ("SOUS_VIDEO", "false")]),
        )
        .unwrap();

        assert_eq!(config.session.model, "models/from-env");
        assert!(!config.session.video.enabled);
        assert_eq!(config.token.unwrap().expose_secret(), "file-token");
    }

    #[test]
    fn rejects_non_websocket_endpoint() {
        let result = Config::from_sources(
            LiveConfigFile::default(),
            env_from(&[("SOUS_ENDPOINT", "https://example.com/live")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn empty_voice_disables_voice_config() {
        let env = env_from(&[("SOUS_VOICE", "")]);
        let config = Config::from_sources(LiveConfigFile::default(), env).unwrap();
        assert!(config.session.voice.is_none());
    }
}
