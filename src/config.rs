//! Configuration for the voice streaming client
//!
//! Defaults match the reference backend; a TOML file at
//! `~/.config/voicewire/config.toml` is a partial overlay, and an explicit
//! endpoint (CLI flag or `VOICEWIRE_ENDPOINT`) wins over both.

use std::path::PathBuf;

use serde::Deserialize;

use crate::connection::ReconnectPolicy;
use crate::{Error, Result};

/// Default WebSocket endpoint of the voice backend
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws";

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub endpoint: String,

    /// Automatic reconnection policy
    pub reconnect: ReconnectPolicy,

    /// Initial playback volume in `[0, 1]`
    pub volume: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect: ReconnectPolicy::default(),
            volume: 1.0,
        }
    }
}

impl Config {
    /// Load configuration: defaults, overlaid by the config file, overlaid
    /// by the explicit endpoint when given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the resulting endpoint is not a valid
    /// `ws://`/`wss://` URL.
    pub fn load(endpoint_override: Option<String>) -> Result<Self> {
        let config = Self::merge(load_config_file(), endpoint_override);
        validate_endpoint(&config.endpoint)?;
        Ok(config)
    }

    /// Apply the file overlay and the explicit endpoint on top of defaults.
    fn merge(file: ConfigFile, endpoint_override: Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(endpoint) = file.connection.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(max) = file.connection.max_reconnect_attempts {
            config.reconnect.max_attempts = max;
        }
        if let Some(base_ms) = file.connection.reconnect_base_ms {
            config.reconnect.base_delay = std::time::Duration::from_millis(base_ms);
        }
        if let Some(settle_ms) = file.connection.settle_ms {
            config.reconnect.settle_delay = std::time::Duration::from_millis(settle_ms);
        }
        if let Some(volume) = file.playback.volume {
            config.volume = volume.clamp(0.0, 1.0);
        }

        if let Some(endpoint) = endpoint_override {
            config.endpoint = endpoint;
        }

        config
    }
}

/// Top-level TOML configuration file schema; all fields optional
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    connection: ConnectionFileConfig,

    #[serde(default)]
    playback: PlaybackFileConfig,
}

/// Connection settings overlay
#[derive(Debug, Default, Deserialize)]
struct ConnectionFileConfig {
    /// WebSocket endpoint
    endpoint: Option<String>,

    /// Maximum automatic reconnect attempts
    max_reconnect_attempts: Option<u32>,

    /// Base backoff delay in milliseconds
    reconnect_base_ms: Option<u64>,

    /// Manual-reconnect settle delay in milliseconds
    settle_ms: Option<u64>,
}

/// Playback settings overlay
#[derive(Debug, Default, Deserialize)]
struct PlaybackFileConfig {
    /// Initial volume in `[0, 1]`
    volume: Option<f32>,
}

/// Return the config file path: `~/.config/voicewire/config.toml`
fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voicewire").join("config.toml"))
}

/// Load the TOML config file from the standard path.
///
/// Returns defaults if the file doesn't exist or can't be parsed.
fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
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
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Check that the endpoint is a well-formed WebSocket URL.
fn validate_endpoint(endpoint: &str) -> Result<()> {
    let parsed = url::Url::parse(endpoint)
        .map_err(|e| Error::Config(format!("invalid endpoint {endpoint}: {e}")))?;

    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(Error::Config(format!(
            "unsupported endpoint scheme {other}: expected ws or wss"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_match_reference_backend() {
        let config = Config::default();
        assert_eq!(config.endpoint, "ws://localhost:8000/ws");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert!((config.volume - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn file_overlay_applies_on_top_of_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [connection]
            endpoint = "ws://voice.example.net/ws"
            max_reconnect_attempts = 3
            reconnect_base_ms = 200

            [playback]
            volume = 0.5
            "#,
        )
        .unwrap();

        let config = Config::merge(file, None);
        assert_eq!(config.endpoint, "ws://voice.example.net/ws");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(200));
        // Untouched fields keep their defaults
        assert_eq!(config.reconnect.settle_delay, Duration::from_millis(500));
        assert!((config.volume - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn explicit_endpoint_wins_over_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            [connection]
            endpoint = "ws://from-file/ws"
            "#,
        )
        .unwrap();

        let config = Config::merge(file, Some("ws://from-flag/ws".to_string()));
        assert_eq!(config.endpoint, "ws://from-flag/ws");
    }

    #[test]
    fn file_volume_is_clamped() {
        let file: ConfigFile = toml::from_str("[playback]\nvolume = 7.0").unwrap();
        let config = Config::merge(file, None);
        assert!((config.volume - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let file: ConfigFile = toml::from_str("").unwrap();
        let config = Config::merge(file, None);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn websocket_schemes_are_accepted() {
        assert!(validate_endpoint("ws://localhost:8000/ws").is_ok());
        assert!(validate_endpoint("wss://voice.example.net/ws").is_ok());
    }

    #[test]
    fn http_scheme_is_rejected() {
        assert!(matches!(
            validate_endpoint("http://localhost:8000/ws"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn garbage_endpoint_is_rejected() {
        assert!(matches!(
            validate_endpoint("not a url"),
            Err(Error::Config(_))
        ));
    }
}
