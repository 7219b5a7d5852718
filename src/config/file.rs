//! TOML configuration file loading
//!
//! Supports `~/.config/aurea/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AureaConfigFile {
    /// Config/token backend
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Live model endpoint
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Audio capture and playback
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Backend service configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL serving `/config` and `/token`
    pub url: Option<String>,
}

/// Live endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// WebSocket base URL (e.g. "wss://generativelanguage.googleapis.com/ws")
    pub endpoint: Option<String>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub input_sample_rate: Option<u32>,
    pub output_sample_rate: Option<u32>,
    pub block_size: Option<usize>,
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub auto_gain_control: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `AureaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> AureaConfigFile {
    config_file_path().map_or_else(AureaConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing, unreadable or invalid files yield the defaults.
pub fn load_config_file_from(path: &Path) -> AureaConfigFile {
    if !path.exists() {
        return AureaConfigFile::default();
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
                AureaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            AureaConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/aurea/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("aurea").join("config.toml"))
}
