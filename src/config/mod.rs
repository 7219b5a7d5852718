//! Configuration management for the Aurea voice client

pub mod file;

use crate::voice::{
    BLOCK_SIZE, CaptureRequest, INPUT_SAMPLE_RATE, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE,
};
use crate::{Error, Result};

use self::file::AureaConfigFile;

/// Default backend serving `/config` and `/token`
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";

/// Default Gemini Live WebSocket base URL
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws";

/// Aurea client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the config/token backend
    pub backend_url: String,

    /// Base URL of the live model WebSocket endpoint
    pub live_endpoint: String,

    /// Audio configuration
    pub audio: AudioConfig,

    /// What happens after a dropped session
    pub reconnect: ReconnectPolicy,
}

/// Audio capture and playback configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Rate of outbound microphone frames
    pub input_sample_rate: u32,

    /// Rate of inbound model audio
    pub output_sample_rate: u32,

    /// Channel count of inbound model audio
    pub output_channels: u16,

    /// Samples per outbound frame
    pub block_size: usize,

    /// Request echo cancellation from the input chain
    pub echo_cancellation: bool,

    /// Request noise suppression from the input chain
    pub noise_suppression: bool,

    /// Request automatic gain control from the input chain
    pub auto_gain_control: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            output_channels: OUTPUT_CHANNELS,
            block_size: BLOCK_SIZE,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl AudioConfig {
    /// Microphone request derived from this config
    #[must_use]
    pub const fn capture_request(&self) -> CaptureRequest {
        CaptureRequest {
            sample_rate: self.input_sample_rate,
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
            auto_gain_control: self.auto_gain_control,
        }
    }
}

/// Recovery policy after the live session drops
///
/// Sessions are never re-established automatically; the controller waits in
/// its error state for an explicit reinitialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Recovery only through an explicit reinitialize
    #[default]
    Manual,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            live_endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            audio: AudioConfig::default(),
            reconnect: ReconnectPolicy::Manual,
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resolved values are invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the resolved values are invalid
    pub fn from_sources(fc: AureaConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = AudioConfig::default();

        let backend_url = env("AUREA_BACKEND_URL")
            .or(fc.backend.url)
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());

        let live_endpoint = env("AUREA_LIVE_ENDPOINT")
            .or(fc.live.endpoint)
            .unwrap_or_else(|| DEFAULT_LIVE_ENDPOINT.to_string());

        let audio = AudioConfig {
            input_sample_rate: fc
                .audio
                .input_sample_rate
                .unwrap_or(defaults.input_sample_rate),
            output_sample_rate: fc
                .audio
                .output_sample_rate
                .unwrap_or(defaults.output_sample_rate),
            output_channels: defaults.output_channels,
            block_size: fc.audio.block_size.unwrap_or(defaults.block_size),
            echo_cancellation: fc
                .audio
                .echo_cancellation
                .unwrap_or(defaults.echo_cancellation),
            noise_suppression: fc
                .audio
                .noise_suppression
                .unwrap_or(defaults.noise_suppression),
            auto_gain_control: fc
                .audio
                .auto_gain_control
                .unwrap_or(defaults.auto_gain_control),
        };

        let config = Self {
            backend_url: backend_url.trim_end_matches('/').to_string(),
            live_endpoint: live_endpoint.trim_end_matches('/').to_string(),
            audio,
            reconnect: ReconnectPolicy::Manual,
        };
        config.validate()?;
        Ok(config)
    }

    /// Override the backend URL (e.g. from the command line)
    #[must_use]
    pub fn with_backend_url(mut self, url: &str) -> Self {
        self.backend_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Check the resolved values
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }
        if self.audio.block_size == 0 {
            return Err(Error::Config("block_size must be non-zero".to_string()));
        }
        if !self.backend_url.starts_with("http://") && !self.backend_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "backend url must be http(s): {}",
                self.backend_url
            )));
        }
        if !self.live_endpoint.starts_with("ws://") && !self.live_endpoint.starts_with("wss://") {
            return Err(Error::Config(format!(
                "live endpoint must be ws(s): {}",
                self.live_endpoint
            )));
        }
        Ok(())
    }
}
