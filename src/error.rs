//! Error types for the Aurea voice client

use thiserror::Error;

/// Result type alias for Aurea operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice session core
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone access was refused by the host
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio device, or the device failed to open
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A capture stream is already running
    #[error("capture already active")]
    CaptureActive,

    /// Remote configuration could not be fetched
    #[error("failed to fetch configuration: {0}")]
    ConfigFetch(String),

    /// Access credential could not be fetched
    #[error("failed to fetch access token: {0}")]
    CredentialFetch(String),

    /// Live session connection could not be opened
    #[error("failed to connect: {0}")]
    Connect(String),

    /// Session is not open
    #[error("session not connected")]
    NotConnected,

    /// Outbound frame could not be handed to the connection
    #[error("failed to send audio: {0}")]
    SendFailed(String),

    /// Inbound audio payload is malformed
    #[error("malformed audio payload: {0}")]
    Decode(String),

    /// Controller was closed and cannot be reused
    #[error("session controller closed")]
    Closed,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error came from acquiring the microphone
    #[must_use]
    pub const fn is_capture_error(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_) | Self::DeviceUnavailable(_) | Self::CaptureActive
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn microphone_failures_are_capture_errors() {
        assert!(Error::DeviceUnavailable("no input".into()).is_capture_error());
        assert!(Error::CaptureActive.is_capture_error());
        assert!(!Error::SendFailed("gone".into()).is_capture_error());
        assert!(!Error::NotConnected.is_capture_error());
    }

    #[test]
    fn messages_are_human_readable() {
        let err = Error::PermissionDenied("blocked by user".into());
        assert_eq!(err.to_string(), "microphone permission denied: blocked by user");
        assert!(err.is_capture_error());
    }
}
