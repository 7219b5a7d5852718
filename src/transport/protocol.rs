//! Live API wire messages
//!
//! Client messages are JSON objects with a single top-level key (`setup`,
//! `realtimeInput`). Server messages carry `setupComplete`, `serverContent`
//! or `goAway`.

use serde::{Deserialize, Serialize};

use crate::backend::RemoteConfig;
use crate::voice::AudioFrame;

/// Response modality requested from the model
const AUDIO_MODALITY: &str = "AUDIO";

/// Message sent to the live endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage<'a> {
    /// First message on a new connection
    Setup(Setup),
    /// Streamed microphone audio
    RealtimeInput(RealtimeInput<'a>),
}

impl<'a> ClientMessage<'a> {
    /// Wrap one outbound audio frame
    #[must_use]
    pub fn audio(frame: &'a AudioFrame) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: std::slice::from_ref(frame),
        })
    }
}

/// Session setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

impl Setup {
    /// Build the setup message for the negotiated configuration
    #[must_use]
    pub fn from_remote(config: &RemoteConfig) -> Self {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };

        let system_instruction = (!config.system_instruction.is_empty()).then(|| Content {
            parts: vec![Part::text(&config.system_instruction)],
        });

        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![AUDIO_MODALITY.to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Realtime audio input
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput<'a> {
    pub media_chunks: &'a [AudioFrame],
}

/// Multi-part content, used in both directions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One content part
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

/// Inline binary payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Message received from the live endpoint
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

/// Model output for the current turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    /// The user spoke over the assistant
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

/// Server is about to end the connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// What a server message asks the client to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Base64 PCM16 audio to play
    Audio(String),
    /// Cancel all pending playback
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// The connection will close soon
    GoAway(Option<String>),
}

impl ServerMessage {
    /// Whether this acknowledges the setup message
    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Demultiplex into signals, in the order they must be applied
    ///
    /// Audio parts come first, then the interruption, so audio delivered
    /// alongside an interruption is cancelled with the rest.
    #[must_use]
    pub fn into_signals(self) -> Vec<Inbound> {
        let mut signals = Vec::new();

        if let Some(content) = self.server_content {
            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            for part in parts {
                let Some(blob) = part.inline_data else {
                    continue;
                };
                let is_audio = blob
                    .mime_type
                    .as_deref()
                    .is_none_or(|mime| mime.starts_with("audio/"));
                if is_audio {
                    signals.push(Inbound::Audio(blob.data));
                }
            }
            if content.interrupted {
                signals.push(Inbound::Interrupted);
            }
            if content.turn_complete {
                signals.push(Inbound::TurnComplete);
            }
        }

        if let Some(go_away) = self.go_away {
            signals.push(Inbound::GoAway(go_away.time_left));
        }

        signals
    }
}
