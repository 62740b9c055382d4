//! JSON-lines wire protocol spoken by `JsonLinesTransport`.
//!
//! One JSON object per line, tagged by `type`.

use crate::session::config::{Modality, SessionConfig, ToolDeclaration};
use crate::session::events::{Outbound, Speaker, StreamEvent};
use serde::{Deserialize, Serialize};

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First line of every connection.
    Setup {
        model: String,
        modality: Modality,
        persona: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
        #[serde(default)]
        tools: Vec<ToolDeclaration>,
        input_transcription: bool,
        output_transcription: bool,
        input_sample_rate: u32,
        output_sample_rate: u32,
    },
    RealtimeInput {
        mime_type: String,
        data: String,
    },
    ToolResponse {
        id: String,
        name: String,
        response: serde_json::Value,
    },
    Close,
}

impl ClientMessage {
    pub fn setup(config: &SessionConfig) -> Self {
        ClientMessage::Setup {
            model: config.model.clone(),
            modality: config.modality,
            persona: config.persona.clone(),
            voice: config.voice.clone(),
            tools: config.tools.clone(),
            input_transcription: config.input_transcription,
            output_transcription: config.output_transcription,
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl From<Outbound> for ClientMessage {
    fn from(outbound: Outbound) -> Self {
        match outbound {
            Outbound::Media(blob) => ClientMessage::RealtimeInput {
                mime_type: blob.mime_type,
                data: blob.data,
            },
            Outbound::ToolResponse { id, name, response } => {
                ClientMessage::ToolResponse { id, name, response }
            }
            Outbound::Close => ClientMessage::Close,
        }
    }
}

/// Messages sent by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Setup accepted; the session is open.
    SetupComplete,
    Audio {
        #[serde(default)]
        mime_type: Option<String>,
        #[serde(default)]
        data: Option<String>,
    },
    InputTranscription {
        text: String,
    },
    OutputTranscription {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    Interrupted,
    TurnComplete,
    /// The service is about to drop the connection.
    GoAway {
        #[serde(default)]
        reason: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Map to a session event. `SetupComplete` has none.
    pub fn into_event(self) -> Option<StreamEvent> {
        match self {
            ServerMessage::SetupComplete => None,
            ServerMessage::Audio { mime_type, data } => {
                Some(StreamEvent::AudioChunk { data, mime_type })
            }
            ServerMessage::InputTranscription { text } => Some(StreamEvent::Transcript {
                speaker: Speaker::Input,
                text,
            }),
            ServerMessage::OutputTranscription { text } => Some(StreamEvent::Transcript {
                speaker: Speaker::Output,
                text,
            }),
            ServerMessage::ToolCall { id, name, args } => {
                Some(StreamEvent::ToolCall { id, name, args })
            }
            ServerMessage::Interrupted => Some(StreamEvent::Interrupted),
            ServerMessage::TurnComplete => Some(StreamEvent::TurnComplete),
            ServerMessage::GoAway { reason } => {
                log::info!(
                    "service is closing the session: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                Some(StreamEvent::Closed)
            }
            ServerMessage::Error { message } => Some(StreamEvent::Error { reason: message }),
        }
    }
}
