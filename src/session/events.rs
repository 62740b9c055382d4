//! Typed events exchanged with the inference service.

use crate::pipeline::types::MediaBlob;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who said a transcribed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The user at the microphone.
    Input,
    /// The assistant's spoken response.
    Output,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::Input => "You",
            Speaker::Output => "Assistant",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inbound event from the service, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Base64 PCM16 response audio. Either field may be missing.
    AudioChunk {
        data: Option<String>,
        mime_type: Option<String>,
    },
    Transcript {
        speaker: Speaker,
        text: String,
    },
    /// The model asks the client to run a declared tool.
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    TurnComplete,
    /// The user started talking over the response.
    Interrupted,
    Closed,
    Error {
        reason: String,
    },
}

impl StreamEvent {
    /// Events after which the session ends.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Closed | StreamEvent::Error { .. })
    }
}

/// Outbound message from the client to the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Media(MediaBlob),
    ToolResponse {
        id: String,
        name: String,
        response: serde_json::Value,
    },
    Close,
}
