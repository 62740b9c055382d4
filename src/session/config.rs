//! Per-session configuration announced to the inference service.

use crate::defaults;
use crate::error::{Result, VoxdeskError};
use crate::pipeline::capture::CaptureConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Response modality requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    Audio,
    Text,
}

/// What happens to captured frames before the transport has opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Discard them.
    #[default]
    Drop,
    /// Hold them and send in order once the transport opens.
    Buffer,
}

impl FromStr for StartupPolicy {
    type Err = VoxdeskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(StartupPolicy::Drop),
            "buffer" => Ok(StartupPolicy::Buffer),
            other => Err(VoxdeskError::ConfigInvalidValue {
                key: "session.startup_policy".to_string(),
                message: format!("expected 'drop' or 'buffer', got '{}'", other),
            }),
        }
    }
}

impl fmt::Display for StartupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupPolicy::Drop => f.write_str("drop"),
            StartupPolicy::Buffer => f.write_str("buffer"),
        }
    }
}

/// A function the model may call, with a JSON-schema parameter description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDeclaration {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Configuration of one voice session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub model: String,
    pub modality: Modality,
    /// System instruction for the model
    pub persona: String,
    /// Prebuilt voice name, service default when unset
    pub voice: Option<String>,
    pub tools: Vec<ToolDeclaration>,
    /// Ask the service to transcribe the user's speech
    pub input_transcription: bool,
    /// Ask the service to transcribe its own speech
    pub output_transcription: bool,
    pub transcript_capacity: usize,
    pub startup_policy: StartupPolicy,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: defaults::DEFAULT_MODEL.to_string(),
            modality: Modality::Audio,
            persona: String::new(),
            voice: None,
            tools: Vec::new(),
            input_transcription: false,
            output_transcription: false,
            transcript_capacity: defaults::TRANSCRIPT_CAPACITY,
            startup_policy: StartupPolicy::Drop,
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
            connect_timeout: Duration::from_millis(defaults::CONNECT_TIMEOUT_MS),
        }
    }
}

impl SessionConfig {
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_tool(mut self, tool: ToolDeclaration) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_transcription(mut self, input: bool, output: bool) -> Self {
        self.input_transcription = input;
        self.output_transcription = output;
        self
    }

    pub fn with_transcript_capacity(mut self, capacity: usize) -> Self {
        self.transcript_capacity = capacity;
        self
    }

    pub fn with_startup_policy(mut self, policy: StartupPolicy) -> Self {
        self.startup_policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Capture thread settings for this session.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig::default().with_frame_size(self.frame_size)
    }

    /// Reject values no session can run with.
    ///
    /// # Errors
    /// `VoxdeskError::ConfigInvalidValue` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| {
            Err(VoxdeskError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        };
        if self.input_sample_rate == 0 {
            return invalid("input_sample_rate", "must be greater than zero");
        }
        if self.output_sample_rate == 0 {
            return invalid("output_sample_rate", "must be greater than zero");
        }
        if self.frame_size == 0 {
            return invalid("frame_size", "must be greater than zero");
        }
        if self.model.trim().is_empty() {
            return invalid("model", "must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_wire_contract() {
        let config = SessionConfig::default();
        assert_eq!(config.input_sample_rate, 16000);
        assert_eq!(config.output_sample_rate, 24000);
        assert_eq!(config.frame_size, 4096);
        assert_eq!(config.startup_policy, StartupPolicy::Drop);
        assert_eq!(config.modality, Modality::Audio);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = SessionConfig {
            frame_size: 0,
            ..SessionConfig::default()
        };
        match config.validate() {
            Err(VoxdeskError::ConfigInvalidValue { key, .. }) => assert_eq!(key, "frame_size"),
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }

        let config = SessionConfig {
            input_sample_rate: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_startup_policy_from_str() {
        assert_eq!("drop".parse::<StartupPolicy>().unwrap(), StartupPolicy::Drop);
        assert_eq!(" Buffer ".parse::<StartupPolicy>().unwrap(), StartupPolicy::Buffer);
        assert!("queue".parse::<StartupPolicy>().is_err());
        assert_eq!(StartupPolicy::Buffer.to_string(), "buffer");
    }

    #[test]
    fn test_builder_methods() {
        let config = SessionConfig::default()
            .with_persona("Be brief.")
            .with_voice("Puck")
            .with_transcription(true, false)
            .with_transcript_capacity(7);

        assert_eq!(config.persona, "Be brief.");
        assert_eq!(config.voice.as_deref(), Some("Puck"));
        assert!(config.input_transcription);
        assert!(!config.output_transcription);
        assert_eq!(config.transcript_capacity, 7);
        assert_eq!(config.capture_config().frame_size, 4096);
    }
}
