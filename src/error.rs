//! Error types for voxdesk.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxdeskError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Microphone permission denied: {message}")]
    PermissionDenied { message: String },

    // Session errors
    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Playback error: {message}")]
    Playback { message: String },

    #[error("A voice session is already running for this widget")]
    SessionBusy,

    #[error("Session start was cancelled before the connection opened")]
    SessionCancelled,

    // Preference storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl VoxdeskError {
    /// Returns true for errors that end a session attempt.
    ///
    /// Protocol and playback errors only cost one event or one chunk.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            VoxdeskError::Protocol { .. } | VoxdeskError::Playback { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxdeskError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_parse_display() {
        let error = VoxdeskError::ConfigParse {
            message: "invalid TOML syntax".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to parse configuration: invalid TOML syntax"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxdeskError::ConfigInvalidValue {
            key: "frame_size".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for frame_size: must be positive"
        );
    }

    #[test]
    fn test_permission_denied_display() {
        let error = VoxdeskError::PermissionDenied {
            message: "user dismissed prompt".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Microphone permission denied: user dismissed prompt"
        );
    }

    #[test]
    fn test_connection_display() {
        let error = VoxdeskError::Connection {
            message: "quota exceeded".to_string(),
        };
        assert_eq!(error.to_string(), "Connection failed: quota exceeded");
    }

    #[test]
    fn test_protocol_and_playback_are_not_fatal() {
        assert!(
            !VoxdeskError::Protocol {
                message: "unknown tool".to_string()
            }
            .is_fatal()
        );
        assert!(
            !VoxdeskError::Playback {
                message: "odd byte count".to_string()
            }
            .is_fatal()
        );
        assert!(
            VoxdeskError::Connection {
                message: "refused".to_string()
            }
            .is_fatal()
        );
        assert!(
            VoxdeskError::PermissionDenied {
                message: "denied".to_string()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_session_busy_display() {
        assert_eq!(
            VoxdeskError::SessionBusy.to_string(),
            "A voice session is already running for this widget"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxdeskError = io_error.into();
        assert!(matches!(error, VoxdeskError::Io(_)));
        assert!(error.to_string().starts_with("I/O error:"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: VoxdeskError = json_error.into();
        assert!(matches!(error, VoxdeskError::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_error() -> Result<()> {
            Err(VoxdeskError::Other("boom".to_string()))
        }
        assert_eq!(returns_error().unwrap_err().to_string(), "boom");
    }
}
