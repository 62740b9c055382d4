//! Error reporting for the capture thread and the session dispatcher.

use std::fmt;

/// Errors that occur while a session is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The component keeps running after reporting this.
    Recoverable(String),
    /// The component shuts down after reporting this.
    Fatal(String),
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Fatal(_))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            SessionError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<&crate::error::VoxdeskError> for SessionError {
    fn from(err: &crate::error::VoxdeskError) -> Self {
        if err.is_fatal() {
            SessionError::Fatal(err.to_string())
        } else {
            SessionError::Recoverable(err.to_string())
        }
    }
}

/// Receives errors that do not surface through a `Result`.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, component: &str, error: &SessionError);
}

/// Reporter that writes through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, component: &str, error: &SessionError) {
        match error {
            SessionError::Recoverable(_) => log::warn!("[{}] {}", component, error),
            SessionError::Fatal(_) => log::error!("[{}] {}", component, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoxdeskError;

    #[test]
    fn test_session_error_display() {
        let recoverable = SessionError::Recoverable("temporary failure".to_string());
        assert_eq!(
            recoverable.to_string(),
            "Recoverable error: temporary failure"
        );

        let fatal = SessionError::Fatal("critical failure".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: critical failure");
    }

    #[test]
    fn test_from_voxdesk_error_keeps_severity() {
        let playback = VoxdeskError::Playback {
            message: "odd length".to_string(),
        };
        assert!(!SessionError::from(&playback).is_fatal());

        let denied = VoxdeskError::PermissionDenied {
            message: "no".to_string(),
        };
        assert!(SessionError::from(&denied).is_fatal());
    }

    #[test]
    fn test_log_reporter() {
        let reporter = LogReporter;
        reporter.report("capture", &SessionError::Recoverable("test error".to_string()));
        reporter.report("capture", &SessionError::Fatal("test error".to_string()));
    }
}
