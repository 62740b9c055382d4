//! voxdesk - Realtime duplex voice sessions
//!
//! Streams microphone audio to an inference service and plays the spoken
//! response back gaplessly, with transcripts and tool calls along the way.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod prefs;
pub mod session;

// Composition root: devices, transport and terminal output
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Audio seams
pub use audio::playback::{PcmBuffer, PlaybackDestination, PlaybackScheduler, VirtualDestination};
pub use audio::recorder::{AudioSource, MockAudioSource};

// Capture
pub use pipeline::{AudioFrame, CaptureConfig, CapturePipeline, FrameAssembler, MediaBlob};

// Sessions
pub use session::{
    InferenceTransport, Outbound, SessionConfig, SessionHandle, SessionUpdate, StreamEvent,
    VoiceSession, VoiceWidget,
};

// Error handling
pub use error::{Result, VoxdeskError};
pub use pipeline::error::{ErrorReporter, SessionError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
