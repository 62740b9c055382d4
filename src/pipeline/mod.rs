//! Capture pipeline: audio source to fixed-size PCM16 frames.
//!
//! The source is polled on its own thread. Frames are forwarded to a
//! callback synchronously, with no buffering or backpressure at this layer.

pub mod capture;
pub mod error;
pub mod frames;
pub mod framer;
pub mod types;

pub use capture::{CaptureConfig, CapturePipeline};
pub use error::{ErrorReporter, LogReporter, SessionError};
pub use framer::FrameAssembler;
pub use frames::{FrameSource, JpegDirectory};
pub use types::{AudioFrame, MediaBlob};
