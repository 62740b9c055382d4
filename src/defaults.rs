//! Default configuration constants for voxdesk.
//!
//! Shared between the config file, the session config and the audio
//! components so the wire contract stays consistent.

/// Microphone capture sample rate in Hz (16 kHz mono on the wire).
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of response audio sent by the inference service.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per captured frame.
///
/// 4096 samples at 16 kHz is one frame every 256 ms.
pub const FRAME_SIZE: usize = 4096;

/// Scale between float samples in [-1.0, 1.0) and 16-bit PCM.
pub const PCM16_SCALE: f32 = 32768.0;

/// MIME type prefix of raw 16-bit PCM payloads.
pub const PCM_MIME: &str = "audio/pcm";

/// MIME type of still frames sent by visual monitors.
pub const JPEG_MIME: &str = "image/jpeg";

/// Transcript entries kept by the default assistant widget.
pub const TRANSCRIPT_CAPACITY: usize = 5;

/// Default endpoint of the JSON-lines inference transport.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:7878";

/// Default model identifier announced in the session setup.
pub const DEFAULT_MODEL: &str = "native-audio-dialog";

/// Connect handshake timeout in milliseconds.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Capture thread polling interval in milliseconds.
pub const CAPTURE_POLL_MS: u64 = 10;

/// Consecutive read failures before the capture thread gives up.
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;

/// Capacity of the UI update channel created by the CLI host.
pub const UPDATE_BUFFER: usize = 256;

/// Longest inbound protocol line accepted, in bytes.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Interval between visual telemetry stills in milliseconds.
pub const FRAME_INTERVAL_MS: u64 = 1000;

/// Transcript capacity of the visual telemetry report.
pub const VISION_REPORT_CAPACITY: usize = 10;

/// Build the PCM MIME descriptor for a sample rate, e.g. `audio/pcm;rate=16000`.
pub fn pcm_mime(sample_rate: u32) -> String {
    format!("{PCM_MIME};rate={sample_rate}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_mime_includes_rate() {
        assert_eq!(pcm_mime(INPUT_SAMPLE_RATE), "audio/pcm;rate=16000");
        assert_eq!(pcm_mime(OUTPUT_SAMPLE_RATE), "audio/pcm;rate=24000");
    }

    #[test]
    fn frame_duration_matches_callback_rate() {
        let frames_per_second = INPUT_SAMPLE_RATE as f32 / FRAME_SIZE as f32;
        assert!((frames_per_second - 3.90625).abs() < f32::EPSILON);
    }
}
