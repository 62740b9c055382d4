//! Data types flowing out of the capture pipeline.

use crate::audio::pcm;
use crate::defaults;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One fixed-size window of captured audio, packed as little-endian PCM16.
///
/// Not `Clone`: a frame is moved into the outbound channel exactly once.
#[derive(Debug)]
pub struct AudioFrame {
    /// Packed little-endian 16-bit PCM bytes.
    pub bytes: Vec<u8>,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
    /// Timestamp when the window was completed.
    pub timestamp: Instant,
    /// Sample rate the window was captured at.
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Pack float samples into a frame.
    pub fn from_samples(samples: &[f32], sequence: u64, sample_rate: u32) -> Self {
        Self {
            bytes: pcm::encode_pcm16_le(samples),
            sequence,
            timestamp: Instant::now(),
            sample_rate,
        }
    }

    /// MIME descriptor, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        defaults::pcm_mime(self.sample_rate)
    }

    /// Number of PCM16 samples in the frame.
    pub fn sample_count(&self) -> usize {
        self.bytes.len() / 2
    }
}

/// Media payload as it travels on the wire: a MIME type and base64 data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

impl MediaBlob {
    /// Encode raw bytes under the given MIME type.
    pub fn new(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: pcm::encode_base64(bytes),
        }
    }

    /// Consume a captured frame.
    pub fn from_frame(frame: AudioFrame) -> Self {
        Self::new(frame.mime_type(), &frame.bytes)
    }

    /// A JPEG still for visual telemetry.
    pub fn jpeg(bytes: &[u8]) -> Self {
        Self::new(defaults::JPEG_MIME, bytes)
    }

    /// Decoded payload size in bytes.
    pub fn decoded_len(&self) -> usize {
        let padding = self.data.bytes().rev().take_while(|&b| b == b'=').count();
        (self.data.len() / 4) * 3 - padding.min(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_packs_two_bytes_per_sample() {
        let frame = AudioFrame::from_samples(&[0.5; 4096], 7, 16000);

        assert_eq!(frame.bytes.len(), 8192);
        assert_eq!(frame.sample_count(), 4096);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.mime_type(), "audio/pcm;rate=16000");
    }

    #[test]
    fn test_media_blob_from_frame() {
        let frame = AudioFrame::from_samples(&[0.5, -0.5], 0, 16000);

        let blob = MediaBlob::from_frame(frame);

        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        assert_eq!(pcm::decode_base64(&blob.data).unwrap(), vec![0x00, 0x40, 0x00, 0xC0]);
        assert_eq!(blob.decoded_len(), 4);
    }

    #[test]
    fn test_jpeg_blob() {
        let blob = MediaBlob::jpeg(&[0xFF, 0xD8, 0xFF]);
        assert_eq!(blob.mime_type, "image/jpeg");
        assert_eq!(blob.decoded_len(), 3);
    }

    #[test]
    fn test_media_blob_json_shape() {
        let blob = MediaBlob::new("audio/pcm;rate=16000", &[1, 2]);
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["mime_type"], "audio/pcm;rate=16000");
        assert_eq!(json["data"], "AQI=");
    }
}
