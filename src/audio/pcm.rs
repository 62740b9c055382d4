//! 16-bit PCM conversion and the base64 wire encoding.
//!
//! Capture converts float samples to PCM16 by multiplying by 32768 and
//! truncating; playback maps PCM16 back by dividing by 32768. Both sides use
//! little-endian byte order.

use crate::defaults::{PCM_MIME, PCM16_SCALE};
use crate::error::{Result, VoxdeskError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Convert one float sample to 16-bit PCM.
///
/// Truncates toward zero. Values at or beyond full scale saturate, so +1.0
/// becomes 32767 rather than wrapping.
pub fn float_to_pcm16(sample: f32) -> i16 {
    (sample * PCM16_SCALE) as i16
}

/// Convert one 16-bit PCM sample to a float in [-1.0, 1.0).
pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 / PCM16_SCALE
}

/// Convert float samples and pack them as little-endian PCM16 bytes.
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&float_to_pcm16(sample).to_le_bytes());
    }
    bytes
}

/// Unpack little-endian PCM16 bytes into float samples.
///
/// # Errors
/// Returns `VoxdeskError::Playback` when the byte count is odd.
pub fn decode_pcm16_le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(VoxdeskError::Playback {
            message: format!("PCM16 payload has odd byte count {}", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| pcm16_to_float(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Base64-encode a payload for the wire.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 wire payload.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| VoxdeskError::Playback {
            message: format!("invalid base64 audio payload: {}", e),
        })
}

/// Parsed MIME descriptor such as `audio/pcm;rate=24000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeDescriptor {
    pub essence: String,
    pub rate: Option<u32>,
}

impl MimeDescriptor {
    /// Parse a descriptor. Parameters other than `rate` are ignored.
    pub fn parse(descriptor: &str) -> Self {
        let mut parts = descriptor.split(';');
        let essence = parts
            .next()
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let rate = parts.find_map(|param| {
            let (key, value) = param.split_once('=')?;
            if key.trim().eq_ignore_ascii_case("rate") {
                value.trim().parse().ok()
            } else {
                None
            }
        });
        Self { essence, rate }
    }

    /// True for raw PCM audio (`audio/pcm`, also `audio/l16`).
    pub fn is_pcm(&self) -> bool {
        self.essence == PCM_MIME || self.essence == "audio/l16"
    }
}
