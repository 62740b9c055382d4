//! WAV file audio source, used in place of a microphone.

use crate::audio::recorder::AudioSource;
use crate::error::{Result, VoxdeskError};
use std::io::Read;
use std::path::Path;
use std::time::Instant;

/// Audio source that reads from WAV file data.
/// Supports arbitrary sample rates and channels, resampling to the capture rate.
pub struct WavAudioSource {
    samples: Vec<f32>,
    position: usize,
    chunk_size: usize,
    sample_rate: u32,
    pacing: Option<Instant>,
    paced: bool,
}

impl WavAudioSource {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>, target_rate: u32) -> Result<Self> {
        let mut wav_reader =
            hound::WavReader::new(reader).map_err(|e| VoxdeskError::AudioCapture {
                message: format!("Failed to parse WAV file: {}", e),
            })?;

        let spec = wav_reader.spec();
        let source_rate = spec.sample_rate;
        let source_channels = spec.channels.max(1) as usize;

        let raw_samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => wav_reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                wav_reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
        }
        .map_err(|e| VoxdeskError::AudioCapture {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        // Mix to mono by averaging channels
        let mono_samples: Vec<f32> = if source_channels == 1 {
            raw_samples
        } else {
            raw_samples
                .chunks_exact(source_channels)
                .map(|frame| frame.iter().sum::<f32>() / source_channels as f32)
                .collect()
        };

        let samples = resample(&mono_samples, source_rate, target_rate);

        // 100ms chunks
        let chunk_size = (target_rate as usize / 10).max(1);

        Ok(Self {
            samples,
            position: 0,
            chunk_size,
            sample_rate: target_rate,
            pacing: None,
            paced: false,
        })
    }

    /// Open a WAV file from disk.
    pub fn open(path: &Path, target_rate: u32) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| VoxdeskError::AudioCapture {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)), target_rate)
    }

    /// Deliver samples no faster than real time, like a live microphone.
    pub fn with_realtime_pacing(mut self) -> Self {
        self.paced = true;
        self
    }

    /// Consume the source and return all samples as a single buffer.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    fn available_end(&self) -> usize {
        let chunk_end = std::cmp::min(self.position + self.chunk_size, self.samples.len());
        match self.pacing {
            Some(started) if self.paced => {
                let due = (started.elapsed().as_secs_f64() * self.sample_rate as f64) as usize;
                std::cmp::min(chunk_end, due.max(self.position))
            }
            _ => chunk_end,
        }
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.pacing.is_none() {
            self.pacing = Some(Instant::now());
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }

        let end = self.available_end();
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        // A paced file may legitimately return nothing before its next chunk is due.
        !self.paced || self.position >= self.samples.len()
    }
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}
