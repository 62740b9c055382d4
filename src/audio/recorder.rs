use crate::defaults;
use crate::error::{Result, VoxdeskError};

/// Trait for microphone-like audio sources.
///
/// This trait allows swapping implementations (real audio device, WAV file, mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    ///
    /// # Errors
    /// `VoxdeskError::PermissionDenied` when the host refuses microphone access.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio and release the underlying tracks.
    ///
    /// Must succeed on a source that is already stopped.
    fn stop(&mut self) -> Result<()>;

    /// Read the samples captured since the last call.
    ///
    /// # Returns
    /// Mono float samples in [-1.0, 1.0]. Empty when nothing new arrived.
    fn read_samples(&mut self) -> Result<Vec<f32>>;

    /// Sample rate of the samples returned by `read_samples`.
    fn sample_rate(&self) -> u32;

    /// True for sources that end (files, fixtures). An empty read from a
    /// finite source means end of stream.
    fn is_finite(&self) -> bool {
        false
    }
}

/// Generate a mono sine wave.
pub fn sine_wave(frequency_hz: f32, amplitude: f32, sample_rate: u32, samples: usize) -> Vec<f32> {
    let step = 2.0 * std::f32::consts::PI * frequency_hz / sample_rate as f32;
    (0..samples)
        .map(|i| (i as f32 * step).sin() * amplitude)
        .collect()
}

/// Mock audio source for testing.
///
/// Serves its samples in `chunk_size` reads and reports end of stream once
/// exhausted, unless configured to repeat forever.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    stop_calls: usize,
    samples: Vec<f32>,
    position: usize,
    chunk_size: usize,
    sample_rate: u32,
    finite: bool,
    should_deny_permission: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with 160 samples of silence.
    pub fn new() -> Self {
        Self {
            is_started: false,
            stop_calls: 0,
            samples: vec![0.0; 160],
            position: 0,
            chunk_size: 160,
            sample_rate: defaults::INPUT_SAMPLE_RATE,
            finite: true,
            should_deny_permission: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// One second of a 440 Hz sine at the given rate.
    pub fn sine_second(sample_rate: u32) -> Self {
        Self::new()
            .with_samples(sine_wave(440.0, 0.5, sample_rate, sample_rate as usize))
            .with_sample_rate(sample_rate)
    }

    /// Configure the mock to return specific samples
    pub fn with_samples(mut self, samples: Vec<f32>) -> Self {
        self.samples = samples;
        self.position = 0;
        self
    }

    /// Configure how many samples each read returns
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Loop over the samples forever, like a live microphone
    pub fn live(mut self) -> Self {
        self.finite = false;
        self
    }

    /// Configure the mock to refuse microphone access on start
    pub fn with_permission_denied(mut self) -> Self {
        self.should_deny_permission = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }

    /// Number of times `stop` was called
    pub fn stop_calls(&self) -> usize {
        self.stop_calls
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_deny_permission {
            return Err(VoxdeskError::PermissionDenied {
                message: self.error_message.clone(),
            });
        }
        self.is_started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_calls += 1;
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.should_fail_read {
            return Err(VoxdeskError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        if self.samples.is_empty() {
            return Ok(Vec::new());
        }
        if self.position >= self.samples.len() {
            if self.finite {
                return Ok(Vec::new());
            }
            self.position = 0;
        }

        let end = std::cmp::min(self.position + self.chunk_size, self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        self.finite
    }
}
