//! Speaker output using CPAL.
//!
//! Scheduled buffers are mixed on the device timeline inside the output
//! callback. The playback clock is the number of frames the device has
//! consumed, so `current_time` only advances while audio is actually flowing.

use crate::audio::capture::{is_preferred_device, with_suppressed_stderr};
use crate::audio::playback::{PcmBuffer, PlaybackDestination, SourceId};
use crate::audio::wav::resample;
use crate::error::{Result, VoxdeskError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex, MutexGuard};

struct MixSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl MixSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sums scheduled sources into interleaved output frames.
pub(crate) struct Mixer {
    sample_rate: u32,
    channels: usize,
    frames_played: u64,
    next_id: SourceId,
    sources: Vec<MixSource>,
    // End time and end frame of the last added source.
    tail: Option<(f64, u64)>,
}

impl Mixer {
    pub(crate) fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            frames_played: 0,
            next_id: 0,
            sources: Vec::new(),
            tail: None,
        }
    }

    pub(crate) fn current_time(&self) -> f64 {
        self.frames_played as f64 / self.sample_rate as f64
    }

    pub(crate) fn add(&mut self, buffer: &PcmBuffer, start_at: f64) -> SourceId {
        self.next_id += 1;
        let mut start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        // A buffer queued right behind the previous one starts on its last
        // frame, whatever rounding and resampling did to either.
        if let Some((end_time, end_frame)) = self.tail
            && (start_at - end_time).abs() < 1e-9
        {
            start_frame = end_frame;
        }
        let samples = resample(buffer.samples(), buffer.sample_rate(), self.sample_rate);
        let source = MixSource {
            id: self.next_id,
            start_frame: start_frame.max(self.frames_played),
            samples,
        };
        self.tail = Some((start_at + buffer.duration(), source.end_frame()));
        self.sources.push(source);
        self.next_id
    }

    pub(crate) fn remove(&mut self, id: SourceId) {
        self.sources.retain(|source| source.id != id);
    }

    pub(crate) fn clear(&mut self) {
        self.sources.clear();
        self.tail = None;
    }

    pub(crate) fn active(&self) -> usize {
        self.sources.len()
    }

    /// Fill one interleaved callback buffer and advance the clock.
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        let frames = out.len() / self.channels;
        for (i, frame) in out.chunks_mut(self.channels).enumerate() {
            let position = self.frames_played + i as u64;
            let mut value = 0.0f32;
            for source in &self.sources {
                if position >= source.start_frame && position < source.end_frame() {
                    value += source.samples[(position - source.start_frame) as usize];
                }
            }
            frame.fill(value.clamp(-1.0, 1.0));
        }
        self.frames_played += frames as u64;
        let now = self.frames_played;
        self.sources.retain(|source| source.end_frame() > now);
    }
}

struct SendStream(cpal::Stream);

// SAFETY: the stream is only paused and dropped from the owning CpalPlayback.
unsafe impl Send for SendStream {}

/// Output device destination for the playback scheduler.
pub struct CpalPlayback {
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<SendStream>,
    device_name: String,
}

impl CpalPlayback {
    /// Open an output device by name, or the best default.
    ///
    /// # Errors
    /// `VoxdeskError::AudioDeviceNotFound` when no device matches,
    /// `VoxdeskError::Playback` when the stream cannot be started.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = find_output_device(device_name)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = device
            .default_output_config()
            .map_err(|e| VoxdeskError::Playback {
                message: format!("Failed to query output config: {}", e),
            })?;
        let sample_rate = config.sample_rate();
        let channels = config.channels() as usize;

        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate, channels)));
        let callback_mixer = Arc::clone(&mixer);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_output_stream(
                    &config.into(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        match callback_mixer.lock() {
                            Ok(mut mixer) => mixer.render(data),
                            Err(_) => data.fill(0.0),
                        }
                    },
                    |err| log::error!("cpal output error: {}", err),
                    None,
                )
                .map_err(|e| VoxdeskError::Playback {
                    message: format!("Failed to build output stream: {}", e),
                })?,
            other => {
                return Err(VoxdeskError::Playback {
                    message: format!("Only F32 output is supported, device offers {:?}", other),
                });
            }
        };

        stream.play().map_err(|e| VoxdeskError::Playback {
            message: format!("Failed to start output stream: {}", e),
        })?;

        log::info!(
            "playback on '{}' ({}ch/{}Hz)",
            device_name,
            channels,
            sample_rate
        );

        Ok(Self {
            mixer,
            stream: Some(SendStream(stream)),
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PlaybackDestination for CpalPlayback {
    fn current_time(&self) -> f64 {
        self.mixer().current_time()
    }

    fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> Result<SourceId> {
        if self.stream.is_none() {
            return Err(VoxdeskError::Playback {
                message: "output device already closed".to_string(),
            });
        }
        Ok(self.mixer().add(&buffer, start_at))
    }

    fn stop(&mut self, source: SourceId) {
        self.mixer().remove(source);
    }

    fn close(&mut self) {
        self.mixer().clear();
        if let Some(stream) = self.stream.take()
            && let Err(e) = stream.0.pause()
        {
            log::warn!("Failed to pause output stream: {}", e);
        }
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

fn find_output_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Some(name) = device_name {
            let devices = host.output_devices().map_err(|e| VoxdeskError::Playback {
                message: format!("Failed to enumerate output devices: {}", e),
            })?;
            for dev in devices {
                if let Ok(dev_name) = dev.name()
                    && dev_name == name
                {
                    return Ok(dev);
                }
            }
            return Err(VoxdeskError::AudioDeviceNotFound {
                device: name.to_string(),
            });
        }

        if let Ok(devices) = host.output_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_output_device()
            .ok_or_else(|| VoxdeskError::AudioDeviceNotFound {
                device: "default".to_string(),
            })
    })
}
