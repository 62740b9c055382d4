//! Real microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::recorder::AudioSource;
use crate::error::{Result, VoxdeskError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns to filter out (not useful for voice input).
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

pub(crate) fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Input and output device names, filtered, with preferred ones marked "\[recommended\]".
#[derive(Debug, Clone, Default)]
pub struct DeviceListing {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

fn label(name: String) -> Option<String> {
    if should_filter_device(&name) {
        None
    } else if is_preferred_device(&name) {
        Some(format!("{} [recommended]", name))
    } else {
        Some(name)
    }
}

/// List available audio devices.
///
/// # Errors
/// Returns `VoxdeskError::AudioCapture` if device enumeration fails.
pub fn list_devices() -> Result<DeviceListing> {
    let (host, inputs, outputs) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let inputs = host.input_devices();
        let outputs = host.output_devices();
        (host, inputs, outputs)
    });
    let _ = host; // keep host alive while iterating devices
    let inputs = inputs.map_err(|e| VoxdeskError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;
    let outputs = outputs.map_err(|e| VoxdeskError::AudioCapture {
        message: format!("Failed to enumerate output devices: {}", e),
    })?;

    Ok(DeviceListing {
        inputs: inputs.filter_map(|d| d.name().ok()).filter_map(label).collect(),
        outputs: outputs.filter_map(|d| d.name().ok()).filter_map(label).collect(),
    })
}

/// Find an input device by name, or the best default (PipeWire, Pulse, system default).
fn find_input_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Some(name) = device_name {
            let devices = host
                .input_devices()
                .map_err(|e| VoxdeskError::AudioCapture {
                    message: format!("Failed to enumerate devices: {}", e),
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

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| VoxdeskError::AudioDeviceNotFound {
                device: "default".to_string(),
            })
    })
}

/// Map a stream build failure to the error taxonomy.
///
/// An unavailable device is how hosts report a microphone that was not granted.
fn build_error(err: cpal::BuildStreamError) -> VoxdeskError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => VoxdeskError::PermissionDenied {
            message: "microphone is not available to this process".to_string(),
        },
        other => VoxdeskError::AudioCapture {
            message: format!("Failed to build input stream: {}", other),
        },
    }
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through the Mutex in CpalAudioSource.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture using CPAL.
///
/// Captures mono float samples at the requested rate. Tries f32 at the
/// requested rate first, then falls back to the device's native config with
/// software channel mixing and resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<f32>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Create a new CPAL audio source.
    ///
    /// # Arguments
    /// * `device_name` - Optional device name. If None, uses the best default input device.
    /// * `sample_rate` - Capture rate delivered by `read_samples`.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_input_device(device_name)?;
        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        match self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| log::error!("Audio input stream error: {}", err),
            None,
        ) {
            Ok(stream) => Ok(stream),
            Err(cpal::BuildStreamError::DeviceNotAvailable) => {
                Err(build_error(cpal::BuildStreamError::DeviceNotAvailable))
            }
            Err(_) => self.build_stream_native(),
        }
    }

    /// Build a stream using the device's native config, with software
    /// channel mixing and resampling to the capture rate.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| VoxdeskError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        log::info!(
            "using native input format ({}ch/{}Hz/{:?}), converting in software",
            native_channels,
            native_rate,
            default_config.sample_format(),
        );

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);

        match default_config.sample_format() {
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let converted =
                            convert_to_mono(data, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    |err| log::error!("Audio input stream error: {}", err),
                    None,
                )
                .map_err(build_error),
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let floats: Vec<f32> = data
                            .iter()
                            .map(|&s| crate::audio::pcm::pcm16_to_float(s))
                            .collect();
                        let converted =
                            convert_to_mono(&floats, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    |err| log::error!("Audio input stream error: {}", err),
                    None,
                )
                .map_err(build_error),
            fmt => Err(VoxdeskError::AudioCapture {
                message: format!(
                    "Unsupported native sample format: {:?}. \
                     Try selecting another input device.",
                    fmt
                ),
            }),
        }
    }
}

/// Mix multi-channel audio to mono and resample to the target rate.
fn convert_to_mono(samples: &[f32], channels: usize, source_rate: u32, target_rate: u32) -> Vec<f32> {
    let mono: Vec<f32> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    crate::audio::wav::resample(&mono, source_rate, target_rate)
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        {
            let stream_guard = self.stream.lock().map_err(|e| VoxdeskError::AudioCapture {
                message: format!("Failed to lock stream: {}", e),
            })?;
            if stream_guard.is_some() {
                return Ok(()); // Already started
            }
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| VoxdeskError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept non-native configs but never fire the callback.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let final_stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            let native_stream = self.build_stream_native()?;
            native_stream
                .play()
                .map_err(|e| VoxdeskError::AudioCapture {
                    message: format!("Failed to start native audio stream: {}", e),
                })?;
            native_stream
        } else {
            stream
        };

        let mut stream_guard = self.stream.lock().map_err(|e| VoxdeskError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;
        *stream_guard = Some(SendableStream(final_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut stream_guard = self.stream.lock().map_err(|e| VoxdeskError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;

        // Dropping the stream releases the device; pausing first silences it immediately.
        if let Some(sendable_stream) = stream_guard.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| VoxdeskError::AudioCapture {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        let mut buffer = self.buffer.lock().map_err(|e| VoxdeskError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
