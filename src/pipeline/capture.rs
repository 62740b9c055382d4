//! Microphone capture thread: read, window, convert, forward.

use crate::audio::recorder::AudioSource;
use crate::defaults;
use crate::error::Result;
use crate::pipeline::error::{ErrorReporter, LogReporter, SessionError};
use crate::pipeline::framer::FrameAssembler;
use crate::pipeline::types::AudioFrame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Configuration for the capture thread.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Samples per emitted frame
    pub frame_size: usize,
    /// Delay between reads of a live source
    pub poll_interval: Duration,
    /// Consecutive read failures before the thread gives up
    pub max_consecutive_errors: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_size: defaults::FRAME_SIZE,
            poll_interval: Duration::from_millis(defaults::CAPTURE_POLL_MS),
            max_consecutive_errors: defaults::MAX_CONSECUTIVE_READ_ERRORS,
        }
    }
}

impl CaptureConfig {
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }
}

/// A running capture thread.
///
/// Every complete window is converted to PCM16 and handed to the frame
/// callback on the capture thread, synchronously and in order.
pub struct CapturePipeline {
    running: Arc<AtomicBool>,
    frames_emitted: Arc<AtomicU64>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CapturePipeline {
    /// Start `source` and spawn the capture thread.
    ///
    /// # Errors
    /// Whatever `source.start()` returns, typically
    /// `VoxdeskError::PermissionDenied`. Nothing is spawned in that case.
    pub fn start_capture<F>(
        source: Box<dyn AudioSource>,
        config: CaptureConfig,
        on_frame: F,
    ) -> Result<Self>
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        Self::start_with_reporter(source, config, Arc::new(LogReporter), on_frame)
    }

    /// Like `start_capture`, reporting read failures to `reporter`.
    pub fn start_with_reporter<F>(
        mut source: Box<dyn AudioSource>,
        config: CaptureConfig,
        reporter: Arc<dyn ErrorReporter>,
        mut on_frame: F,
    ) -> Result<Self>
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        source.start()?;

        let running = Arc::new(AtomicBool::new(true));
        let frames_emitted = Arc::new(AtomicU64::new(0));

        let thread_running = running.clone();
        let thread_frames = frames_emitted.clone();
        let handle = thread::Builder::new()
            .name("voxdesk-capture".to_string())
            .spawn(move || {
                let sample_rate = source.sample_rate();
                let is_finite = source.is_finite();
                let mut framer = FrameAssembler::new(config.frame_size);
                let mut sequence: u64 = 0;
                let mut consecutive_errors: u32 = 0;

                let mut emit = |window: &[f32], sequence: &mut u64| {
                    on_frame(AudioFrame::from_samples(window, *sequence, sample_rate));
                    *sequence += 1;
                    thread_frames.fetch_add(1, Ordering::Relaxed);
                };

                while thread_running.load(Ordering::SeqCst) {
                    let samples = match source.read_samples() {
                        Ok(s) => {
                            consecutive_errors = 0;
                            s
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            if consecutive_errors >= config.max_consecutive_errors {
                                reporter.report(
                                    "capture",
                                    &SessionError::Fatal(format!(
                                        "audio capture failed {} times in a row: {}",
                                        consecutive_errors, e
                                    )),
                                );
                                break;
                            }
                            reporter.report("capture", &SessionError::Recoverable(e.to_string()));
                            thread::sleep(config.poll_interval);
                            continue;
                        }
                    };

                    if samples.is_empty() {
                        if is_finite || source.is_finite() {
                            if let Some(window) = framer.flush()
                                && thread_running.load(Ordering::SeqCst)
                            {
                                emit(&window, &mut sequence);
                            }
                            log::debug!("capture source exhausted after {} frame(s)", sequence);
                            break;
                        }
                        thread::sleep(config.poll_interval);
                        continue;
                    }

                    for window in framer.push(&samples) {
                        if !thread_running.load(Ordering::SeqCst) {
                            break;
                        }
                        emit(&window, &mut sequence);
                    }

                    if !is_finite {
                        thread::sleep(config.poll_interval);
                    }
                }

                thread_running.store(false, Ordering::SeqCst);
                if let Err(e) = source.stop() {
                    log::warn!("failed to stop audio capture: {}", e);
                }
            })?;

        log::debug!("capture started, {} samples per frame", config.frame_size);

        Ok(Self {
            running,
            frames_emitted,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Stop the capture thread and release the source.
    ///
    /// Idempotent. From the capture thread itself (inside the frame
    /// callback) this only signals; the thread stops the source on its way
    /// out.
    pub fn stop_capture(&self) {
        if let Some(handle) = self.signal_stop()
            && handle.join().is_err()
        {
            log::error!("capture thread panicked");
        }
    }

    /// Ask the capture thread to stop without waiting for it.
    ///
    /// Returns the thread handle for the caller to join, or `None` if it
    /// was already taken or this is the capture thread itself.
    pub fn signal_stop(&self) -> Option<JoinHandle<()>> {
        self.running.store(false, Ordering::SeqCst);
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }?;
        if handle.thread().id() == thread::current().id() {
            return None;
        }
        Some(handle)
    }

    /// A detached switch that stops this pipeline's thread.
    pub fn stopper(&self) -> CaptureStopper {
        CaptureStopper {
            running: Arc::clone(&self.running),
        }
    }

    /// Block until a finite source has been fully consumed.
    pub fn wait(&self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            log::error!("capture thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Frames handed to the callback so far.
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Relaxed)
    }
}

/// Stops a capture thread from anywhere, without owning the pipeline.
///
/// The thread notices at its next read and releases the source itself.
#[derive(Debug, Clone)]
pub struct CaptureStopper {
    running: Arc<AtomicBool>,
}

impl CaptureStopper {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop_capture();
    }
}
