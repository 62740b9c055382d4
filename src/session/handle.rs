//! The live duplex session.
//!
//! `VoiceSession` opens the transport and returns a `SessionHandle`. One
//! dispatcher task consumes inbound events in arrival order; captured frames
//! go out through the `Outbox` from the capture thread.

use crate::audio::pcm::{self, MimeDescriptor};
use crate::audio::playback::{PcmBuffer, PlaybackDestination, PlaybackScheduler};
use crate::audio::recorder::AudioSource;
use crate::error::{Result, VoxdeskError};
use crate::pipeline::capture::CapturePipeline;
use crate::pipeline::error::{ErrorReporter, LogReporter, SessionError};
use crate::pipeline::frames::FrameSource;
use crate::pipeline::types::{AudioFrame, MediaBlob};
use crate::session::config::{SessionConfig, StartupPolicy};
use crate::session::events::{Outbound, StreamEvent};
use crate::session::tools::ToolRegistry;
use crate::session::transcript::{TranscriptEntry, TranscriptLog};
use crate::session::transport::InferenceTransport;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Notification for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Active,
    Transcript(TranscriptEntry),
    TurnComplete,
    ToolInvoked { name: String },
    /// The session ended. `reason` is set when it ended on an error.
    Inactive { reason: Option<String> },
}

/// Lifecycle of the outbound gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxState {
    Pending,
    Open,
    Closed,
}

enum Gate {
    Pending(Vec<Outbound>),
    Open(UnboundedSender<Outbound>),
    Closed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Outbound gate between the capture thread and the transport.
///
/// Frames sent before the transport opens are dropped or held, depending on
/// the startup policy. Once closed, every send is a no-op.
pub struct Outbox {
    gate: Mutex<Gate>,
    policy: StartupPolicy,
    sent: AtomicU64,
    dropped: AtomicU64,
    on_close: Mutex<Vec<CloseListener>>,
}

type CloseListener = Box<dyn FnOnce() + Send>;

impl Outbox {
    pub fn new(policy: StartupPolicy) -> Self {
        Self {
            gate: Mutex::new(Gate::Pending(Vec::new())),
            policy,
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            on_close: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> OutboxState {
        match &*lock(&self.gate) {
            Gate::Pending(_) => OutboxState::Pending,
            Gate::Open(_) => OutboxState::Open,
            Gate::Closed => OutboxState::Closed,
        }
    }

    /// Send a message, FIFO with every earlier send. Returns false when the
    /// message was dropped.
    pub fn send(&self, message: Outbound) -> bool {
        let mut gate = lock(&self.gate);
        match &mut *gate {
            Gate::Open(tx) => {
                if tx.send(message).is_ok() {
                    self.sent.fetch_add(1, Ordering::Relaxed);
                    true
                } else {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
            Gate::Pending(held) if self.policy == StartupPolicy::Buffer => {
                held.push(message);
                true
            }
            Gate::Pending(_) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("dropped outbound message before open ({} so far)", dropped);
                false
            }
            Gate::Closed => false,
        }
    }

    /// Encode and send one captured frame.
    pub fn send_frame(&self, frame: AudioFrame) -> bool {
        self.send(Outbound::Media(MediaBlob::from_frame(frame)))
    }

    /// Attach the transport and flush held messages in order.
    ///
    /// Returns false if the outbox was closed first; `tx` is dropped then.
    pub fn open(&self, tx: UnboundedSender<Outbound>) -> bool {
        let mut gate = lock(&self.gate);
        let held = match &mut *gate {
            Gate::Pending(held) => std::mem::take(held),
            Gate::Open(_) => {
                *gate = Gate::Open(tx);
                return true;
            }
            Gate::Closed => return false,
        };
        for message in held {
            if tx.send(message).is_ok() {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
        }
        *gate = Gate::Open(tx);
        true
    }

    /// Close the gate and drop the transport sender. Idempotent.
    pub fn close(&self) {
        *lock(&self.gate) = Gate::Closed;
        let listeners = std::mem::take(&mut *lock(&self.on_close));
        for listener in listeners {
            listener();
        }
    }

    /// Run `listener` once when the outbox closes, or now if it already has.
    pub fn on_close<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let gate = lock(&self.gate);
        if matches!(&*gate, Gate::Closed) {
            drop(gate);
            listener();
            return;
        }
        lock(&self.on_close).push(Box::new(listener));
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// State shared between the handle, its controls and the dispatcher.
struct Shared {
    config: SessionConfig,
    outbox: Arc<Outbox>,
    active: AtomicBool,
    torn_down: AtomicBool,
    shutdown: Notify,
    capture: Mutex<Option<CapturePipeline>>,
    feeds: Mutex<Vec<JoinHandle<()>>>,
    playback: Mutex<PlaybackScheduler<Box<dyn PlaybackDestination>>>,
    transcript: Mutex<TranscriptLog>,
    tools: ToolRegistry,
    updates: Option<crossbeam_channel::Sender<SessionUpdate>>,
    reporter: Arc<dyn ErrorReporter>,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn notify(&self, update: SessionUpdate) {
        if let Some(tx) = &self.updates
            && tx.try_send(update).is_err()
        {
            log::debug!("UI update channel full or closed, update dropped");
        }
    }

    fn report(&self, error: &VoxdeskError) {
        self.reporter.report("session", &SessionError::from(error));
    }

    fn attach_capture(self: &Arc<Self>, source: Box<dyn AudioSource>) -> Result<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(VoxdeskError::Other("session already closed".to_string()));
        }
        let outbox = Arc::clone(&self.outbox);
        let pipeline = CapturePipeline::start_with_reporter(
            source,
            self.config.capture_config(),
            Arc::clone(&self.reporter),
            move |frame| {
                outbox.send_frame(frame);
            },
        )?;

        // Closing the outbox, even while still connecting, ends capture.
        let stopper = pipeline.stopper();
        self.outbox.on_close(move || stopper.stop());

        let previous = lock(&self.capture).replace(pipeline);
        if let Some(previous) = previous {
            release_capture(previous);
        }
        Ok(())
    }

    fn close(&self) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        self.outbox.send(Outbound::Close);
        self.teardown(None);
    }

    /// Release everything the session owns. Runs once.
    fn teardown(&self, reason: Option<String>) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.active.store(false, Ordering::SeqCst);
        self.outbox.close();

        let capture = lock(&self.capture).take();
        if let Some(capture) = capture {
            release_capture(capture);
        }
        for feed in lock(&self.feeds).drain(..) {
            feed.abort();
        }

        lock(&self.playback).release();

        if reason.is_some() {
            *lock(&self.last_error) = reason.clone();
        }
        self.shutdown.notify_one();
        match &reason {
            Some(reason) => log::warn!("session ended: {}", reason),
            None => log::info!("session closed"),
        }
        self.notify(SessionUpdate::Inactive { reason });
    }

    fn play_chunk(&self, data: Option<String>, mime_type: Option<String>) -> Result<()> {
        let Some(data) = data.filter(|d| !d.is_empty()) else {
            return Ok(());
        };

        let mut rate = self.config.output_sample_rate;
        if let Some(mime) = mime_type.as_deref() {
            let descriptor = MimeDescriptor::parse(mime);
            if !descriptor.is_pcm() {
                return Err(VoxdeskError::Playback {
                    message: format!("unsupported audio format '{}'", mime),
                });
            }
            rate = descriptor.rate.unwrap_or(rate);
        }

        let bytes = pcm::decode_base64(&data)?;
        if bytes.is_empty() {
            return Ok(());
        }
        let buffer = PcmBuffer::from_pcm16_le(&bytes, rate)?;
        let scheduled = lock(&self.playback).enqueue(buffer)?;
        log::debug!(
            "scheduled {} bytes at {:.3}s..{:.3}s",
            bytes.len(),
            scheduled.start,
            scheduled.end
        );
        Ok(())
    }

    /// Handle one inbound event. Returns false when the session has ended.
    fn handle_event(&self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::AudioChunk { data, mime_type } => {
                if let Err(e) = self.play_chunk(data, mime_type) {
                    self.report(&e);
                }
            }
            StreamEvent::Transcript { speaker, text } => {
                let entry = TranscriptEntry::new(speaker, text);
                lock(&self.transcript).push(entry.clone());
                self.notify(SessionUpdate::Transcript(entry));
            }
            StreamEvent::ToolCall { id, name, args } => match self.tools.invoke(&name, &args) {
                Ok(response) => {
                    log::info!("tool '{}' answered call {}", name, id);
                    self.outbox.send(Outbound::ToolResponse {
                        id,
                        name: name.clone(),
                        response,
                    });
                    self.notify(SessionUpdate::ToolInvoked { name });
                }
                Err(e) => self.report(&e),
            },
            StreamEvent::TurnComplete => self.notify(SessionUpdate::TurnComplete),
            StreamEvent::Interrupted => {
                log::debug!("interrupted, flushing playback");
                lock(&self.playback).flush_all();
            }
            StreamEvent::Closed => {
                self.teardown(None);
                return false;
            }
            StreamEvent::Error { reason } => {
                self.reporter
                    .report("session", &SessionError::Fatal(reason.clone()));
                self.teardown(Some(reason));
                return false;
            }
        }
        true
    }
}

/// Stop a capture pipeline without blocking an async worker on its join.
fn release_capture(pipeline: CapturePipeline) {
    let Some(thread) = pipeline.signal_stop() else {
        return;
    };
    let join = move || {
        if thread.join().is_err() {
            log::error!("capture thread panicked");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(join);
        }
        Err(_) => join(),
    }
}

async fn feed_media(shared: Arc<Shared>, mut source: Box<dyn FrameSource>, period: Duration) {
    let mut ticks = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sent: u64 = 0;
    loop {
        ticks.tick().await;
        if shared.torn_down.load(Ordering::SeqCst) {
            break;
        }
        match source.next_frame() {
            Ok(Some(blob)) => {
                if shared.outbox.send(Outbound::Media(blob)) {
                    sent += 1;
                }
            }
            Ok(None) => break,
            Err(e) => shared
                .reporter
                .report("media", &SessionError::Recoverable(e.to_string())),
        }
    }
    log::debug!("media feed finished after {} still(s)", sent);
}

async fn dispatch(shared: Arc<Shared>, mut inbound: UnboundedReceiver<StreamEvent>) {
    let mut handled: u64 = 0;
    loop {
        tokio::select! {
            _ = shared.shutdown.notified() => break,
            event = inbound.recv() => match event {
                Some(event) => {
                    handled += 1;
                    if !shared.handle_event(event) {
                        break;
                    }
                }
                None => {
                    shared.teardown(None);
                    break;
                }
            },
        }
    }
    log::debug!("dispatcher finished after {} event(s)", handled);
}

/// Builder for a voice session.
pub struct VoiceSession {
    config: SessionConfig,
    reporter: Arc<dyn ErrorReporter>,
    updates: Option<crossbeam_channel::Sender<SessionUpdate>>,
    tools: ToolRegistry,
    outbox: Option<Arc<Outbox>>,
    capture: Option<Box<dyn AudioSource>>,
}

impl VoiceSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            reporter: Arc::new(LogReporter),
            updates: None,
            tools: ToolRegistry::new(),
            outbox: None,
            capture: None,
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Send UI notifications here (non-blocking).
    pub fn with_update_sender(mut self, tx: crossbeam_channel::Sender<SessionUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    /// Tools the model may call; their declarations join the setup.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Use an outbox created by the caller, so it can be closed while the
    /// transport is still connecting.
    pub fn with_outbox(mut self, outbox: Arc<Outbox>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    /// Start capturing from `source` before connecting. Frames captured
    /// while connecting follow the startup policy.
    pub fn with_capture(mut self, source: Box<dyn AudioSource>) -> Self {
        self.capture = Some(source);
        self
    }

    /// Connect and start dispatching.
    ///
    /// # Errors
    /// - `VoxdeskError::ConfigInvalidValue` for an unusable config
    /// - `VoxdeskError::PermissionDenied` if the capture source refuses to start
    /// - `VoxdeskError::Connection` if the transport fails
    /// - `VoxdeskError::SessionCancelled` if the outbox was closed while connecting
    pub async fn open<T>(
        self,
        transport: &T,
        destination: Box<dyn PlaybackDestination>,
    ) -> Result<SessionHandle>
    where
        T: InferenceTransport + ?Sized,
    {
        let mut config = self.config;
        config.validate()?;
        for declaration in self.tools.declarations() {
            if !config.tools.iter().any(|t| t.name == declaration.name) {
                config.tools.push(declaration);
            }
        }

        let outbox = self
            .outbox
            .unwrap_or_else(|| Arc::new(Outbox::new(config.startup_policy)));

        let shared = Arc::new(Shared {
            outbox,
            active: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            shutdown: Notify::new(),
            capture: Mutex::new(None),
            feeds: Mutex::new(Vec::new()),
            playback: Mutex::new(PlaybackScheduler::new(destination)),
            transcript: Mutex::new(TranscriptLog::new(config.transcript_capacity)),
            tools: self.tools,
            updates: self.updates,
            reporter: self.reporter,
            last_error: Mutex::new(None),
            config,
        });

        if let Some(source) = self.capture
            && let Err(e) = shared.attach_capture(source)
        {
            shared.teardown(Some(e.to_string()));
            return Err(e);
        }

        let link = match transport.connect(&shared.config).await {
            Ok(link) => link,
            Err(e) => {
                shared.teardown(Some(e.to_string()));
                return Err(e);
            }
        };

        if !shared.outbox.open(link.outbound) {
            shared.teardown(None);
            return Err(VoxdeskError::SessionCancelled);
        }

        shared.active.store(true, Ordering::SeqCst);
        log::info!(
            "voice session active (model {}, voice {})",
            shared.config.model,
            shared.config.voice.as_deref().unwrap_or("default")
        );
        shared.notify(SessionUpdate::Active);

        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), link.inbound));

        Ok(SessionHandle {
            shared,
            dispatcher: Some(dispatcher),
        })
    }
}

/// Owner of a live session. Dropping it closes the session.
pub struct SessionHandle {
    shared: Arc<Shared>,
    dispatcher: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Start capturing from `source` into this session.
    ///
    /// # Errors
    /// Whatever the source's `start` returns. The session is closed before
    /// the error is returned.
    pub fn attach_capture(&self, source: Box<dyn AudioSource>) -> Result<()> {
        if let Err(e) = self.shared.attach_capture(source) {
            log::error!("capture failed to start: {}", e);
            self.shared.outbox.send(Outbound::Close);
            self.shared.teardown(Some(e.to_string()));
            return Err(e);
        }
        Ok(())
    }

    /// Send arbitrary media such as a JPEG still.
    pub fn send_media(&self, blob: MediaBlob) -> bool {
        self.shared.outbox.send(Outbound::Media(blob))
    }

    /// Send a still from `source` every `period` until the source runs dry
    /// or the session ends. A failed read is reported and that tick skipped.
    pub fn start_media_feed(&self, source: Box<dyn FrameSource>, period: Duration) {
        let feed = tokio::spawn(feed_media(Arc::clone(&self.shared), source, period));
        lock(&self.shared.feeds).push(feed);
    }

    /// Close the session. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Cloneable control over this session.
    pub fn control(&self) -> SessionControl {
        SessionControl {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        lock(&self.shared.transcript).entries()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.shared.outbox
    }

    /// Reason the session ended on, if it ended on an error.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }

    /// Wait until the dispatcher has stopped.
    pub async fn closed(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take()
            && let Err(e) = dispatcher.await
        {
            log::error!("session dispatcher failed: {}", e);
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Cloneable handle for closing or feeding a session from anywhere,
/// including from inside tool handlers and UI callbacks.
#[derive(Clone)]
pub struct SessionControl {
    shared: Arc<Shared>,
}

impl SessionControl {
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn send_media(&self, blob: MediaBlob) -> bool {
        self.shared.outbox.send(Outbound::Media(blob))
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::VirtualDestination;
    use crate::audio::recorder::MockAudioSource;
    use crate::session::events::Speaker;
    use crate::session::transport::ChannelTransport;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn chunk(seconds: f64) -> StreamEvent {
        let samples = (seconds * 24000.0).round() as usize;
        StreamEvent::AudioChunk {
            data: Some(pcm::encode_base64(&vec![0u8; samples * 2])),
            mime_type: Some("audio/pcm;rate=24000".to_string()),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_outbox_drops_before_open_by_default() {
        let outbox = Outbox::new(StartupPolicy::Drop);
        assert!(!outbox.send(Outbound::Close));
        assert_eq!(outbox.dropped_count(), 1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(outbox.open(tx));
        assert!(rx.try_recv().is_err());
        assert_eq!(outbox.state(), OutboxState::Open);
    }

    #[test]
    fn test_outbox_buffers_and_flushes_in_order() {
        let outbox = Outbox::new(StartupPolicy::Buffer);
        for i in 0..3u8 {
            outbox.send(Outbound::Media(MediaBlob::new("audio/pcm;rate=16000", &[i])));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        outbox.open(tx);
        outbox.send(Outbound::Close);

        for i in 0..3u8 {
            assert_eq!(
                rx.try_recv().unwrap(),
                Outbound::Media(MediaBlob::new("audio/pcm;rate=16000", &[i]))
            );
        }
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert_eq!(outbox.sent_count(), 4);
    }

    #[test]
    fn test_closed_outbox_refuses_open_and_send() {
        let outbox = Outbox::new(StartupPolicy::Drop);
        outbox.close();
        outbox.close();

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(!outbox.open(tx));
        assert!(!outbox.send(Outbound::Close));
        assert_eq!(outbox.state(), OutboxState::Closed);
    }

    #[test]
    fn test_close_listeners_run_once() {
        let outbox = Outbox::new(StartupPolicy::Drop);
        let calls = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&calls);
        outbox.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        outbox.close();
        outbox.close();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Registered after close: runs at once.
        let counter = Arc::clone(&calls);
        outbox.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_open_notifies_active_and_sends_nothing_else() {
        let (transport, mut listener) = ChannelTransport::pair();
        let (updates_tx, updates_rx) = crossbeam_channel::unbounded();

        let handle = VoiceSession::new(SessionConfig::default())
            .with_update_sender(updates_tx)
            .open(&transport, Box::new(VirtualDestination::new()))
            .await
            .unwrap();
        let mut end = listener.accept().await.unwrap();

        assert!(handle.is_active());
        assert_eq!(updates_rx.try_recv().unwrap(), SessionUpdate::Active);
        assert!(end.drain().is_empty());
    }

    #[tokio::test]
    async fn test_audio_chunks_play_back_to_back() {
        let (transport, mut listener) = ChannelTransport::pair();
        let clock = VirtualDestination::new();

        let _handle = VoiceSession::new(SessionConfig::default())
            .open(&transport, Box::new(clock.clone()))
            .await
            .unwrap();
        let end = listener.accept().await.unwrap();

        end.send(chunk(0.5));
        end.send(chunk(0.3));
        end.send(chunk(0.2));
        settle().await;

        let starts: Vec<f64> = clock.scheduled().iter().map(|s| s.start).collect();
        assert_eq!(starts.len(), 3);
        assert!((starts[0] - 0.0).abs() < 1e-9);
        assert!((starts[1] - 0.5).abs() < 1e-9);
        assert!((starts[2] - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_malformed_audio_is_skipped() {
        let (transport, mut listener) = ChannelTransport::pair();
        let clock = VirtualDestination::new();

        let handle = VoiceSession::new(SessionConfig::default())
            .open(&transport, Box::new(clock.clone()))
            .await
            .unwrap();
        let end = listener.accept().await.unwrap();

        end.send(StreamEvent::AudioChunk {
            data: Some("%%%".to_string()),
            mime_type: None,
        });
        end.send(StreamEvent::AudioChunk {
            data: Some(pcm::encode_base64(&[1, 2, 3])),
            mime_type: None,
        });
        end.send(StreamEvent::AudioChunk {
            data: Some(pcm::encode_base64(&[0, 0])),
            mime_type: Some("audio/mpeg".to_string()),
        });
        end.send(StreamEvent::AudioChunk {
            data: None,
            mime_type: None,
        });
        end.send(chunk(0.1));
        settle().await;

        assert!(handle.is_active());
        assert_eq!(clock.scheduled().len(), 1);
    }

    #[tokio::test]
    async fn test_transcripts_are_bounded_and_forwarded() {
        let (transport, mut listener) = ChannelTransport::pair();
        let (updates_tx, updates_rx) = crossbeam_channel::unbounded();

        let handle = VoiceSession::new(SessionConfig::default().with_transcript_capacity(2))
            .with_update_sender(updates_tx)
            .open(&transport, Box::new(VirtualDestination::new()))
            .await
            .unwrap();
        let end = listener.accept().await.unwrap();

        for text in ["one", "two", "three"] {
            end.send(StreamEvent::Transcript {
                speaker: Speaker::Output,
                text: text.to_string(),
            });
        }
        settle().await;

        let texts: Vec<String> = handle.transcript().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["two", "three"]);
        let transcripts = updates_rx
            .try_iter()
            .filter(|u| matches!(u, SessionUpdate::Transcript(_)))
            .count();
        assert_eq!(transcripts, 3);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_sends_close_once() {
        let (transport, mut listener) = ChannelTransport::pair();
        let clock = VirtualDestination::new();
        let (updates_tx, updates_rx) = crossbeam_channel::unbounded();

        let handle = VoiceSession::new(SessionConfig::default())
            .with_update_sender(updates_tx)
            .open(&transport, Box::new(clock.clone()))
            .await
            .unwrap();
        let mut end = listener.accept().await.unwrap();

        handle.close();
        handle.close();
        handle.control().close();

        assert!(!handle.is_active());
        assert!(clock.is_closed());
        assert_eq!(end.drain(), vec![Outbound::Close]);
        let inactive = updates_rx
            .try_iter()
            .filter(|u| matches!(u, SessionUpdate::Inactive { .. }))
            .count();
        assert_eq!(inactive, 1);
        assert!(!handle.send_media(MediaBlob::jpeg(&[1])));
    }

    /// Hands out numbered stills, then runs dry after `limit`.
    struct NumberedStills {
        next: u8,
        limit: Option<u8>,
    }

    impl FrameSource for NumberedStills {
        fn next_frame(&mut self) -> Result<Option<MediaBlob>> {
            if self.limit.is_some_and(|limit| self.next >= limit) {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(MediaBlob::jpeg(&[0xFF, 0xD8, self.next])))
        }
    }

    #[tokio::test]
    async fn test_media_feed_sends_stills_until_source_runs_dry() {
        let (transport, mut listener) = ChannelTransport::pair();
        let handle = VoiceSession::new(SessionConfig::default())
            .open(&transport, Box::new(VirtualDestination::new()))
            .await
            .unwrap();
        let mut end = listener.accept().await.unwrap();

        handle.start_media_feed(
            Box::new(NumberedStills {
                next: 0,
                limit: Some(3),
            }),
            Duration::from_millis(5),
        );
        settle().await;

        let stills: Vec<u8> = end
            .drain()
            .into_iter()
            .map(|message| match message {
                Outbound::Media(blob) => {
                    assert_eq!(blob.mime_type, "image/jpeg");
                    pcm::decode_base64(&blob.data).unwrap()[2]
                }
                other => panic!("Expected media, got {:?}", other),
            })
            .collect();
        assert_eq!(stills, vec![1, 2, 3]);
        assert!(handle.is_active());
    }

    #[tokio::test]
    async fn test_media_feed_stops_with_the_session() {
        let (transport, mut listener) = ChannelTransport::pair();
        let handle = VoiceSession::new(SessionConfig::default())
            .open(&transport, Box::new(VirtualDestination::new()))
            .await
            .unwrap();
        let mut end = listener.accept().await.unwrap();

        handle.start_media_feed(
            Box::new(NumberedStills {
                next: 0,
                limit: None,
            }),
            Duration::from_millis(5),
        );
        settle().await;
        handle.close();
        let before_close = end.drain();
        assert!(before_close.len() > 1);
        assert_eq!(before_close.last(), Some(&Outbound::Close));

        settle().await;
        assert!(end.drain().is_empty());
        assert!(lock(&handle.shared.feeds).is_empty());
    }

    #[tokio::test]
    async fn test_service_error_ends_session_with_reason() {
        let (transport, mut listener) = ChannelTransport::pair();
        let (updates_tx, updates_rx) = crossbeam_channel::unbounded();

        let mut handle = VoiceSession::new(SessionConfig::default())
            .with_update_sender(updates_tx)
            .open(&transport, Box::new(VirtualDestination::new()))
            .await
            .unwrap();
        let end = listener.accept().await.unwrap();

        end.send(StreamEvent::Error {
            reason: "quota exceeded".to_string(),
        });
        handle.closed().await;

        assert!(!handle.is_active());
        assert_eq!(handle.last_error().as_deref(), Some("quota exceeded"));
        assert!(updates_rx.try_iter().any(|u| u
            == SessionUpdate::Inactive {
                reason: Some("quota exceeded".to_string())
            }));
    }

    #[tokio::test]
    async fn test_inbound_end_is_treated_as_closed() {
        let (transport, mut listener) = ChannelTransport::pair();

        let mut handle = VoiceSession::new(SessionConfig::default())
            .open(&transport, Box::new(VirtualDestination::new()))
            .await
            .unwrap();
        let end = listener.accept().await.unwrap();

        drop(end);
        handle.closed().await;

        assert!(!handle.is_active());
        assert_eq!(handle.last_error(), None);
    }

    #[tokio::test]
    async fn test_failed_connect_releases_playback() {
        let (transport, _listener) = ChannelTransport::pair();
        let transport = transport.failing("no route");
        let clock = VirtualDestination::new();

        let result = VoiceSession::new(SessionConfig::default())
            .open(&transport, Box::new(clock.clone()))
            .await;

        assert!(matches!(result, Err(VoxdeskError::Connection { .. })));
        assert!(clock.is_closed());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_connecting() {
        let (transport, mut listener) = ChannelTransport::pair();
        let config = SessionConfig {
            output_sample_rate: 0,
            ..SessionConfig::default()
        };

        let result = VoiceSession::new(config)
            .open(&transport, Box::new(VirtualDestination::new()))
            .await;

        assert!(matches!(result, Err(VoxdeskError::ConfigInvalidValue { .. })));
        assert!(listener.try_accept().is_none());
    }

    #[tokio::test]
    async fn test_capture_denied_before_connect_fails_open() {
        let (transport, mut listener) = ChannelTransport::pair();

        let result = VoiceSession::new(SessionConfig::default())
            .with_capture(Box::new(MockAudioSource::new().with_permission_denied()))
            .open(&transport, Box::new(VirtualDestination::new()))
            .await;

        assert!(matches!(result, Err(VoxdeskError::PermissionDenied { .. })));
        assert!(listener.try_accept().is_none());
    }
}
