//! Start/stop lifecycle of one voice widget.
//!
//! A widget owns at most one session. `stop` while the transport is still
//! connecting cancels the attempt: the connection, once it resolves, is
//! closed immediately and never becomes active.

use crate::audio::playback::PlaybackDestination;
use crate::audio::recorder::AudioSource;
use crate::error::{Result, VoxdeskError};
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::frames::FrameSource;
use crate::pipeline::types::MediaBlob;
use crate::session::config::SessionConfig;
use crate::session::handle::{Outbox, SessionHandle, SessionUpdate, VoiceSession};
use crate::session::tools::ToolRegistry;
use crate::session::transcript::TranscriptEntry;
use crate::session::transport::InferenceTransport;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Opens the microphone and the speaker for a session.
pub trait AudioHost: Send + Sync {
    /// # Errors
    /// `VoxdeskError::PermissionDenied` or `VoxdeskError::AudioDeviceNotFound`.
    fn open_microphone(&self) -> Result<Box<dyn AudioSource>>;

    /// # Errors
    /// `VoxdeskError::Playback` or `VoxdeskError::AudioDeviceNotFound`.
    fn open_playback(&self) -> Result<Box<dyn PlaybackDestination>>;
}

/// Public view of the widget state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetStatus {
    Idle { last_error: Option<String> },
    Connecting,
    Active,
}

enum WidgetState {
    Idle {
        last_error: Option<String>,
    },
    Connecting {
        generation: u64,
        outbox: Arc<Outbox>,
    },
    Active {
        handle: SessionHandle,
    },
}

type FrameSourceFactory = Arc<dyn Fn() -> Result<Box<dyn FrameSource>> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A voice button: start, stop, and the session in between.
pub struct VoiceWidget {
    config: SessionConfig,
    transport: Arc<dyn InferenceTransport>,
    host: Arc<dyn AudioHost>,
    tools: ToolRegistry,
    updates: Option<crossbeam_channel::Sender<SessionUpdate>>,
    reporter: Arc<dyn ErrorReporter>,
    media_feed: Option<(Duration, FrameSourceFactory)>,
    state: Mutex<WidgetState>,
    generation: Mutex<u64>,
}

impl VoiceWidget {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn InferenceTransport>,
        host: Arc<dyn AudioHost>,
    ) -> Self {
        Self {
            config,
            transport,
            host,
            tools: ToolRegistry::new(),
            updates: None,
            reporter: Arc::new(LogReporter),
            media_feed: None,
            state: Mutex::new(WidgetState::Idle { last_error: None }),
            generation: Mutex::new(0),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_update_sender(mut self, tx: crossbeam_channel::Sender<SessionUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Feed every session stills from a fresh source, one per `period`.
    /// `open` runs at each start; its error fails that start.
    pub fn with_media_feed<F>(mut self, period: Duration, open: F) -> Self
    where
        F: Fn() -> Result<Box<dyn FrameSource>> + Send + Sync + 'static,
    {
        self.media_feed = Some((period, Arc::new(open)));
        self
    }

    /// Current state. A session that ended on its own reads as idle.
    pub fn status(&self) -> WidgetStatus {
        let mut state = lock(&self.state);
        Self::reap(&mut state);
        match &*state {
            WidgetState::Idle { last_error } => WidgetStatus::Idle {
                last_error: last_error.clone(),
            },
            WidgetState::Connecting { .. } => WidgetStatus::Connecting,
            WidgetState::Active { .. } => WidgetStatus::Active,
        }
    }

    // An active session whose dispatcher tore it down is idle again.
    fn reap(state: &mut WidgetState) {
        if let WidgetState::Active { handle } = state
            && !handle.is_active()
        {
            let last_error = handle.last_error();
            *state = WidgetState::Idle { last_error };
        }
    }

    /// Open the microphone, the speaker and a session.
    ///
    /// # Errors
    /// - `VoxdeskError::SessionBusy` unless the widget is idle
    /// - `VoxdeskError::SessionCancelled` if `stop` ran while connecting
    /// - device, permission and connection errors from the session
    pub async fn start(&self) -> Result<()> {
        let (generation, outbox) = {
            let mut state = lock(&self.state);
            Self::reap(&mut state);
            if !matches!(&*state, WidgetState::Idle { .. }) {
                return Err(VoxdeskError::SessionBusy);
            }
            let generation = {
                let mut counter = lock(&self.generation);
                *counter += 1;
                *counter
            };
            let outbox = Arc::new(Outbox::new(self.config.startup_policy));
            *state = WidgetState::Connecting {
                generation,
                outbox: Arc::clone(&outbox),
            };
            (generation, outbox)
        };

        let result = self.open_session(outbox).await;

        let mut state = lock(&self.state);
        let current = matches!(
            &*state,
            WidgetState::Connecting { generation: g, .. } if *g == generation
        );
        match result {
            Ok(handle) if current => {
                *state = WidgetState::Active { handle };
                Ok(())
            }
            Ok(handle) => {
                drop(state);
                log::info!("session opened after stop, closing it");
                handle.close();
                Err(VoxdeskError::SessionCancelled)
            }
            Err(e) => {
                if current {
                    *state = WidgetState::Idle {
                        last_error: Some(e.to_string()),
                    };
                }
                Err(e)
            }
        }
    }

    async fn open_session(&self, outbox: Arc<Outbox>) -> Result<SessionHandle> {
        let stills = match &self.media_feed {
            Some((period, open)) => Some((*period, open()?)),
            None => None,
        };
        let microphone = self.host.open_microphone()?;
        let speaker = self.host.open_playback()?;

        let mut session = VoiceSession::new(self.config.clone())
            .with_tools(self.tools.clone())
            .with_error_reporter(Arc::clone(&self.reporter))
            .with_outbox(outbox)
            .with_capture(microphone);
        if let Some(tx) = &self.updates {
            session = session.with_update_sender(tx.clone());
        }
        let handle = session.open(self.transport.as_ref(), speaker).await?;
        if let Some((period, source)) = stills {
            handle.start_media_feed(source, period);
        }
        Ok(handle)
    }

    /// Stop the session, or cancel the one being opened. Idempotent.
    pub fn stop(&self) {
        let previous = std::mem::replace(
            &mut *lock(&self.state),
            WidgetState::Idle { last_error: None },
        );
        match previous {
            WidgetState::Idle { last_error } => {
                *lock(&self.state) = WidgetState::Idle { last_error };
            }
            WidgetState::Connecting { outbox, .. } => {
                *lock(&self.generation) += 1;
                outbox.close();
                log::info!("voice session start cancelled");
            }
            WidgetState::Active { handle } => handle.close(),
        }
    }

    /// Send a still image into the active session.
    pub fn send_media(&self, blob: MediaBlob) -> bool {
        match &*lock(&self.state) {
            WidgetState::Active { handle } => handle.send_media(blob),
            _ => false,
        }
    }

    /// Transcript of the active session, empty otherwise.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        match &*lock(&self.state) {
            WidgetState::Active { handle } => handle.transcript(),
            _ => Vec::new(),
        }
    }
}

impl Drop for VoiceWidget {
    fn drop(&mut self) {
        self.stop();
    }
}
