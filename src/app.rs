//! Voice session application entry point.
//!
//! Wires the microphone (or a WAV file), the speaker and the JSON-lines
//! transport into a voice widget and prints what happens until Ctrl-C.

use crate::audio::capture::CpalAudioSource;
use crate::audio::output::CpalPlayback;
use crate::audio::playback::PlaybackDestination;
use crate::audio::recorder::AudioSource;
use crate::audio::wav::WavAudioSource;
use crate::config::Config;
use crate::defaults;
use crate::error::Result;
use crate::pipeline::frames::{FrameSource, JpegDirectory};
use crate::prefs::{JsonFileStore, KeyValueStore, Preferences};
use crate::session::events::Speaker;
use crate::session::handle::SessionUpdate;
use crate::session::presets::Preset;
use crate::session::tcp::JsonLinesTransport;
use crate::session::widget::{AudioHost, VoiceWidget, WidgetStatus};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Microphone and speaker from CPAL, or a WAV file in place of the microphone.
pub struct CpalHost {
    input_device: Option<String>,
    output_device: Option<String>,
    input_sample_rate: u32,
    wav: Option<PathBuf>,
}

impl CpalHost {
    pub fn from_config(config: &Config) -> Self {
        Self {
            input_device: config.audio.input_device.clone(),
            output_device: config.audio.output_device.clone(),
            input_sample_rate: config.audio.input_sample_rate,
            wav: None,
        }
    }

    /// Read audio from a WAV file, paced like a live microphone.
    pub fn with_wav(mut self, path: PathBuf) -> Self {
        self.wav = Some(path);
        self
    }
}

impl AudioHost for CpalHost {
    fn open_microphone(&self) -> Result<Box<dyn AudioSource>> {
        match &self.wav {
            Some(path) => Ok(Box::new(
                WavAudioSource::open(path, self.input_sample_rate)?.with_realtime_pacing(),
            )),
            None => Ok(Box::new(CpalAudioSource::new(
                self.input_device.as_deref(),
                self.input_sample_rate,
            )?)),
        }
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDestination>> {
        Ok(Box::new(CpalPlayback::new(self.output_device.as_deref())?))
    }
}

/// Options of the `talk` command.
#[derive(Debug, Clone, Default)]
pub struct TalkOptions {
    pub endpoint: Option<String>,
    pub preset: Option<String>,
    pub voice: Option<String>,
    pub wav: Option<PathBuf>,
    /// Directory of JPEG stills sent as visual telemetry
    pub frames: Option<PathBuf>,
    pub save: bool,
}

/// Run one voice session until Ctrl-C or until the service ends it.
///
/// Precedence for preset and voice: command line, then stored
/// preferences, then the config file.
pub async fn run_talk_command(mut config: Config, options: TalkOptions) -> anyhow::Result<()> {
    let store = JsonFileStore::new(JsonFileStore::default_path());
    let mut prefs = Preferences::load(&store).unwrap_or_else(|e| {
        log::warn!("ignoring stored preferences: {}", e);
        Preferences::default()
    });

    if let Some(endpoint) = &options.endpoint {
        config.session.endpoint = endpoint.clone();
    }
    if let Some(preset) = options.preset.clone().or_else(|| prefs.preset.clone()) {
        config.session.preset = preset;
    }

    let preset: Preset = config.preset()?;
    let mut session_config = prefs.apply(config.session_config()?);
    if let Some(voice) = &options.voice {
        session_config.voice = Some(voice.clone());
    }

    if options.save {
        prefs.preset = options.preset.clone().or(prefs.preset);
        prefs.voice = options.voice.clone().or(prefs.voice);
        save_preferences(&store, &prefs);
    }

    let mut host = CpalHost::from_config(&config);
    if let Some(path) = options.wav {
        host = host.with_wav(path);
    }

    let (updates_tx, updates_rx) = crossbeam_channel::bounded(defaults::UPDATE_BUFFER);
    let printer = thread::spawn(move || {
        for update in updates_rx {
            print_update(&update);
        }
    });

    let mut widget = VoiceWidget::new(
        session_config,
        Arc::new(JsonLinesTransport::new(config.session.endpoint.clone())),
        Arc::new(host),
    )
    .with_tools(preset.tools())
    .with_update_sender(updates_tx);
    if let Some(dir) = options.frames {
        let stills = JpegDirectory::open(&dir)?;
        eprintln!("Sending {} still(s) from {}", stills.file_count(), dir.display());
        widget = widget.with_media_feed(
            Duration::from_millis(defaults::FRAME_INTERVAL_MS),
            move || Ok(Box::new(JpegDirectory::open(&dir)?) as Box<dyn FrameSource>),
        );
    }

    eprintln!(
        "Connecting to {} as {}...",
        config.session.endpoint,
        preset.to_string().bold()
    );
    widget.start().await?;
    eprintln!("{}", "Listening. Press Ctrl-C to hang up.".dimmed());

    let mut poll = tokio::time::interval(Duration::from_millis(250));
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                widget.stop();
                break None;
            }
            _ = poll.tick() => {
                if let WidgetStatus::Idle { last_error } = widget.status() {
                    break last_error;
                }
            }
        }
    };

    // The printer drains until the last session sender is gone.
    drop(widget);
    match tokio::task::spawn_blocking(move || printer.join()).await {
        Ok(Ok(())) => {}
        _ => log::error!("update printer panicked"),
    }

    match outcome {
        Some(reason) => anyhow::bail!("session ended: {}", reason),
        None => Ok(()),
    }
}

fn save_preferences(store: &dyn KeyValueStore, prefs: &Preferences) {
    match prefs.save(store) {
        Ok(()) => log::info!("preferences saved"),
        Err(e) => log::warn!("could not save preferences: {}", e),
    }
}

fn print_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::Active => eprintln!("{}", "Session active".green()),
        SessionUpdate::Transcript(entry) => match entry.speaker {
            Speaker::Input => println!("{} {}", format!("{}:", entry.speaker).cyan(), entry.text),
            Speaker::Output => {
                println!("{} {}", format!("{}:", entry.speaker).magenta(), entry.text)
            }
        },
        SessionUpdate::TurnComplete => log::debug!("turn complete"),
        SessionUpdate::ToolInvoked { name } => {
            eprintln!("{} {}", "tool:".dimmed(), name)
        }
        SessionUpdate::Inactive { reason: Some(reason) } => {
            eprintln!("{}", format!("Session ended: {}", reason).red())
        }
        SessionUpdate::Inactive { reason: None } => eprintln!("{}", "Session ended".dimmed()),
    }
}
