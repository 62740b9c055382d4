use crate::defaults;
use crate::error::{Result, VoxdeskError};
use crate::session::config::{SessionConfig, StartupPolicy};
use crate::session::presets::Preset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub session: SessionSettings,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
}

/// Voice session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub endpoint: String,
    pub model: String,
    pub preset: String,
    /// Overrides the preset's voice
    pub voice: Option<String>,
    /// Overrides the preset's persona
    pub persona: Option<String>,
    /// Overrides the preset's transcript capacity
    pub transcript_capacity: Option<usize>,
    pub startup_policy: StartupPolicy,
    pub connect_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            endpoint: defaults::DEFAULT_ENDPOINT.to_string(),
            model: defaults::DEFAULT_MODEL.to_string(),
            preset: "assistant".to_string(),
            voice: None,
            persona: None,
            transcript_capacity: None,
            startup_policy: StartupPolicy::Drop,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(VoxdeskError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(VoxdeskError::ConfigParse {
                message: format!("{}: {}", path.display(), e),
            }),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXDESK_ENDPOINT → session.endpoint
    /// - VOXDESK_VOICE → session.voice
    /// - VOXDESK_INPUT_DEVICE → audio.input_device
    /// - VOXDESK_OUTPUT_DEVICE → audio.output_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("VOXDESK_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.session.endpoint = endpoint;
        }

        if let Ok(voice) = std::env::var("VOXDESK_VOICE")
            && !voice.is_empty()
        {
            self.session.voice = Some(voice);
        }

        if let Ok(device) = std::env::var("VOXDESK_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        if let Ok(device) = std::env::var("VOXDESK_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxdesk/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("voxdesk")
            .join("config.toml")
    }

    /// Reject values no session can run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str| {
            Err(VoxdeskError::ConfigInvalidValue {
                key: key.to_string(),
                message: "must be greater than zero".to_string(),
            })
        };
        if self.audio.input_sample_rate == 0 {
            return invalid("audio.input_sample_rate");
        }
        if self.audio.output_sample_rate == 0 {
            return invalid("audio.output_sample_rate");
        }
        if self.audio.frame_size == 0 {
            return invalid("audio.frame_size");
        }
        if self.session.transcript_capacity == Some(0) {
            return invalid("session.transcript_capacity");
        }
        self.preset()?;
        Ok(())
    }

    pub fn preset(&self) -> Result<Preset> {
        self.session.preset.parse()
    }

    /// Session configuration: the preset, then the overrides from this file.
    pub fn session_config(&self) -> Result<SessionConfig> {
        self.validate()?;
        let base = SessionConfig {
            model: self.session.model.clone(),
            startup_policy: self.session.startup_policy,
            input_sample_rate: self.audio.input_sample_rate,
            output_sample_rate: self.audio.output_sample_rate,
            frame_size: self.audio.frame_size,
            connect_timeout: Duration::from_millis(self.session.connect_timeout_ms),
            ..SessionConfig::default()
        };
        let mut config = self.preset()?.apply(base);

        if let Some(voice) = &self.session.voice {
            config.voice = Some(voice.clone());
        }
        if let Some(persona) = &self.session.persona {
            config.persona = persona.clone();
        }
        if let Some(capacity) = self.session.transcript_capacity {
            config.transcript_capacity = capacity;
        }
        Ok(config)
    }

    /// Render as TOML, for `config show`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VoxdeskError::ConfigParse {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voxdesk_env() {
        remove_env("VOXDESK_ENDPOINT");
        remove_env("VOXDESK_VOICE");
        remove_env("VOXDESK_INPUT_DEVICE");
        remove_env("VOXDESK_OUTPUT_DEVICE");
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.input_sample_rate, 16000);
        assert_eq!(config.audio.output_sample_rate, 24000);
        assert_eq!(config.audio.frame_size, 4096);

        assert_eq!(config.session.endpoint, "127.0.0.1:7878");
        assert_eq!(config.session.preset, "assistant");
        assert_eq!(config.session.startup_policy, StartupPolicy::Drop);
        assert_eq!(config.session.connect_timeout_ms, 10_000);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_temp(
            r#"
            [audio]
            input_device = "pipewire"
            output_device = "USB Headset"
            frame_size = 2048

            [session]
            endpoint = "10.0.0.5:9000"
            preset = "reference-desk"
            voice = "Aoede"
            transcript_capacity = 10
            startup_policy = "buffer"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.input_device, Some("pipewire".to_string()));
        assert_eq!(config.audio.output_device, Some("USB Headset".to_string()));
        assert_eq!(config.audio.frame_size, 2048);
        assert_eq!(config.audio.input_sample_rate, 16000);
        assert_eq!(config.session.endpoint, "10.0.0.5:9000");
        assert_eq!(config.session.startup_policy, StartupPolicy::Buffer);

        let session = config.session_config().unwrap();
        assert_eq!(session.voice.as_deref(), Some("Aoede"));
        assert_eq!(session.transcript_capacity, 10);
        assert_eq!(session.frame_size, 2048);
        assert!(session.persona.contains("Reference Desk"));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_temp(
            r#"
            [session]
            preset = "open-access"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.audio, AudioConfig::default());

        let session = config.session_config().unwrap();
        assert_eq!(session.voice.as_deref(), Some("Charon"));
        assert_eq!(session.startup_policy, StartupPolicy::Drop);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.audio.frame_size = 0;
        assert!(matches!(
            config.validate(),
            Err(VoxdeskError::ConfigInvalidValue { key, .. }) if key == "audio.frame_size"
        ));

        let mut config = Config::default();
        config.session.transcript_capacity = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.preset = "jukebox".to_string();
        assert!(config.session_config().is_err());
    }

    #[test]
    fn test_env_override_endpoint_and_voice() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxdesk_env();

        set_env("VOXDESK_ENDPOINT", "192.168.1.20:7878");
        set_env("VOXDESK_VOICE", "Fenrir");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.session.endpoint, "192.168.1.20:7878");
        assert_eq!(config.session.voice, Some("Fenrir".to_string()));
        assert_eq!(config.audio.input_device, None);

        clear_voxdesk_env();
    }

    #[test]
    fn test_env_override_devices() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxdesk_env();

        set_env("VOXDESK_INPUT_DEVICE", "hw:1,0");
        set_env("VOXDESK_OUTPUT_DEVICE", "pulse");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.input_device, Some("hw:1,0".to_string()));
        assert_eq!(config.audio.output_device, Some("pulse".to_string()));

        clear_voxdesk_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxdesk_env();

        set_env("VOXDESK_ENDPOINT", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.session.endpoint, "127.0.0.1:7878");

        clear_voxdesk_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_temp(
            r#"
            [audio
            input_device = "broken
        "#,
        );

        assert!(matches!(
            Config::load(temp_file.path()),
            Err(VoxdeskError::Config(_))
        ));
        assert!(matches!(
            Config::load_or_default(temp_file.path()),
            Err(VoxdeskError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_default_path_ends_with_voxdesk_config() {
        let path = Config::default_path();
        assert!(path.ends_with("voxdesk/config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = Config::default();
        config.session.voice = Some("Puck".to_string());

        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();

        assert_eq!(parsed, config);
    }
}
