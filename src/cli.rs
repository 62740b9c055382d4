//! Command-line interface for voxdesk
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Realtime voice sessions for the library desk
#[derive(Parser, Debug)]
#[command(name = "voxdesk", version, about = "Realtime voice sessions for the library desk")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Log filter for env_logger, unless RUST_LOG says otherwise.
    pub fn log_filter(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Talk to the assistant through the microphone and speaker
    Talk {
        /// Inference service address (host:port)
        #[arg(long, value_name = "HOST:PORT")]
        endpoint: Option<String>,

        /// Persona preset: assistant, reference-desk, open-access, tutor[:TITLE], visual-monitor
        #[arg(long, value_name = "PRESET")]
        preset: Option<String>,

        /// Prebuilt voice name (e.g., Puck, Kore, Charon)
        #[arg(long, value_name = "VOICE")]
        voice: Option<String>,

        /// Stream a WAV file instead of the microphone
        #[arg(long, value_name = "FILE")]
        wav: Option<PathBuf>,

        /// Send the JPEG stills in DIR as visual telemetry, one per second
        #[arg(long, value_name = "DIR")]
        frames: Option<PathBuf>,

        /// Remember --preset and --voice for later sessions
        #[arg(long)]
        save: bool,
    },

    /// List available audio input and output devices
    Devices,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
