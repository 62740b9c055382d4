use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use voxdesk::app::{TalkOptions, run_talk_command};
use voxdesk::audio::capture::list_devices;
use voxdesk::cli::{Cli, Commands, ConfigAction};
use voxdesk::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .format_timestamp_millis()
        .init();
    log::debug!("voxdesk {}", voxdesk::version_string());

    match cli.command {
        Commands::Talk {
            endpoint,
            preset,
            voice,
            wav,
            frames,
            save,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_talk_command(
                config,
                TalkOptions {
                    endpoint,
                    preset,
                    voice,
                    wav,
                    frames,
                    save,
                },
            )
            .await?;
        }
        Commands::Devices => {
            list_audio_devices()?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "voxdesk", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Load configuration from the given path, or the default path when it exists.
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

/// List available audio input and output devices.
fn list_audio_devices() -> Result<()> {
    let devices = list_devices()?;

    if devices.inputs.is_empty() && devices.outputs.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    println!("{}", "Input devices:".bold());
    for (idx, device) in devices.inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    println!("{}", "Output devices:".bold());
    for (idx, device) in devices.outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&std::path::Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            if let Err(e) = config.validate() {
                eprintln!("{} {}", "Warning:".yellow(), e);
            }
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(std::path::PathBuf::from)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
