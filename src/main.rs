mod cli;

use clap::Parser;
use std::time::Duration;

use cli::{Args, Command, GrabOptions};
use framegrab::Config;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

/// Load config file.
/// If --config is specified, require the file to exist.
/// Otherwise, fall back to defaults if the default config is missing or broken.
fn load_config(path: Option<&std::path::Path>) -> Config {
    match path {
        Some(path) => match Config::load_from_explicit(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => match Config::load(None) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config file: {}", e);
                log::warn!("Using default settings");
                Config::default()
            }
        },
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(args.config.as_deref());

    match args.command {
        Command::Sources => {
            if let Err(e) = cli::list_sources(&config) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Command::Grab {
            name,
            frames,
            timeout_ms,
            digest,
        } => {
            if let Err(e) = cli::setup_ctrlc_handler() {
                log::warn!("Could not set up Ctrl+C handler: {}", e);
            }
            let options = GrabOptions {
                frames,
                timeout: Duration::from_millis(timeout_ms),
                digest,
            };
            if let Err(e) = cli::grab(&config, &name, &options) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Command::Config { action } => {
            cli::handle_config_action(action, &config, args.config.as_deref());
        }
    }
}
