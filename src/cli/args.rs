//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Poll frames from a named capture source
#[derive(Parser, Debug)]
#[command(name = "framegrab")]
#[command(version, about = "Poll frames from a named capture source", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List sources the configured backend serves
    Sources,
    /// Launch a capture and poll it for frames
    #[command(after_help = "EXAMPLES:
    framegrab grab monitor-0
    framegrab grab monitor-0 --frames 0 --digest   # until Ctrl+C")]
    Grab {
        /// Source name, e.g. monitor-0
        name: String,

        /// Number of frames to grab (0 = until Ctrl+C)
        #[arg(long, short = 'n', default_value = "10")]
        frames: u64,

        /// Longest wait for each new frame, in milliseconds
        #[arg(long, default_value = "1000")]
        timeout_ms: u64,

        /// Print a SHA-256 fingerprint of each frame
        #[arg(long)]
        digest: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
}
