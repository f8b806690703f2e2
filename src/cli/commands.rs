//! Subcommand handlers for sources, grab and config actions.

use std::error::Error;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::args::ConfigAction;
use framegrab::backend;
use framegrab::config::{default_path, Config};
use framegrab::{Capture, Frame, Registry};

/// Global flag for Ctrl+C handling.
static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

fn ctrlc_received() -> bool {
    CTRLC_RECEIVED.load(Ordering::SeqCst)
}

/// Set up the Ctrl+C handler.
///
/// This should be called once at program startup.
pub fn setup_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        CTRLC_RECEIVED.store(true, Ordering::SeqCst);
        eprintln!("\nReceived Ctrl+C, stopping...");
    })
}

/// List the sources the configured backend serves.
pub fn list_sources(config: &Config) -> Result<(), Box<dyn Error>> {
    let backend = backend::from_config(&config.backend)?;
    let sources = backend.sources();
    if sources.is_empty() {
        println!("No sources configured.");
        println!();
        println!("Add [[backend.sources]] entries to {}.", default_path().display());
    } else {
        println!("Sources served by the {} backend:", backend.name());
        for source in sources {
            println!("  {}", source);
        }
    }
    Ok(())
}

/// Options for the grab loop.
#[derive(Debug, Clone)]
pub struct GrabOptions {
    /// Frames to grab; 0 means until Ctrl+C
    pub frames: u64,
    /// Longest wait for each new frame
    pub timeout: Duration,
    pub digest: bool,
}

/// Launch a capture of `name` and print each new frame.
///
/// Returns the number of frames grabbed.
pub fn grab(config: &Config, name: &str, options: &GrabOptions) -> Result<u64, Box<dyn Error>> {
    let capture = Capture::with_registry(name, Registry::from_config(config))?;
    capture.try_launch()?;
    println!("Capturing '{}'", name);

    let mut grabbed = 0;
    while options.frames == 0 || grabbed < options.frames {
        if ctrlc_received() {
            break;
        }
        match capture.wait_for_frame(options.timeout) {
            Ok(frame) => {
                grabbed += 1;
                println!("{}", describe_frame(&frame, options.digest));
            }
            Err(e) if e.is_transient() => {
                if !capture.is_streaming() {
                    return Err(format!("capture stream for '{}' ended", name).into());
                }
                log::debug!("No new frame within {:?}", options.timeout);
            }
            Err(e) => return Err(e.into()),
        }
    }

    capture.release();
    println!("Grabbed {} frame(s)", grabbed);
    Ok(grabbed)
}

/// One-line summary of a frame.
pub fn describe_frame(frame: &Frame, digest: bool) -> String {
    let mut line = format!(
        "frame {:>6}  {}x{}  {} bytes",
        frame.sequence,
        frame.width,
        frame.height,
        frame.data.len()
    );
    if digest {
        line.push_str("  sha256:");
        line.push_str(&frame_digest(frame)[..16]);
    }
    line
}

/// Hex SHA-256 of the frame's pixel buffer.
pub fn frame_digest(frame: &Frame) -> String {
    hex::encode(Sha256::digest(&frame.data))
}

/// Handle config subcommand actions.
pub fn handle_config_action(action: ConfigAction, config: &Config, path: Option<&Path>) {
    match action {
        ConfigAction::Show => {
            let capture = &config.capture;
            println!("Current configuration:");
            println!("  Launch timeout: {} ms", capture.launch_timeout_ms);
            println!("  Frame timeout: {} ms", capture.frame_timeout_ms);
            println!("  Max consecutive errors: {}", capture.max_consecutive_errors);
            println!("  Error backoff: {} ms", capture.error_backoff_ms);
            println!("  Backend: {:?}", config.backend.kind);
            for source in &config.backend.sources {
                println!(
                    "    {} {}x{} @ {} fps, {:?}{}",
                    source.name,
                    source.width,
                    source.height,
                    source.fps,
                    source.layout,
                    if source.flip { ", bottom-up" } else { "" }
                );
            }
            println!();

            let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_path);
            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found)", config_path.display());
            }
        }
    }
}
