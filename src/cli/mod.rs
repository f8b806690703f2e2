//! Command-line interface definitions and helpers.

mod args;
mod commands;

pub use args::{Args, Command, ConfigAction};
pub use commands::{grab, handle_config_action, list_sources, setup_ctrlc_handler, GrabOptions};
