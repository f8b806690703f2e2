//! Configuration file handling for framegrab.
//!
//! Loads configuration from `<config dir>/framegrab/config.toml` or a custom path.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::capture::PixelLayout;

/// Configuration file structure for framegrab.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Timing and error tolerance of capture sessions.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Upper bound on how long `launch` waits for the stream to come up
    pub launch_timeout_ms: u64,
    /// Upper bound on a single backend pull in the acquisition loop
    pub frame_timeout_ms: u64,
    /// Consecutive backend errors after which the stream is abandoned
    pub max_consecutive_errors: u32,
    /// Pause between pulls after a transient error
    pub error_backoff_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            launch_timeout_ms: 5000,
            frame_timeout_ms: 100,
            max_consecutive_errors: 30,
            error_backoff_ms: 10,
        }
    }
}

impl CaptureConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Which backend serves capture sources.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Generated test pattern, no OS access
    #[default]
    Synthetic,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            sources: default_sources(),
        }
    }
}

/// A source served by the synthetic backend.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_layout")]
    pub layout: PixelLayout,
    /// Deliver rows bottom-up
    #[serde(default)]
    pub flip: bool,
    /// Simulated stream negotiation time
    #[serde(default)]
    pub open_delay_ms: u64,
    /// Report a disconnect after this many frames
    #[serde(default)]
    pub disconnect_after: Option<u64>,
}

impl SourceConfig {
    /// A 1920x1080 BGRA source at 60 fps.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            layout: default_layout(),
            flip: false,
            open_delay_ms: 0,
            disconnect_after: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay_ms = delay.as_millis() as u64;
        self
    }
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_fps() -> u32 {
    60
}

fn default_layout() -> PixelLayout {
    PixelLayout::Bgra8
}

fn default_sources() -> Vec<SourceConfig> {
    vec![SourceConfig::new("monitor-0")]
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                source: e,
            })?;
            log::debug!("Loaded configuration from {}", path.display());
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from a path the user named explicitly.
    /// Unlike [`Config::load`], a missing file is an error.
    pub fn load_from_explicit(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load(Some(path))
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file '{}' does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("framegrab").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/framegrab/config.toml")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.capture.launch_timeout(), Duration::from_secs(5));
        assert_eq!(config.capture.frame_timeout(), Duration::from_millis(100));
        assert_eq!(config.backend.kind, BackendKind::Synthetic);
        assert_eq!(config.backend.sources.len(), 1);
        assert_eq!(config.backend.sources[0].name, "monitor-0");
        assert_eq!(config.backend.sources[0].width, 1920);
        assert_eq!(config.backend.sources[0].height, 1080);
    }

    #[test]
    fn test_empty_toml_matches_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.capture, CaptureConfig::default());
        assert_eq!(config.backend.sources, default_sources());
    }

    #[test]
    fn test_partial_capture_section() {
        let config: Config = toml::from_str("[capture]\nlaunch_timeout_ms = 250\n").unwrap();
        assert_eq!(config.capture.launch_timeout_ms, 250);
        assert_eq!(config.capture.frame_timeout_ms, 100);
    }

    #[test]
    fn test_source_fields() {
        let toml = r#"
            [backend]
            kind = "synthetic"

            [[backend.sources]]
            name = "window:Editor"
            width = 800
            height = 600
            layout = "rgba8"
            flip = true
            open_delay_ms = 40
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let source = &config.backend.sources[0];
        assert_eq!(source.name, "window:Editor");
        assert_eq!((source.width, source.height), (800, 600));
        assert_eq!(source.fps, 60);
        assert_eq!(source.layout, PixelLayout::Rgba8);
        assert!(source.flip);
        assert_eq!(source.open_delay_ms, 40);
        assert_eq!(source.disconnect_after, None);
    }

    #[test]
    fn test_unknown_backend_kind_rejected() {
        let result: Result<Config, _> = toml::from_str("[backend]\nkind = \"dxgi\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_default_path_file_name() {
        let path = default_path();
        assert!(path.ends_with("framegrab/config.toml"));
    }
}
