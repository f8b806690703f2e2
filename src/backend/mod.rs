//! Capture backends.
//!
//! A backend knows which sources exist and how to open a stream on one of
//! them. Everything behind [`CaptureBackend::open`] is backend business; the
//! capture handle only ever sees [`FrameSource`] pulls.

mod synthetic;

use std::sync::Arc;
use std::time::Duration;

use crate::capture::{BackendError, RawFrame, SourceInfo};
use crate::config::{BackendConfig, BackendKind};

pub use synthetic::SyntheticBackend;

/// Trait for capture backends.
pub trait CaptureBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Sources this backend can currently serve.
    fn sources(&self) -> Vec<SourceInfo>;

    /// Open a stream on `source`.
    ///
    /// May block while the stream is negotiated; callers bound the wait.
    fn open(&self, source: &str) -> Result<Box<dyn FrameSource>, BackendError>;
}

/// An open stream of frames.
pub trait FrameSource: Send {
    /// Pull the next frame, waiting at most `timeout`.
    ///
    /// `Ok(None)` means no new frame arrived in time.
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, BackendError>;
}

/// Instantiate the backend selected in the configuration.
pub fn from_config(config: &BackendConfig) -> Result<Arc<dyn CaptureBackend>, BackendError> {
    match config.kind {
        BackendKind::Synthetic => {
            if config.sources.is_empty() {
                log::warn!("Synthetic backend configured without sources");
            }
            Ok(Arc::new(SyntheticBackend::new(config.sources.clone())))
        }
    }
}
