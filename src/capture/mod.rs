//! Capture module: the capture handle and the types it hands out.
//!
//! - [`Capture`] owns one named capture session
//! - [`Frame`] is a published BGRA8 snapshot
//! - [`CaptureError`] / [`BackendError`] describe what went wrong

mod capture_loop;
mod errors;
mod frame_utils;
mod handle;
mod slot;
mod types;

pub use errors::{BackendError, CaptureError};
pub use frame_utils::normalize;
pub use handle::Capture;
pub use types::{
    Bgra8, CaptureState, Frame, PixelLayout, RawFrame, SourceInfo, BYTES_PER_PIXEL,
};
