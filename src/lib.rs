//! framegrab library crate.
//!
//! A capture handle bound to a named source: create it, launch it, poll it
//! for the latest frame, release it. The same lifecycle is exported over a
//! C ABI in [`ffi`].

pub mod backend;
pub mod capture;
pub mod config;
pub mod ffi;
pub mod registry;

pub use capture::{BackendError, Capture, CaptureError, CaptureState, Frame};
pub use config::Config;
pub use registry::Registry;
