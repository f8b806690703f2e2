//! Capture types and data structures.

use std::fmt;
use std::time::Instant;

/// Bytes per pixel of every published frame (BGRA8).
pub const BYTES_PER_PIXEL: usize = 4;

/// Lifecycle state of a capture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Constructed, not yet streaming
    Created,
    /// Stream is active
    Launched,
    /// Last launch attempt failed; may be retried
    Failed,
    /// Torn down; terminal
    Released,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Created => "created",
            CaptureState::Launched => "launched",
            CaptureState::Failed => "failed",
            CaptureState::Released => "released",
        };
        f.write_str(name)
    }
}

/// Pixel layout of a raw frame as delivered by a backend.
///
/// Published frames are always [`PixelLayout::Bgra8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// B, G, R, A
    Bgra8,
    /// B, G, R, unused (alpha forced to 255 on normalization)
    Bgrx8,
    /// R, G, B, A
    Rgba8,
}

/// A single BGRA pixel.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Eq, Ord)]
pub struct Bgra8 {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub a: u8,
}

impl Bgra8 {
    pub const fn new(b: u8, g: u8, r: u8, a: u8) -> Self {
        Self { b, g, r, a }
    }
}

/// Frame as handed over by a backend, before normalization.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width * 4`
    pub pitch: usize,
    pub layout: PixelLayout,
    /// Rows are stored bottom-up
    pub flipped: bool,
    pub data: Vec<u8>,
}

/// A captured frame, tightly packed BGRA8, top-down.
///
/// Published frames are immutable; the capture hands out `Arc<Frame>`
/// snapshots and replaces them wholesale when a newer frame arrives.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Pixel data, exactly `width * height * 4` bytes
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Position in the stream, starting at 1
    pub sequence: u64,
    /// When the worker published the frame
    pub timestamp: Instant,
}

impl Frame {
    /// Get the number of bytes per pixel (4 for BGRA).
    pub fn bytes_per_pixel(&self) -> usize {
        BYTES_PER_PIXEL
    }

    /// Expected buffer size for the frame dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Read the pixel at `(x, y)`, if in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Bgra8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = self.data.get(offset..offset + BYTES_PER_PIXEL)?;
        Some(Bgra8::new(px[0], px[1], px[2], px[3]))
    }
}

/// Description of a source a backend can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}x{} @ {} fps)", self.name, self.width, self.height, self.fps)
    }
}
