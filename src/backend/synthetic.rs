use std::thread;
use std::time::{Duration, Instant};

use super::{CaptureBackend, FrameSource};
use crate::capture::{BackendError, Bgra8, PixelLayout, RawFrame, SourceInfo, BYTES_PER_PIXEL};
use crate::config::SourceConfig;

const CHECKER_SIZE: u32 = 32;

const TILE_COLORS: [Bgra8; 4] = [
    Bgra8::new(160, 80, 40, 255),  // Blue
    Bgra8::new(40, 60, 160, 255),  // Red
    Bgra8::new(60, 140, 40, 255),  // Green
    Bgra8::new(40, 100, 140, 255), // Orange
];

const SCANLINE: Bgra8 = Bgra8::new(255, 255, 255, 255);

/// Backend serving a generated checkerboard for each configured source.
///
/// Every `open` yields an independent stream, so several handles may watch
/// the same source. A white scanline moves down the image from frame to
/// frame so consecutive frames differ.
pub struct SyntheticBackend {
    sources: Vec<SourceConfig>,
}

impl SyntheticBackend {
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self { sources }
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn sources(&self) -> Vec<SourceInfo> {
        self.sources
            .iter()
            .map(|s| SourceInfo {
                name: s.name.clone(),
                width: s.width,
                height: s.height,
                fps: s.fps,
            })
            .collect()
    }

    fn open(&self, source: &str) -> Result<Box<dyn FrameSource>, BackendError> {
        let (index, config) = self
            .sources
            .iter()
            .enumerate()
            .find(|(_, s)| s.name == source)
            .ok_or_else(|| BackendError::SourceNotFound(source.to_string()))?;

        if config.width == 0 || config.height == 0 {
            return Err(BackendError::Unavailable(format!(
                "source '{}' has empty dimensions {}x{}",
                config.name, config.width, config.height
            )));
        }

        if config.open_delay_ms > 0 {
            thread::sleep(Duration::from_millis(config.open_delay_ms));
        }

        log::info!(
            "Opened synthetic source '{}' ({}x{} @ {} fps)",
            config.name,
            config.width,
            config.height,
            config.fps
        );
        Ok(Box::new(SyntheticStream::new(config, index)))
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    layout: PixelLayout,
    flip: bool,
    interval: Duration,
    next_due: Instant,
    produced: u64,
    disconnect_after: Option<u64>,
    /// Pre-generated pattern in storage order (avoids regenerating every frame).
    pattern: Vec<u8>,
}

impl SyntheticStream {
    fn new(config: &SourceConfig, index: usize) -> Self {
        let base = TILE_COLORS[index % TILE_COLORS.len()];
        let mut stream = Self {
            width: config.width,
            height: config.height,
            layout: config.layout,
            flip: config.flip,
            interval: Duration::from_secs(1) / config.fps.max(1),
            next_due: Instant::now(),
            produced: 0,
            disconnect_after: config.disconnect_after,
            pattern: Vec::new(),
        };

        let mut pattern = vec![0u8; stream.row_len() * config.height as usize];
        for y in 0..config.height {
            let row = stream.storage_row(y);
            for x in 0..config.width {
                let light = ((x / CHECKER_SIZE) + (y / CHECKER_SIZE)) % 2 == 0;
                let px = if light { base } else { darken(base) };
                let offset = row + x as usize * BYTES_PER_PIXEL;
                pattern[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&encode(px, config.layout));
            }
        }
        stream.pattern = pattern;
        stream
    }

    fn row_len(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Byte offset of display row `y` in the stored buffer.
    fn storage_row(&self, y: u32) -> usize {
        let row = if self.flip { self.height - 1 - y } else { y };
        row as usize * self.row_len()
    }

    fn render(&self) -> Vec<u8> {
        let mut data = self.pattern.clone();
        let y = ((self.produced * 8) % self.height as u64) as u32;
        let start = self.storage_row(y);
        let pixel = encode(SCANLINE, self.layout);
        for px in data[start..start + self.row_len()].chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&pixel);
        }
        data
    }
}

impl FrameSource for SyntheticStream {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, BackendError> {
        if self.disconnect_after.is_some_and(|limit| self.produced >= limit) {
            return Err(BackendError::Disconnected);
        }

        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }

        // Don't burst to catch up after a slow reader.
        let now = Instant::now();
        self.next_due += self.interval;
        if self.next_due < now {
            self.next_due = now;
        }

        self.produced += 1;
        Ok(Some(RawFrame {
            width: self.width,
            height: self.height,
            pitch: self.row_len(),
            layout: self.layout,
            flipped: self.flip,
            data: self.render(),
        }))
    }
}

fn darken(px: Bgra8) -> Bgra8 {
    let scale = |c: u8| (c as f32 * 0.7) as u8;
    Bgra8::new(scale(px.b), scale(px.g), scale(px.r), px.a)
}

fn encode(px: Bgra8, layout: PixelLayout) -> [u8; 4] {
    match layout {
        PixelLayout::Bgra8 => [px.b, px.g, px.r, px.a],
        PixelLayout::Bgrx8 => [px.b, px.g, px.r, 0],
        PixelLayout::Rgba8 => [px.r, px.g, px.b, px.a],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::normalize;

    fn small(name: &str) -> SourceConfig {
        SourceConfig::new(name).with_size(64, 48).with_fps(1000)
    }

    fn first_frame(stream: &mut Box<dyn FrameSource>) -> RawFrame {
        for _ in 0..100 {
            if let Some(frame) = stream.next_frame(Duration::from_millis(50)).unwrap() {
                return frame;
            }
        }
        panic!("synthetic stream produced no frame");
    }

    #[test]
    fn test_unknown_source() {
        let backend = SyntheticBackend::new(vec![small("monitor-0")]);
        match backend.open("monitor-9") {
            Err(BackendError::SourceNotFound(name)) => assert_eq!(name, "monitor-9"),
            Err(other) => panic!("Expected SourceNotFound, got {:?}", other),
            Ok(_) => panic!("Expected SourceNotFound, got a stream"),
        }
    }

    #[test]
    fn test_zero_sized_source_unavailable() {
        let backend = SyntheticBackend::new(vec![small("broken").with_size(0, 10)]);
        assert!(matches!(
            backend.open("broken"),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[test]
    fn test_frame_dimensions() {
        let backend = SyntheticBackend::new(vec![small("monitor-0")]);
        let mut stream = backend.open("monitor-0").unwrap();
        let frame = first_frame(&mut stream);
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.pitch, 64 * 4);
        assert_eq!(frame.data.len(), 64 * 48 * 4);
    }

    #[test]
    fn test_consecutive_frames_differ() {
        let backend = SyntheticBackend::new(vec![small("monitor-0")]);
        let mut stream = backend.open("monitor-0").unwrap();
        let a = first_frame(&mut stream);
        let b = first_frame(&mut stream);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_slow_source_times_out() {
        let backend = SyntheticBackend::new(vec![small("slow").with_fps(1)]);
        let mut stream = backend.open("slow").unwrap();
        // First frame is due immediately, the next one a second later.
        assert!(stream.next_frame(Duration::from_millis(10)).unwrap().is_some());
        assert!(stream.next_frame(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_disconnect_after() {
        let mut config = small("flaky");
        config.disconnect_after = Some(1);
        let backend = SyntheticBackend::new(vec![config]);
        let mut stream = backend.open("flaky").unwrap();
        first_frame(&mut stream);
        assert_eq!(
            stream.next_frame(Duration::from_millis(10)).unwrap_err(),
            BackendError::Disconnected
        );
    }

    #[test]
    fn test_flipped_source_stores_rows_bottom_up() {
        let mut config = small("flipped");
        config.flip = true;
        let backend = SyntheticBackend::new(vec![config]);
        let mut stream = backend.open("flipped").unwrap();
        let raw = first_frame(&mut stream);
        assert!(raw.flipped);
        // Display row 8 lives in storage row 48 - 1 - 8.
        let offset = 39 * raw.pitch;
        assert_eq!(&raw.data[offset..offset + 4], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_flipped_rgba_normalizes_like_plain() {
        let mut flipped = small("flipped");
        flipped.flip = true;
        flipped.layout = PixelLayout::Rgba8;
        let backend = SyntheticBackend::new(vec![small("plain"), flipped]);

        let mut plain = backend.open("plain").unwrap();
        let plain = normalize(first_frame(&mut plain), 1).unwrap();
        let mut other = backend.open("flipped").unwrap();
        let other = normalize(first_frame(&mut other), 1).unwrap();

        // Scanline sits on row 8 for the first frame in both streams.
        assert_eq!(plain.pixel(0, 8), Some(SCANLINE));
        assert_eq!(other.pixel(0, 8), Some(SCANLINE));
        assert_eq!(plain.pixel(0, 20).map(|p| p.a), Some(255));
        assert_eq!(other.pixel(0, 20).map(|p| p.a), Some(255));
    }
}
