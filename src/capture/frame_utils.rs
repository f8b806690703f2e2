//! Frame conversion and transformation utilities.

use std::time::Instant;

use super::errors::BackendError;
use super::types::{Frame, PixelLayout, RawFrame, BYTES_PER_PIXEL};

/// Convert a backend frame to a tightly packed, top-down BGRA8 [`Frame`].
///
/// Strips row padding, swaps channels for RGBA sources, forces alpha for
/// BGRX sources and reverses row order for bottom-up sources.
pub fn normalize(raw: RawFrame, sequence: u64) -> Result<Frame, BackendError> {
    let width = raw.width as usize;
    let height = raw.height as usize;
    if width == 0 || height == 0 {
        return Err(BackendError::InvalidFrame(format!(
            "empty frame {}x{}",
            raw.width, raw.height
        )));
    }

    let row_len = width.checked_mul(BYTES_PER_PIXEL).ok_or_else(|| {
        BackendError::InvalidFrame(format!("row of {} pixels overflows", raw.width))
    })?;
    if raw.pitch < row_len {
        return Err(BackendError::InvalidFrame(format!(
            "pitch {} shorter than row length {}",
            raw.pitch, row_len
        )));
    }
    // The last row may omit its padding. Every row offset below is bounded
    // by `needed`, so none of them can overflow once this check passes.
    let needed = raw
        .pitch
        .checked_mul(height - 1)
        .and_then(|n| n.checked_add(row_len))
        .ok_or_else(|| {
            BackendError::InvalidFrame(format!(
                "pitch {} over {} rows overflows",
                raw.pitch, raw.height
            ))
        })?;
    if raw.data.len() < needed {
        return Err(BackendError::InvalidFrame(format!(
            "buffer holds {} bytes, {}x{} with pitch {} needs {}",
            raw.data.len(),
            raw.width,
            raw.height,
            raw.pitch,
            needed
        )));
    }

    let data = if raw.pitch == row_len
        && !raw.flipped
        && raw.layout == PixelLayout::Bgra8
        && raw.data.len() == row_len * height
    {
        raw.data
    } else {
        let mut data = Vec::with_capacity(row_len * height);
        for y in 0..height {
            let src_row = if raw.flipped { height - 1 - y } else { y };
            let start = src_row * raw.pitch;
            data.extend_from_slice(&raw.data[start..start + row_len]);
        }
        convert_layout(&mut data, raw.layout);
        data
    };

    Ok(Frame {
        data,
        width: raw.width,
        height: raw.height,
        sequence,
        timestamp: Instant::now(),
    })
}

/// Rewrite tightly packed pixels of `layout` into BGRA8 in place.
fn convert_layout(data: &mut [u8], layout: PixelLayout) {
    match layout {
        PixelLayout::Bgra8 => {}
        PixelLayout::Bgrx8 => {
            for px in data.chunks_exact_mut(BYTES_PER_PIXEL) {
                px[3] = 255;
            }
        }
        PixelLayout::Rgba8 => {
            for px in data.chunks_exact_mut(BYTES_PER_PIXEL) {
                px.swap(0, 2);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(width: u32, height: u32, pitch: usize, layout: PixelLayout, data: Vec<u8>) -> RawFrame {
        RawFrame {
            width,
            height,
            pitch,
            layout,
            flipped: false,
            data,
        }
    }

    #[test]
    fn test_normalize_passthrough() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let frame = normalize(raw(2, 1, 8, PixelLayout::Bgra8, data.clone()), 7).unwrap();
        assert_eq!(frame.data, data);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.data.len(), frame.expected_len());
    }

    #[test]
    fn test_normalize_strips_pitch_padding() {
        // 1x2 image, pitch 8: each row has 4 bytes of padding
        let data = vec![1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 2, 2, 0, 0, 0, 0];
        let frame = normalize(raw(1, 2, 8, PixelLayout::Bgra8, data), 1).unwrap();
        assert_eq!(frame.data, vec![1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_normalize_last_row_without_padding() {
        let data = vec![1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 2, 2];
        let frame = normalize(raw(1, 2, 8, PixelLayout::Bgra8, data), 1).unwrap();
        assert_eq!(frame.data, vec![1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_normalize_flips_bottom_up_rows() {
        let mut r = raw(1, 2, 4, PixelLayout::Bgra8, vec![1, 1, 1, 1, 2, 2, 2, 2]);
        r.flipped = true;
        let frame = normalize(r, 1).unwrap();
        assert_eq!(frame.data, vec![2, 2, 2, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn test_normalize_rgba_to_bgra() {
        let frame = normalize(raw(1, 1, 4, PixelLayout::Rgba8, vec![10, 20, 30, 40]), 1).unwrap();
        assert_eq!(frame.data, vec![30, 20, 10, 40]);
    }

    #[test]
    fn test_normalize_bgrx_forces_alpha() {
        let frame = normalize(raw(1, 1, 4, PixelLayout::Bgrx8, vec![10, 20, 30, 0]), 1).unwrap();
        assert_eq!(frame.data, vec![10, 20, 30, 255]);
    }

    #[test]
    fn test_normalize_rejects_short_buffer() {
        let result = normalize(raw(2, 2, 8, PixelLayout::Bgra8, vec![0; 12]), 1);
        assert!(matches!(result, Err(BackendError::InvalidFrame(_))));
    }

    #[test]
    fn test_normalize_rejects_small_pitch() {
        let result = normalize(raw(2, 1, 4, PixelLayout::Bgra8, vec![0; 8]), 1);
        assert!(matches!(result, Err(BackendError::InvalidFrame(_))));
    }

    #[test]
    fn test_normalize_rejects_overflowing_pitch() {
        let result = normalize(raw(1, 3, usize::MAX / 2 + 1, PixelLayout::Bgra8, vec![0; 12]), 1);
        assert!(matches!(result, Err(BackendError::InvalidFrame(_))));

        let mut flipped = raw(1, 3, usize::MAX / 2 + 1, PixelLayout::Bgra8, vec![0; 12]);
        flipped.flipped = true;
        assert!(matches!(
            normalize(flipped, 1),
            Err(BackendError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_normalize_rejects_empty_dimensions() {
        let result = normalize(raw(0, 1, 0, PixelLayout::Bgra8, vec![]), 1);
        assert!(matches!(result, Err(BackendError::InvalidFrame(_))));
    }
}
