//! Frames handed from a `FrameSource` to the loop.
//!
//! - `Frame`: owned RGB24 pixel buffer plus dimensions, capture time and sequence number.
//!
//! A frame is moved into the tick that reads it and dropped when the tick ends.
//! There is no frame history buffer, so `Frame` has no `Clone`.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::{Instant, SystemTime};

/// Bytes per pixel of the only in-memory layout (packed RGB24).
pub const RGB_CHANNELS: usize = 3;

/// One captured frame.
pub struct Frame {
    /// Packed RGB24, row-major, no padding.
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonically increasing per source, starting at 1.
    pub sequence: u64,
    /// Wall-clock capture time (for reporting only).
    pub captured_at: SystemTime,
    /// Monotonic capture instant.
    captured_instant: Instant,
}

// No Clone, no AsRef<[u8]>: a frame has exactly one owner at a time.

impl Frame {
    /// Wrap an RGB24 buffer. Fails when the length does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
            captured_at: SystemTime::now(),
            captured_instant: Instant::now(),
        })
    }

    /// Take ownership of a decoded image.
    pub fn from_rgb_image(image: RgbImage, sequence: u64) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, sequence)
    }

    /// Read-only pixel access for detectors.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }

    /// Copy the pixels into an image buffer (used for annotation).
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    /// Time since capture.
    pub fn age(&self) -> std::time::Duration {
        self.captured_instant.elapsed()
    }

    /// Luminance of the pixel at `(x, y)` (ITU-R BT.601 weights).
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        let offset = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        let r = self.data[offset] as u32;
        let g = self.data[offset + 1] as u32;
        let b = self.data[offset + 2] as u32;
        ((299 * r + 587 * g + 114 * b) / 1000) as u8
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub(crate) fn expected_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_short_buffers() {
        assert!(Frame::new(vec![0u8; 10], 2, 2, 1).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2, 1).is_ok());
    }

    #[test]
    fn frame_round_trips_through_image() -> Result<()> {
        let mut img = RgbImage::new(4, 3);
        img.put_pixel(1, 2, image::Rgb([10, 20, 30]));
        let frame = Frame::from_rgb_image(img, 7)?;

        assert_eq!(frame.sequence, 7);
        assert_eq!((frame.width, frame.height), (4, 3));
        let copy = frame.to_rgb_image()?;
        assert_eq!(copy.get_pixel(1, 2), &image::Rgb([10, 20, 30]));

        let first = frame.age();
        assert!(frame.age() >= first);
        assert!(frame.captured_at <= SystemTime::now());
        Ok(())
    }

    #[test]
    fn luma_weights_channels() -> Result<()> {
        let frame = Frame::new(vec![255, 255, 255, 0, 0, 0], 2, 1, 1)?;
        assert_eq!(frame.luma(0, 0), 255);
        assert_eq!(frame.luma(1, 0), 0);
        Ok(())
    }

    #[test]
    fn debug_does_not_dump_pixels() -> Result<()> {
        let frame = Frame::new(vec![1u8; 12], 2, 2, 3)?;
        let text = format!("{:?}", frame);
        assert!(text.contains("bytes: 12"));
        Ok(())
    }
}
