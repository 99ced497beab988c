//! Synthetic frame source.
//!
//! `stub://` URIs produce deterministic frames without touching a file or device:
//! a dark background with one bright square that drifts across the frame. The
//! square gives detectors an unambiguous foreground object.
//!
//! URI form: `stub://<name>?frames=<n>&width=<w>&height=<h>`. Without `frames`
//! the source never ends.

use anyhow::{anyhow, Context, Result};

use super::{FrameReader, ReadOutcome};
use crate::error::StreamError;
use crate::frame::Frame;

pub const STUB_SCHEME: &str = "stub://";

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// Configuration for a synthetic source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Total frames before `EndOfStream`. `None` streams forever.
    pub frames: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frames: None,
        }
    }
}

impl SyntheticConfig {
    /// Parse a `stub://` URI.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix(STUB_SCHEME).ok_or_else(|| {
            StreamError::SourceUnavailable {
                source: uri.to_string(),
                reason: "not a stub:// uri".to_string(),
            }
        })?;
        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (rest, None),
        };
        let mut config = Self {
            name: if name.is_empty() {
                "synthetic".to_string()
            } else {
                name.to_string()
            },
            ..Self::default()
        };

        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("stub parameter '{}' has no value", pair))?;
            match key {
                "frames" => {
                    config.frames = Some(value.parse().context("stub frames must be an integer")?)
                }
                "width" => config.width = value.parse().context("stub width must be an integer")?,
                "height" => {
                    config.height = value.parse().context("stub height must be an integer")?
                }
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }

        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub frame dimensions must be non-zero"));
        }
        Ok(config)
    }
}

/// Deterministic synthetic reader.
pub struct SyntheticReader {
    config: SyntheticConfig,
    frame_count: u64,
    /// Simulated scene state; shifts the object's row every 50 frames.
    scene_state: u8,
}

impl SyntheticReader {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    /// Pixel rectangle `(x, y, side)` of the bright object in the given frame.
    pub fn object_rect(&self, frame_count: u64) -> (u32, u32, u32) {
        let side = (self.config.width.min(self.config.height) / 4).max(1);
        let travel = (self.config.width - side).max(1) as u64;
        let x = (frame_count * 4 % travel) as u32;
        let rows = (self.config.height - side).max(1);
        let y = (self.scene_state as u32 * side / 2) % rows;
        (x, y, side)
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        // Dim background gradient, well below the object's brightness.
        let mut pixels = vec![0u8; width * height * 3];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i / 3 + self.frame_count as usize) % 32) as u8;
        }

        let (ox, oy, side) = self.object_rect(self.frame_count);
        for y in oy..(oy + side).min(self.config.height) {
            for x in ox..(ox + side).min(self.config.width) {
                let offset = (y as usize * width + x as usize) * 3;
                pixels[offset] = 240;
                pixels[offset + 1] = 220;
                pixels[offset + 2] = 200;
            }
        }
        pixels
    }
}

impl FrameReader for SyntheticReader {
    fn describe(&self) -> String {
        format!("{}{} (synthetic)", STUB_SCHEME, self.config.name)
    }

    fn read_frame(&mut self) -> Result<ReadOutcome> {
        if let Some(total) = self.config.frames {
            if self.frame_count >= total {
                return Ok(ReadOutcome::EndOfStream);
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        let frame = Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )?;
        Ok(ReadOutcome::Frame(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stub_uri_parameters() -> Result<()> {
        let config = SyntheticConfig::from_uri("stub://clip?frames=100&width=64&height=48")?;
        assert_eq!(config.name, "clip");
        assert_eq!(config.frames, Some(100));
        assert_eq!((config.width, config.height), (64, 48));

        let endless = SyntheticConfig::from_uri("stub://front")?;
        assert_eq!(endless.frames, None);
        assert_eq!(endless.width, DEFAULT_WIDTH);
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SyntheticConfig::from_uri("stub://clip?frames=lots").is_err());
        assert!(SyntheticConfig::from_uri("stub://clip?fps=3").is_err());
        assert!(SyntheticConfig::from_uri("stub://clip?width=0").is_err());
        assert!(SyntheticConfig::from_uri("file://clip").is_err());
    }

    #[test]
    fn finite_source_ends_after_last_frame() -> Result<()> {
        let mut reader = SyntheticReader::new(SyntheticConfig::from_uri(
            "stub://clip?frames=3&width=16&height=12",
        )?);
        let mut sequences = Vec::new();
        while let ReadOutcome::Frame(frame) = reader.read_frame()? {
            sequences.push(frame.sequence);
        }
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(matches!(reader.read_frame()?, ReadOutcome::EndOfStream));
        Ok(())
    }

    #[test]
    fn frames_contain_bright_object() -> Result<()> {
        let mut reader = SyntheticReader::new(SyntheticConfig::from_uri(
            "stub://clip?width=40&height=40",
        )?);
        let ReadOutcome::Frame(frame) = reader.read_frame()? else {
            panic!("expected a frame");
        };
        let (x, y, side) = reader.object_rect(frame.sequence);
        assert!(frame.luma(x + side / 2, y + side / 2) > 200);
        assert!(frame.luma(39, 39) < 40);
        Ok(())
    }
}
