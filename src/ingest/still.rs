//! Still image source.
//!
//! Decodes one raster image at open time and yields it exactly once.

use anyhow::Result;
use image::RgbImage;
use std::path::{Path, PathBuf};

use super::{FrameReader, ReadOutcome};
use crate::error::StreamError;
use crate::frame::Frame;

/// Reader for a single raster image (any format the `image` crate decodes).
pub struct ImageReader {
    path: PathBuf,
    image: Option<RgbImage>,
}

impl ImageReader {
    /// Decode the image. Unreadable or undecodable files are `SourceUnavailable`.
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path).map_err(|err| StreamError::SourceUnavailable {
            source: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            image: Some(image.into_rgb8()),
        })
    }
}

impl FrameReader for ImageReader {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read_frame(&mut self) -> Result<ReadOutcome> {
        match self.image.take() {
            Some(image) => Ok(ReadOutcome::Frame(Frame::from_rgb_image(image, 1)?)),
            None => Ok(ReadOutcome::EndOfStream),
        }
    }

    fn release(&mut self) {
        self.image = None;
    }
}
