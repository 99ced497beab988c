//! Single-capture source.
//!
//! A single captured still, used either standalone (one frame, then `EndOfStream`)
//! or repeatedly as a pseudo-stream. Repeated captures are paced by the
//! time-based sampler, not by this reader.
//!
//! With the `ingest-http` feature, an `http(s)://` location is fetched afresh on
//! every read, which turns a snapshot endpoint into a discrete capture stream.

use anyhow::Result;
#[cfg(feature = "ingest-http")]
use anyhow::{anyhow, Context};
use image::RgbImage;
use std::path::Path;

use super::{FrameReader, ReadOutcome};
use crate::error::StreamError;
use crate::frame::Frame;

#[cfg(feature = "ingest-http")]
const MAX_SNAPSHOT_BYTES: u64 = 5 * 1024 * 1024;

/// Configuration for a single-capture source.
#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    /// Local image path, or an http(s) snapshot URL (feature: ingest-http).
    pub location: String,
    /// Re-yield the capture on every read instead of ending after one frame.
    pub repeat: bool,
}

/// Reader over a single capture.
pub struct SnapshotReader {
    config: SnapshotConfig,
    backend: SnapshotBackend,
    frame_count: u64,
}

enum SnapshotBackend {
    Local(Option<RgbImage>),
    #[cfg(feature = "ingest-http")]
    Http(url::Url),
}

impl SnapshotReader {
    pub fn open(config: SnapshotConfig) -> Result<Self> {
        let backend = if is_remote(&config.location) {
            open_remote(&config.location)?
        } else {
            let image = image::open(Path::new(&config.location)).map_err(|err| {
                StreamError::SourceUnavailable {
                    source: config.location.clone(),
                    reason: err.to_string(),
                }
            })?;
            SnapshotBackend::Local(Some(image.into_rgb8()))
        };
        Ok(Self {
            config,
            backend,
            frame_count: 0,
        })
    }

    fn next_image(&mut self) -> Result<Option<RgbImage>> {
        match &mut self.backend {
            SnapshotBackend::Local(slot) => {
                if self.config.repeat {
                    Ok(slot.clone())
                } else {
                    Ok(slot.take())
                }
            }
            #[cfg(feature = "ingest-http")]
            SnapshotBackend::Http(url) => {
                if !self.config.repeat && self.frame_count > 0 {
                    return Ok(None);
                }
                let bytes = fetch_snapshot(url.as_str())?;
                let image = image::load_from_memory(&bytes).context("decode snapshot")?;
                Ok(Some(image.into_rgb8()))
            }
        }
    }
}

impl FrameReader for SnapshotReader {
    fn describe(&self) -> String {
        if self.config.repeat {
            format!("{} (repeating capture)", self.config.location)
        } else {
            format!("{} (single capture)", self.config.location)
        }
    }

    fn read_frame(&mut self) -> Result<ReadOutcome> {
        match self.next_image()? {
            Some(image) => {
                self.frame_count += 1;
                Ok(ReadOutcome::Frame(Frame::from_rgb_image(
                    image,
                    self.frame_count,
                )?))
            }
            None => Ok(ReadOutcome::EndOfStream),
        }
    }

    fn release(&mut self) {
        if let SnapshotBackend::Local(slot) = &mut self.backend {
            *slot = None;
        }
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

#[cfg(feature = "ingest-http")]
fn open_remote(location: &str) -> Result<SnapshotBackend> {
    let url = url::Url::parse(location).map_err(|err| StreamError::SourceUnavailable {
        source: location.to_string(),
        reason: err.to_string(),
    })?;
    Ok(SnapshotBackend::Http(url))
}

#[cfg(not(feature = "ingest-http"))]
fn open_remote(location: &str) -> Result<SnapshotBackend> {
    Err(StreamError::SourceUnavailable {
        source: location.to_string(),
        reason: "remote captures require the ingest-http feature".to_string(),
    }
    .into())
}

#[cfg(feature = "ingest-http")]
fn fetch_snapshot(url: &str) -> Result<Vec<u8>> {
    use std::io::Read;

    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_SNAPSHOT_BYTES)
        .read_to_end(&mut bytes)
        .context("read snapshot body")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty snapshot"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_capture(dir: &tempfile::TempDir) -> Result<String> {
        let path = dir.path().join("capture.jpg");
        RgbImage::from_pixel(10, 10, image::Rgb([120, 40, 40])).save(&path)?;
        Ok(path.display().to_string())
    }

    #[test]
    fn standalone_capture_yields_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let location = write_capture(&dir)?;
        let mut reader = SnapshotReader::open(SnapshotConfig {
            location,
            repeat: false,
        })?;

        assert!(matches!(reader.read_frame()?, ReadOutcome::Frame(_)));
        assert!(matches!(reader.read_frame()?, ReadOutcome::EndOfStream));
        Ok(())
    }

    #[test]
    fn repeating_capture_acts_as_stream() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let location = write_capture(&dir)?;
        let mut reader = SnapshotReader::open(SnapshotConfig {
            location,
            repeat: true,
        })?;

        for expected in 1..=3 {
            let ReadOutcome::Frame(frame) = reader.read_frame()? else {
                panic!("expected a frame");
            };
            assert_eq!(frame.sequence, expected);
        }

        reader.release();
        assert!(matches!(reader.read_frame()?, ReadOutcome::EndOfStream));
        Ok(())
    }

    #[cfg(not(feature = "ingest-http"))]
    #[test]
    fn remote_capture_needs_http_feature() {
        let err = SnapshotReader::open(SnapshotConfig {
            location: "http://camera.local/snapshot.jpg".to_string(),
            repeat: true,
        })
        .err()
        .expect("rejected");
        assert_eq!(
            StreamError::classify(&err).map(StreamError::code),
            Some("SOURCE_UNAVAILABLE")
        );
    }
}
