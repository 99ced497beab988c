//! Frame acquisition.
//!
//! One `FrameSource` type covers every input kind. The kind is dispatched once, at
//! open time, to a `FrameReader` from a small closed set:
//! - Still images (`still`)
//! - Video files (feature: ingest-ffmpeg)
//! - Live cameras, found by a bounded index/backend search (`camera`)
//! - Single captures, standalone or repeated as a pseudo-stream (`snapshot`)
//! - Synthetic `stub://` sources (testing, demos)
//!
//! A source MUST:
//! - Report `EndOfStream` after the last frame of a finite input
//! - Release its device/file handle on `close()`, and tolerate repeated `close()`
//! - Never hand out a frame after it has been closed

pub mod camera;
#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod snapshot;
pub mod still;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::StreamError;
use crate::frame::Frame;

pub use camera::{
    open_camera, CameraAttempt, CameraConfig, CameraDriver, CaptureBackend, DeviceCameraDriver,
    SyntheticCameraDriver, CAMERA_INDICES, CAPTURE_BACKENDS,
};
pub use snapshot::{SnapshotConfig, SnapshotReader};
pub use still::ImageReader;
pub use synthetic::{SyntheticConfig, SyntheticReader};

/// The input kinds a session can be started with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Image,
    Video,
    Camera,
    SingleCapture,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Image => "image",
            SourceKind::Video => "video",
            SourceKind::Camera => "camera",
            SourceKind::SingleCapture => "single_capture",
        }
    }

    /// Discrete capture sources are throttled by time, everything else by frame count.
    pub fn is_time_sampled(&self) -> bool {
        matches!(self, SourceKind::SingleCapture)
    }
}

impl std::str::FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(SourceKind::Image),
            "video" => Ok(SourceKind::Video),
            "camera" | "webcam" => Ok(SourceKind::Camera),
            "single_capture" | "single-capture" | "snapshot" | "capture" => {
                Ok(SourceKind::SingleCapture)
            }
            other => Err(
                StreamError::InvalidConfig(format!("unknown source kind '{}'", other)).into(),
            ),
        }
    }
}

/// What to open.
#[derive(Clone, Debug)]
pub enum SourceSpec {
    Image { path: PathBuf },
    /// Local video file, or `stub://name?frames=N` for a synthetic clip.
    Video { path: String },
    Camera(CameraConfig),
    Snapshot(SnapshotConfig),
}

impl SourceSpec {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSpec::Image { .. } => SourceKind::Image,
            SourceSpec::Video { .. } => SourceKind::Video,
            SourceSpec::Camera(_) => SourceKind::Camera,
            SourceSpec::Snapshot(_) => SourceKind::SingleCapture,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SourceSpec::Image { path } => format!("image {}", path.display()),
            SourceSpec::Video { path } => format!("video {}", path),
            SourceSpec::Camera(_) => "camera".to_string(),
            SourceSpec::Snapshot(config) => format!("capture {}", config.location),
        }
    }
}

/// Result of a single read.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    EndOfStream,
}

/// A concrete reader behind a `FrameSource`.
pub trait FrameReader {
    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;

    /// Produce the next frame, or `EndOfStream` once a finite input is exhausted.
    fn read_frame(&mut self) -> Result<ReadOutcome>;

    /// Release the underlying device/file handle. Called at most once by `FrameSource`.
    fn release(&mut self) {}
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_read: u64,
    pub source: String,
    pub open: bool,
}

/// An opened input. Owns its reader until `close()`.
pub struct FrameSource {
    kind: SourceKind,
    description: String,
    reader: Option<Box<dyn FrameReader>>,
    frames_read: u64,
}

impl FrameSource {
    pub fn new(kind: SourceKind, reader: Box<dyn FrameReader>) -> Self {
        let description = reader.describe();
        Self {
            kind,
            description,
            reader: Some(reader),
            frames_read: 0,
        }
    }

    /// Open `spec`, running the camera search through `cameras` when needed.
    pub fn open(spec: &SourceSpec, cameras: &mut dyn CameraDriver) -> Result<Self> {
        let reader: Box<dyn FrameReader> = match spec {
            SourceSpec::Image { path } => Box::new(ImageReader::open(path)?),
            SourceSpec::Video { path } => open_video(path)?,
            SourceSpec::Camera(config) => open_camera(cameras, config)?,
            SourceSpec::Snapshot(config) => Box::new(SnapshotReader::open(config.clone())?),
        };
        let source = Self::new(spec.kind(), reader);
        log::info!("FrameSource: opened {}", source.description);
        Ok(source)
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Read one frame. Failures are raised as `StreamError::StreamRead`.
    pub fn read(&mut self) -> Result<ReadOutcome> {
        let frames_read = self.frames_read;
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("frame source {} is closed", self.description))?;
        match reader.read_frame() {
            Ok(ReadOutcome::Frame(frame)) => {
                self.frames_read += 1;
                Ok(ReadOutcome::Frame(frame))
            }
            Ok(ReadOutcome::EndOfStream) => Ok(ReadOutcome::EndOfStream),
            Err(err) => Err(StreamError::StreamRead {
                sequence: frames_read,
                reason: format!("{:#}", err),
            }
            .into()),
        }
    }

    /// Release the reader. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.release();
            log::info!(
                "FrameSource: closed {} after {} frames",
                self.description,
                self.frames_read
            );
        }
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frames_read,
            source: self.description.clone(),
            open: self.is_open(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens `FrameSource`s for the controller.
pub trait SourceFactory {
    fn open(&mut self, spec: &SourceSpec) -> Result<FrameSource>;
}

/// Opens local files and devices.
pub struct LocalSourceFactory {
    cameras: Box<dyn CameraDriver>,
}

impl LocalSourceFactory {
    pub fn new(cameras: Box<dyn CameraDriver>) -> Self {
        Self { cameras }
    }
}

impl Default for LocalSourceFactory {
    fn default() -> Self {
        Self::new(Box::new(DeviceCameraDriver::default()))
    }
}

impl SourceFactory for LocalSourceFactory {
    fn open(&mut self, spec: &SourceSpec) -> Result<FrameSource> {
        FrameSource::open(spec, self.cameras.as_mut())
    }
}

fn open_video(path: &str) -> Result<Box<dyn FrameReader>> {
    if path.starts_with(synthetic::STUB_SCHEME) {
        let config = SyntheticConfig::from_uri(path)?;
        return Ok(Box::new(SyntheticReader::new(config)));
    }
    if path.trim().is_empty() || path.contains("://") {
        return Err(StreamError::SourceUnavailable {
            source: path.to_string(),
            reason: "video input must be a local file path".to_string(),
        }
        .into());
    }
    #[cfg(feature = "ingest-ffmpeg")]
    {
        let reader = file_ffmpeg::FfmpegReader::open_file(path).map_err(|err| {
            StreamError::SourceUnavailable {
                source: path.to_string(),
                reason: format!("{:#}", err),
            }
        })?;
        Ok(Box::new(reader))
    }
    #[cfg(not(feature = "ingest-ffmpeg"))]
    {
        Err(StreamError::SourceUnavailable {
            source: path.to_string(),
            reason: "video decoding requires the ingest-ffmpeg feature".to_string(),
        }
        .into())
    }
}
