//! Live camera acquisition.
//!
//! Opening a camera is a bounded search over a fixed order of attempts:
//! 1. Device index 0, then indices 1-3 (`CAMERA_INDICES`)
//! 2. Each platform capture backend in `CAPTURE_BACKENDS`
//!
//! The first attempt that both opens and returns a non-empty first frame wins.
//! That first frame is handed back on the first read, so no frame is lost.
//! When every attempt fails, opening fails with `StreamError::DeviceUnavailable`.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

use super::synthetic::{SyntheticConfig, SyntheticReader};
use super::{FrameReader, ReadOutcome};
use crate::error::StreamError;
use crate::frame::Frame;

/// Device indices tried, in order, before falling back to backends.
pub const CAMERA_INDICES: [u32; 4] = [0, 1, 2, 3];

/// Capture backends tried, in order, after the index search.
pub const CAPTURE_BACKENDS: [CaptureBackend; 2] = [CaptureBackend::V4l2, CaptureBackend::Ffmpeg];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CaptureBackend {
    /// libv4l memory-mapped capture.
    V4l2,
    /// FFmpeg device input (v4l2 / avfoundation / dshow depending on platform).
    Ffmpeg,
}

impl CaptureBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureBackend::V4l2 => "v4l2",
            CaptureBackend::Ffmpeg => "ffmpeg",
        }
    }
}

/// One step of the camera search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CameraAttempt {
    Index(u32),
    Backend(CaptureBackend),
}

impl std::fmt::Display for CameraAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraAttempt::Index(index) => write!(f, "index {}", index),
            CameraAttempt::Backend(backend) => write!(f, "backend {}", backend.as_str()),
        }
    }
}

/// The full, fixed search order.
pub fn search_order() -> Vec<CameraAttempt> {
    CAMERA_INDICES
        .iter()
        .copied()
        .map(CameraAttempt::Index)
        .chain(CAPTURE_BACKENDS.iter().copied().map(CameraAttempt::Backend))
        .collect()
}

/// Configuration for camera capture.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device used by backend attempts (e.g., "/dev/video0").
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Requested frame rate. Devices may ignore it.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_device().to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

#[cfg(target_os = "macos")]
fn default_device() -> &'static str {
    "0"
}

#[cfg(target_os = "windows")]
fn default_device() -> &'static str {
    "video=0"
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_device() -> &'static str {
    "/dev/video0"
}

/// Opens camera readers for individual search attempts.
pub trait CameraDriver {
    fn name(&self) -> &'static str;

    /// Open one attempt. Success only means the device opened; the caller still
    /// checks for a non-empty first frame.
    fn open(&mut self, attempt: CameraAttempt, config: &CameraConfig)
        -> Result<Box<dyn FrameReader>>;
}

/// Run the bounded camera search.
pub fn open_camera(
    driver: &mut dyn CameraDriver,
    config: &CameraConfig,
) -> Result<Box<dyn FrameReader>> {
    let mut tried = Vec::new();
    for attempt in search_order() {
        tried.push(attempt.to_string());
        let mut reader = match driver.open(attempt, config) {
            Ok(reader) => reader,
            Err(err) => {
                log::warn!("camera {} via {} failed to open: {:#}", attempt, driver.name(), err);
                continue;
            }
        };
        match reader.read_frame() {
            Ok(ReadOutcome::Frame(frame)) if !frame.is_empty() => {
                log::info!(
                    "camera {} via {} opened ({}x{})",
                    attempt,
                    driver.name(),
                    frame.width,
                    frame.height
                );
                return Ok(Box::new(PrimedReader {
                    attempt,
                    first: Some(frame),
                    inner: reader,
                }));
            }
            Ok(_) => log::warn!("camera {} opened but returned no frame", attempt),
            Err(err) => log::warn!("camera {} opened but first read failed: {:#}", attempt, err),
        }
        reader.release();
    }
    Err(StreamError::DeviceUnavailable { attempts: tried }.into())
}

/// Reader that replays the search frame before delegating.
struct PrimedReader {
    attempt: CameraAttempt,
    first: Option<Frame>,
    inner: Box<dyn FrameReader>,
}

impl FrameReader for PrimedReader {
    fn describe(&self) -> String {
        format!("camera {} ({})", self.attempt, self.inner.describe())
    }

    fn read_frame(&mut self) -> Result<ReadOutcome> {
        match self.first.take() {
            Some(frame) => Ok(ReadOutcome::Frame(frame)),
            None => self.inner.read_frame(),
        }
    }

    fn release(&mut self) {
        self.first = None;
        self.inner.release();
    }
}

// ----------------------------------------------------------------------------
// Device driver (feature-gated V4L2 / FFmpeg capture)
// ----------------------------------------------------------------------------

/// Driver for real capture devices.
#[derive(Default)]
pub struct DeviceCameraDriver;

impl CameraDriver for DeviceCameraDriver {
    fn name(&self) -> &'static str {
        "device"
    }

    fn open(
        &mut self,
        attempt: CameraAttempt,
        config: &CameraConfig,
    ) -> Result<Box<dyn FrameReader>> {
        match attempt {
            CameraAttempt::Index(index) => open_index(index, config),
            CameraAttempt::Backend(CaptureBackend::V4l2) => open_v4l2(&config.device, config),
            CameraAttempt::Backend(CaptureBackend::Ffmpeg) => {
                open_ffmpeg_device(&config.device, config)
            }
        }
    }
}

fn open_index(index: u32, config: &CameraConfig) -> Result<Box<dyn FrameReader>> {
    if cfg!(feature = "ingest-v4l2") {
        open_v4l2(&format!("/dev/video{}", index), config)
    } else {
        open_ffmpeg_device(&platform_index_device(index), config)
    }
}

#[cfg(target_os = "windows")]
fn platform_index_device(index: u32) -> String {
    format!("video={}", index)
}

#[cfg(target_os = "macos")]
fn platform_index_device(index: u32) -> String {
    index.to_string()
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_index_device(index: u32) -> String {
    format!("/dev/video{}", index)
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(device: &str, config: &CameraConfig) -> Result<Box<dyn FrameReader>> {
    Ok(Box::new(super::v4l2::V4l2Reader::open(device, config)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(device: &str, _config: &CameraConfig) -> Result<Box<dyn FrameReader>> {
    Err(anyhow!(
        "v4l2 capture of {} requires the ingest-v4l2 feature",
        device
    ))
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_ffmpeg_device(device: &str, config: &CameraConfig) -> Result<Box<dyn FrameReader>> {
    Ok(Box::new(super::file_ffmpeg::FfmpegReader::open_device(
        device, config,
    )?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_ffmpeg_device(device: &str, _config: &CameraConfig) -> Result<Box<dyn FrameReader>> {
    Err(anyhow!(
        "ffmpeg capture of {} requires the ingest-ffmpeg feature",
        device
    ))
}

// ----------------------------------------------------------------------------
// Synthetic driver for tests and demos
// ----------------------------------------------------------------------------

/// Camera driver with scripted outcomes per attempt.
///
/// Attempts listed as available open a synthetic camera; attempts listed as blank
/// open but produce no frame; everything else fails to open. Every attempt is
/// recorded in a shared log.
#[derive(Clone, Default)]
pub struct SyntheticCameraDriver {
    available: Vec<CameraAttempt>,
    blank: Vec<CameraAttempt>,
    frames: Option<u64>,
    attempts: Arc<Mutex<Vec<CameraAttempt>>>,
}

impl SyntheticCameraDriver {
    /// No camera anywhere.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// A camera that answers at `attempt`.
    pub fn with_camera_at(mut self, attempt: CameraAttempt) -> Self {
        self.available.push(attempt);
        self
    }

    /// A device that opens at `attempt` but never delivers a frame.
    pub fn with_blank_at(mut self, attempt: CameraAttempt) -> Self {
        self.blank.push(attempt);
        self
    }

    /// Limit opened cameras to `frames` frames.
    pub fn with_frames(mut self, frames: u64) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Shared log of attempted opens, in order.
    pub fn attempt_log(&self) -> Arc<Mutex<Vec<CameraAttempt>>> {
        self.attempts.clone()
    }
}

impl CameraDriver for SyntheticCameraDriver {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(
        &mut self,
        attempt: CameraAttempt,
        config: &CameraConfig,
    ) -> Result<Box<dyn FrameReader>> {
        if let Ok(mut log) = self.attempts.lock() {
            log.push(attempt);
        }
        let frames = if self.available.contains(&attempt) {
            self.frames
        } else if self.blank.contains(&attempt) {
            Some(0)
        } else {
            return Err(anyhow!("no synthetic camera at {}", attempt));
        };
        Ok(Box::new(SyntheticReader::new(SyntheticConfig {
            name: format!("camera-{}", attempt).replace(' ', "-"),
            width: config.width,
            height: config.height,
            frames,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> CameraConfig {
        CameraConfig {
            width: 32,
            height: 24,
            ..CameraConfig::default()
        }
    }

    fn logged(driver: &SyntheticCameraDriver) -> Vec<CameraAttempt> {
        driver.attempt_log().lock().unwrap().clone()
    }

    #[test]
    fn search_order_is_indices_then_backends() {
        assert_eq!(
            search_order(),
            vec![
                CameraAttempt::Index(0),
                CameraAttempt::Index(1),
                CameraAttempt::Index(2),
                CameraAttempt::Index(3),
                CameraAttempt::Backend(CaptureBackend::V4l2),
                CameraAttempt::Backend(CaptureBackend::Ffmpeg),
            ]
        );
    }

    #[test]
    fn stops_at_first_working_index() -> Result<()> {
        let mut driver = SyntheticCameraDriver::unavailable()
            .with_camera_at(CameraAttempt::Index(2))
            .with_camera_at(CameraAttempt::Index(3));
        let mut reader = open_camera(&mut driver, &small_config())?;

        assert_eq!(
            logged(&driver),
            vec![
                CameraAttempt::Index(0),
                CameraAttempt::Index(1),
                CameraAttempt::Index(2)
            ]
        );
        let ReadOutcome::Frame(first) = reader.read_frame()? else {
            panic!("expected search frame");
        };
        assert_eq!(first.sequence, 1);
        let ReadOutcome::Frame(second) = reader.read_frame()? else {
            panic!("expected live frame");
        };
        assert_eq!(second.sequence, 2);
        Ok(())
    }

    #[test]
    fn blank_devices_are_skipped() -> Result<()> {
        let mut driver = SyntheticCameraDriver::unavailable()
            .with_blank_at(CameraAttempt::Index(0))
            .with_camera_at(CameraAttempt::Backend(CaptureBackend::Ffmpeg));
        let reader = open_camera(&mut driver, &small_config())?;

        assert!(reader.describe().contains("backend ffmpeg"));
        assert_eq!(logged(&driver).len(), search_order().len());
        Ok(())
    }

    #[test]
    fn exhausted_search_is_device_unavailable() {
        let mut driver = SyntheticCameraDriver::unavailable();
        let err = open_camera(&mut driver, &small_config())
            .err()
            .expect("no camera");

        match StreamError::classify(&err) {
            Some(StreamError::DeviceUnavailable { attempts }) => {
                assert_eq!(attempts.len(), 6);
                assert_eq!(attempts[0], "index 0");
                assert_eq!(attempts[5], "backend ffmpeg");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(logged(&driver), search_order());
    }
}
