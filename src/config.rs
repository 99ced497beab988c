use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{loader_for, BackendKind, ModelConfig, ModelLoader, ModelVariant};
use crate::error::StreamError;
use crate::ingest::{
    CameraConfig, CameraDriver, DeviceCameraDriver, SnapshotConfig, SourceKind, SourceSpec,
    SyntheticCameraDriver,
};
use crate::render::{ResultRenderer, DEFAULT_THICKNESS};
use crate::schedule::{DEFAULT_MIN_INTERVAL, DEFAULT_POLL, DEFAULT_STRIDE};
use crate::stream::StreamConfig;

pub const CONFIG_ENV: &str = "YOLO_STREAM_CONFIG";

const DEFAULT_WEIGHTS_DIR: &str = "weights";
const DEFAULT_SOURCE_PATH: &str = "stub://demo?frames=100";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    model: Option<ModelConfigFile>,
    source: Option<SourceConfigFile>,
    sampling: Option<SamplingConfigFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    variant: Option<String>,
    confidence: Option<f32>,
    iou: Option<f32>,
    weights_dir: Option<PathBuf>,
    backend: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    kind: Option<String>,
    path: Option<String>,
    camera_driver: Option<String>,
    repeat: Option<bool>,
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SamplingConfigFile {
    stride: Option<u64>,
    min_interval_ms: Option<u64>,
    poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RenderConfigFile {
    font_path: Option<PathBuf>,
    thickness: Option<u32>,
}

/// Which camera driver runs the device search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CameraDriverKind {
    #[default]
    Device,
    /// Always answers at index 0 with synthetic frames.
    Synthetic,
}

impl std::str::FromStr for CameraDriverKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "device" => Ok(CameraDriverKind::Device),
            "synthetic" | "stub" => Ok(CameraDriverKind::Synthetic),
            other => Err(
                StreamError::InvalidConfig(format!("unknown camera driver '{}'", other)).into(),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub backend: BackendKind,
    pub weights_dir: PathBuf,
    pub source: SourceSettings,
    pub sampling: SamplingSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// Image/video path or capture location. Unused for cameras.
    pub path: String,
    pub camera_driver: CameraDriverKind,
    /// Repeat a single capture as a pseudo-stream.
    pub repeat: bool,
    pub camera: CameraConfig,
}

#[derive(Debug, Clone)]
pub struct SamplingSettings {
    pub stride: u64,
    pub min_interval: Duration,
    pub poll: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub font_path: Option<PathBuf>,
    pub thickness: u32,
}

impl AppConfig {
    /// Load from the file named by `YOLO_STREAM_CONFIG` (if set), then the environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => AppConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let model_file = file.model.unwrap_or_default();
        let source_file = file.source.unwrap_or_default();
        let sampling_file = file.sampling.unwrap_or_default();
        let render_file = file.render.unwrap_or_default();

        let defaults = ModelConfig::default();
        let model = ModelConfig {
            variant: match model_file.variant.as_deref() {
                Some(variant) => variant.parse()?,
                None => ModelVariant::default(),
            },
            confidence: model_file.confidence.unwrap_or(defaults.confidence),
            iou: model_file.iou.unwrap_or(defaults.iou),
            device: defaults.device,
        };
        let backend = match model_file.backend.as_deref() {
            Some(backend) => backend.parse()?,
            None => BackendKind::default(),
        };

        let camera_defaults = CameraConfig::default();
        let source = SourceSettings {
            kind: match source_file.kind.as_deref() {
                Some(kind) => kind.parse()?,
                None => SourceKind::Video,
            },
            path: source_file
                .path
                .unwrap_or_else(|| DEFAULT_SOURCE_PATH.to_string()),
            camera_driver: match source_file.camera_driver.as_deref() {
                Some(driver) => driver.parse()?,
                None => CameraDriverKind::default(),
            },
            repeat: source_file.repeat.unwrap_or(false),
            camera: CameraConfig {
                device: source_file.device.unwrap_or(camera_defaults.device),
                width: source_file.width.unwrap_or(camera_defaults.width),
                height: source_file.height.unwrap_or(camera_defaults.height),
                target_fps: source_file.target_fps.unwrap_or(camera_defaults.target_fps),
            },
        };

        let sampling = SamplingSettings {
            stride: sampling_file.stride.unwrap_or(DEFAULT_STRIDE),
            min_interval: sampling_file
                .min_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MIN_INTERVAL),
            poll: sampling_file
                .poll_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL),
        };

        Ok(Self {
            model,
            backend,
            weights_dir: model_file
                .weights_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WEIGHTS_DIR)),
            source,
            sampling,
            render: RenderSettings {
                font_path: render_file.font_path,
                thickness: render_file.thickness.unwrap_or(DEFAULT_THICKNESS),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(variant) = env_value("YOLO_STREAM_VARIANT") {
            self.model.variant = variant.parse()?;
        }
        if let Some(confidence) = env_value("YOLO_STREAM_CONFIDENCE") {
            self.model.confidence = parse_env("YOLO_STREAM_CONFIDENCE", &confidence)?;
        }
        if let Some(iou) = env_value("YOLO_STREAM_IOU") {
            self.model.iou = parse_env("YOLO_STREAM_IOU", &iou)?;
        }
        if let Some(dir) = env_value("YOLO_STREAM_WEIGHTS_DIR") {
            self.weights_dir = PathBuf::from(dir);
        }
        if let Some(source) = env_value("YOLO_STREAM_SOURCE") {
            self.source.path = source;
        }
        if let Some(stride) = env_value("YOLO_STREAM_STRIDE") {
            self.sampling.stride = parse_env("YOLO_STREAM_STRIDE", &stride)?;
        }
        if let Some(interval) = env_value("YOLO_STREAM_INTERVAL_MS") {
            let ms: u64 = parse_env("YOLO_STREAM_INTERVAL_MS", &interval)?;
            self.sampling.min_interval = Duration::from_millis(ms);
        }
        Ok(())
    }

    /// Check bounds. Called by `load`; call again after applying CLI overrides.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        if self.sampling.stride == 0 {
            return Err(invalid("sampling stride must be >= 1"));
        }
        if self.sampling.min_interval.is_zero() {
            return Err(invalid("sampling interval must be greater than zero"));
        }
        if self.sampling.poll.is_zero() {
            return Err(invalid("sampling poll step must be greater than zero"));
        }
        if self.render.thickness == 0 {
            return Err(invalid("render thickness must be >= 1"));
        }
        if self.source.kind != SourceKind::Camera && self.source.path.trim().is_empty() {
            return Err(invalid(&format!(
                "{} source requires a path",
                self.source.kind.as_str()
            )));
        }
        if self.source.camera.width == 0 || self.source.camera.height == 0 {
            return Err(invalid("camera dimensions must be non-zero"));
        }
        Ok(())
    }

    pub fn source_spec(&self) -> SourceSpec {
        match self.source.kind {
            SourceKind::Image => SourceSpec::Image {
                path: PathBuf::from(&self.source.path),
            },
            SourceKind::Video => SourceSpec::Video {
                path: self.source.path.clone(),
            },
            SourceKind::Camera => SourceSpec::Camera(self.source.camera.clone()),
            SourceKind::SingleCapture => SourceSpec::Snapshot(SnapshotConfig {
                location: self.source.path.clone(),
                repeat: self.source.repeat,
            }),
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            model: self.model,
            source: self.source_spec(),
            stride: self.sampling.stride,
            min_interval: self.sampling.min_interval,
            poll: self.sampling.poll,
        }
    }

    pub fn camera_driver(&self) -> Box<dyn CameraDriver> {
        match self.source.camera_driver {
            CameraDriverKind::Device => Box::new(DeviceCameraDriver),
            CameraDriverKind::Synthetic => Box::new(
                SyntheticCameraDriver::unavailable()
                    .with_camera_at(crate::ingest::CameraAttempt::Index(0)),
            ),
        }
    }

    pub fn model_loader(&self) -> Result<Box<dyn ModelLoader>> {
        loader_for(self.backend, &self.weights_dir)
    }

    pub fn renderer(&self) -> Result<ResultRenderer> {
        let renderer = ResultRenderer::new(self.render.thickness);
        match &self.render.font_path {
            Some(path) => renderer.with_font_file(path),
            None => Ok(renderer),
        }
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| invalid(&format!("{}: {}", path.display(), e)))?
    } else {
        serde_json::from_str(&raw).map_err(|e| invalid(&format!("{}: {}", path.display(), e)))?
    };
    Ok(cfg)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| invalid(&format!("{} has invalid value '{}'", name, value)))
}

fn invalid(message: &str) -> anyhow::Error {
    StreamError::InvalidConfig(message.to_string()).into()
}
