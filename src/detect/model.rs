use anyhow::Result;

use crate::error::StreamError;

pub const DEFAULT_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_IOU: f32 = 0.7;

/// YOLO11 model sizes, from fastest to most accurate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelVariant {
    #[default]
    Nano,
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 5] = [
        ModelVariant::Nano,
        ModelVariant::Small,
        ModelVariant::Medium,
        ModelVariant::Large,
        ModelVariant::ExtraLarge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Nano => "nano",
            ModelVariant::Small => "small",
            ModelVariant::Medium => "medium",
            ModelVariant::Large => "large",
            ModelVariant::ExtraLarge => "extra_large",
        }
    }

    /// Weight file name inside the weights directory.
    pub fn weights_file(&self) -> &'static str {
        match self {
            ModelVariant::Nano => "yolo11n.onnx",
            ModelVariant::Small => "yolo11s.onnx",
            ModelVariant::Medium => "yolo11m.onnx",
            ModelVariant::Large => "yolo11l.onnx",
            ModelVariant::ExtraLarge => "yolo11x.onnx",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelVariant::Nano => "YOLO11n (Nano)",
            ModelVariant::Small => "YOLO11s (Small)",
            ModelVariant::Medium => "YOLO11m (Medium)",
            ModelVariant::Large => "YOLO11l (Large)",
            ModelVariant::ExtraLarge => "YOLO11x (Extra Large)",
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelVariant {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        let normalized = normalized.trim_end_matches(".onnx").trim_end_matches(".pt");
        match normalized {
            "nano" | "n" | "yolo11n" => Ok(ModelVariant::Nano),
            "small" | "s" | "yolo11s" => Ok(ModelVariant::Small),
            "medium" | "m" | "yolo11m" => Ok(ModelVariant::Medium),
            "large" | "l" | "yolo11l" => Ok(ModelVariant::Large),
            "extra_large" | "extralarge" | "xl" | "x" | "yolo11x" => Ok(ModelVariant::ExtraLarge),
            _ => Err(
                StreamError::InvalidConfig(format!("unknown model variant '{}'", value)).into(),
            ),
        }
    }
}

/// Execution device. Inference always runs on the CPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Device {
    #[default]
    Cpu,
}

/// Model selection and thresholds for one session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelConfig {
    pub variant: ModelVariant,
    pub confidence: f32,
    pub iou: f32,
    pub device: Device,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: ModelVariant::default(),
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
            device: Device::Cpu,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        validate_threshold("confidence", self.confidence)?;
        validate_threshold("iou", self.iou)
    }
}

/// Thresholds must be finite and within [0, 1].
pub fn validate_threshold(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(StreamError::InvalidConfig(format!(
            "{} threshold must be within [0, 1], got {}",
            name, value
        ))
        .into());
    }
    Ok(())
}
