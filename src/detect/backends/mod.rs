pub mod contrast;

#[cfg(feature = "backend-tract")]
pub mod tract;

use std::path::Path;

use anyhow::Result;

use super::registry::ModelLoader;
use crate::error::StreamError;

pub use contrast::{ContrastBackend, ContrastLoader};

#[cfg(feature = "backend-tract")]
pub use tract::{TractBackend, TractLoader};

/// Which detector implementation loads the models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// Weightless CPU foreground detector.
    #[default]
    Contrast,
    /// YOLO11 ONNX weights through tract (feature: backend-tract).
    Tract,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Contrast => "contrast",
            BackendKind::Tract => "tract",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contrast" | "cpu" => Ok(BackendKind::Contrast),
            "tract" | "onnx" | "yolo" => Ok(BackendKind::Tract),
            other => Err(
                StreamError::InvalidConfig(format!("unknown detector backend '{}'", other)).into(),
            ),
        }
    }
}

/// Build the loader for `kind`. YOLO weights are looked up in `weights_dir`.
pub fn loader_for(kind: BackendKind, weights_dir: &Path) -> Result<Box<dyn ModelLoader>> {
    match kind {
        BackendKind::Contrast => Ok(Box::new(ContrastLoader)),
        #[cfg(feature = "backend-tract")]
        BackendKind::Tract => Ok(Box::new(TractLoader::new(weights_dir))),
        #[cfg(not(feature = "backend-tract"))]
        BackendKind::Tract => Err(StreamError::InvalidConfig(format!(
            "backend tract (weights in {}) requires the backend-tract feature",
            weights_dir.display()
        ))
        .into()),
    }
}
