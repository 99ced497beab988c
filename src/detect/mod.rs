mod backend;
pub mod backends;
pub mod coco;
mod handle;
mod model;
mod nms;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{loader_for, BackendKind, ContrastBackend, ContrastLoader};
pub use handle::DetectorHandle;
pub use model::{
    validate_threshold, Device, ModelConfig, ModelVariant, DEFAULT_CONFIDENCE, DEFAULT_IOU,
};
pub use nms::non_max_suppression;
pub use registry::{ModelLoader, ModelRegistry};
pub use result::{BoundingBox, Detection, DetectionResult};
