//! YOLO stream detection core
//!
//! Pulls frames from a still image, a video file, a live camera, or a single
//! capture, throttles them, runs an object detector on the selected frames and
//! returns annotated images with a structured summary.
//!
//! # Architecture
//!
//! One `StreamController` drives one session at a time through a single-threaded
//! loop: read a frame, ask the sampler, infer, render. Each tick finishes
//! (including its inference) before the next frame is read.
//!
//! The controller guarantees:
//!
//! 1. **Owned resources**: the frame source is open exactly while the controller is active.
//! 2. **Single model**: the registry keeps at most one loaded model, replaced on variant change.
//! 3. **Isolated failures**: a failed inference is reported for its frame only; read
//!    failures and end of stream end the session and release the source.
//! 4. **Cooperative stop**: stop requests are honored between ticks, never mid-inference.
//!
//! # Module Structure
//!
//! - `ingest`: `FrameSource` and its readers (still, video, camera, capture, synthetic)
//! - `detect`: model variants, `DetectorHandle`, `ModelRegistry`, backends
//! - `schedule`: `SampleScheduler` and the `Clock` abstraction
//! - `render`: `ResultRenderer` and `DetectionSummary`
//! - `stream`: `StreamController`, `StreamSession`, `StopHandle`
//! - `config`: file + environment configuration

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod render;
pub mod schedule;
pub mod stream;

pub use config::AppConfig;
pub use detect::{
    BackendKind, BoundingBox, Detection, DetectionResult, DetectorBackend, DetectorHandle,
    ModelConfig, ModelLoader, ModelRegistry, ModelVariant,
};
pub use error::StreamError;
pub use frame::Frame;
pub use ingest::{
    FrameReader, FrameSource, LocalSourceFactory, ReadOutcome, SourceFactory, SourceKind,
    SourceSpec,
};
pub use render::{DetectionSummary, RenderedFrame, ResultRenderer};
pub use schedule::{Clock, ManualClock, SampleScheduler, SystemClock};
pub use stream::{
    RunReport, StopHandle, StreamConfig, StreamController, StreamSession, StreamState,
    TickOutcome,
};

/// Build a controller from loaded configuration.
pub fn controller_from_config(cfg: &AppConfig) -> anyhow::Result<StreamController> {
    let registry = ModelRegistry::new(cfg.model_loader()?);
    let sources = LocalSourceFactory::new(cfg.camera_driver());
    Ok(StreamController::new(
        registry,
        Box::new(sources),
        cfg.renderer()?,
    ))
}
