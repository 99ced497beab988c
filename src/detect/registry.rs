use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::handle::DetectorHandle;
use super::model::ModelVariant;
use crate::error::StreamError;

/// Builds detector backends for a variant.
pub trait ModelLoader {
    /// Loader identifier.
    fn name(&self) -> &'static str;

    /// Load the model for `variant`.
    fn load(&mut self, variant: ModelVariant) -> Result<Box<dyn DetectorBackend>>;
}

/// Cache holding at most one loaded model.
///
/// Requesting the cached variant returns the existing handle. Requesting another
/// variant releases the cached handle first, then loads the new one, so two
/// models are never live at once.
pub struct ModelRegistry {
    loader: Box<dyn ModelLoader>,
    current: Option<DetectorHandle>,
    loads: u64,
}

impl ModelRegistry {
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            current: None,
            loads: 0,
        }
    }

    /// Return the handle for `variant`, loading it on a cache miss.
    ///
    /// Failures are raised as `StreamError::ModelLoad`; the cache is left empty.
    pub fn get_or_load(&mut self, variant: ModelVariant) -> Result<&mut DetectorHandle> {
        if self
            .current
            .as_ref()
            .is_some_and(|handle| handle.variant() == variant)
        {
            log::debug!("model {} already loaded", variant.label());
        } else {
            self.release();
            let handle = self.load(variant)?;
            self.current = Some(handle);
        }
        self.current
            .as_mut()
            .ok_or_else(|| anyhow!("model {} missing after load", variant))
    }

    fn load(&mut self, variant: ModelVariant) -> Result<DetectorHandle> {
        let model_load = |err: anyhow::Error| StreamError::ModelLoad {
            variant: variant.to_string(),
            reason: format!("{:#}", err),
        };
        let mut backend = self.loader.load(variant).map_err(model_load)?;
        backend.warm_up().map_err(model_load)?;
        self.loads += 1;
        log::info!(
            "model {} loaded via {} ({})",
            variant.label(),
            self.loader.name(),
            backend.name()
        );
        Ok(DetectorHandle::new(variant, backend))
    }

    /// The cached handle, if any.
    pub fn current(&self) -> Option<&DetectorHandle> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut DetectorHandle> {
        self.current.as_mut()
    }

    /// Drop the cached handle, if any.
    pub fn release(&mut self) {
        self.current = None;
    }

    /// Number of successful loads so far.
    pub fn loads(&self) -> u64 {
        self.loads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::DetectionResult;
    use crate::frame::Frame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NullBackend {
        live: Arc<AtomicUsize>,
    }

    impl DetectorBackend for NullBackend {
        fn name(&self) -> &'static str {
            "null"
        }

        fn detect(&mut self, _frame: &Frame, _c: f32, _i: f32) -> Result<DetectionResult> {
            Ok(DetectionResult::default())
        }
    }

    impl Drop for NullBackend {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct CountingLoader {
        live: Arc<AtomicUsize>,
        missing: Option<ModelVariant>,
    }

    impl ModelLoader for CountingLoader {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn load(&mut self, variant: ModelVariant) -> Result<Box<dyn DetectorBackend>> {
            if self.missing == Some(variant) {
                return Err(anyhow!("{} not found", variant.weights_file()));
            }
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullBackend {
                live: self.live.clone(),
            }))
        }
    }

    fn registry(missing: Option<ModelVariant>) -> (ModelRegistry, Arc<AtomicUsize>) {
        let live = Arc::new(AtomicUsize::new(0));
        let loader = CountingLoader {
            live: live.clone(),
            missing,
        };
        (ModelRegistry::new(Box::new(loader)), live)
    }

    #[test]
    fn same_variant_is_cached() -> Result<()> {
        let (mut registry, live) = registry(None);
        registry.get_or_load(ModelVariant::Nano)?;
        registry.get_or_load(ModelVariant::Nano)?;
        assert_eq!(registry.loads(), 1);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn variant_change_replaces_handle() -> Result<()> {
        let (mut registry, live) = registry(None);
        registry.get_or_load(ModelVariant::Nano)?;
        let handle = registry.get_or_load(ModelVariant::Large)?;
        assert_eq!(handle.variant(), ModelVariant::Large);
        assert_eq!(registry.loads(), 2);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn load_failure_is_model_load_error() -> Result<()> {
        let (mut registry, live) = registry(Some(ModelVariant::Medium));
        registry.get_or_load(ModelVariant::Nano)?;

        let err = registry.get_or_load(ModelVariant::Medium).unwrap_err();
        match StreamError::classify(&err) {
            Some(StreamError::ModelLoad { variant, reason }) => {
                assert_eq!(variant, "medium");
                assert!(reason.contains("yolo11m.onnx"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(registry.current().is_none());
        assert_eq!(live.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
