//! Inference backend abstraction and factory

use crate::config::{BackendType, ExecutionProvider};
use crate::error::{Result, StickerError};
use crate::models::ModelSpec;
use ndarray::ArrayD;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Session settings shared by all backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendOptions {
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads (0 = auto)
    pub intra_threads: usize,
}

/// Trait for inference backends
///
/// Inputs and outputs are positional f32 tensors in the model's declared order.
pub trait InferenceBackend: Send {
    /// Load the model described by `spec`
    ///
    /// # Errors
    /// - Model loading or validation errors
    /// - Session creation failures
    fn initialize(&mut self, spec: &ModelSpec, options: &BackendOptions) -> Result<Option<Duration>>;

    /// Run one forward pass
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Tensor conversion failures
    /// - Model inference failures
    fn infer(&mut self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;

    /// Short name for logging
    fn name(&self) -> &'static str;
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend of the given type
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    fn create_backend(&self, backend_type: BackendType) -> Result<Box<dyn InferenceBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory over the backends enabled by cargo features
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new())),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(StickerError::invalid_config(format!(
                "Backend '{other}' is not enabled in this build"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

/// Create and initialize a backend for `spec`
pub fn load_backend(
    factory: &dyn BackendFactory,
    backend_type: BackendType,
    spec: &ModelSpec,
    options: &BackendOptions,
) -> Result<Box<dyn InferenceBackend>> {
    let mut backend = factory.create_backend(backend_type)?;
    if let Some(load_time) = backend.initialize(spec, options)? {
        log::info!(
            "Loaded {} with {} backend in {:.0}ms",
            spec.source.display_name(),
            backend.name(),
            load_time.as_secs_f64() * 1000.0
        );
    }
    Ok(backend)
}
