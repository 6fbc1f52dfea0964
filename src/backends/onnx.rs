//! ONNX Runtime backend
//!
//! Runs detector and segmenter graphs through ONNX Runtime with optional
//! CUDA or `CoreML` acceleration. Sessions need exclusive access per run, so
//! callers share a backend behind a mutex.

use crate::config::ExecutionProvider;
use crate::error::{Result, StickerError};
use crate::inference::{BackendOptions, InferenceBackend};
use crate::models::ModelSpec;
use ndarray::ArrayD;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionInputValue};
use ort::value::Value;

use instant::{Duration, Instant};

/// ONNX Runtime backend
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_name: String,
}

impl OnnxBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn configure_providers(
        builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let mut providers = Vec::new();

        if matches!(provider, ExecutionProvider::Auto | ExecutionProvider::Cuda) {
            let cuda = CUDAExecutionProvider::default();
            if OrtExecutionProvider::is_available(&cuda).unwrap_or(false) {
                log::info!("🚀 CUDA execution provider is available and will be used");
                providers.push(cuda.build());
            } else {
                log::debug!("CUDA execution provider is not available");
            }
        }

        if matches!(provider, ExecutionProvider::Auto | ExecutionProvider::CoreMl) {
            let coreml = CoreMLExecutionProvider::default();
            if OrtExecutionProvider::is_available(&coreml).unwrap_or(false) {
                log::info!("🍎 CoreML execution provider is available and will be used");
                providers.push(coreml.with_subgraphs(true).build());
            } else {
                log::debug!("CoreML execution provider is not available");
            }
        }

        if providers.is_empty() {
            if provider != ExecutionProvider::Cpu {
                log::warn!(
                    "⚠️ No hardware acceleration available for '{provider}', falling back to CPU"
                );
            }
            return Ok(builder);
        }

        builder.with_execution_providers(providers).map_err(|e| {
            StickerError::inference(format!("Failed to set execution providers: {e}"))
        })
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(
        &mut self,
        spec: &ModelSpec,
        options: &BackendOptions,
    ) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }

        let model_load_start = Instant::now();
        let model_data = spec.load_model()?;
        let model_info = spec.get_info()?;

        let builder = Session::builder()
            .map_err(|e| StickerError::inference(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                StickerError::inference(format!("Failed to set optimization level: {e}"))
            })?;

        let builder = Self::configure_providers(builder, options.execution_provider)?;

        let intra_threads = if options.intra_threads > 0 {
            options.intra_threads
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
        };

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| StickerError::inference(format!("Failed to set intra threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                StickerError::model(format!(
                    "Failed to create session from '{}': {e}",
                    model_info.name
                ))
            })?;

        log::debug!("✅ ONNX Runtime session created");
        log::debug!("  - Model: {} ({:.2} MB)", model_info.name, model_info.size_mb());
        log::debug!("  - Requested provider: {}", options.execution_provider);
        log::debug!("  - Intra-op threads: {intra_threads}");
        log::debug!(
            "  - Inputs: {:?}",
            session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>()
        );

        self.session = Some(session);
        self.model_name = model_info.name;

        Ok(Some(model_load_start.elapsed()))
    }

    fn infer(&mut self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| StickerError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!(
            "🚀 Running {} with input shapes {:?}",
            self.model_name,
            inputs.iter().map(ndarray::ArrayBase::shape).collect::<Vec<_>>()
        );

        let values = inputs
            .iter()
            .map(|input| {
                Value::from_array(input.clone())
                    .map(SessionInputValue::from)
                    .map_err(|e| {
                        StickerError::inference(format!("Failed to convert input tensor: {e}"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        // Positional inputs avoid depending on exporter-specific tensor names
        let outputs = session
            .run(values.as_slice())
            .map_err(|e| StickerError::inference(format!("ONNX inference failed: {e}")))?;

        let keys: Vec<String> = outputs.keys().map(ToString::to_string).collect();
        let mut results = Vec::with_capacity(keys.len());
        for key in &keys {
            let tensor = outputs
                .get(key.as_str())
                .ok_or_else(|| StickerError::inference(format!("Output '{key}' not found")))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    StickerError::inference(format!("Failed to extract output '{key}': {e}"))
                })?;
            results.push(tensor.to_owned());
        }

        if results.is_empty() {
            return Err(StickerError::inference("No output tensors found"));
        }

        log::debug!(
            "  ⚡ Inference: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(results)
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_new_backend_is_uninitialized() {
        let backend = OnnxBackend::new();
        assert!(!backend.is_initialized());
        assert_eq!(backend.name(), "onnx");
    }

    #[test]
    fn test_infer_before_initialize_fails() {
        let mut backend = OnnxBackend::new();
        let input = ArrayD::<f32>::zeros(IxDyn(&[1, 3, 8, 8]));
        let err = backend.infer(&[input]).unwrap_err();
        assert!(matches!(err, StickerError::Internal(_)));
    }
}
