//! Tract backend
//!
//! Pure Rust inference with no native dependencies. Tract plans the graph
//! ahead of time, so input shapes from the [`ModelSpec`] are pinned before
//! optimisation when they are known.

use crate::error::{Result, StickerError};
use crate::inference::{BackendOptions, InferenceBackend};
use crate::models::ModelSpec;
use ndarray::ArrayD;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Tract backend for running models using pure Rust inference
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
}

impl TractBackend {
    /// Create a new uninitialized Tract backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, spec: &ModelSpec, _options: &BackendOptions) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }

        let model_load_start = Instant::now();
        let model_data = spec.load_model()?;
        let model_info = spec.get_info()?;

        log::info!("🚀 Initializing Tract Backend");
        log::info!("🧠 Model: {} ({:.2} MB)", model_info.name, model_info.size_mb());

        let mut model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| StickerError::model(format!("Failed to load ONNX model: {e}")))?;

        for (index, shape) in spec.input_shapes.iter().enumerate() {
            model = model
                .with_input_fact(index, f32::fact(shape.iter().copied()).into())
                .map_err(|e| {
                    StickerError::model(format!("Failed to pin input {index} to {shape:?}: {e}"))
                })?;
        }

        let model = model
            .into_optimized()
            .map_err(|e| StickerError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| StickerError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {:.2}ms",
            model_load_time.as_millis()
        );

        Ok(Some(model_load_time))
    }

    fn infer(&mut self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| StickerError::internal("Tract model not initialized"))?;

        log::debug!("🔮 Running Tract inference");
        let inference_start = Instant::now();

        let tensors: TVec<TValue> = inputs
            .iter()
            .map(|input| Tensor::from(input.clone()).into())
            .collect();

        let outputs = model
            .run(tensors)
            .map_err(|e| StickerError::inference(format!("Tract inference failed: {e}")))?;

        let mut results = Vec::with_capacity(outputs.len());
        for output in outputs {
            let tensor = output.into_arc_tensor();
            let view = tensor.to_array_view::<f32>().map_err(|e| {
                StickerError::inference(format!("Failed to convert output tensor: {e}"))
            })?;
            results.push(view.to_owned());
        }

        if results.is_empty() {
            return Err(StickerError::inference("No output tensor found"));
        }

        log::debug!(
            "✅ Tract inference completed in {:.2}ms",
            inference_start.elapsed().as_millis()
        );

        Ok(results)
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}
