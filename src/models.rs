//! Model sources and metadata

use crate::error::{Result, StickerError};
use std::path::PathBuf;

/// Where model bytes come from
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ModelSource {
    /// ONNX file on disk
    External(PathBuf),
    /// ONNX bytes already in memory
    #[serde(skip)]
    Memory { name: String, bytes: Vec<u8> },
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Memory { name, .. } => format!("memory:{name}"),
        }
    }
}

/// Model source plus fixed input shapes
///
/// Shapes are positional, one per model input. Backends that plan ahead of
/// time (Tract) pin them; ONNX Runtime ignores them.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub input_shapes: Vec<Vec<usize>>,
}

impl ModelSpec {
    #[must_use]
    pub fn new(source: ModelSource) -> Self {
        Self {
            source,
            input_shapes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_input_shapes(mut self, shapes: Vec<Vec<usize>>) -> Self {
        self.input_shapes = shapes;
        self
    }

    /// Read the model bytes
    ///
    /// # Errors
    /// - Model file missing or unreadable
    pub fn load_model(&self) -> Result<Vec<u8>> {
        match &self.source {
            ModelSource::External(path) => std::fs::read(path).map_err(|e| {
                StickerError::model(format!(
                    "Failed to read model '{}': {e}. Check the model path configuration",
                    path.display()
                ))
            }),
            ModelSource::Memory { bytes, .. } => Ok(bytes.clone()),
        }
    }

    /// Name and size for logging
    pub fn get_info(&self) -> Result<ModelInfo> {
        let size_bytes = match &self.source {
            ModelSource::External(path) => std::fs::metadata(path)
                .map(|m| m.len() as usize)
                .map_err(|e| {
                    StickerError::model(format!("Model '{}' not found: {e}", path.display()))
                })?,
            ModelSource::Memory { bytes, .. } => bytes.len(),
        };
        Ok(ModelInfo {
            name: self.source.display_name(),
            size_bytes,
        })
    }
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub size_bytes: usize,
}

impl ModelInfo {
    /// Size in MB for display
    #[must_use]
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}
