//! Error types for sticker generation and background removal

use crate::types::PipelineMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, StickerError>;

/// Errors raised by any pipeline stage or collaborator
#[derive(Error, Debug)]
pub enum StickerError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Detector failed or produced no usable box
    #[error("Prediction error: {0}")]
    Prediction(String),

    /// Segmenter failed to produce a mask
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Mask refinement or compositing failed
    #[error("Refinement error: {0}")]
    Refinement(String),

    /// Source image could not be fetched
    #[error("Download error: {0}")]
    Download(String),

    /// Rendered artefact could not be stored
    #[error("Upload error: {0}")]
    Upload(String),

    /// Retrieval URL could not be issued
    #[error("URL generation error: {0}")]
    Presign(String),

    /// Local artefact could not be removed
    #[error("Cleanup error: {0}")]
    Cleanup(String),

    /// Source URL failed the reachability probe
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StickerError {
    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new prediction error (detection or decode failure)
    pub fn prediction<S: Into<String>>(msg: S) -> Self {
        Self::Prediction(msg.into())
    }

    /// Create a new segmentation error
    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    /// Create a new refinement error
    pub fn refinement<S: Into<String>>(msg: S) -> Self {
        Self::Refinement(msg.into())
    }

    /// Create a new download error
    pub fn download<S: Into<String>>(msg: S) -> Self {
        Self::Download(msg.into())
    }

    /// Create a new upload error
    pub fn upload<S: Into<String>>(msg: S) -> Self {
        Self::Upload(msg.into())
    }

    /// Create a new presigned URL error
    pub fn presign<S: Into<String>>(msg: S) -> Self {
        Self::Presign(msg.into())
    }

    /// Create a new cleanup error
    pub fn cleanup<S: Into<String>>(msg: S) -> Self {
        Self::Cleanup(msg.into())
    }

    /// Create a new unreachable URL error
    pub fn invalid_url<S: Into<String>>(msg: S) -> Self {
        Self::InvalidUrl(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {operation} '{path_display}': {error}"),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {rec}"),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {parameter}: {value} (valid range: {valid_range}).{recommendation}"
        ))
    }

    /// Wire-level `error_type` for this error in the given pipeline mode
    ///
    /// Refinement failures are named after the mode; errors without a
    /// dedicated wire name fall back to the mode's catch-all type.
    #[must_use]
    pub fn error_type(&self, mode: PipelineMode) -> &'static str {
        match self {
            Self::Prediction(_) => "PredictionError",
            Self::Segmentation(_) => "SegmentationError",
            Self::Refinement(_) => mode.stage_error_type(),
            Self::Download(_) => "Download_Error",
            Self::Upload(_) => "S3_Upload_Error",
            Self::Presign(_) => "URL_Generation_Error",
            Self::Cleanup(_) => "Cleanup_Error",
            Self::InvalidUrl(_) => "invalid_url",
            Self::Io(_)
            | Self::Image(_)
            | Self::Inference(_)
            | Self::Model(_)
            | Self::InvalidConfig(_)
            | Self::Internal(_) => mode.fallback_error_type(),
        }
    }

    /// Human-readable details without the variant prefix
    #[must_use]
    pub fn details(&self) -> String {
        match self {
            Self::Io(e) => e.to_string(),
            Self::Image(e) => e.to_string(),
            Self::Inference(msg)
            | Self::Model(msg)
            | Self::InvalidConfig(msg)
            | Self::Prediction(msg)
            | Self::Segmentation(msg)
            | Self::Refinement(msg)
            | Self::Download(msg)
            | Self::Upload(msg)
            | Self::Presign(msg)
            | Self::Cleanup(msg)
            | Self::InvalidUrl(msg)
            | Self::Internal(msg) => msg.clone(),
        }
    }

    /// Convert into the structured `{error_type, details}` shape
    #[must_use]
    pub fn to_detail(&self, mode: PipelineMode) -> ErrorDetail {
        ErrorDetail {
            error_type: self.error_type(mode).to_string(),
            details: self.details(),
        }
    }
}

/// Structured error payload returned to HTTP clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub error_type: String,
    pub details: String,
}

impl ErrorDetail {
    pub fn new<T: Into<String>, D: Into<String>>(error_type: T, details: D) -> Self {
        Self {
            error_type: error_type.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = StickerError::invalid_config("test config error");
        assert!(matches!(err, StickerError::InvalidConfig(_)));

        let err = StickerError::prediction("no boxes");
        assert!(matches!(err, StickerError::Prediction(_)));
    }

    #[test]
    fn test_error_display() {
        let err = StickerError::download("HTTP 404");
        assert_eq!(err.to_string(), "Download error: HTTP 404");
        assert_eq!(err.details(), "HTTP 404");
    }

    #[test]
    fn test_error_type_names() {
        let sticker = PipelineMode::Sticker;
        let bg = PipelineMode::BackgroundRemoval;

        assert_eq!(StickerError::prediction("x").error_type(sticker), "PredictionError");
        assert_eq!(StickerError::segmentation("x").error_type(bg), "SegmentationError");
        assert_eq!(StickerError::download("x").error_type(bg), "Download_Error");
        assert_eq!(StickerError::upload("x").error_type(bg), "S3_Upload_Error");
        assert_eq!(StickerError::presign("x").error_type(bg), "URL_Generation_Error");
        assert_eq!(StickerError::cleanup("x").error_type(bg), "Cleanup_Error");
        assert_eq!(StickerError::invalid_url("x").error_type(sticker), "invalid_url");
    }

    #[test]
    fn test_refinement_error_is_named_after_mode() {
        let err = StickerError::refinement("shape mismatch");
        assert_eq!(err.error_type(PipelineMode::Sticker), "Sticker Generation Error");
        assert_eq!(
            err.error_type(PipelineMode::BackgroundRemoval),
            "Background Removal Error"
        );
    }

    #[test]
    fn test_unclassified_errors_use_mode_fallback() {
        let err = StickerError::internal("worker panicked");
        assert_eq!(err.error_type(PipelineMode::Sticker), "StickerGenerationError");
        assert_eq!(
            err.error_type(PipelineMode::BackgroundRemoval),
            "BackgroundRemovalError"
        );

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StickerError::file_io_error("write", Path::new("/tmp/out.png"), &io);
        assert_eq!(err.error_type(PipelineMode::Sticker), "StickerGenerationError");
        assert!(err.details().contains("/tmp/out.png"));
    }

    #[test]
    fn test_detail_serialization() {
        let detail = StickerError::download("timed out").to_detail(PipelineMode::Sticker);
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["error_type"], "Download_Error");
        assert_eq!(json["details"], "timed out");
    }

    #[test]
    fn test_config_value_error() {
        let err = StickerError::config_value_error("border thickness", 0, ">= 1", Some(10));
        let msg = err.to_string();
        assert!(msg.contains("border thickness"));
        assert!(msg.contains("Recommended: 10"));
    }
}
