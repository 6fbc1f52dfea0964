#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Sticker Forge
//!
//! Sticker generation and background removal from a single image URL.
//!
//! A request flows through a fixed pipeline: the image is downloaded, a
//! detector picks the primary subject, a promptable segmenter turns that box
//! into a soft mask, the mask is refined and composited over the source, and
//! the resulting PNG is uploaded to object storage. The caller receives a
//! presigned URL.
//!
//! Two output policies share the pipeline:
//!
//! - **Sticker**: the subject keeps its soft alpha and gains a solid white
//!   border ring of configurable thickness.
//! - **Background removal**: the subject edge is feathered with a blurred
//!   Canny band and the background becomes transparent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sticker_forge::{ServiceConfig, StickerProcessor};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::from_env()?;
//! let store = Arc::new(sticker_forge::services::S3Store::from_config(&config.storage).await);
//! let processor = StickerProcessor::load(config, store)?;
//!
//! let url = processor.generate_sticker("https://example.com/cat.jpg").await?;
//! println!("{url}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA/CoreML providers
//! - `tract` (default): Pure Rust backend
//! - `server` (default): axum HTTP server and the `sticker-server` binary
//! - `s3` (default): S3 object storage
//! - `tracing-json`: JSON log output for the server

pub mod backends;
pub mod compositor;
pub mod config;
pub mod detector;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod refine;
pub mod segmenter;
#[cfg(feature = "server")]
pub mod server;
pub mod services;
#[cfg(feature = "server")]
pub mod tracing_config;
pub mod types;
pub mod utils;

pub use config::{
    BackendType, DetectorConfig, ExecutionProvider, RefinementConfig, SegmenterConfig,
    ServiceConfig, ServiceConfigBuilder, StorageConfig,
};
pub use detector::{Detection, Detector, YoloDetector};
pub use error::{ErrorDetail, Result, StickerError};
pub use inference::{BackendFactory, BackendOptions, DefaultBackendFactory, InferenceBackend};
pub use processor::{PipelineOutput, PipelineStage, StickerProcessor};
pub use segmenter::{SamSegmenter, SegmentationSession, Segmenter};
pub use services::{ImageFetcher, ObjectStore};
pub use types::{BinaryMask, BoundingBox, PipelineMode, ProcessingTimings, SoftMask};
