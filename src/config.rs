//! Configuration types for the sticker service
//!
//! [`ServiceConfig`] is the single value injected at startup. It can be built
//! programmatically through [`ServiceConfig::builder`] or loaded from the
//! environment (honouring a `.env` file) with [`ServiceConfig::from_env`].

use crate::error::{Result, StickerError};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl FromStr for ExecutionProvider {
    type Err = StickerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(StickerError::invalid_config(format!(
                "Unknown execution provider '{other}' (expected auto, cpu, cuda or coreml)"
            ))),
        }
    }
}

/// Inference engine used to run the models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendType {
    /// ONNX Runtime (hardware acceleration)
    #[default]
    Onnx,
    /// Tract (pure Rust)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl FromStr for BackendType {
    type Err = StickerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "onnx" | "ort" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(StickerError::invalid_config(format!(
                "Unknown inference backend '{other}' (expected onnx or tract)"
            ))),
        }
    }
}

/// Mask refinement parameters shared by both output policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Soft mask binarisation threshold (`value > threshold` is foreground)
    pub threshold: f32,

    /// Side of the square kernel used to grow the sticker border
    pub border_thickness: u32,

    /// Side of the square kernel used to widen the feather edge band
    pub dilation_kernel_size: u32,

    /// Gaussian sigma applied to the feather edge band
    pub edge_smooth_radius: f32,

    /// Canny hysteresis thresholds
    pub canny_low: f32,
    pub canny_high: f32,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            border_thickness: 10,
            dilation_kernel_size: 10,
            edge_smooth_radius: 2.0,
            canny_low: 100.0,
            canny_high: 200.0,
        }
    }
}

impl RefinementConfig {
    /// Validate refinement parameters
    ///
    /// # Errors
    /// - Threshold outside `(0, 1)`
    /// - Zero-sized kernels
    /// - Non-positive smoothing radius
    /// - Canny low threshold above the high threshold
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(StickerError::config_value_error(
                "mask threshold",
                self.threshold,
                "0-1 exclusive",
                Some(0.5),
            ));
        }
        if self.border_thickness == 0 {
            return Err(StickerError::config_value_error(
                "border thickness",
                self.border_thickness,
                ">= 1",
                Some(10),
            ));
        }
        if self.dilation_kernel_size == 0 {
            return Err(StickerError::config_value_error(
                "dilation kernel size",
                self.dilation_kernel_size,
                ">= 1",
                Some(10),
            ));
        }
        if !(self.edge_smooth_radius > 0.0 && self.edge_smooth_radius.is_finite()) {
            return Err(StickerError::config_value_error(
                "edge smooth radius",
                self.edge_smooth_radius,
                "> 0",
                Some(2.0),
            ));
        }
        if self.canny_low < 0.0 || self.canny_low > self.canny_high {
            return Err(StickerError::invalid_config(format!(
                "Invalid Canny thresholds: low {} must be within 0..={}",
                self.canny_low, self.canny_high
            )));
        }
        Ok(())
    }
}

/// Object detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub model_path: PathBuf,

    /// Square letterbox input size
    pub input_size: u32,

    /// Minimum class score for a candidate
    pub confidence_threshold: f32,

    /// Overlap above which the weaker box is suppressed
    pub iou_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
        }
    }
}

/// Promptable segmenter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    pub encoder_path: PathBuf,
    pub decoder_path: PathBuf,

    /// Longest side of the encoder input
    pub input_size: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            encoder_path: PathBuf::from("models/sam_vit_h_encoder.onnx"),
            decoder_path: PathBuf::from("models/sam_vit_h_decoder.onnx"),
            input_size: 1024,
        }
    }
}

/// Object storage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,

    /// Region override; the provider chain decides when unset
    pub region: Option<String>,

    /// Lifetime of issued retrieval URLs
    pub presign_expiry_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            presign_expiry_secs: 3600,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Root of the `img/`, `sticker/` and `bg_removed/` working directories
    pub work_dir: PathBuf,

    /// Timeout for the reachability probe and the download
    pub http_timeout_secs: u64,

    pub host: String,
    pub port: u16,

    pub backend: BackendType,
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    pub refinement: RefinementConfig,
    pub detector: DetectorConfig,
    pub segmenter: SegmenterConfig,
    pub storage: StorageConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            http_timeout_secs: 5,
            host: "0.0.0.0".to_string(),
            port: 8000,
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            refinement: RefinementConfig::default(),
            detector: DetectorConfig::default(),
            segmenter: SegmenterConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder
    ///
    /// ```rust
    /// use sticker_forge::ServiceConfig;
    ///
    /// let config = ServiceConfig::builder()
    ///     .bucket("stickers")
    ///     .border_thickness(12)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.refinement.border_thickness, 12);
    /// ```
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Load configuration from the process environment
    ///
    /// A `.env` file in the working directory is read first if present.
    /// `S3_BUCKET_NAME` is required; every other variable has a default.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = Self {
            work_dir: env::var("STICKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            host: env::var("SERVER_HOST").unwrap_or(defaults.host),
            port: env_parse("SERVER_PORT", defaults.port)?,
            backend: env_parse("INFERENCE_BACKEND", defaults.backend)?,
            execution_provider: env_parse("EXECUTION_PROVIDER", defaults.execution_provider)?,
            intra_threads: env_parse("INFERENCE_THREADS", defaults.intra_threads)?,
            refinement: RefinementConfig {
                border_thickness: env_parse(
                    "BORDER_THICKNESS",
                    defaults.refinement.border_thickness,
                )?,
                dilation_kernel_size: env_parse(
                    "DILATION_KERNEL_SIZE",
                    defaults.refinement.dilation_kernel_size,
                )?,
                edge_smooth_radius: env_parse(
                    "EDGE_SMOOTH_RADIUS",
                    defaults.refinement.edge_smooth_radius,
                )?,
                ..defaults.refinement
            },
            detector: DetectorConfig {
                model_path: env::var("DETECTOR_MODEL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.detector.model_path),
                ..defaults.detector
            },
            segmenter: SegmenterConfig {
                encoder_path: env::var("SEGMENTER_ENCODER_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.segmenter.encoder_path),
                decoder_path: env::var("SEGMENTER_DECODER_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.segmenter.decoder_path),
                ..defaults.segmenter
            },
            storage: StorageConfig {
                bucket: env::var("S3_BUCKET_NAME").map_err(|_| {
                    StickerError::invalid_config("S3_BUCKET_NAME must be set")
                })?,
                region: env::var("AWS_REGION").ok().filter(|r| !r.trim().is_empty()),
                presign_expiry_secs: env_parse(
                    "PRESIGN_EXPIRY_SECS",
                    defaults.storage.presign_expiry_secs,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<()> {
        self.refinement.validate()?;

        if self.http_timeout_secs == 0 {
            return Err(StickerError::config_value_error(
                "HTTP timeout",
                self.http_timeout_secs,
                ">= 1 second",
                Some(5),
            ));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(StickerError::invalid_config("Storage bucket must not be empty"));
        }
        if self.storage.presign_expiry_secs == 0 {
            return Err(StickerError::config_value_error(
                "presign expiry",
                self.storage.presign_expiry_secs,
                ">= 1 second",
                Some(3600),
            ));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(StickerError::config_value_error(
                "detector input size",
                self.detector.input_size,
                "positive multiple of 32",
                Some(640),
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold)
            || !(0.0..=1.0).contains(&self.detector.iou_threshold)
        {
            return Err(StickerError::invalid_config(
                "Detector thresholds must lie within 0..=1",
            ));
        }
        Ok(())
    }

    /// Local directory that receives downloaded source images
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.work_dir.join("img")
    }

    /// Local directory that receives rendered artefacts for a mode
    #[must_use]
    pub fn output_dir(&self, mode: crate::types::PipelineMode) -> PathBuf {
        self.work_dir.join(mode.output_dir_name())
    }

    /// Socket address string for the HTTP listener
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
            StickerError::invalid_config(format!("Invalid value for {key}: '{raw}' ({e})"))
        }),
        _ => Ok(default),
    }
}

/// Builder for `ServiceConfig`
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    #[must_use]
    pub fn work_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    #[must_use]
    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn refinement(mut self, refinement: RefinementConfig) -> Self {
        self.config.refinement = refinement;
        self
    }

    #[must_use]
    pub fn border_thickness(mut self, thickness: u32) -> Self {
        self.config.refinement.border_thickness = thickness;
        self
    }

    #[must_use]
    pub fn dilation_kernel_size(mut self, size: u32) -> Self {
        self.config.refinement.dilation_kernel_size = size;
        self
    }

    #[must_use]
    pub fn edge_smooth_radius(mut self, radius: f32) -> Self {
        self.config.refinement.edge_smooth_radius = radius;
        self
    }

    #[must_use]
    pub fn detector(mut self, detector: DetectorConfig) -> Self {
        self.config.detector = detector;
        self
    }

    #[must_use]
    pub fn segmenter(mut self, segmenter: SegmenterConfig) -> Self {
        self.config.segmenter = segmenter;
        self
    }

    #[must_use]
    pub fn bucket<S: Into<String>>(mut self, bucket: S) -> Self {
        self.config.storage.bucket = bucket.into();
        self
    }

    #[must_use]
    pub fn region<S: Into<String>>(mut self, region: S) -> Self {
        self.config.storage.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn presign_expiry_secs(mut self, secs: u64) -> Self {
        self.config.storage.presign_expiry_secs = secs;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<ServiceConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
