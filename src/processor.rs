//! Pipeline orchestrator
//!
//! [`StickerProcessor`] drives one request through
//! `download → detect → segment → refine → composite → upload → presign`.
//! The first failing stage short-circuits the run and its error is returned
//! unchanged. Local files created by the run are removed on every exit path.
//!
//! Model work is CPU bound and runs on tokio's blocking pool; the models
//! themselves are loaded once and shared between requests.

use crate::{
    compositor,
    config::ServiceConfig,
    detector::{Detector, YoloDetector},
    error::{Result, StickerError},
    inference::{BackendFactory, BackendOptions, DefaultBackendFactory},
    refine,
    segmenter::{SamSegmenter, Segmenter},
    services::{workspace, ImageFetcher, ObjectStore, PNG_CONTENT_TYPE},
    types::{PipelineMode, ProcessingTimings, SoftMask},
};
use image::DynamicImage;
use instant::{Duration, Instant};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Where a run currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStage {
    Start,
    Downloaded,
    Detected,
    Refined,
    Composited,
    Uploaded,
    Done,
    /// Terminal failure, carrying the error details
    Failed(String),
}

impl PipelineStage {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Downloaded => write!(f, "downloaded"),
            Self::Detected => write!(f, "detected"),
            Self::Refined => write!(f, "refined"),
            Self::Composited => write!(f, "composited"),
            Self::Uploaded => write!(f, "uploaded"),
            Self::Done => write!(f, "done"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// Presigned retrieval URL
    pub url: String,
    /// Object key the artefact was stored under
    pub key: String,
    pub timings: ProcessingTimings,
}

/// Per-run bookkeeping
struct RunState {
    stage: PipelineStage,
    local_files: Vec<PathBuf>,
    timings: ProcessingTimings,
}

impl RunState {
    fn new() -> Self {
        Self {
            stage: PipelineStage::Start,
            local_files: Vec::new(),
            timings: ProcessingTimings::new(),
        }
    }

    fn advance(&mut self, next: PipelineStage) {
        debug!(from = %self.stage, to = %next, "pipeline stage");
        self.stage = next;
    }
}

/// Runs the sticker and background-removal pipelines
pub struct StickerProcessor {
    detector: Arc<dyn Detector>,
    segmenter: Arc<dyn Segmenter>,
    store: Arc<dyn ObjectStore>,
    fetcher: ImageFetcher,
    config: Arc<ServiceConfig>,
}

impl StickerProcessor {
    /// Assemble a processor from already-loaded collaborators
    ///
    /// # Errors
    /// - `InvalidConfig` when `config` fails validation
    /// - `Internal` when the HTTP client cannot be created
    pub fn new(
        config: ServiceConfig,
        detector: Arc<dyn Detector>,
        segmenter: Arc<dyn Segmenter>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        config.validate()?;
        let fetcher = ImageFetcher::new(Duration::from_secs(config.http_timeout_secs))?;
        Ok(Self {
            detector,
            segmenter,
            store,
            fetcher,
            config: Arc::new(config),
        })
    }

    /// Load the detector and segmenter models named in `config`
    ///
    /// # Errors
    /// - `Model` when a model file is missing or cannot be parsed
    /// - `InvalidConfig` when the configured backend is not compiled in
    pub fn load(config: ServiceConfig, store: Arc<dyn ObjectStore>) -> Result<Self> {
        Self::load_with_factory(config, store, &DefaultBackendFactory)
    }

    /// Like [`StickerProcessor::load`] with a custom backend factory
    pub fn load_with_factory(
        config: ServiceConfig,
        store: Arc<dyn ObjectStore>,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        config.validate()?;
        let available = factory.available_backends();
        if !available.contains(&config.backend) {
            let names: Vec<String> = available.iter().map(ToString::to_string).collect();
            let built = if names.is_empty() { "none".to_string() } else { names.join(", ") };
            return Err(StickerError::invalid_config(format!(
                "Backend '{}' is not available (built with: {built})",
                config.backend
            )));
        }
        debug!(backends = ?available, "inference backends available");
        let options = BackendOptions {
            execution_provider: config.execution_provider,
            intra_threads: config.intra_threads,
        };

        info!(backend = %config.backend, provider = %config.execution_provider, "loading models");
        let load_start = Instant::now();
        let detector =
            YoloDetector::load(factory, config.backend, &options, config.detector.clone())?;
        let segmenter =
            SamSegmenter::load(factory, config.backend, &options, config.segmenter.clone())?;
        info!(elapsed_ms = load_start.elapsed().as_millis() as u64, "models loaded");

        Self::new(config, Arc::new(detector), Arc::new(segmenter), store)
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn fetcher(&self) -> &ImageFetcher {
        &self.fetcher
    }

    /// Sticker pipeline; returns the presigned URL of the rendered PNG
    ///
    /// # Errors
    /// - The first stage error, unchanged
    pub async fn generate_sticker(&self, image_url: &str) -> Result<String> {
        self.run(PipelineMode::Sticker, image_url)
            .await
            .map(|output| output.url)
    }

    /// Background-removal pipeline; returns the presigned URL of the cut-out
    ///
    /// # Errors
    /// - The first stage error, unchanged
    pub async fn remove_background(&self, image_url: &str) -> Result<String> {
        self.run(PipelineMode::BackgroundRemoval, image_url)
            .await
            .map(|output| output.url)
    }

    /// Run one request in `mode`
    ///
    /// # Errors
    /// - The first stage error, unchanged
    #[instrument(skip(self), fields(mode = %mode))]
    pub async fn run(&self, mode: PipelineMode, image_url: &str) -> Result<PipelineOutput> {
        let total_start = Instant::now();
        let stamp = workspace::request_stamp();
        let mut state = RunState::new();

        let result = self.execute(mode, image_url, &stamp, &mut state).await;

        let failures = workspace::delete_local(&state.local_files);
        if !failures.is_empty() {
            debug!(count = failures.len(), "local cleanup incomplete");
        }
        state.timings.total_ms = elapsed_ms(total_start);

        match result {
            Ok((url, key)) => {
                state.advance(PipelineStage::Done);
                info!(key = %key, timings = %state.timings.summary(), "pipeline finished");
                Ok(PipelineOutput {
                    url,
                    key,
                    timings: state.timings,
                })
            },
            Err(err) => {
                let failed_after = state.stage.to_string();
                state.advance(PipelineStage::Failed(err.details()));
                warn!(
                    after = %failed_after,
                    error_type = err.error_type(mode),
                    details = %err.details(),
                    "pipeline failed"
                );
                Err(err)
            },
        }
    }

    async fn execute(
        &self,
        mode: PipelineMode,
        image_url: &str,
        stamp: &str,
        state: &mut RunState,
    ) -> Result<(String, String)> {
        let stage_start = Instant::now();
        let source_path = self
            .fetcher
            .download(image_url, &self.config.download_dir(), stamp)
            .await?;
        state.local_files.push(source_path.clone());
        state.timings.download_ms = elapsed_ms(stage_start);
        state.advance(PipelineStage::Downloaded);

        let stage_start = Instant::now();
        let detector = Arc::clone(&self.detector);
        let (image, bbox) = run_blocking(move || {
            let image = workspace::load_image(&source_path).map_err(|e| {
                StickerError::prediction(format!("Failed to decode image: {}", e.details()))
            })?;
            let bbox = detector.detect(&image)?;
            Ok((image, bbox))
        })
        .await?;
        state.timings.detection_ms = elapsed_ms(stage_start);
        info!(?bbox, "subject detected");
        state.advance(PipelineStage::Detected);

        let stage_start = Instant::now();
        let segmenter = Arc::clone(&self.segmenter);
        let (image, soft) = run_blocking(move || {
            let soft = segmenter.segment(&image, &bbox)?;
            Ok((image, soft))
        })
        .await?;
        state.timings.segmentation_ms = elapsed_ms(stage_start);

        let stage_start = Instant::now();
        let output_path = workspace::output_path(&self.config, mode, stamp);
        let render_path = output_path.clone();
        let config = Arc::clone(&self.config);
        // Registered before rendering so a partial write is still cleaned up
        state.local_files.push(output_path.clone());
        run_blocking(move || render(mode, &image, &soft, &config, &render_path)).await?;
        state.timings.refinement_ms = elapsed_ms(stage_start);
        state.advance(PipelineStage::Refined);
        state.advance(PipelineStage::Composited);

        let stage_start = Instant::now();
        let bucket = &self.config.storage.bucket;
        let key = workspace::object_key(mode, stamp);
        self.store
            .upload(&output_path, bucket, &key, PNG_CONTENT_TYPE)
            .await?;
        state.advance(PipelineStage::Uploaded);

        let url = self.store.presign(bucket, &key).await?;
        state.timings.upload_ms = elapsed_ms(stage_start);
        Ok((url, key))
    }
}

/// Refine, composite and write the PNG for `mode`
///
/// Every failure in here is reported as the mode's refinement error.
pub fn render(
    mode: PipelineMode,
    image: &DynamicImage,
    soft: &SoftMask,
    config: &ServiceConfig,
    output_path: &Path,
) -> Result<()> {
    let rendered = match mode {
        PipelineMode::Sticker => refine::refine_sticker(soft, &config.refinement)
            .and_then(|refined| compositor::compose_sticker(image, &refined)),
        PipelineMode::BackgroundRemoval => refine::refine_feather(soft, &config.refinement)
            .and_then(|refined| compositor::compose_cutout(image, &refined)),
    };

    rendered
        .and_then(|rgba| compositor::save_png(&rgba, output_path))
        .map_err(|e| match e {
            StickerError::Refinement(_) => e,
            other => StickerError::refinement(other.details()),
        })
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| StickerError::internal(format!("Pipeline worker failed: {e}")))?
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendType;
    use crate::types::BoundingBox;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingDetector(AtomicUsize);

    impl Detector for CountingDetector {
        fn detect_all(&self, _image: &DynamicImage) -> Result<Vec<crate::detector::Detection>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct FullSegmenter;

    impl Segmenter for FullSegmenter {
        fn session<'a>(
            &'a self,
            _image: &DynamicImage,
        ) -> Result<Box<dyn crate::segmenter::SegmentationSession + 'a>> {
            Err(StickerError::segmentation("unused"))
        }
    }

    struct NullStore;

    #[async_trait]
    impl ObjectStore for NullStore {
        async fn upload(&self, _: &Path, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn presign(&self, bucket: &str, key: &str) -> Result<String> {
            Ok(format!("https://{bucket}/{key}"))
        }
    }

    fn config(dir: &TempDir) -> ServiceConfig {
        ServiceConfig::builder()
            .work_dir(dir.path())
            .bucket("test-bucket")
            .http_timeout_secs(1)
            .build()
            .unwrap()
    }

    fn disk_mask(size: u32, radius: f32) -> SoftMask {
        let c = size as f32 / 2.0;
        let data = (0..size * size)
            .map(|i| {
                let (x, y) = ((i % size) as f32, (i / size) as f32);
                if (x - c).hypot(y - c) < radius {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        SoftMask::new(data, size, size).unwrap()
    }

    #[test]
    fn test_stage_display_and_terminal() {
        assert_eq!(PipelineStage::Composited.to_string(), "composited");
        assert_eq!(PipelineStage::Failed("boom".into()).to_string(), "failed: boom");
        assert!(PipelineStage::Done.is_terminal());
        assert!(!PipelineStage::Uploaded.is_terminal());
    }

    #[test]
    fn test_render_sticker_writes_png() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(48, 48, Rgb([200, 10, 10])));
        let path = dir.path().join("sticker").join("out.png");

        render(PipelineMode::Sticker, &image, &disk_mask(48, 12.0), &config, &path).unwrap();

        let out = image::open(&path).unwrap().to_rgba8();
        assert_eq!(out.dimensions(), (48, 48));
        assert_eq!(out.get_pixel(24, 24).0, [200, 10, 10, 255]);
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn test_render_size_mismatch_is_stage_error() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let image = DynamicImage::ImageRgb8(RgbImage::new(10, 10));
        let err = render(
            PipelineMode::BackgroundRemoval,
            &image,
            &disk_mask(12, 3.0),
            &config,
            &dir.path().join("x.png"),
        )
        .unwrap_err();
        assert_eq!(
            err.error_type(PipelineMode::BackgroundRemoval),
            "Background Removal Error"
        );
    }

    #[tokio::test]
    async fn test_download_failure_short_circuits() {
        let dir = TempDir::new().unwrap();
        let detector = Arc::new(CountingDetector(AtomicUsize::new(0)));
        let processor = StickerProcessor::new(
            config(&dir),
            detector.clone(),
            Arc::new(FullSegmenter),
            Arc::new(NullStore),
        )
        .unwrap();

        let err = processor
            .generate_sticker("http://127.0.0.1:9/cat.png")
            .await
            .unwrap_err();
        assert_eq!(err.error_type(PipelineMode::Sticker), "Download_Error");
        assert_eq!(detector.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = StickerProcessor::new(
            ServiceConfig::default(),
            Arc::new(CountingDetector(AtomicUsize::new(0))),
            Arc::new(FullSegmenter),
            Arc::new(NullStore),
        );
        assert!(matches!(result, Err(StickerError::InvalidConfig(_))));
    }

    struct NoBackends;

    impl BackendFactory for NoBackends {
        fn create_backend(
            &self,
            backend_type: BackendType,
        ) -> Result<Box<dyn crate::inference::InferenceBackend>> {
            panic!("no backend should be created, asked for {backend_type}");
        }

        fn available_backends(&self) -> Vec<BackendType> {
            Vec::new()
        }
    }

    #[test]
    fn test_load_rejects_unavailable_backend_before_models() {
        let dir = TempDir::new().unwrap();
        let result = StickerProcessor::load_with_factory(
            config(&dir),
            Arc::new(NullStore),
            &NoBackends,
        );
        match result {
            Err(StickerError::InvalidConfig(msg)) => assert!(msg.contains("built with: none")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("load should fail without backends"),
        }
    }

    #[test]
    fn test_full_image_box_renders() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let image = DynamicImage::ImageRgb8(RgbImage::new(16, 16));
        let bbox = BoundingBox::full_image(16, 16);
        let soft = SoftMask::new(vec![1.0; 256], 16, 16).unwrap();
        assert!((bbox.area() - 256.0).abs() < f32::EPSILON);

        render(PipelineMode::BackgroundRemoval, &image, &soft, &config, &dir.path().join("f.png"))
            .unwrap();
    }
}
