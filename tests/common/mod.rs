//! Shared fixtures: a local image host and in-memory pipeline collaborators
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{http::header, response::IntoResponse, routing::get, Router};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use serde_json::Value;
use sticker_forge::{
    detector::Detection,
    server::{build_router, AppState},
    BoundingBox, Detector, ObjectStore, Result, SegmentationSession, Segmenter, ServiceConfig,
    SoftMask, StickerError, StickerProcessor,
};
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const IMAGE_SIZE: u32 = 96;
pub const CIRCLE_RADIUS: f32 = 24.0;
pub const BUCKET: &str = "test-bucket";
/// How long `/slow.jpg` stalls before answering
pub const SLOW_RESPONSE: Duration = Duration::from_secs(3);

/// Red circle centred on a blue square, JPEG encoded
pub fn circle_jpeg() -> Vec<u8> {
    let c = IMAGE_SIZE as f32 / 2.0;
    let img = RgbImage::from_fn(IMAGE_SIZE, IMAGE_SIZE, |x, y| {
        if (x as f32 - c).hypot(y as f32 - c) <= CIRCLE_RADIUS {
            Rgb([220, 30, 30])
        } else {
            Rgb([20, 40, 200])
        }
    });
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut bytes, ImageFormat::Jpeg)
        .unwrap();
    bytes.into_inner()
}

/// The box a perfect detector would report for the circle
pub fn circle_box() -> BoundingBox {
    let c = IMAGE_SIZE as f32 / 2.0;
    BoundingBox::new(
        c - CIRCLE_RADIUS,
        c - CIRCLE_RADIUS,
        c + CIRCLE_RADIUS,
        c + CIRCLE_RADIUS,
    )
    .unwrap()
}

async fn jpeg_response() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/jpeg")], circle_jpeg())
}

/// Serve fixtures on an ephemeral port; returns the base URL
///
/// - `/circle.jpg` and `/photo`: the circle JPEG
/// - `/broken.png`: bytes that do not decode
/// - `/slow.jpg`: the circle JPEG after [`SLOW_RESPONSE`]
/// - anything else: 404
pub async fn spawn_image_host() -> String {
    let app = Router::new()
        .route("/circle.jpg", get(jpeg_response))
        .route("/photo", get(jpeg_response))
        .route("/broken.png", get(|| async { "definitely not a png" }))
        .route(
            "/slow.jpg",
            get(|| async {
                tokio::time::sleep(SLOW_RESPONSE).await;
                jpeg_response().await
            }),
        );
    format!("http://{}", spawn(app).await)
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Detector returning a fixed list of detections
#[derive(Default)]
pub struct MockDetector {
    pub detections: Vec<Detection>,
    pub calls: AtomicUsize,
}

impl MockDetector {
    pub fn returning(bbox: BoundingBox) -> Self {
        Self {
            detections: vec![Detection {
                bbox,
                confidence: 0.9,
                class_id: 0,
            }],
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for MockDetector {
    fn detect_all(&self, _image: &DynamicImage) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detections.clone())
    }
}

/// Segmenter that fills the disk inscribed in the prompted box
#[derive(Default)]
pub struct DiskSegmenter {
    pub sessions: AtomicUsize,
}

impl DiskSegmenter {
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

struct DiskSession {
    width: u32,
    height: u32,
}

impl SegmentationSession for DiskSession {
    fn query(&mut self, bbox: &BoundingBox) -> Result<SoftMask> {
        let cx = (bbox.x_min + bbox.x_max) / 2.0;
        let cy = (bbox.y_min + bbox.y_max) / 2.0;
        let r = bbox.width().min(bbox.height()) / 2.0;
        let data = (0..self.width * self.height)
            .map(|i| {
                let (x, y) = ((i % self.width) as f32, (i / self.width) as f32);
                if (x - cx).hypot(y - cy) <= r {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        SoftMask::new(data, self.width, self.height)
    }
}

impl Segmenter for DiskSegmenter {
    fn session<'a>(&'a self, image: &DynamicImage) -> Result<Box<dyn SegmentationSession + 'a>> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(DiskSession {
            width: image.width(),
            height: image.height(),
        }))
    }
}

/// One recorded upload
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Object store keeping uploads in memory
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<Vec<StoredObject>>,
    pub fail_uploads: bool,
}

impl MemoryStore {
    pub fn failing() -> Self {
        Self {
            objects: Mutex::new(Vec::new()),
            fail_uploads: true,
        }
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<()> {
        if self.fail_uploads {
            return Err(StickerError::upload("Access Denied"));
        }
        let bytes = std::fs::read(local_path)
            .map_err(|e| StickerError::upload(format!("The file was not found: {e}")))?;
        self.objects.lock().push(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            bytes,
        });
        Ok(())
    }

    async fn presign(&self, bucket: &str, key: &str) -> Result<String> {
        Ok(format!("https://{bucket}.s3.test/{key}?X-Amz-Expires=3600"))
    }
}

/// Everything a pipeline test needs, wired together
pub struct Harness {
    pub work_dir: TempDir,
    pub detector: Arc<MockDetector>,
    pub segmenter: Arc<DiskSegmenter>,
    pub store: Arc<MemoryStore>,
    pub processor: Arc<StickerProcessor>,
}

impl Harness {
    pub fn new(detector: MockDetector, store: MemoryStore) -> Self {
        let work_dir = TempDir::new().unwrap();
        let config = ServiceConfig::builder()
            .work_dir(work_dir.path())
            .bucket(BUCKET)
            .http_timeout_secs(5)
            .build()
            .unwrap();

        let detector = Arc::new(detector);
        let segmenter = Arc::new(DiskSegmenter::default());
        let store = Arc::new(store);
        let processor = StickerProcessor::new(
            config,
            detector.clone(),
            segmenter.clone(),
            store.clone(),
        )
        .unwrap();

        Self {
            work_dir,
            detector,
            segmenter,
            store,
            processor: Arc::new(processor),
        }
    }

    pub fn with_circle() -> Self {
        Self::new(MockDetector::returning(circle_box()), MemoryStore::default())
    }

    /// Start the HTTP API for this harness; returns the base URL
    pub async fn serve(&self) -> String {
        let app = build_router(AppState::new(self.processor.clone()));
        format!("http://{}", spawn(app).await)
    }

    /// Files left behind in the working directories
    pub fn leftover_files(&self) -> Vec<std::path::PathBuf> {
        ["img", "sticker", "bg_removed"]
            .iter()
            .map(|d| self.work_dir.path().join(d))
            .filter(|d| d.is_dir())
            .flat_map(|d| std::fs::read_dir(d).unwrap())
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}

/// POST a JSON body and parse the JSON answer
pub async fn post_json(url: &str, body: &Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(body).unwrap())
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let bytes = response.bytes().await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}
