//! Subject detection
//!
//! The pipeline only needs one box: the first detection the model reports.
//! [`YoloDetector`] runs a YOLOv8-style export, decodes its `(cx, cy, w, h,
//! scores…)` rows, applies class-aware NMS and orders survivors by
//! descending confidence, so "first" is the most confident subject.

use crate::config::{BackendType, DetectorConfig};
use crate::error::{Result, StickerError};
use crate::inference::{load_backend, BackendFactory, BackendOptions, InferenceBackend};
use crate::models::{ModelSource, ModelSpec};
use crate::types::BoundingBox;
use crate::utils::preprocessing::{ImagePreprocessor, LetterboxTransform, PreprocessingOptions};
use image::DynamicImage;
use ndarray::{ArrayD, ArrayView2, Axis, Ix3};
use parking_lot::Mutex;
use tracing::{debug, instrument};

/// Upper bound on boxes kept after NMS
const MAX_DETECTIONS: usize = 300;

/// One candidate region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// Maps an image to candidate subject boxes
pub trait Detector: Send + Sync {
    /// All detections, in the order the model reports them
    ///
    /// # Errors
    /// - Model inference or output decoding failures
    fn detect_all(&self, image: &DynamicImage) -> Result<Vec<Detection>>;

    /// First detected box, clamped to the image
    ///
    /// # Errors
    /// - `Prediction` when the model fails or reports nothing
    fn detect(&self, image: &DynamicImage) -> Result<BoundingBox> {
        let detections = self.detect_all(image).map_err(|e| match e {
            StickerError::Prediction(_) => e,
            other => StickerError::prediction(other.details()),
        })?;
        let first = detections
            .first()
            .ok_or_else(|| StickerError::prediction("No objects detected in the image"))?;
        first.bbox.clamp_to(image.width(), image.height())
    }
}

/// YOLOv8-style detector over any inference backend
pub struct YoloDetector {
    backend: Mutex<Box<dyn InferenceBackend>>,
    config: DetectorConfig,
}

impl YoloDetector {
    /// Wrap an initialized backend
    #[must_use]
    pub fn new(backend: Box<dyn InferenceBackend>, config: DetectorConfig) -> Self {
        Self {
            backend: Mutex::new(backend),
            config,
        }
    }

    /// Load the detector model from `config.model_path`
    pub fn load(
        factory: &dyn BackendFactory,
        backend_type: BackendType,
        options: &BackendOptions,
        config: DetectorConfig,
    ) -> Result<Self> {
        let size = config.input_size as usize;
        let spec = ModelSpec::new(ModelSource::External(config.model_path.clone()))
            .with_input_shapes(vec![vec![1, 3, size, size]]);
        let backend = load_backend(factory, backend_type, &spec, options)?;
        Ok(Self::new(backend, config))
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn decode(
        &self,
        output: &ArrayD<f32>,
        transform: &LetterboxTransform,
    ) -> Result<Vec<Detection>> {
        let output = output
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|e| {
                StickerError::prediction(format!("Unexpected detector output rank: {e}"))
            })?;
        let rows = output.index_axis(Axis(0), 0);
        // YOLOv8 exports (channels, anchors); some exporters transpose it
        let rows: ArrayView2<'_, f32> = if rows.nrows() <= rows.ncols() {
            rows
        } else {
            rows.reversed_axes()
        };
        if rows.nrows() < 5 {
            return Err(StickerError::prediction(format!(
                "Detector output has {} channels, expected at least 5",
                rows.nrows()
            )));
        }

        let mut candidates = Vec::new();
        for anchor in rows.axis_iter(Axis(1)) {
            let Some((class_id, confidence)) = anchor
                .iter()
                .skip(4)
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            if confidence < self.config.confidence_threshold {
                continue;
            }

            let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
            let (x_min, y_min) = transform.to_source(cx - w / 2.0, cy - h / 2.0);
            let (x_max, y_max) = transform.to_source(cx + w / 2.0, cy + h / 2.0);
            if let Ok(bbox) = BoundingBox::new(x_min, y_min, x_max, y_max) {
                candidates.push(Detection {
                    bbox,
                    confidence,
                    class_id,
                });
            }
        }

        Ok(non_max_suppression(candidates, self.config.iou_threshold))
    }
}

impl Detector for YoloDetector {
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn detect_all(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let (tensor, transform) = ImagePreprocessor::letterbox(
            image,
            self.config.input_size,
            &PreprocessingOptions::unit_scale(),
        )?;

        let outputs = self.backend.lock().infer(&[tensor.into_dyn()])?;
        let output = outputs
            .first()
            .ok_or_else(|| StickerError::prediction("Detector produced no output"))?;

        let detections = self.decode(output, &transform)?;
        debug!(count = detections.len(), "detections decoded");
        Ok(detections)
    }
}

/// Class-aware greedy NMS; result is sorted by descending confidence
#[must_use]
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
            if kept.len() == MAX_DETECTIONS {
                break;
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockBackend;
    use image::RgbImage;
    use ndarray::{Array3, IxDyn};

    fn det(x: f32, conf: f32, class_id: usize) -> Detection {
        Detection {
            bbox: BoundingBox::new(x, 0.0, x + 10.0, 10.0).unwrap(),
            confidence: conf,
            class_id,
        }
    }

    /// Detector output with one anchor per `(cx, cy, w, h, score)` row, 2 classes
    fn yolo_output(rows: &[(f32, f32, f32, f32, f32)]) -> ArrayD<f32> {
        let mut out = Array3::<f32>::zeros((1, 6, rows.len().max(8)));
        for (i, &(cx, cy, w, h, score)) in rows.iter().enumerate() {
            out[[0, 0, i]] = cx;
            out[[0, 1, i]] = cy;
            out[[0, 2, i]] = w;
            out[[0, 3, i]] = h;
            out[[0, 4, i]] = score;
        }
        out.into_dyn()
    }

    fn detector_with(output: ArrayD<f32>) -> YoloDetector {
        let backend = MockBackend::new(move |_| vec![output.clone()]);
        let config = DetectorConfig {
            input_size: 64,
            ..DetectorConfig::default()
        };
        YoloDetector::new(Box::new(backend), config)
    }

    fn image(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(w, h))
    }

    #[test]
    fn test_nms_suppresses_overlaps_per_class() {
        let kept = non_max_suppression(
            vec![det(0.0, 0.6, 0), det(1.0, 0.9, 0), det(1.0, 0.8, 1), det(50.0, 0.5, 0)],
            0.7,
        );
        let confidences: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.8, 0.5]);
    }

    #[test]
    fn test_detect_returns_most_confident_box_in_source_space() {
        // 128x64 image letterboxed to 64: scale 0.5, pad_y 16
        let output = yolo_output(&[(16.0, 32.0, 8.0, 8.0, 0.4), (40.0, 32.0, 16.0, 16.0, 0.9)]);
        let detector = detector_with(output);
        let bbox = detector.detect(&image(128, 64)).unwrap();

        assert!((bbox.x_min - 64.0).abs() < 1e-3);
        assert!((bbox.x_max - 96.0).abs() < 1e-3);
        assert!((bbox.y_min - 16.0).abs() < 1e-3);
        assert!((bbox.y_max - 48.0).abs() < 1e-3);
    }

    #[test]
    fn test_zero_detections_is_prediction_error() {
        let detector = detector_with(yolo_output(&[(10.0, 10.0, 4.0, 4.0, 0.1)]));
        let err = detector.detect(&image(64, 64)).unwrap_err();
        assert!(matches!(err, StickerError::Prediction(_)));
    }

    #[test]
    fn test_backend_failure_is_prediction_error() {
        let detector = YoloDetector::new(
            Box::new(MockBackend::new_failing_inference()),
            DetectorConfig {
                input_size: 64,
                ..DetectorConfig::default()
            },
        );
        let err = detector.detect(&image(32, 32)).unwrap_err();
        assert!(matches!(err, StickerError::Prediction(_)));
    }

    #[test]
    fn test_box_is_clamped_to_image() {
        let detector = detector_with(yolo_output(&[(60.0, 32.0, 20.0, 80.0, 0.95)]));
        let bbox = detector.detect(&image(64, 64)).unwrap();
        assert!(bbox.x_max <= 64.0);
        assert!(bbox.y_min >= 0.0);
        assert!(bbox.y_max <= 64.0);
    }

    #[test]
    fn test_bad_output_rank_is_rejected() {
        let detector = detector_with(ArrayD::<f32>::zeros(IxDyn(&[1, 6])));
        assert!(matches!(
            detector.detect(&image(16, 16)),
            Err(StickerError::Prediction(_))
        ));
    }
}
