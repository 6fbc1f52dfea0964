//! Promptable segmentation
//!
//! Segmentation is split into two steps. [`Segmenter::session`] computes the
//! image context (for SAM, the encoder embedding) and hands back a session
//! that owns it; [`SegmentationSession::query`] decodes a box prompt against
//! that owned context. A box can therefore never be decoded against another
//! request's image, even when the segmenter is shared across requests.

use crate::config::{BackendType, SegmenterConfig};
use crate::error::{Result, StickerError};
use crate::inference::{load_backend, BackendFactory, BackendOptions, InferenceBackend};
use crate::models::{ModelSource, ModelSpec};
use crate::types::{BoundingBox, SoftMask};
use crate::utils::preprocessing::{ImagePreprocessor, PreprocessingOptions, ResizeTransform};
use image::DynamicImage;
use ndarray::{arr1, Array2, Array3, Array4, ArrayD, Axis, Ix4};
use parking_lot::Mutex;
use tracing::{debug, instrument};

/// Side of the decoder's low-resolution mask prompt
const MASK_INPUT_SIZE: usize = 256;

/// Point labels marking the top-left and bottom-right box corners
const BOX_CORNER_LABELS: [f32; 2] = [2.0, 3.0];

/// A segmentation context bound to one image
pub trait SegmentationSession: Send {
    /// Decode one box prompt into a soft mask at the image's resolution
    ///
    /// # Errors
    /// - `Segmentation` when decoding fails or the mask shape is wrong
    fn query(&mut self, bbox: &BoundingBox) -> Result<SoftMask>;
}

/// Maps an image and a box prompt to a soft mask
pub trait Segmenter: Send + Sync {
    /// Compute the image context and return a session owning it
    ///
    /// # Errors
    /// - `Segmentation` when the encoder fails
    fn session<'a>(&'a self, image: &DynamicImage) -> Result<Box<dyn SegmentationSession + 'a>>;

    /// One-shot segmentation with a single box prompt
    fn segment(&self, image: &DynamicImage, bbox: &BoundingBox) -> Result<SoftMask> {
        self.session(image)?.query(bbox)
    }
}

/// Segment-anything style encoder/decoder pair
pub struct SamSegmenter {
    encoder: Mutex<Box<dyn InferenceBackend>>,
    decoder: Mutex<Box<dyn InferenceBackend>>,
    config: SegmenterConfig,
}

impl SamSegmenter {
    /// Wrap initialized encoder and decoder backends
    #[must_use]
    pub fn new(
        encoder: Box<dyn InferenceBackend>,
        decoder: Box<dyn InferenceBackend>,
        config: SegmenterConfig,
    ) -> Self {
        Self {
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            config,
        }
    }

    /// Load both models from the configured paths
    pub fn load(
        factory: &dyn BackendFactory,
        backend_type: BackendType,
        options: &BackendOptions,
        config: SegmenterConfig,
    ) -> Result<Self> {
        let size = config.input_size as usize;
        let embed = size / 16;

        let encoder_spec = ModelSpec::new(ModelSource::External(config.encoder_path.clone()))
            .with_input_shapes(vec![vec![1, 3, size, size]]);
        let decoder_spec = ModelSpec::new(ModelSource::External(config.decoder_path.clone()))
            .with_input_shapes(vec![
                vec![1, 256, embed, embed],
                vec![1, 2, 2],
                vec![1, 2],
                vec![1, 1, MASK_INPUT_SIZE, MASK_INPUT_SIZE],
                vec![1],
                vec![2],
            ]);

        let encoder = load_backend(factory, backend_type, &encoder_spec, options)?;
        let decoder = load_backend(factory, backend_type, &decoder_spec, options)?;
        Ok(Self::new(encoder, decoder, config))
    }

    #[must_use]
    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }
}

impl Segmenter for SamSegmenter {
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn session<'a>(&'a self, image: &DynamicImage) -> Result<Box<dyn SegmentationSession + 'a>> {
        let (tensor, transform) = ImagePreprocessor::resize_longest_side(
            image,
            self.config.input_size,
            &PreprocessingOptions::imagenet(),
        )
        .map_err(|e| StickerError::segmentation(e.details()))?;

        let mut outputs = self
            .encoder
            .lock()
            .infer(&[tensor.into_dyn()])
            .map_err(|e| StickerError::segmentation(format!("Encoder failed: {}", e.details())))?;
        if outputs.is_empty() {
            return Err(StickerError::segmentation("Encoder produced no embedding"));
        }
        let embeddings = outputs.swap_remove(0);
        debug!(shape = ?embeddings.shape(), "image embedding computed");

        Ok(Box::new(SamSession {
            decoder: &self.decoder,
            embeddings,
            transform,
            width: image.width(),
            height: image.height(),
        }))
    }
}

/// Image embedding plus the geometry needed to decode prompts against it
struct SamSession<'a> {
    decoder: &'a Mutex<Box<dyn InferenceBackend>>,
    embeddings: ArrayD<f32>,
    transform: ResizeTransform,
    width: u32,
    height: u32,
}

impl SamSession<'_> {
    fn decoder_inputs(&self, bbox: &BoundingBox) -> Result<Vec<ArrayD<f32>>> {
        let (x0, y0) = self.transform.to_resized(bbox.x_min, bbox.y_min);
        let (x1, y1) = self.transform.to_resized(bbox.x_max, bbox.y_max);

        let point_coords = Array3::from_shape_vec((1, 2, 2), vec![x0, y0, x1, y1])
            .map_err(|e| StickerError::segmentation(format!("Invalid box prompt: {e}")))?;
        let point_labels = Array2::from_shape_vec((1, 2), BOX_CORNER_LABELS.to_vec())
            .map_err(|e| StickerError::segmentation(format!("Invalid box labels: {e}")))?;
        let mask_input = Array4::<f32>::zeros((1, 1, MASK_INPUT_SIZE, MASK_INPUT_SIZE));
        let has_mask_input = arr1(&[0.0f32]);
        let orig_im_size = arr1(&[self.height as f32, self.width as f32]);

        Ok(vec![
            self.embeddings.clone(),
            point_coords.into_dyn(),
            point_labels.into_dyn(),
            mask_input.into_dyn(),
            has_mask_input.into_dyn(),
            orig_im_size.into_dyn(),
        ])
    }

    /// Pick the mask logits at image resolution from the decoder outputs
    fn select_mask(&self, outputs: &[ArrayD<f32>]) -> Result<SoftMask> {
        let (w, h) = (self.width as usize, self.height as usize);
        let masks = outputs
            .iter()
            .filter_map(|o| o.view().into_dimensionality::<Ix4>().ok())
            .find(|m| m.shape()[2] == h && m.shape()[3] == w)
            .ok_or_else(|| {
                StickerError::segmentation(format!(
                    "Decoder produced no {w}x{h} mask (output shapes {:?})",
                    outputs.iter().map(ArrayD::shape).collect::<Vec<_>>()
                ))
            })?;

        // Multi-mask exports: take the candidate with the best predicted IoU
        let candidates = masks.shape()[1];
        let best = if candidates > 1 {
            outputs
                .iter()
                .find(|o| o.ndim() == 2 && o.shape()[1] == candidates)
                .and_then(|scores| {
                    scores
                        .iter()
                        .enumerate()
                        .max_by(|a, b| a.1.total_cmp(b.1))
                        .map(|(i, _)| i)
                })
                .unwrap_or(0)
        } else {
            0
        };

        let logits = masks.index_axis(Axis(0), 0);
        let logits = logits.index_axis(Axis(0), best);
        let probabilities = logits.mapv(sigmoid);
        SoftMask::from_array(probabilities.view())
            .map_err(|e| StickerError::segmentation(e.details()))
    }
}

impl SegmentationSession for SamSession<'_> {
    fn query(&mut self, bbox: &BoundingBox) -> Result<SoftMask> {
        let inputs = self.decoder_inputs(bbox)?;
        let outputs = self
            .decoder
            .lock()
            .infer(&inputs)
            .map_err(|e| StickerError::segmentation(format!("Decoder failed: {}", e.details())))?;
        self.select_mask(&outputs)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
