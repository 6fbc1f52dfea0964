//! Core data types for the segmentation and compositing pipeline

use crate::error::{Result, StickerError};
use image::{GrayImage, Luma};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// Which output the pipeline renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Subject cut out with a solid white border ring
    Sticker,
    /// Subject on a transparent background with a feathered edge
    BackgroundRemoval,
}

impl PipelineMode {
    /// `error_type` used when refinement or compositing fails
    #[must_use]
    pub fn stage_error_type(self) -> &'static str {
        match self {
            Self::Sticker => "Sticker Generation Error",
            Self::BackgroundRemoval => "Background Removal Error",
        }
    }

    /// `error_type` used when no more specific one applies
    #[must_use]
    pub fn fallback_error_type(self) -> &'static str {
        match self {
            Self::Sticker => "StickerGenerationError",
            Self::BackgroundRemoval => "BackgroundRemovalError",
        }
    }

    /// JSON field carrying the presigned URL on success
    #[must_use]
    pub fn url_field(self) -> &'static str {
        match self {
            Self::Sticker => "sticker_url",
            Self::BackgroundRemoval => "bg_removed_url",
        }
    }

    /// Local working directory and object key prefix for rendered output
    #[must_use]
    pub fn output_dir_name(self) -> &'static str {
        match self {
            Self::Sticker => "sticker",
            Self::BackgroundRemoval => "bg_removed",
        }
    }

    /// File name suffix appended to the timestamp stamp
    #[must_use]
    pub fn artefact_name(self) -> &'static str {
        match self {
            Self::Sticker => "masked_area_sticker.png",
            Self::BackgroundRemoval => "background_removed.png",
        }
    }
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sticker => write!(f, "sticker"),
            Self::BackgroundRemoval => write!(f, "background-removal"),
        }
    }
}

/// Axis-aligned box in absolute pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    /// Create a box, rejecting degenerate or non-finite coordinates
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Result<Self> {
        let finite = [x_min, y_min, x_max, y_max].iter().all(|v| v.is_finite());
        if !finite || x_min >= x_max || y_min >= y_max {
            return Err(StickerError::prediction(format!(
                "Degenerate bounding box ({x_min}, {y_min}, {x_max}, {y_max})"
            )));
        }
        Ok(Self {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }

    /// Box covering the whole image
    #[cfg(test)]
    #[must_use]
    pub(crate) fn full_image(width: u32, height: u32) -> Self {
        Self {
            x_min: 0.0,
            y_min: 0.0,
            x_max: width as f32,
            y_max: height as f32,
        }
    }

    /// Clamp to image bounds; fails if nothing of the box remains inside
    pub fn clamp_to(self, width: u32, height: u32) -> Result<Self> {
        let (w, h) = (width as f32, height as f32);
        Self::new(
            self.x_min.clamp(0.0, w),
            self.y_min.clamp(0.0, h),
            self.x_max.clamp(0.0, w),
            self.y_max.clamp(0.0, h),
        )
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    #[must_use]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union with another box
    #[must_use]
    pub fn iou(&self, other: &Self) -> f32 {
        let ix = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let iy = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Per-pixel foreground probability in `[0, 1]`, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct SoftMask {
    data: Vec<f32>,
    width: u32,
    height: u32,
}

impl SoftMask {
    /// Build a mask, checking that the data matches the dimensions
    ///
    /// Values are clamped into `[0, 1]`; NaN becomes 0.
    pub fn new(data: Vec<f32>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(StickerError::refinement(format!(
                "Mask shape mismatch: {} values for {width}x{height}",
                data.len()
            )));
        }
        let data = data
            .into_iter()
            .map(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) })
            .collect();
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Build from a `(height, width)` array view
    pub fn from_array(array: ArrayView2<'_, f32>) -> Result<Self> {
        let (h, w) = array.dim();
        Self::new(array.iter().copied().collect(), w as u32, h as u32)
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// `value > threshold` becomes 1
    #[must_use]
    pub fn binarize(&self, threshold: f32) -> BinaryMask {
        BinaryMask {
            data: self.data.iter().map(|&v| u8::from(v > threshold)).collect(),
            width: self.width,
            height: self.height,
        }
    }

    /// Alpha channel `trunc(value * 255)`
    #[must_use]
    pub fn to_alpha(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let v = self.data.get(self.index(x, y)).copied().unwrap_or(0.0);
            Luma([(v * 255.0) as u8])
        })
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

/// `{0, 1}` mask, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl BinaryMask {
    /// Build from raw `{0, 1}` values; anything non-zero counts as set
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(StickerError::refinement(format!(
                "Mask shape mismatch: {} values for {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            data: data.into_iter().map(|v| u8::from(v != 0)).collect(),
            width,
            height,
        })
    }

    /// Empty mask of the given size
    #[must_use]
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            data: vec![0; width as usize * height as usize],
            width,
            height,
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width
            && y < self.height
            && self
                .data
                .get(y as usize * self.width as usize + x as usize)
                .is_some_and(|&v| v != 0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|&v| v == 0)
    }

    /// Pixels set in `self` but not in `other`
    pub fn difference(&self, other: &Self) -> Result<Self> {
        if self.dimensions() != other.dimensions() {
            return Err(StickerError::refinement(format!(
                "Mask dimension mismatch: {:?} vs {:?}",
                self.dimensions(),
                other.dimensions()
            )));
        }
        Ok(Self {
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| u8::from(a != 0 && b == 0))
                .collect(),
            width: self.width,
            height: self.height,
        })
    }

    /// Grayscale image with set pixels at 255
    #[must_use]
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) { 255 } else { 0 }])
        })
    }

    /// Threshold a grayscale image (`> 0` is set)
    #[must_use]
    pub fn from_image(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.pixels().map(|p| u8::from(p.0[0] > 0)).collect(),
            width,
            height,
        }
    }

    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let foreground_pixels = self.data.iter().filter(|&&v| v != 0).count();
        let foreground_ratio = if total_pixels == 0 {
            0.0
        } else {
            foreground_pixels as f32 / total_pixels as f32
        };
        MaskStatistics {
            total_pixels,
            foreground_pixels,
            foreground_ratio,
        }
    }
}

/// Statistics about a binary mask
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub foreground_ratio: f32,
}

/// Per-stage timing breakdown for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Fetching and decoding the source image
    pub download_ms: u64,

    /// Detector inference and decoding
    pub detection_ms: u64,

    /// Segmenter context computation and mask query
    pub segmentation_ms: u64,

    /// Refinement, compositing and PNG encoding
    pub refinement_ms: u64,

    /// Upload and URL issuance
    pub upload_ms: u64,

    /// Total end-to-end processing time
    pub total_ms: u64,
}

impl ProcessingTimings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One-line summary suitable for logging
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "download {}ms, detect {}ms, segment {}ms, refine {}ms, upload {}ms, total {}ms",
            self.download_ms,
            self.detection_ms,
            self.segmentation_ms,
            self.refinement_ms,
            self.upload_ms,
            self.total_ms
        )
    }
}
