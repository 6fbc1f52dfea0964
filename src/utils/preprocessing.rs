//! Shared image preprocessing utilities
//!
//! Two resize policies are needed by the bundled models: a centred letterbox
//! for the detector and a top-left anchored longest-side resize for the
//! segmenter encoder. Both produce NCHW `f32` tensors and the geometry needed
//! to map coordinates between image and tensor space.

use crate::error::{Result, StickerError};
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};
use ndarray::Array4;

/// Geometry of a centred letterbox
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl LetterboxTransform {
    /// Map a tensor-space point back to source image coordinates
    #[must_use]
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Geometry of a longest-side resize anchored at the origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeTransform {
    pub scale_x: f32,
    pub scale_y: f32,
    pub resized_width: u32,
    pub resized_height: u32,
}

impl ResizeTransform {
    /// Map a source-space point into the resized frame
    #[must_use]
    pub fn to_resized(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale_x, y * self.scale_y)
    }
}

/// Configuration for preprocessing behavior
#[derive(Debug, Clone)]
pub struct PreprocessingOptions {
    /// Padding color for the letterbox canvas (RGB)
    pub padding_color: [u8; 3],
    /// Per-channel mean subtracted in 0..=255 space
    pub mean: [f32; 3],
    /// Per-channel std divisor in 0..=255 space
    pub std: [f32; 3],
}

impl PreprocessingOptions {
    /// Pixels scaled to `[0, 1]` on a grey canvas
    #[must_use]
    pub fn unit_scale() -> Self {
        Self {
            padding_color: [114, 114, 114],
            mean: [0.0, 0.0, 0.0],
            std: [255.0, 255.0, 255.0],
        }
    }

    /// `ImageNet` statistics in 0..=255 space, zero padding after normalisation
    #[must_use]
    pub fn imagenet() -> Self {
        Self {
            padding_color: [0, 0, 0],
            mean: [123.675, 116.28, 103.53],
            std: [58.395, 57.12, 57.375],
        }
    }
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox `image` into a `size x size` canvas
    ///
    /// The image is resized preserving its aspect ratio, centred, and the
    /// remaining area filled with `options.padding_color`.
    pub fn letterbox(
        image: &DynamicImage,
        size: u32,
        options: &PreprocessingOptions,
    ) -> Result<(Array4<f32>, LetterboxTransform)> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::check_dimensions(width, height)?;

        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);

        let resized = image::imageops::resize(&rgb, new_width, new_height, FilterType::Triangle);

        let pad = options.padding_color;
        let mut canvas = RgbImage::from_pixel(size, size, Rgb(pad));
        let offset_x = (size - new_width) / 2;
        let offset_y = (size - new_height) / 2;
        image::imageops::replace(&mut canvas, &resized, i64::from(offset_x), i64::from(offset_y));

        let tensor = Self::to_tensor(&canvas, options);
        Ok((
            tensor,
            LetterboxTransform {
                scale,
                pad_x: offset_x as f32,
                pad_y: offset_y as f32,
            },
        ))
    }

    /// Resize so the longest side equals `size`, normalise, pad bottom/right with zeros
    pub fn resize_longest_side(
        image: &DynamicImage,
        size: u32,
        options: &PreprocessingOptions,
    ) -> Result<(Array4<f32>, ResizeTransform)> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::check_dimensions(width, height)?;

        let scale = size as f32 / width.max(height) as f32;
        let new_width = ((width as f32 * scale + 0.5) as u32).clamp(1, size);
        let new_height = ((height as f32 * scale + 0.5) as u32).clamp(1, size);

        let resized = image::imageops::resize(&rgb, new_width, new_height, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (f32::from(pixel.0[c]) - options.mean[c]) / options.std[c];
            }
        }

        Ok((
            tensor,
            ResizeTransform {
                scale_x: new_width as f32 / width as f32,
                scale_y: new_height as f32 / height as f32,
                resized_width: new_width,
                resized_height: new_height,
            },
        ))
    }

    fn to_tensor(canvas: &RgbImage, options: &PreprocessingOptions) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in canvas.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (f32::from(pixel.0[c]) - options.mean[c]) / options.std[c];
            }
        }
        tensor
    }

    fn check_dimensions(width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(StickerError::internal(format!(
                "Cannot preprocess empty image ({width}x{height})"
            )));
        }
        Ok(())
    }
}
