//! Mask refinement for the two output policies
//!
//! Both policies start from the binarised soft mask. The sticker policy grows
//! the mask with a square structuring element and keeps the ring that was
//! added; the feather policy detects the mask outline, widens it and blurs it
//! into a soft band that is merged into the hard alpha.

use crate::config::RefinementConfig;
use crate::error::{Result, StickerError};
use crate::types::{BinaryMask, SoftMask};
use image::{GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use tracing::{debug, instrument};

/// Output of the sticker-border policy
#[derive(Debug, Clone)]
pub struct StickerRefinement {
    /// `trunc(soft * 255)` before the border is painted
    pub alpha: GrayImage,
    /// Pixels added by dilation; painted opaque white by the compositor
    pub border: BinaryMask,
}

/// Output of the feather policy
#[derive(Debug, Clone)]
pub struct FeatherRefinement {
    /// Binary mask scaled to `{0, 255}`
    pub hard: GrayImage,
    /// Dilated, blurred edge band clamped to `0..=255`
    pub feather: GrayImage,
    /// `max(hard, feather)`
    pub alpha: GrayImage,
}

/// Dilate with an all-ones `kernel x kernel` square
///
/// The anchor sits at `kernel / 2`, so each output pixel takes the maximum
/// over offsets `-(kernel / 2) ..= kernel - 1 - kernel / 2` on both axes.
/// Neighbours outside the image are ignored.
#[must_use]
pub fn dilate_square(mask: &BinaryMask, kernel: u32) -> BinaryMask {
    let (width, height) = mask.dimensions();
    if kernel <= 1 || width == 0 || height == 0 {
        return mask.clone();
    }

    let before = i64::from(kernel / 2);
    let after = i64::from(kernel) - 1 - before;
    let (w, h) = (i64::from(width), i64::from(height));
    let src = mask.data();

    // Separable: horizontal pass then vertical pass
    let mut rows = vec![0u8; src.len()];
    for y in 0..h {
        let row = (y * w) as usize;
        for x in 0..w {
            let lo = (x - before).max(0);
            let hi = (x + after).min(w - 1);
            let hit = (lo..=hi).any(|nx| src.get(row + nx as usize).is_some_and(|&v| v != 0));
            if let Some(out) = rows.get_mut(row + x as usize) {
                *out = u8::from(hit);
            }
        }
    }

    let mut out = vec![0u8; src.len()];
    for y in 0..h {
        let lo = (y - before).max(0);
        let hi = (y + after).min(h - 1);
        for x in 0..w {
            let hit = (lo..=hi).any(|ny| {
                rows.get((ny * w + x) as usize)
                    .is_some_and(|&v| v != 0)
            });
            if let Some(px) = out.get_mut((y * w + x) as usize) {
                *px = u8::from(hit);
            }
        }
    }

    BinaryMask::new(out, width, height).unwrap_or_else(|_| mask.clone())
}

/// Ring of pixels added by one dilation of `binary`
pub fn border_ring(binary: &BinaryMask, thickness: u32) -> Result<BinaryMask> {
    dilate_square(binary, thickness).difference(binary)
}

/// Sticker-border policy
#[instrument(
    skip(soft, config),
    fields(dims = ?soft.dimensions(), thickness = config.border_thickness)
)]
pub fn refine_sticker(soft: &SoftMask, config: &RefinementConfig) -> Result<StickerRefinement> {
    config.validate()?;

    let binary = soft.binarize(config.threshold);
    let border = border_ring(&binary, config.border_thickness)?;
    let alpha = soft.to_alpha();

    debug!(
        foreground = binary.statistics().foreground_pixels,
        border = border.statistics().foreground_pixels,
        "sticker mask refined"
    );

    Ok(StickerRefinement { alpha, border })
}

/// Thin outline of the binary mask via Canny on `binary * 255`
#[must_use]
pub fn edge_mask(binary: &BinaryMask, low: f32, high: f32) -> BinaryMask {
    let edges = canny(&binary.to_image(), low, high);
    BinaryMask::from_image(&edges)
}

/// Background-removal feather policy
#[instrument(
    skip(soft, config),
    fields(dims = ?soft.dimensions(), kernel = config.dilation_kernel_size)
)]
pub fn refine_feather(soft: &SoftMask, config: &RefinementConfig) -> Result<FeatherRefinement> {
    config.validate()?;

    let binary = soft.binarize(config.threshold);
    let hard = binary.to_image();

    let edges = edge_mask(&binary, config.canny_low, config.canny_high);
    let band = dilate_square(&edges, config.dilation_kernel_size).to_image();
    // u8 output keeps the blur clamped to 0..=255
    let feather = gaussian_blur_f32(&band, config.edge_smooth_radius);

    let alpha = merge_max(&hard, &feather)?;

    debug!(
        foreground = binary.statistics().foreground_pixels,
        edge_pixels = edges.statistics().foreground_pixels,
        "feather mask refined"
    );

    Ok(FeatherRefinement {
        hard,
        feather,
        alpha,
    })
}

fn merge_max(a: &GrayImage, b: &GrayImage) -> Result<GrayImage> {
    if a.dimensions() != b.dimensions() {
        return Err(StickerError::refinement(format!(
            "Alpha dimension mismatch: {:?} vs {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }
    Ok(GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y).0[0].max(b.get_pixel(x, y).0[0])])
    }))
}
