//! RGBA compositing and PNG output

use crate::error::{Result, StickerError};
use crate::refine::{FeatherRefinement, StickerRefinement};
use image::{
    codecs::png::PngEncoder, DynamicImage, ExtendedColorType, GrayImage, ImageEncoder, Rgba,
    RgbaImage,
};
use std::path::Path;
use tracing::debug;

const BORDER_PIXEL: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Copy source colour and replace alpha with `alpha`
pub fn apply_alpha(source: &DynamicImage, alpha: &GrayImage) -> Result<RgbaImage> {
    let mut rgba = source.to_rgba8();
    if rgba.dimensions() != alpha.dimensions() {
        return Err(StickerError::refinement(format!(
            "Mask size {:?} does not match image size {:?}",
            alpha.dimensions(),
            rgba.dimensions()
        )));
    }
    for (pixel, a) in rgba.pixels_mut().zip(alpha.pixels()) {
        pixel.0[3] = a.0[0];
    }
    Ok(rgba)
}

/// Sticker output: soft alpha with an opaque white border ring
pub fn compose_sticker(source: &DynamicImage, refined: &StickerRefinement) -> Result<RgbaImage> {
    let mut rgba = apply_alpha(source, &refined.alpha)?;
    if rgba.dimensions() != refined.border.dimensions() {
        return Err(StickerError::refinement(format!(
            "Border size {:?} does not match image size {:?}",
            refined.border.dimensions(),
            rgba.dimensions()
        )));
    }
    for (x, y, pixel) in rgba.enumerate_pixels_mut() {
        if refined.border.get(x, y) {
            *pixel = BORDER_PIXEL;
        }
    }
    Ok(rgba)
}

/// Background-removed output: feathered alpha over the original colour
pub fn compose_cutout(source: &DynamicImage, refined: &FeatherRefinement) -> Result<RgbaImage> {
    apply_alpha(source, &refined.alpha)
}

/// Encode RGBA as PNG bytes
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(bytes)
}

/// Encode and write a PNG, creating the parent directory if needed
pub fn save_png<P: AsRef<Path>>(image: &RgbaImage, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StickerError::file_io_error("create directory", parent, &e))?;
    }
    let bytes = encode_png(image)?;
    std::fs::write(path, &bytes).map_err(|e| StickerError::file_io_error("write", path, &e))?;
    debug!(path = %path.display(), bytes = bytes.len(), "PNG written");
    Ok(())
}
