//! Local working files
//!
//! Every request writes at most two files: the downloaded original under
//! `img/` and the rendered PNG under the mode's output directory. Both carry
//! the same request stamp and are removed once the request finishes.

use crate::config::ServiceConfig;
use crate::error::{Result, StickerError};
use crate::types::PipelineMode;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Create the download and output directories under the configured root
///
/// Idempotent; existing directories are left untouched.
pub fn ensure_directories(config: &ServiceConfig) -> Result<()> {
    let dirs = [
        config.download_dir(),
        config.output_dir(PipelineMode::Sticker),
        config.output_dir(PipelineMode::BackgroundRemoval),
    ];
    for dir in &dirs {
        std::fs::create_dir_all(dir)
            .map_err(|e| StickerError::file_io_error("create directory", dir, &e))?;
    }
    debug!(root = %config.work_dir.display(), "working directories ready");
    Ok(())
}

/// `YYYYMMDD_HHMMSS` local time plus a short random suffix
#[must_use]
pub fn request_stamp() -> String {
    let time = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{time}_{}", &suffix[..8])
}

/// Object key of a rendered artefact, e.g. `sticker/{stamp}_masked_area_sticker.png`
#[must_use]
pub fn object_key(mode: PipelineMode, stamp: &str) -> String {
    format!("{}/{stamp}_{}", mode.output_dir_name(), mode.artefact_name())
}

/// Local path of a rendered artefact
#[must_use]
pub fn output_path(config: &ServiceConfig, mode: PipelineMode, stamp: &str) -> PathBuf {
    config
        .output_dir(mode)
        .join(format!("{stamp}_{}", mode.artefact_name()))
}

/// Decode an image file, falling back to content sniffing
///
/// Downloads keep whatever extension the URL had, so the extension may not
/// match the bytes.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    if !path.exists() {
        return Err(StickerError::file_io_error(
            "read image file",
            path,
            &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
        ));
    }

    match image::open(path) {
        Ok(img) => Ok(img),
        Err(e) => {
            debug!(
                path = %path.display(),
                error = %e,
                "extension-based loading failed, trying content detection"
            );
            let data = std::fs::read(path)
                .map_err(|io_err| StickerError::file_io_error("read image data", path, &io_err))?;
            image::load_from_memory(&data).map_err(StickerError::from)
        },
    }
}

/// Best-effort removal of local files
///
/// Failures are logged as `Cleanup_Error` and returned for inspection, never
/// raised. Paths that no longer exist are skipped.
pub fn delete_local<P: AsRef<Path>>(paths: &[P]) -> Vec<StickerError> {
    let mut failures = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if !path.exists() {
            continue;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed local file"),
            Err(e) => {
                let err =
                    StickerError::cleanup(format!("Failed to remove {}: {e}", path.display()));
                warn!(
                    error_type = "Cleanup_Error",
                    details = %err.details(),
                    "cleanup failed"
                );
                failures.push(err);
            },
        }
    }
    failures
}
