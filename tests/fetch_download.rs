//! Download behaviour against a local image host

mod common;

use common::{spawn_image_host, SLOW_RESPONSE};
use std::time::Duration;
use sticker_forge::{ImageFetcher, PipelineMode, StickerError};
use tempfile::TempDir;

fn fetcher() -> ImageFetcher {
    ImageFetcher::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_download_keeps_known_extension() {
    let host = spawn_image_host().await;
    let dir = TempDir::new().unwrap();

    let path = fetcher()
        .download(&format!("{host}/circle.jpg?v=2"), &dir.path().join("img"), "20240101_000000_abcd")
        .await
        .unwrap();

    assert_eq!(path.file_name().unwrap(), "20240101_000000_abcd_circle.jpg");
    assert!(image::open(&path).is_ok());
}

#[tokio::test]
async fn test_download_appends_jpg_without_extension() {
    let host = spawn_image_host().await;
    let dir = TempDir::new().unwrap();

    let path = fetcher()
        .download(&format!("{host}/photo"), dir.path(), "stamp")
        .await
        .unwrap();

    assert_eq!(path.file_name().unwrap(), "stamp_photo.jpg");
    assert!(path.is_file());
}

#[tokio::test]
async fn test_download_non_200_is_download_error() {
    let host = spawn_image_host().await;
    let dir = TempDir::new().unwrap();
    let url = format!("{host}/missing.png");

    let err = fetcher().download(&url, dir.path(), "stamp").await.unwrap_err();

    assert_eq!(err.error_type(PipelineMode::Sticker), "Download_Error");
    assert_eq!(
        err.details(),
        format!("Failed to download image from URL: {url}. HTTP Status Code: 404")
    );
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_probe_requires_200() {
    let host = spawn_image_host().await;
    let fetcher = fetcher();

    assert!(fetcher.is_reachable(&format!("{host}/circle.jpg")).await);
    assert!(!fetcher.is_reachable(&format!("{host}/missing.png")).await);
    assert!(!fetcher.is_reachable("not-a-url").await);
}

#[tokio::test]
async fn test_download_times_out_with_retryable_error() {
    let host = spawn_image_host().await;
    let dir = TempDir::new().unwrap();
    let timeout = Duration::from_secs(1);
    assert!(timeout < SLOW_RESPONSE);
    let fetcher = ImageFetcher::new(timeout).unwrap();
    let url = format!("{host}/slow.jpg");

    let started = std::time::Instant::now();
    let err = fetcher.download(&url, dir.path(), "stamp").await.unwrap_err();

    assert!(started.elapsed() < SLOW_RESPONSE, "download waited for the slow host");
    match &err {
        StickerError::Download(details) => {
            assert!(details.contains("timed out"), "details: {details}");
            assert!(details.contains("may be retried"), "details: {details}");
        },
        other => panic!("expected a download error, got {other:?}"),
    }
    assert_eq!(err.error_type(PipelineMode::Sticker), "Download_Error");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_probe_times_out_as_invalid_url() {
    let host = spawn_image_host().await;
    let fetcher = ImageFetcher::new(Duration::from_secs(1)).unwrap();

    let started = std::time::Instant::now();
    let err = fetcher
        .ensure_reachable(&format!("{host}/slow.jpg"))
        .await
        .unwrap_err();

    assert!(started.elapsed() < SLOW_RESPONSE);
    assert!(matches!(err, StickerError::InvalidUrl(_)));
    assert_eq!(err.error_type(PipelineMode::BackgroundRemoval), "invalid_url");
}
