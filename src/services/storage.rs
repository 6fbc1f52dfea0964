//! Object storage for rendered artefacts
//!
//! The pipeline only needs two operations: put a local file under a key and
//! issue a time-limited GET URL for it. [`ObjectStore`] abstracts those so the
//! orchestrator can be exercised without a bucket.

use crate::error::{Result, StickerError};
use async_trait::async_trait;
use std::path::Path;

/// Content type of every rendered artefact
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Upload plus presigned-URL issuance
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `local_path` to `bucket/key`
    ///
    /// # Errors
    /// - `Upload` when the file is missing or the store rejects it
    async fn upload(&self, local_path: &Path, bucket: &str, key: &str, content_type: &str)
        -> Result<()>;

    /// Time-limited GET URL for `bucket/key`
    ///
    /// # Errors
    /// - `Presign` when the URL cannot be produced
    async fn presign(&self, bucket: &str, key: &str) -> Result<String>;
}

/// Reject uploads of files that do not exist before touching the network
pub(crate) fn ensure_local_file(local_path: &Path) -> Result<()> {
    if local_path.is_file() {
        Ok(())
    } else {
        Err(StickerError::upload(format!(
            "The file {} was not found.",
            local_path.display()
        )))
    }
}

#[cfg(feature = "s3")]
pub use self::s3::S3Store;

#[cfg(feature = "s3")]
mod s3 {
    use super::{ensure_local_file, ObjectStore};
    use crate::config::StorageConfig;
    use crate::error::{Result, StickerError};
    use async_trait::async_trait;
    use aws_sdk_s3::config::Region;
    use aws_sdk_s3::error::DisplayErrorContext;
    use aws_sdk_s3::presigning::PresigningConfig;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::types::ObjectCannedAcl;
    use aws_sdk_s3::Client;
    use std::path::Path;
    use std::time::Duration;
    use tracing::{info, instrument};

    /// S3-backed store; uploads are public-read
    #[derive(Debug, Clone)]
    pub struct S3Store {
        client: Client,
        presign_expiry: Duration,
    }

    impl S3Store {
        /// Build a client from the default AWS credential chain
        pub async fn from_config(config: &StorageConfig) -> Self {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = &config.region {
                loader = loader.region(Region::new(region.clone()));
            }
            let sdk_config = loader.load().await;
            Self::new(
                Client::new(&sdk_config),
                Duration::from_secs(config.presign_expiry_secs),
            )
        }

        #[must_use]
        pub fn new(client: Client, presign_expiry: Duration) -> Self {
            Self {
                client,
                presign_expiry,
            }
        }
    }

    #[async_trait]
    impl ObjectStore for S3Store {
        #[instrument(skip(self, local_path), fields(path = %local_path.display()))]
        async fn upload(
            &self,
            local_path: &Path,
            bucket: &str,
            key: &str,
            content_type: &str,
        ) -> Result<()> {
            ensure_local_file(local_path)?;
            let body = ByteStream::from_path(local_path).await.map_err(|e| {
                StickerError::upload(format!("Failed to read {}: {e}", local_path.display()))
            })?;

            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(body)
                .acl(ObjectCannedAcl::PublicRead)
                .content_type(content_type)
                .send()
                .await
                .map_err(|e| StickerError::upload(DisplayErrorContext(&e).to_string()))?;

            info!("Uploaded to s3://{bucket}/{key}");
            Ok(())
        }

        async fn presign(&self, bucket: &str, key: &str) -> Result<String> {
            let presigning = PresigningConfig::expires_in(self.presign_expiry)
                .map_err(|e| StickerError::presign(e.to_string()))?;
            let request = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| StickerError::presign(DisplayErrorContext(&e).to_string()))?;
            Ok(request.uri().to_string())
        }
    }
}
