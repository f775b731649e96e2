//! Image uploads that run outside the database transaction.

use domain::ImageSource;
use thiserror::Error;

use crate::config::UploadPolicy;
use crate::error::ServiceError;
use crate::services::BlobStore;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Content type '{0}' is not allowed")]
    DisallowedType(String),

    #[error("File is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("File is empty")]
    Empty,

    #[error("Image URL is empty")]
    EmptyUrl,

    #[error(transparent)]
    Blob(#[from] ServiceError),
}

/// Blobs uploaded during one write, kept so they can be deleted again if
/// the write aborts.
#[derive(Debug, Default)]
pub struct UploadLedger {
    uploaded: Vec<String>,
}

impl UploadLedger {
    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty()
    }
}

/// Resolves image sources to durable URLs.
pub struct ImageUploader<B: BlobStore> {
    blobs: B,
    policy: UploadPolicy,
}

impl<B: BlobStore> ImageUploader<B> {
    pub fn new(blobs: B, policy: UploadPolicy) -> Self {
        Self { blobs, policy }
    }

    fn check(&self, content_type: &str, bytes: &[u8]) -> Result<(), UploadError> {
        if !self.policy.allows_type(content_type) {
            return Err(UploadError::DisallowedType(content_type.to_string()));
        }
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        if bytes.len() > self.policy.max_bytes {
            return Err(UploadError::TooLarge {
                size: bytes.len(),
                max: self.policy.max_bytes,
            });
        }
        Ok(())
    }

    /// Returns the URL for an image, uploading it first if needed.
    ///
    /// Caller-supplied URLs are passed through untouched and are not
    /// recorded in the ledger.
    pub async fn resolve(
        &self,
        source: &ImageSource,
        ledger: &mut UploadLedger,
    ) -> Result<String, UploadError> {
        match source {
            ImageSource::Url(url) => {
                let url = url.trim();
                if url.is_empty() {
                    return Err(UploadError::EmptyUrl);
                }
                Ok(url.to_string())
            }
            ImageSource::Upload {
                file_name,
                content_type,
                bytes,
            } => {
                self.check(content_type, bytes)?;
                let url = self.blobs.upload(bytes, file_name, content_type).await?;
                ledger.uploaded.push(url.clone());
                Ok(url)
            }
        }
    }

    /// Deletes every blob recorded in the ledger.
    pub async fn compensate(&self, ledger: UploadLedger) {
        if ledger.is_empty() {
            return;
        }
        tracing::info!(count = ledger.uploaded.len(), "deleting blobs of aborted write");
        for url in ledger.uploaded {
            self.delete_best_effort(&url).await;
        }
    }

    /// Deletes a blob if it lives in this store. Failures are logged.
    pub async fn delete_best_effort(&self, url: &str) {
        if !self.blobs.owns(url) {
            return;
        }
        match self.blobs.delete(url).await {
            Ok(true) => tracing::debug!(%url, "blob deleted"),
            Ok(false) => tracing::debug!(%url, "blob already gone"),
            Err(e) => tracing::warn!(%url, error = %e, "blob delete failed"),
        }
    }
}
