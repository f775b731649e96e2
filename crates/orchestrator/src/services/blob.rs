//! Blob storage trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{read, write};
use crate::error::ServiceError;

/// Durable storage for uploaded files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the bytes and returns a durable URL.
    async fn upload(
        &self,
        bytes: &[u8],
        file_name: &str,
        content_type: &str,
    ) -> Result<String, ServiceError>;

    /// Deletes a stored blob. Returns false if nothing was stored there.
    async fn delete(&self, reference: &str) -> Result<bool, ServiceError>;

    /// Returns true if `reference` points into this store.
    fn owns(&self, reference: &str) -> bool;
}

#[derive(Debug, Default)]
struct InMemoryBlobState {
    blobs: HashMap<String, (String, usize)>,
    next_id: u32,
    upload_calls: u32,
    fail_on_upload: bool,
    fail_on_delete: bool,
}

/// In-memory blob store for testing.
#[derive(Debug, Clone)]
pub struct InMemoryBlobStore {
    base_url: String,
    state: Arc<RwLock<InMemoryBlobState>>,
}

impl InMemoryBlobStore {
    /// Creates a store that hands out URLs under `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state: Arc::default(),
        }
    }

    /// Configures every upload to fail.
    pub fn set_fail_on_upload(&self, fail: bool) {
        write(&self.state).fail_on_upload = fail;
    }

    /// Configures every delete to fail.
    pub fn set_fail_on_delete(&self, fail: bool) {
        write(&self.state).fail_on_delete = fail;
    }

    /// Returns the number of stored blobs.
    pub fn blob_count(&self) -> usize {
        read(&self.state).blobs.len()
    }

    pub fn contains(&self, reference: &str) -> bool {
        read(&self.state).blobs.contains_key(reference)
    }

    /// Number of upload calls that reached the store, failed or not.
    pub fn upload_calls(&self) -> u32 {
        read(&self.state).upload_calls
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(
        &self,
        bytes: &[u8],
        file_name: &str,
        content_type: &str,
    ) -> Result<String, ServiceError> {
        let mut state = write(&self.state);
        state.upload_calls += 1;

        if state.fail_on_upload {
            return Err(ServiceError::BlobStore("Upload rejected".to_string()));
        }

        state.next_id += 1;
        let url = format!("{}/{:06}-{}", self.base_url, state.next_id, file_name);
        state
            .blobs
            .insert(url.clone(), (content_type.to_string(), bytes.len()));
        Ok(url)
    }

    async fn delete(&self, reference: &str) -> Result<bool, ServiceError> {
        let mut state = write(&self.state);
        if state.fail_on_delete {
            return Err(ServiceError::BlobStore("Delete rejected".to_string()));
        }
        Ok(state.blobs.remove(reference).is_some())
    }

    fn owns(&self, reference: &str) -> bool {
        reference
            .strip_prefix(&self.base_url)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}
