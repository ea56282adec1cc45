//! Object storage for chat uploads.

use async_trait::async_trait;

use crate::error::BackendError;

/// Stores uploaded bytes and serves them at a public URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `bytes` at `path` inside `bucket`, returning the public URL.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError>;
}
