//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Object store abstraction for uploaded exam files.
///
/// Keys are server-generated (`{user}/{exam}/{media}{ext}`) and never taken
/// verbatim from request input; backends still reject empty, absolute, and
/// traversal keys.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Whether a blob is present under the key.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Size and timestamps without reading the blob.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Read the whole blob into memory.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Read the blob as a chunked stream, for download responses.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Write a blob; replaces any existing blob under the key atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Remove a blob. Deleting a missing key is an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Static backend identifier ("filesystem"), used in logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Startup probe; the server refuses to serve until this passes.
    /// Backends with nothing to probe keep the default.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// What `head` reports about a stored blob.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Blob length in bytes.
    pub size: u64,
    /// Modification time when the backend records one.
    pub last_modified: Option<time::OffsetDateTime>,
    /// MIME type when the backend records one.
    pub content_type: Option<String>,
}
