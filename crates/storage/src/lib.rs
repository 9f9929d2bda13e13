//! Object storage abstraction and backends for Satchel.
//!
//! Exam attachments live here as opaque blobs: atomic writes, streaming
//! reads for download responses, and a local-filesystem backend. The key
//! layout belongs to the metadata layer; this crate only refuses keys
//! that would escape the storage root.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore};

use satchel_core::config::StorageConfig;
use std::sync::Arc;

/// Open the object store named by the configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    let StorageConfig::Filesystem { path } = config;
    Ok(Arc::new(FilesystemBackend::new(path).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn from_config_builds_filesystem_backend() {
        let temp = tempfile::tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("files"),
        };

        let store = from_config(&config).await.unwrap();
        assert_eq!(store.backend_name(), "filesystem");

        store
            .put("exam/scan.pdf", Bytes::from_static(b"%PDF-"))
            .await
            .unwrap();
        assert!(store.exists("exam/scan.pdf").await.unwrap());
    }
}
