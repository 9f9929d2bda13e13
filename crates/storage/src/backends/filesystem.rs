//! Local filesystem blob storage.
//!
//! Blobs are plain files under the configured root, at the path named by
//! their key (the server writes attachment keys as
//! `{user}/{exam}/{media}{ext}`). Writes land in a scratch file that is
//! fsynced and renamed into place, so a crash mid-upload never leaves a
//! half-written blob under a live key.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore};

/// Read size for streamed downloads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Blob store rooted at a local directory.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve a key to its on-disk path.
    ///
    /// Runs on the blocking pool: the resolution stats the path and its
    /// ancestors, which is real filesystem IO.
    async fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_under_root(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }
}

/// Map a read error on `key` to NotFound, passing other IO errors through.
fn read_error(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

/// Validate `key` and resolve it under `root`, refusing anything that
/// would land outside the root.
///
/// Lexical screening alone is not enough: a symlink stored under the root
/// can point anywhere. Existing paths are canonicalized and checked, and
/// for paths yet to be created the nearest existing ancestor is held to
/// the same test before any directory gets created through it.
fn resolve_under_root(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }
    if Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(format!(
            "contains unsafe path component: {key}"
        )));
    }

    let path = root.join(key);
    let root_canonical = root.canonicalize().map_err(|e| {
        StorageError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to canonicalize root: {e}"),
        ))
    })?;

    match std::fs::symlink_metadata(&path) {
        Ok(meta) => {
            contain_within(&path, &root_canonical, &meta, key, "resolved path")?;
            // Hand back the uncanonicalized path so logs show the key
            // layout under the root.
            Ok(path)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            // Nothing at the path yet. Walk up to the nearest existing
            // ancestor and check it the same way; without this,
            // create_dir_all could follow a symlinked directory out of
            // the root while building intermediate directories.
            for ancestor in path.ancestors().skip(1) {
                match std::fs::symlink_metadata(ancestor) {
                    Ok(meta) => {
                        contain_within(ancestor, &root_canonical, &meta, key, "ancestor path")?;
                        break;
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        return Err(StorageError::Io(std::io::Error::new(
                            err.kind(),
                            format!("failed to stat ancestor: {err}"),
                        )));
                    }
                }
            }
            Ok(path)
        }
        Err(err) => Err(StorageError::Io(std::io::Error::new(
            err.kind(),
            format!("failed to stat path: {err}"),
        ))),
    }
}

/// Canonicalize an existing `path` and require it to stay under the root.
fn contain_within(
    path: &Path,
    root_canonical: &Path,
    meta: &std::fs::Metadata,
    key: &str,
    what: &str,
) -> StorageResult<()> {
    let canonical = path.canonicalize().map_err(|e| {
        if meta.file_type().is_symlink() {
            StorageError::InvalidKey(format!("symlink target missing or invalid: {key}"))
        } else {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize {what}: {e}"),
            ))
        }
    })?;
    if !canonical.starts_with(root_canonical) {
        return Err(StorageError::InvalidKey(format!(
            "{what} escapes storage root: {key}"
        )));
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.resolve(key).await?;
        let meta = fs::metadata(&path).await.map_err(|e| read_error(key, e))?;
        Ok(ObjectMeta {
            size: meta.len(),
            last_modified: meta.modified().ok().map(|t| t.into()),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.resolve(key).await?;
        let data = fs::read(&path).await.map_err(|e| read_error(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.resolve(key).await?;
        let file = fs::File::open(&path).await.map_err(|e| read_error(key, e))?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.resolve(key).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Scratch file sits next to the target so the rename stays on one
        // filesystem; the uuid keeps concurrent writers to the same key
        // from clobbering each other's scratch.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let scratch = path.with_file_name(format!("{file_name}.tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&scratch).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        fs::rename(&scratch, &path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key).await?;
        fs::remove_file(&path).await.map_err(|e| read_error(key, e))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let meta = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;
        if !meta.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn backend_in(dir: &tempfile::TempDir) -> FilesystemBackend {
        FilesystemBackend::new(dir.path()).await.unwrap()
    }

    fn assert_escape_refused(result: StorageResult<impl std::fmt::Debug>) {
        match result {
            Err(StorageError::InvalidKey(msg)) => assert!(
                msg.contains("escapes storage root"),
                "unexpected message: {msg}"
            ),
            other => panic!("escape should be refused as InvalidKey, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_put_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_in(&dir).await;

        let key = "user-1/exam-1/scan.pdf";
        let data = Bytes::from("not actually a pdf");
        backend.put(key, data.clone()).await.unwrap();

        assert!(backend.exists(key).await.unwrap());
        assert_eq!(backend.get(key).await.unwrap(), data);
        assert_eq!(backend.head(key).await.unwrap().size, data.len() as u64);
    }

    #[tokio::test]
    async fn test_get_stream_yields_full_content() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_in(&dir).await;

        // Larger than one stream chunk so multiple reads happen.
        let data = Bytes::from(vec![0x5au8; STREAM_CHUNK_SIZE * 2 + 17]);
        backend.put("big/blob.bin", data.clone()).await.unwrap();

        let mut stream = backend.get_stream("big/blob.bin").await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected.len(), data.len());
        assert_eq!(Bytes::from(collected), data);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_in(&dir).await;

        let err = backend.delete("absent/file").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_hostile_keys_are_refused_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_in(&dir).await;

        let hostile = [
            "",
            "../escape",
            "/absolute/path",
            "foo/../bar",
            "foo/../../etc/passwd",
        ];
        for key in hostile {
            let err = backend.exists(key).await.unwrap_err();
            assert!(
                matches!(err, StorageError::InvalidKey(_)),
                "key {key:?} gave {err:?}"
            );
        }

        // A clean nested key resolves fine even before anything exists.
        assert!(backend.exists("user/exam/scan.pdf").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlinked_blob_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let backend = backend_in(&dir).await;

        // A file outside the storage root that a key must never reach.
        let hidden = elsewhere.path().join("secret.txt");
        std::fs::write(&hidden, "secret data").unwrap();
        std::os::unix::fs::symlink(&hidden, dir.path().join("sneaky.pdf")).unwrap();

        assert_escape_refused(backend.get("sneaky.pdf").await);

        // Same when the link sits on a directory component.
        std::os::unix::fs::symlink(elsewhere.path(), dir.path().join("outside")).unwrap();
        assert_escape_refused(backend.get("outside/secret.txt").await);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlinked_ancestor_is_refused_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let backend = backend_in(&dir).await;

        // root/escape -> elsewhere; the key's intermediate directories do
        // not exist yet, so only the ancestor check can catch this.
        std::os::unix::fs::symlink(elsewhere.path(), dir.path().join("escape")).unwrap();

        let result = backend
            .put("escape/nested/deep/file.txt", Bytes::from("data"))
            .await;
        assert_escape_refused(result);

        assert!(
            !elsewhere.path().join("nested").exists(),
            "no directories may appear outside the storage root"
        );
    }
}
