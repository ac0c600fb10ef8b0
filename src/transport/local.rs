//! Local filesystem destination transport.
//!
//! Objects land at `{root}/{bucket}/{dest_path}`.  Writes are crash-only:
//! copy to a temp file, fsync, rename into place.  With `attach_md5` the
//! hex digest is written to a `.md5` sidecar next to the object.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tracing::{debug, warn};

use super::backend::{file_md5_hex, object_key, UploadTransport};

/// Copies objects into a directory tree.
pub struct LocalTransport {
    /// Root directory buckets are created under.
    root: PathBuf,
}

impl LocalTransport {
    /// Create a new `LocalTransport` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root })
    }

    /// Resolve a bucket and destination path to a file under the root.
    fn resolve(&self, bucket: &str, dest_path: &str) -> anyhow::Result<PathBuf> {
        let key = object_key(dest_path);
        if key.is_empty() {
            anyhow::bail!("Empty destination path for bucket {}", bucket);
        }
        for component in Path::new(bucket).components().chain(Path::new(key).components()) {
            if !matches!(component, Component::Normal(_)) {
                anyhow::bail!("Path traversal detected in destination: {}/{}", bucket, key);
            }
        }
        Ok(self.root.join(bucket).join(key))
    }

    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{}", id))
    }
}

impl UploadTransport for LocalTransport {
    fn upload_file(
        &self,
        bucket: &str,
        dest_path: &str,
        local_file: &Path,
        storage_class: &str,
        attach_md5: bool,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let resolved = self.resolve(bucket, dest_path);
        let local_file = local_file.to_path_buf();
        let storage_class = storage_class.to_string();
        Box::pin(async move {
            let final_path = resolved?;
            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let md5_hex = file_md5_hex(&local_file).await?;

            let tmp_path = self.temp_path();
            if let Err(e) = commit(&local_file, &tmp_path, &final_path).await {
                discard(&tmp_path).await;
                return Err(e);
            }

            if attach_md5 {
                let mut sidecar = final_path.clone().into_os_string();
                sidecar.push(".md5");
                tokio::fs::write(PathBuf::from(sidecar), &md5_hex).await?;
            }

            debug!(
                path = %final_path.display(),
                storage_class = %storage_class,
                "Local transport wrote object"
            );

            Ok(format!("\"{md5_hex}\""))
        })
    }
}

/// Copy `src` to `tmp`, fsync, and rename over `dest`.
async fn commit(src: &Path, tmp: &Path, dest: &Path) -> anyhow::Result<()> {
    tokio::fs::copy(src, tmp).await?;
    tokio::fs::File::open(tmp).await?.sync_all().await?;
    tokio::fs::rename(tmp, dest).await?;
    Ok(())
}

async fn discard(tmp: &Path) {
    match tokio::fs::remove_file(tmp).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %tmp.display(), error = %e, "Failed to remove temp file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_transport() -> (tempfile::TempDir, LocalTransport) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let transport = LocalTransport::new(dir.path().join("dest")).expect("failed to create transport");
        (dir, transport)
    }

    fn staged(dir: &tempfile::TempDir, data: &[u8]) -> PathBuf {
        let path = dir.path().join("staged");
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_upload_writes_object_and_etag() {
        let (dir, transport) = test_transport();
        let src = staged(&dir, b"hello world");

        let etag = transport
            .upload_file("bkt", "/out/file.txt", &src, "STANDARD", false)
            .await
            .unwrap();

        assert_eq!(etag, "\"5eb63bbbe01eeed093cb22bb8f5acdc3\"");
        let written = std::fs::read(dir.path().join("dest/bkt/out/file.txt")).unwrap();
        assert_eq!(written, b"hello world");
        assert!(!dir.path().join("dest/bkt/out/file.txt.md5").exists());
    }

    #[tokio::test]
    async fn test_upload_attaches_md5_sidecar() {
        let (dir, transport) = test_transport();
        let src = staged(&dir, b"");

        transport
            .upload_file("bkt", "empty", &src, "STANDARD", true)
            .await
            .unwrap();

        let sidecar = std::fs::read_to_string(dir.path().join("dest/bkt/empty.md5")).unwrap();
        assert_eq!(sidecar, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn test_upload_overwrites() {
        let (dir, transport) = test_transport();
        let first = staged(&dir, b"v1");
        transport.upload_file("bkt", "k", &first, "STANDARD", false).await.unwrap();
        let second = staged(&dir, b"v2");
        transport.upload_file("bkt", "k", &second, "STANDARD", false).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("dest/bkt/k")).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_upload_rejects_traversal() {
        let (dir, transport) = test_transport();
        let src = staged(&dir, b"x");

        let result = transport
            .upload_file("bkt", "../escape", &src, "STANDARD", false)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_upload_missing_source_fails() {
        let (dir, transport) = test_transport();
        let result = transport
            .upload_file("bkt", "k", &dir.path().join("nope"), "STANDARD", false)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_no_temp_file() {
        let (dir, transport) = test_transport();
        let src = staged(&dir, b"payload");

        transport
            .upload_file("bkt", "k/x", &src, "STANDARD", false)
            .await
            .unwrap();
        // `k` is now a directory, so the rename into place fails.
        let result = transport
            .upload_file("bkt", "k", &src, "STANDARD", false)
            .await;

        assert!(result.is_err());
        let leftovers = std::fs::read_dir(dir.path().join("dest/.tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
