//! Abstract destination transport trait.
//!
//! Every destination must implement [`UploadTransport`].  The task hands
//! over a verified local file; the transport decides how to move it
//! (single request, multipart, plain copy).

use md5::{Digest, Md5};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Async upload contract.
pub trait UploadTransport: Send + Sync + 'static {
    /// Upload `local_file` to `dest_path` in `bucket`, returning the ETag
    /// reported by the destination.
    ///
    /// When `attach_md5` is set the hex MD5 of the whole file is stored
    /// with the object.
    fn upload_file(
        &self,
        bucket: &str,
        dest_path: &str,
        local_file: &Path,
        storage_class: &str,
        attach_md5: bool,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;
}

/// Small-file and big-file transports, chosen per object size.
#[derive(Clone)]
pub struct TransportSet {
    pub small: Arc<dyn UploadTransport>,
    pub big: Arc<dyn UploadTransport>,
    /// Files of at least this many bytes go to `big`.
    pub big_file_threshold: u64,
}

impl TransportSet {
    /// Use the same transport for every size.
    pub fn single(transport: Arc<dyn UploadTransport>) -> Self {
        Self {
            small: Arc::clone(&transport),
            big: transport,
            big_file_threshold: u64::MAX,
        }
    }

    pub fn select(&self, size: u64) -> &Arc<dyn UploadTransport> {
        if size >= self.big_file_threshold {
            &self.big
        } else {
            &self.small
        }
    }
}

/// Map a destination path to an object key (destination paths are rooted at `/`).
pub fn object_key(dest_path: &str) -> &str {
    dest_path.trim_start_matches('/')
}

/// Hex MD5 of a file, read in chunks.
pub async fn file_md5_hex(path: &Path) -> anyhow::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
