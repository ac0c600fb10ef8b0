//! Source side of a migration.
//!
//! Everything needed to turn a listed source object into bytes on local
//! disk: the object descriptor, signed download URLs, the HTTP downloader,
//! and the manifest that enumerates objects for a run.

pub mod downloader;
pub mod manifest;
pub mod signer;

pub use downloader::{Downloader, HttpDownloader};
pub use signer::{QiniuSigner, UrlSigner};

/// One object to migrate, as reported by the source listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceObjectRef {
    /// Object key without a leading `/`.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Integrity tag (etag/hash) reported by the listing.
    pub etag: String,
}

impl SourceObjectRef {
    pub fn new(key: &str, size: u64, etag: impl Into<String>) -> Self {
        Self {
            key: key.strip_prefix('/').unwrap_or(key).to_string(),
            size,
            etag: etag.into(),
        }
    }
}
