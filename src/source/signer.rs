//! Signed download URLs for private source buckets.
//!
//! The source serves private objects only through time-limited URLs:
//!
//! ```text
//! url   = base_url + ("?" | "&") + "e=" + deadline
//! token = access_key + ":" + urlsafe_base64(HMAC-SHA1(secret_key, url))
//! final = url + "&token=" + token
//! ```

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::errors::MigrateError;

type HmacSha1 = Hmac<Sha1>;

/// Characters escaped in object keys. `/` stays literal so keys keep their shape.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Produces authenticated, expiring download URLs.
pub trait UrlSigner: Send + Sync + 'static {
    fn sign(&self, base_url: &str, expires: Duration) -> Result<String, MigrateError>;
}

/// Build the unsigned URL of `key` on `endpoint`.
///
/// The endpoint may be a bare domain (`http://` is assumed) or a full origin.
pub fn source_url(endpoint: &str, key: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    let encoded = utf8_percent_encode(key, KEY_ENCODE_SET);
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        format!("{endpoint}/{encoded}")
    } else {
        format!("http://{endpoint}/{encoded}")
    }
}

/// Access/secret key pair signer.
#[derive(Clone)]
pub struct QiniuSigner {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for QiniuSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QiniuSigner")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl QiniuSigner {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Sign `base_url` so that it stops working at `deadline` (unix seconds).
    pub fn sign_with_deadline(&self, base_url: &str, deadline: u64) -> Result<String, MigrateError> {
        if self.access_key.is_empty() || self.secret_key.is_empty() {
            return Err(MigrateError::Configuration {
                message: "source access key and secret key must be set".to_string(),
            });
        }

        let separator = if base_url.contains('?') { '&' } else { '?' };
        let url = format!("{base_url}{separator}e={deadline}");

        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes()).map_err(|e| {
            MigrateError::Configuration {
                message: format!("invalid secret key: {e}"),
            }
        })?;
        mac.update(url.as_bytes());
        let sign = URL_SAFE.encode(mac.finalize().into_bytes());

        Ok(format!("{url}&token={}:{sign}", self.access_key))
    }
}

impl UrlSigner for QiniuSigner {
    fn sign(&self, base_url: &str, expires: Duration) -> Result<String, MigrateError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| MigrateError::Configuration {
                message: format!("system clock before unix epoch: {e}"),
            })?;
        self.sign_with_deadline(base_url, (now + expires).as_secs())
    }
}
