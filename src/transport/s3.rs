//! S3-compatible destination transport.
//!
//! Uploads staged files to any S3-compatible service (COS, AWS S3, MinIO)
//! through the AWS SDK.  Files up to `part_size` go out as a single
//! `PutObject`; larger files use a native multipart upload that is aborted
//! on any failure so no orphaned parts are left behind.
//!
//! Credentials come from the config when given, otherwise from the standard
//! AWS credential chain (env vars, `~/.aws/credentials`, IAM role, etc.).

use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, StorageClass};
use aws_sdk_s3::Client;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tracing::{debug, info, warn};

use super::backend::{file_md5_hex, object_key, UploadTransport};

/// User metadata key carrying the whole-file MD5.
const MD5_METADATA_KEY: &str = "md5";

/// Transport that writes objects through the S3 API.
pub struct S3Transport {
    client: Client,
    /// `None` disables multipart uploads entirely.
    part_size: Option<u64>,
}

impl S3Transport {
    /// Create a new S3 transport.
    ///
    /// `part_size` of `None` makes every upload a single `PutObject`; this
    /// is the small-file transport.
    pub async fn new(
        region: String,
        endpoint_url: Option<String>,
        use_path_style: bool,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        part_size: Option<u64>,
    ) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()));

        if let Some(ref endpoint) = endpoint_url {
            config_loader = config_loader.endpoint_url(endpoint);
        }

        if let (Some(ref ak), Some(ref sk)) = (&access_key_id, &secret_access_key) {
            let creds = aws_sdk_s3::config::Credentials::new(
                ak,
                sk,
                None, // session_token
                None, // expiry
                "objmigrate-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            region = %region,
            endpoint = endpoint_url.as_deref().unwrap_or("default"),
            multipart = part_size.is_some(),
            "S3 transport initialized"
        );

        Ok(Self::from_client(client, part_size))
    }

    /// Wrap an already-built client.
    pub fn from_client(client: Client, part_size: Option<u64>) -> Self {
        Self { client, part_size }
    }

    /// Map an AWS SDK error to an anyhow error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> anyhow::Error {
        anyhow::anyhow!("S3 {context}: {err}")
    }

    fn metadata(md5_hex: Option<String>) -> Option<HashMap<String, String>> {
        md5_hex.map(|md5| HashMap::from([(MD5_METADATA_KEY.to_string(), md5)]))
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        local_file: &Path,
        storage_class: StorageClass,
        metadata: Option<HashMap<String, String>>,
    ) -> anyhow::Result<String> {
        debug!(bucket = %bucket, key = %key, "S3 put_object");

        let body = ByteStream::from_path(local_file)
            .await
            .map_err(|e| Self::map_sdk_error("put_object body", e))?;

        let resp = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .storage_class(storage_class)
            .set_metadata(metadata)
            .body(body)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error("put_object", e.into_service_error()))?;

        Ok(resp.e_tag().unwrap_or("").to_string())
    }

    #[allow(clippy::too_many_arguments)]
    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        local_file: &Path,
        file_len: u64,
        part_size: u64,
        storage_class: StorageClass,
        metadata: Option<HashMap<String, String>>,
    ) -> anyhow::Result<String> {
        let create_resp = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .storage_class(storage_class)
            .set_metadata(metadata)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error("create_multipart_upload", e.into_service_error()))?;

        let upload_id = create_resp
            .upload_id()
            .ok_or_else(|| anyhow::anyhow!("S3 did not return an upload ID"))?
            .to_string();

        debug!(
            bucket = %bucket,
            key = %key,
            upload_id = %upload_id,
            "S3 multipart upload started"
        );

        let result = self
            .upload_parts(bucket, key, &upload_id, local_file, file_len, part_size)
            .await;

        match result {
            Ok(etag) => Ok(etag),
            Err(e) => {
                warn!(
                    upload_id = %upload_id,
                    error = %e,
                    "Aborting S3 multipart upload"
                );
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(error = %abort_err, "Failed to abort S3 multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        local_file: &Path,
        file_len: u64,
        part_size: u64,
    ) -> anyhow::Result<String> {
        let mut completed_parts = Vec::new();

        for (part_number, offset, length) in plan_parts(file_len, part_size) {
            let body = ByteStream::read_from()
                .path(local_file)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .map_err(|e| Self::map_sdk_error("upload_part body", e))?;

            let resp = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("upload_part", e.into_service_error()))?;

            completed_parts.push(
                CompletedPart::builder()
                    .e_tag(resp.e_tag().unwrap_or(""))
                    .part_number(part_number)
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error("complete_multipart_upload", e.into_service_error()))?;

        Ok(resp.e_tag().unwrap_or("").to_string())
    }
}

impl UploadTransport for S3Transport {
    fn upload_file(
        &self,
        bucket: &str,
        dest_path: &str,
        local_file: &Path,
        storage_class: &str,
        attach_md5: bool,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = object_key(dest_path).to_string();
        let local_file = local_file.to_path_buf();
        let storage_class = StorageClass::from(storage_class);
        Box::pin(async move {
            let file_len = tokio::fs::metadata(&local_file).await?.len();

            let md5_hex = if attach_md5 {
                Some(file_md5_hex(&local_file).await?)
            } else {
                None
            };
            let metadata = Self::metadata(md5_hex);

            match self.part_size {
                Some(part_size) if file_len > part_size => {
                    self.put_multipart(
                        &bucket,
                        &key,
                        &local_file,
                        file_len,
                        part_size,
                        storage_class,
                        metadata,
                    )
                    .await
                }
                _ => {
                    self.put_single(&bucket, &key, &local_file, storage_class, metadata)
                        .await
                }
            }
        })
    }
}

/// Split a file into `(part_number, offset, length)` triples.
///
/// Part numbers start at 1. An empty file still yields one empty part.
fn plan_parts(file_len: u64, part_size: u64) -> Vec<(i32, u64, u64)> {
    let part_size = part_size.max(1);
    let mut parts = Vec::new();
    let mut offset = 0u64;
    let mut number = 1i32;
    loop {
        let length = part_size.min(file_len - offset);
        parts.push((number, offset, length));
        offset += length;
        number += 1;
        if offset >= file_len {
            break;
        }
    }
    parts
}
