//! Configuration loading and types for objmigrate.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of a
//! migration run: the worker budget, the source provider, the destination
//! store, the download client, the record ledger, and logging/metrics.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::record::MigrateKind;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Run-wide settings.
    #[serde(default)]
    pub migrate: MigrateConfig,

    /// Source provider settings.
    pub source: SourceConfig,

    /// Destination store settings.
    pub destination: DestinationConfig,

    /// Download client settings.
    #[serde(default)]
    pub download: DownloadConfig,

    /// Record ledger settings.
    #[serde(default)]
    pub record: RecordConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Run-wide settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrateConfig {
    /// Migration-kind tag written into every record key.
    #[serde(default)]
    pub kind: MigrateKind,

    /// Number of tasks allowed to transfer at the same time.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Directory holding staging files.
    #[serde(default = "default_temp_folder")]
    pub temp_folder: PathBuf,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            kind: MigrateKind::default(),
            threads: default_threads(),
            temp_folder: default_temp_folder(),
        }
    }
}

/// Source provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Download domain bound to the source bucket (scheme optional).
    pub endpoint: String,

    /// Key prefix the listing was taken under.
    #[serde(default)]
    pub prefix: String,

    /// Access key used to sign download URLs.
    #[serde(alias = "ak")]
    pub access_key: String,

    /// Secret key used to sign download URLs.
    #[serde(alias = "sk")]
    pub secret_key: String,
}

/// Destination store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    /// Destination bucket name.
    pub bucket: String,

    /// Path prefix objects are written under.
    #[serde(default = "default_dest_prefix", alias = "cos_path")]
    pub prefix: String,

    /// Storage class applied at upload time.
    #[serde(default = "default_storage_class")]
    pub storage_class: String,

    /// Attach the whole-file MD5 to each uploaded object.
    #[serde(default = "default_true", alias = "entire_file_md5_attached")]
    pub attach_md5: bool,

    /// Files at or above this size use the big-file transport.
    #[serde(default = "default_big_file_threshold")]
    pub big_file_threshold: u64,

    /// Backend type: `s3` or `local`.
    #[serde(default = "default_destination_backend")]
    pub backend: String,

    /// S3-compatible backend configuration.
    #[serde(default)]
    pub s3: Option<S3DestinationConfig>,

    /// Local filesystem backend configuration.
    #[serde(default)]
    pub local: LocalDestinationConfig,
}

/// S3-compatible destination configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct S3DestinationConfig {
    /// Region of the destination bucket.
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3-compatible endpoint (e.g. COS, MinIO).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
    /// Part size for multipart uploads of big files.
    #[serde(default = "default_part_size")]
    pub part_size: u64,
}

/// Local filesystem destination configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalDestinationConfig {
    /// Root directory buckets are created under.
    #[serde(default = "default_local_root")]
    pub root_dir: String,
}

impl Default for LocalDestinationConfig {
    fn default() -> Self {
        Self {
            root_dir: default_local_root(),
        }
    }
}

/// Download client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    /// Connection establishment timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Longest pause between body reads, in seconds. A transfer that keeps
    /// making progress is never cut off.
    #[serde(default = "default_download_timeout", alias = "read_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts on transport errors and 5xx answers.
    #[serde(default = "default_download_retries")]
    pub retries: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_download_timeout(),
            retries: default_download_retries(),
        }
    }
}

/// Record ledger settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordConfig {
    /// Path to the SQLite ledger file.
    #[serde(default = "default_record_path")]
    pub path: String,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            path: default_record_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Write the Prometheus text exposition here when the run ends.
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_path: None,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_threads() -> usize {
    8
}

fn default_temp_folder() -> PathBuf {
    PathBuf::from("/tmp/objmigrate")
}

fn default_dest_prefix() -> String {
    "/".to_string()
}

fn default_storage_class() -> String {
    "STANDARD".to_string()
}

fn default_big_file_threshold() -> u64 {
    64 * 1024 * 1024
}

fn default_destination_backend() -> String {
    "s3".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_part_size() -> u64 {
    8 * 1024 * 1024
}

fn default_local_root() -> String {
    "./data/objects".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_download_timeout() -> u64 {
    60
}

fn default_download_retries() -> u32 {
    3
}

fn default_record_path() -> String {
    "./data/records.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Validation --------------------------------------------------------------

impl Config {
    /// Reject settings that would make every task fail.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.destination.bucket.trim().is_empty() {
            anyhow::bail!("destination.bucket must not be empty");
        }
        if self.source.endpoint.trim().is_empty() {
            anyhow::bail!("source.endpoint must not be empty");
        }
        if self.source.access_key.is_empty() || self.source.secret_key.is_empty() {
            anyhow::bail!("source.access_key and source.secret_key are required");
        }
        if self.migrate.threads == 0 {
            anyhow::bail!("migrate.threads must be at least 1");
        }
        if let Some(s3) = &self.destination.s3 {
            // S3 rejects multipart parts under 5 MiB (except the last).
            if s3.part_size < 5 * 1024 * 1024 {
                anyhow::bail!("destination.s3.part_size must be at least 5 MiB");
            }
        }
        Ok(())
    }
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}
