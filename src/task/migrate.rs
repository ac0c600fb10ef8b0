//! The per-object migration state machine.
//!
//! ```text
//! Init -> CheckRecord -> Skipped
//!                     -> SignUrl -> Download -> Verify -> Upload -> Record -> Done
//! SignUrl | Download | Verify | Upload | Record -> Failed
//! ```
//!
//! The ledger lookup happens before a limiter permit is taken, so skipped
//! objects never wait behind transfers.  The staging file is a drop guard
//! scoped to the transfer, so it is gone by the time [`MigrationTask::run`]
//! returns whatever state the task ended in.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use tracing::{debug, error, info};

use super::staging::StagingFile;
use super::{TaskOutcome, TaskState};
use crate::errors::MigrateError;
use crate::metrics::{DOWNLOAD_DURATION_SECONDS, UPLOAD_DURATION_SECONDS};
use crate::record::MigrationRecord;
use crate::source::signer::source_url;
use crate::source::SourceObjectRef;
use crate::MigrationContext;

/// Lifetime of signed download URLs.
pub const SIGNED_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// Destination path of `key`.
///
/// The base name is the part of the key after the source prefix's last `/`
/// (so objects nested below the prefix keep their sub-path).  Both key and
/// prefix are compared without a leading `/`.  A key outside the prefix is
/// used whole.
pub fn build_dest_path(src_prefix: &str, dest_prefix: &str, key: &str) -> String {
    let key = key.strip_prefix('/').unwrap_or(key);
    let src_prefix = src_prefix.strip_prefix('/').unwrap_or(src_prefix);
    let prefix_dir = match src_prefix.rfind('/') {
        Some(idx) => &src_prefix[..=idx],
        None => "",
    };
    let base_name = key.strip_prefix(prefix_dir).unwrap_or(key);

    if dest_prefix.ends_with('/') {
        format!("{dest_prefix}{base_name}")
    } else {
        format!("{dest_prefix}/{base_name}")
    }
}

/// Migrates one source object.
pub struct MigrationTask {
    ctx: Arc<MigrationContext>,
    object: SourceObjectRef,
    state: TaskState,
}

impl MigrationTask {
    pub fn new(ctx: Arc<MigrationContext>, object: SourceObjectRef) -> Self {
        Self {
            ctx,
            object,
            state: TaskState::Init,
        }
    }

    pub fn dest_path(&self) -> String {
        let settings = &self.ctx.settings;
        build_dest_path(&settings.src_prefix, &settings.dest_prefix, &self.object.key)
    }

    /// The ledger identity of this object.
    pub fn record(&self) -> MigrationRecord {
        let settings = &self.ctx.settings;
        MigrationRecord::new(
            settings.kind,
            settings.dest_bucket.clone(),
            self.dest_path(),
            self.object.etag.clone(),
            self.object.size,
        )
    }

    fn enter(&mut self, state: TaskState) {
        debug!(key = %self.object.key, from = %self.state, to = %state, "Task state");
        self.state = state;
    }

    /// Run to a terminal state. Never panics on I/O failure and never
    /// returns an error: failures are carried in the outcome.
    pub async fn run(mut self) -> TaskOutcome {
        self.enter(TaskState::CheckRecord);
        let record = self.record();
        let record_key = record.key();

        let recorded = self.ctx.ledger.exists(&record_key).await;
        match recorded {
            Ok(true) => {
                self.enter(TaskState::Skipped);
                info!("[skip] task_info: {}", record_key);
                return TaskOutcome::Skipped { record_key };
            }
            Ok(false) => {}
            Err(e) => return self.fail(record_key, MigrateError::Persistence(e)),
        }

        // Held until the task returns, whichever way it ends.
        let limiter = Arc::clone(&self.ctx.limiter);
        let _permit = match limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.fail(
                    record_key,
                    MigrateError::Configuration {
                        message: "concurrency limiter closed".to_string(),
                    },
                )
            }
        };

        match self.transfer(&record).await {
            Ok(bytes) => {
                self.enter(TaskState::Done);
                info!("[ok] task_info: {}", record_key);
                TaskOutcome::Done { record_key, bytes }
            }
            Err(e) => self.fail(record_key, e),
        }
    }

    fn fail(mut self, record_key: String, error: MigrateError) -> TaskOutcome {
        let stage = self.state;
        self.enter(TaskState::Failed);
        error!(
            stage = %stage,
            kind = error.kind(),
            "[fail] task_info: {}, error: {}",
            record_key,
            error
        );
        TaskOutcome::Failed {
            record_key,
            stage,
            error,
        }
    }

    /// Sign, download, verify, upload, record. The staging file is removed
    /// when this returns.
    async fn transfer(&mut self, record: &MigrationRecord) -> Result<u64, MigrateError> {
        self.enter(TaskState::SignUrl);
        let base_url = source_url(&self.ctx.settings.src_endpoint, &self.object.key);
        let url = self.ctx.signer.sign(&base_url, SIGNED_URL_EXPIRY)?;

        self.enter(TaskState::Download);
        let staging = StagingFile::create(&self.ctx.settings.temp_folder)
            .await
            .map_err(|e| MigrateError::Download {
                url: url.clone(),
                message: format!("cannot prepare staging directory: {e}"),
            })?;

        let started = Instant::now();
        match self.ctx.downloader.download(&url, staging.path()).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(MigrateError::Download {
                    url,
                    message: "source reported failure".to_string(),
                })
            }
            Err(e) => {
                return Err(MigrateError::Download {
                    url,
                    message: format!("{e:#}"),
                })
            }
        }
        histogram!(DOWNLOAD_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        self.enter(TaskState::Verify);
        let bytes = verify_staged(staging.path(), self.object.size).await?;

        self.enter(TaskState::Upload);
        let settings = &self.ctx.settings;
        let started = Instant::now();
        let etag = self
            .ctx
            .transports
            .select(bytes)
            .upload_file(
                &settings.dest_bucket,
                &record.dest_path,
                staging.path(),
                &settings.storage_class,
                settings.attach_md5,
            )
            .await
            .map_err(MigrateError::Upload)?;
        histogram!(UPLOAD_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        debug!(dest = %record.dest_path, etag = %etag, "Upload confirmed");

        self.enter(TaskState::Record);
        self.ctx
            .ledger
            .insert(record)
            .await
            .map_err(MigrateError::Persistence)?;

        Ok(bytes)
    }
}

/// Check that the staged copy exists and has the listed size.
async fn verify_staged(path: &Path, expected: u64) -> Result<u64, MigrateError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta,
        _ => {
            return Err(MigrateError::MissingStagingFile {
                path: path.to_path_buf(),
            })
        }
    };
    if meta.len() != expected {
        return Err(MigrateError::SizeMismatch {
            expected,
            actual: meta.len(),
        });
    }
    Ok(meta.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::memory::MemoryLedger;
    use crate::record::{MigrateKind, RecordLedger};
    use crate::source::{Downloader, QiniuSigner};
    use crate::task::TaskSettings;
    use crate::transport::{TransportSet, UploadTransport};
    use std::future::Future;
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Writes `len` bytes, or reports/raises failure.
    struct FakeDownloader {
        len: usize,
        result: Result<bool, &'static str>,
        calls: AtomicUsize,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl FakeDownloader {
        fn writing(len: usize) -> Self {
            Self {
                len,
                result: Ok(true),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(result: Result<bool, &'static str>, partial: usize) -> Self {
            Self {
                result,
                ..Self::writing(partial)
            }
        }
    }

    impl Downloader for FakeDownloader {
        fn download(
            &self,
            _url: &str,
            dest: &Path,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
            let dest = dest.to_path_buf();
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.seen.lock().unwrap().push(dest.clone());
                std::fs::write(&dest, vec![b'x'; self.len])?;
                self.result.map_err(|m| anyhow::anyhow!(m))
            })
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        /// (bucket, dest_path, size, storage_class, attach_md5)
        uploads: Mutex<Vec<(String, String, u64, String, bool)>>,
        fail: bool,
    }

    impl UploadTransport for FakeTransport {
        fn upload_file(
            &self,
            bucket: &str,
            dest_path: &str,
            local_file: &Path,
            storage_class: &str,
            attach_md5: bool,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
            let entry = (
                bucket.to_string(),
                dest_path.to_string(),
                std::fs::metadata(local_file).map(|m| m.len()).unwrap_or(0),
                storage_class.to_string(),
                attach_md5,
            );
            Box::pin(async move {
                if self.fail {
                    anyhow::bail!("destination unavailable");
                }
                self.uploads.lock().unwrap().push(entry);
                Ok("\"etag\"".to_string())
            })
        }
    }

    struct BrokenLedger;

    impl RecordLedger for BrokenLedger {
        fn exists(
            &self,
            _record_key: &str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
            Box::pin(async { Ok(false) })
        }

        fn insert(
            &self,
            _record: &MigrationRecord,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
            Box::pin(async { anyhow::bail!("disk full") })
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        temp_folder: PathBuf,
        downloader: Arc<FakeDownloader>,
        transport: Arc<FakeTransport>,
        ledger: Arc<dyn RecordLedger>,
        ctx: Arc<MigrationContext>,
    }

    fn harness_with(
        downloader: FakeDownloader,
        transport: FakeTransport,
        ledger: Arc<dyn RecordLedger>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let temp_folder = dir.path().join("staging");
        let downloader = Arc::new(downloader);
        let transport = Arc::new(transport);
        let ctx = Arc::new(MigrationContext {
            settings: TaskSettings {
                kind: MigrateKind::Qiniu,
                dest_bucket: "bkt".to_string(),
                dest_prefix: "out".to_string(),
                src_prefix: "/a/".to_string(),
                src_endpoint: "cdn.example.com".to_string(),
                temp_folder: temp_folder.clone(),
                storage_class: "ARCHIVE".to_string(),
                attach_md5: true,
            },
            signer: Arc::new(QiniuSigner::new("AK", "SK")),
            downloader: downloader.clone(),
            transports: TransportSet::single(transport.clone()),
            ledger: Arc::clone(&ledger),
            limiter: Arc::new(Semaphore::new(1)),
        });
        Harness {
            _dir: dir,
            temp_folder,
            downloader,
            transport,
            ledger,
            ctx,
        }
    }

    fn harness(downloader: FakeDownloader) -> Harness {
        harness_with(downloader, FakeTransport::default(), Arc::new(MemoryLedger::new()))
    }

    fn object() -> SourceObjectRef {
        SourceObjectRef::new("/a/file.txt", 1024, "Fh8x")
    }

    fn staging_is_empty(h: &Harness) -> bool {
        match std::fs::read_dir(&h.temp_folder) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    #[test]
    fn test_dest_path_joins_with_separator() {
        assert_eq!(build_dest_path("/a/", "out", "/a/file.txt"), "out/file.txt");
        assert_eq!(build_dest_path("/a/", "out/", "a/file.txt"), "out/file.txt");
    }

    #[test]
    fn test_dest_path_keeps_sub_path_below_prefix() {
        // Deliberate: nested keys keep their sub-path so they cannot collide
        // (see "Base name of the destination path" in DESIGN.md).
        assert_eq!(build_dest_path("/a/", "out", "/a/b/file.txt"), "out/b/file.txt");
        assert_eq!(build_dest_path("a/b/", "/", "a/b/file.txt"), "/file.txt");
    }

    #[test]
    fn test_dest_path_prefix_without_separator() {
        // Whole key is the base name when the prefix has no directory part.
        assert_eq!(build_dest_path("", "out", "x/y.txt"), "out/x/y.txt");
        assert_eq!(build_dest_path("img", "out", "img-1.png"), "out/img-1.png");
    }

    #[test]
    fn test_dest_path_partial_name_prefix() {
        // Prefix "a/ph" selects keys by name; only the directory part is removed.
        assert_eq!(build_dest_path("a/ph", "out", "a/photo.jpg"), "out/photo.jpg");
    }

    #[test]
    fn test_dest_path_key_outside_prefix_used_whole() {
        assert_eq!(build_dest_path("a/", "out", "z/file"), "out/z/file");
    }

    #[test]
    fn test_dest_path_is_deterministic() {
        let first = build_dest_path("/a/", "out", "/a/file.txt");
        let second = build_dest_path("/a/", "out", "/a/file.txt");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_full_pipeline_success() {
        let h = harness(FakeDownloader::writing(1024));
        let task = MigrationTask::new(Arc::clone(&h.ctx), object());
        let record_key = task.record().key();

        let outcome = task.run().await;

        match outcome {
            TaskOutcome::Done { bytes, .. } => assert_eq!(bytes, 1024),
            other => panic!("expected done, got {other:?}"),
        }
        let uploads = h.transport.uploads.lock().unwrap().clone();
        assert_eq!(
            uploads,
            vec![(
                "bkt".to_string(),
                "out/file.txt".to_string(),
                1024,
                "ARCHIVE".to_string(),
                true
            )]
        );
        assert!(h.ledger.exists(&record_key).await.unwrap());
        assert!(staging_is_empty(&h));
        assert_eq!(h.ctx.limiter.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_recorded_object_is_skipped_without_io() {
        let h = harness(FakeDownloader::writing(1024));
        let record = MigrationTask::new(Arc::clone(&h.ctx), object()).record();
        h.ledger.insert(&record).await.unwrap();

        // Hold the only permit: a skipped task must not need one.
        let _held = h.ctx.limiter.acquire().await.unwrap();
        let outcome = MigrationTask::new(Arc::clone(&h.ctx), object()).run().await;

        assert!(matches!(outcome, TaskOutcome::Skipped { .. }));
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 0);
        assert!(h.transport.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_size_mismatch_never_uploads() {
        let h = harness(FakeDownloader::writing(900));
        let outcome = MigrationTask::new(Arc::clone(&h.ctx), object()).run().await;

        match outcome {
            TaskOutcome::Failed { stage, error, .. } => {
                assert_eq!(stage, TaskState::Verify);
                assert!(matches!(
                    error,
                    MigrateError::SizeMismatch {
                        expected: 1024,
                        actual: 900
                    }
                ));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(h.transport.uploads.lock().unwrap().is_empty());
        assert!(staging_is_empty(&h));
        let seen = h.downloader.seen.lock().unwrap().clone();
        assert!(!seen[0].exists());
    }

    #[tokio::test]
    async fn test_download_error_removes_partial_file() {
        let h = harness(FakeDownloader::failing(Err("connection reset"), 100));
        let outcome = MigrationTask::new(Arc::clone(&h.ctx), object()).run().await;

        match outcome {
            TaskOutcome::Failed { stage, error, .. } => {
                assert_eq!(stage, TaskState::Download);
                assert!(error.to_string().contains("connection reset"));
                assert!(error.to_string().contains("token=AK:"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(staging_is_empty(&h));
        assert!(h.transport.uploads.lock().unwrap().is_empty());
        assert_eq!(h.ctx.limiter.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_download_reported_failure() {
        let h = harness(FakeDownloader::failing(Ok(false), 0));
        let outcome = MigrationTask::new(Arc::clone(&h.ctx), object()).run().await;
        assert!(matches!(
            outcome,
            TaskOutcome::Failed {
                stage: TaskState::Download,
                error: MigrateError::Download { .. },
                ..
            }
        ));
        assert!(staging_is_empty(&h));
    }

    #[tokio::test]
    async fn test_missing_staging_file_fails_verify() {
        let h = harness(FakeDownloader::writing(1024));
        let ctx = Arc::new(MigrationContext {
            downloader: Arc::new(NoWrite),
            settings: h.ctx.settings.clone(),
            signer: Arc::clone(&h.ctx.signer),
            transports: h.ctx.transports.clone(),
            ledger: Arc::clone(&h.ctx.ledger),
            limiter: Arc::clone(&h.ctx.limiter),
        });

        let outcome = MigrationTask::new(ctx, object()).run().await;
        assert!(matches!(
            outcome,
            TaskOutcome::Failed {
                stage: TaskState::Verify,
                error: MigrateError::MissingStagingFile { .. },
                ..
            }
        ));
        assert!(h.transport.uploads.lock().unwrap().is_empty());
    }

    struct NoWrite;

    impl Downloader for NoWrite {
        fn download(
            &self,
            _url: &str,
            _dest: &Path,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
            Box::pin(async { Ok(true) })
        }
    }

    #[tokio::test]
    async fn test_upload_failure_records_nothing() {
        let h = harness_with(
            FakeDownloader::writing(1024),
            FakeTransport {
                fail: true,
                ..Default::default()
            },
            Arc::new(MemoryLedger::new()),
        );
        let task = MigrationTask::new(Arc::clone(&h.ctx), object());
        let record_key = task.record().key();

        let outcome = task.run().await;
        assert!(matches!(
            outcome,
            TaskOutcome::Failed {
                stage: TaskState::Upload,
                error: MigrateError::Upload(_),
                ..
            }
        ));
        assert!(!h.ledger.exists(&record_key).await.unwrap());
        assert!(staging_is_empty(&h));
    }

    #[tokio::test]
    async fn test_ledger_insert_failure_is_persistence_error() {
        let h = harness_with(
            FakeDownloader::writing(1024),
            FakeTransport::default(),
            Arc::new(BrokenLedger),
        );
        let outcome = MigrationTask::new(Arc::clone(&h.ctx), object()).run().await;

        match outcome {
            TaskOutcome::Failed { stage, error, .. } => {
                assert_eq!(stage, TaskState::Record);
                assert_eq!(error.kind(), "persistence");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        // The upload itself went through; a re-run will overwrite it.
        assert_eq!(h.transport.uploads.lock().unwrap().len(), 1);
        assert!(staging_is_empty(&h));
    }

    #[tokio::test]
    async fn test_bad_credentials_fail_before_download() {
        let h = harness(FakeDownloader::writing(1024));
        let ctx = Arc::new(MigrationContext {
            signer: Arc::new(QiniuSigner::new("", "")),
            settings: h.ctx.settings.clone(),
            downloader: h.downloader.clone(),
            transports: h.ctx.transports.clone(),
            ledger: Arc::clone(&h.ctx.ledger),
            limiter: Arc::clone(&h.ctx.limiter),
        });

        let outcome = MigrationTask::new(ctx, object()).run().await;
        assert!(matches!(
            outcome,
            TaskOutcome::Failed {
                stage: TaskState::SignUrl,
                error: MigrateError::Configuration { .. },
                ..
            }
        ));
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 0);
    }
}
