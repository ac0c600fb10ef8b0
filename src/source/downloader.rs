//! Downloads signed source URLs into staging files.

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Fetches a URL into a local file.
pub trait Downloader: Send + Sync + 'static {
    /// Download `url` into `dest`, replacing any previous content.
    ///
    /// Returns `Ok(false)` when the source answered but refused the
    /// request, and `Err` when the transfer itself broke.
    fn download(
        &self,
        url: &str,
        dest: &Path,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;
}

enum Fetch {
    Complete(u64),
    Rejected(StatusCode),
}

/// `reqwest`-backed downloader with bounded retries.
#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
    retries: u32,
    retry_backoff: Duration,
}

impl HttpDownloader {
    /// Build a downloader.
    ///
    /// `read_timeout` bounds each wait for body data rather than the whole
    /// transfer, so large objects on slow links still complete. Transport
    /// errors and 5xx answers are retried `retries` more times.
    pub fn new(
        connect_timeout: Duration,
        read_timeout: Duration,
        retries: u32,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()?;
        Ok(Self {
            client,
            retries,
            retry_backoff: Duration::from_secs(1),
        })
    }

    /// Base delay between attempts; attempt `n` waits `n * backoff`.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    async fn fetch_once(&self, url: &str, dest: &Path) -> anyhow::Result<Fetch> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Ok(Fetch::Rejected(status));
        }

        // Truncates whatever a failed earlier attempt left behind.
        let mut file = File::create(dest).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(Fetch::Complete(written))
    }
}

impl Downloader for HttpDownloader {
    fn download(
        &self,
        url: &str,
        dest: &Path,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let url = url.to_string();
        let dest = dest.to_path_buf();
        Box::pin(async move {
            let mut attempt = 0u32;
            loop {
                match self.fetch_once(&url, &dest).await {
                    Ok(Fetch::Complete(bytes)) => {
                        debug!(path = %dest.display(), bytes, "Download complete");
                        return Ok(true);
                    }
                    Ok(Fetch::Rejected(status))
                        if status.is_server_error() && attempt < self.retries =>
                    {
                        warn!(status = %status, attempt, "Source error, retrying download");
                    }
                    Ok(Fetch::Rejected(status)) => {
                        debug!(status = %status, "Source rejected download");
                        return Ok(false);
                    }
                    Err(e) if attempt < self.retries => {
                        warn!(error = %e, attempt, "Download interrupted, retrying");
                    }
                    Err(e) => return Err(e),
                }
                attempt += 1;
                tokio::time::sleep(self.retry_backoff * attempt).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn downloader(retries: u32) -> HttpDownloader {
        HttpDownloader::new(Duration::from_secs(5), Duration::from_secs(5), retries)
            .unwrap()
            .with_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_download_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/obj"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("staged");
        let ok = downloader(0)
            .download(&format!("{}/obj", server.uri()), &dest)
            .await
            .unwrap();

        assert!(ok);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_not_found_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let ok = downloader(3)
            .download(&format!("{}/missing", server.uri()), &dir.path().join("x"))
            .await
            .unwrap();

        assert!(!ok);
        assert!(!dir.path().join("x").exists());
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("done"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("staged");
        let ok = downloader(2)
            .download(&format!("{}/flaky", server.uri()), &dest)
            .await
            .unwrap();

        assert!(ok);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "done");
    }

    #[tokio::test]
    async fn test_server_error_after_retries_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let ok = downloader(1)
            .download(&format!("{}/down", server.uri()), &dir.path().join("x"))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let dir = tempfile::tempdir().unwrap();
        // Port 9 (discard) on localhost is closed in test environments.
        let result = downloader(0)
            .download("http://127.0.0.1:9/obj", &dir.path().join("x"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stalled_source_hits_read_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let result = HttpDownloader::new(Duration::from_secs(5), Duration::from_millis(200), 0)
            .unwrap()
            .download(&format!("{}/slow", server.uri()), &dir.path().join("x"))
            .await;
        assert!(result.is_err());
    }
}
