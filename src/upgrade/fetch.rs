//! Artifact download into the staging slot.

use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::core::UpdateError;

/// Streams a remote artifact to disk.
///
/// Nothing about the payload is checked here beyond the HTTP status; that is
/// the verifier's job. A failed download never touches anything but the
/// staging file, which is removed again.
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
}

impl ArtifactFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
        })
    }

    /// Download `url` into `staging`, returning the number of bytes written.
    pub async fn download(&self, url: &str, staging: &Path) -> Result<u64, UpdateError> {
        info!("Downloading {} to {}", url, staging.display());

        let result = self.download_inner(url, staging).await;
        if result.is_err() && staging.exists() {
            let _ = fs::remove_file(staging).await;
        }
        result
    }

    async fn download_inner(&self, url: &str, staging: &Path) -> Result<u64, UpdateError> {
        let fail = |reason: String| UpdateError::Download {
            url: url.to_string(),
            reason,
        };

        let mut response =
            self.client.get(url).send().await.map_err(|e| fail(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("server returned HTTP {status}")));
        }

        if let Some(parent) = staging.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(format!("cannot create {}: {e}", parent.display())))?;
        }

        let mut file = fs::File::create(staging)
            .await
            .map_err(|e| fail(format!("cannot create {}: {e}", staging.display())))?;

        let mut written: u64 = 0;
        while let Some(chunk) =
            response.chunk().await.map_err(|e| fail(format!("transfer interrupted: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| fail(format!("cannot write {}: {e}", staging.display())))?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(|e| fail(e.to_string()))?;
        file.sync_all().await.map_err(|e| fail(e.to_string()))?;

        debug!("Downloaded {} bytes", written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_writes_staging() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/artifact")
            .with_status(200)
            .with_body(b"\x7fELF-payload")
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("work").join("agent.tmp");
        let fetcher = ArtifactFetcher::new(Duration::from_secs(5)).unwrap();

        let bytes = fetcher.download(&format!("{}/artifact", server.url()), &staging).await.unwrap();

        mock.assert_async().await;
        assert_eq!(bytes, 12);
        assert_eq!(std::fs::read(&staging).unwrap(), b"\x7fELF-payload");
    }

    #[tokio::test]
    async fn test_non_success_status_is_download_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock =
            server.mock("GET", "/missing").with_status(404).with_body("not found").create_async().await;

        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("agent.tmp");
        let fetcher = ArtifactFetcher::new(Duration::from_secs(5)).unwrap();

        let err = fetcher.download(&format!("{}/missing", server.url()), &staging).await.unwrap_err();

        assert!(matches!(err, UpdateError::Download { .. }));
        assert!(err.to_string().contains("404"));
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let temp = TempDir::new().unwrap();
        let fetcher = ArtifactFetcher::new(Duration::from_secs(2)).unwrap();

        let err = fetcher
            .download("http://127.0.0.1:1/agent", &temp.path().join("agent.tmp"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "download_error");
    }
}
