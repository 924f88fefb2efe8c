//! Integrity verification of staged artifacts.
//!
//! A staged download has to pass two gates before it may replace the live
//! binary:
//!
//! 1. **Format**: the file starts with the ELF magic bytes. This catches the
//!    common failure where a proxy or the control plane answers with an HTML
//!    error page and a success status.
//! 2. **Checksum**: only when the request carried one. A bare hex value is
//!    compared with the file's MD5; a value prefixed `sha256:` with its
//!    SHA-256. The comparison is exact, including case.
//!
//! On any failure the staged file is deleted before the error is returned.

use md5::Context as Md5Context;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::constants::ELF_MAGIC;
use crate::core::UpdateError;

const SHA256_PREFIX: &str = "sha256:";

/// Read buffer for hashing; artifacts are tens of megabytes.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Checks that a staged file is a genuine executable with the expected digest.
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Run every applicable check, deleting `staged` if one fails.
    pub async fn verify(staged: &Path, expected_checksum: Option<&str>) -> Result<(), UpdateError> {
        let result = Self::run_checks(staged, expected_checksum).await;
        if let Err(e) = &result {
            warn!("Rejecting staged artifact: {}", e);
            if let Err(remove_err) = fs::remove_file(staged).await {
                debug!("Could not remove {}: {}", staged.display(), remove_err);
            }
        }
        result
    }

    async fn run_checks(staged: &Path, expected_checksum: Option<&str>) -> Result<(), UpdateError> {
        Self::verify_format(staged).await?;

        match expected_checksum {
            Some(expected) => Self::verify_checksum(staged, expected).await,
            None => {
                info!("No checksum supplied; accepting artifact on format check alone");
                Ok(())
            }
        }
    }

    /// Confirm the file starts with the ELF magic bytes.
    pub async fn verify_format(path: &Path) -> Result<(), UpdateError> {
        let not_executable = |header: String| UpdateError::NotAnExecutable {
            path: path.to_path_buf(),
            header,
        };

        let mut file =
            fs::File::open(path).await.map_err(|e| not_executable(format!("unreadable: {e}")))?;

        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            let n = file
                .read(&mut header[filled..])
                .await
                .map_err(|e| not_executable(format!("unreadable: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if header[..filled] != ELF_MAGIC {
            return Err(not_executable(hex::encode(&header[..filled])));
        }

        debug!("{} has a valid executable header", path.display());
        Ok(())
    }

    /// Hex MD5 digest of the file.
    pub async fn compute_md5(path: &Path) -> std::io::Result<String> {
        let mut context = Md5Context::new();
        Self::for_each_chunk(path, |chunk| context.consume(chunk)).await?;
        Ok(format!("{:x}", context.compute()))
    }

    /// SHA-256 digest of the file, formatted `sha256:<hex>`.
    pub async fn compute_sha256(path: &Path) -> std::io::Result<String> {
        let mut hasher = Sha256::new();
        Self::for_each_chunk(path, |chunk| hasher.update(chunk)).await?;
        Ok(format!("{SHA256_PREFIX}{}", hex::encode(hasher.finalize())))
    }

    async fn for_each_chunk(path: &Path, mut f: impl FnMut(&[u8])) -> std::io::Result<()> {
        let mut file = fs::File::open(path).await?;
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            f(&buf[..n]);
        }
    }

    /// Compare the file's digest with `expected`.
    pub async fn verify_checksum(path: &Path, expected: &str) -> Result<(), UpdateError> {
        info!("Verifying checksum for {}", path.display());

        let actual = if expected.starts_with(SHA256_PREFIX) {
            Self::compute_sha256(path).await
        } else {
            Self::compute_md5(path).await
        }
        .map_err(|e| UpdateError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: format!("<unreadable: {e}>"),
        })?;

        if actual != expected {
            return Err(UpdateError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }

        info!("Checksum verification successful");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn staged(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[tokio::test]
    async fn test_compute_digests() {
        let file = staged(b"Hello, World!");

        assert_eq!(
            IntegrityVerifier::compute_md5(file.path()).await.unwrap(),
            "65a8e27d8879283831b664bd8b7f0ad4"
        );
        assert_eq!(
            IntegrityVerifier::compute_sha256(file.path()).await.unwrap(),
            "sha256:dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[tokio::test]
    async fn test_html_error_page_is_rejected() {
        let file = staged(b"<html><body>502 Bad Gateway</body></html>");
        let path = file.path().to_path_buf();

        let err = IntegrityVerifier::verify(&path, None).await.unwrap_err();

        assert_eq!(
            err,
            UpdateError::NotAnExecutable {
                path: path.clone(),
                header: "3c68746d".to_string(),
            }
        );
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_truncated_file_is_rejected() {
        let file = staged(b"\x7fE");
        let err = IntegrityVerifier::verify_format(file.path()).await.unwrap_err();
        assert!(matches!(err, UpdateError::NotAnExecutable { header, .. } if header == "7f45"));
    }

    #[tokio::test]
    async fn test_md5_match() {
        let content = b"\x7fELF binary";
        let file = staged(content);
        let expected = format!("{:x}", md5::compute(content));

        IntegrityVerifier::verify(file.path(), Some(&expected)).await.unwrap();
        assert!(file.path().exists());
    }

    #[tokio::test]
    async fn test_sha256_match() {
        let file = staged(b"\x7fELF binary");
        let expected = IntegrityVerifier::compute_sha256(file.path()).await.unwrap();

        IntegrityVerifier::verify(file.path(), Some(&expected)).await.unwrap();
    }

    #[tokio::test]
    async fn test_checksum_mismatch_deletes_staging() {
        let file = staged(b"\x7fELF binary");
        let path = file.path().to_path_buf();

        let err = IntegrityVerifier::verify(&path, Some("00000000000000000000000000000000"))
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::ChecksumMismatch { .. }));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_checksum_comparison_is_case_sensitive() {
        let content = b"\x7fELF binary";
        let file = staged(content);
        let upper = format!("{:x}", md5::compute(content)).to_uppercase();

        let err = IntegrityVerifier::verify_checksum(file.path(), &upper).await.unwrap_err();
        assert!(matches!(err, UpdateError::ChecksumMismatch { .. }));
    }
}
