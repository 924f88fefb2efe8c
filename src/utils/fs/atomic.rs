//! Atomic file operations using the temp-and-rename strategy.
//!
//! A rename within one filesystem is indivisible: any process opening or
//! exec'ing the destination sees either the old complete file or the new
//! complete file, never a partial write. Everything that replaces a file the
//! agent or its supervisor may be reading goes through here.

use crate::utils::fs::dirs::ensure_dir;
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// `EXDEV` on Linux and macOS.
const CROSS_DEVICE_ERRNO: i32 = 18;

/// Whether an IO error means source and destination are on different filesystems.
#[must_use]
pub fn is_cross_device(error: &io::Error) -> bool {
    error.raw_os_error() == Some(CROSS_DEVICE_ERRNO)
}

/// Sibling temp path used while replacing `path`.
fn sibling_temp(path: &Path, suffix: &str) -> PathBuf {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    path.with_file_name(format!(".{name}.{suffix}"))
}

/// Write `content` to `path` atomically, creating the parent directory.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let temp_path = sibling_temp(path, "tmp");

    {
        let mut file = fs::File::create(&temp_path).with_context(|| {
            format!(
                "Failed to create temp file: {}\n\nCheck file permissions and that directory exists",
                temp_path.display()
            )
        })?;

        file.write_all(content)
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;

        file.sync_all().with_context(|| "Failed to sync file to disk")?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}

/// Copy `src` over `dst` atomically, preserving `src`'s permissions.
///
/// The bytes are first copied to a hidden sibling of `dst` and then renamed
/// into place. Writing into `dst` directly would fail with `ETXTBSY` while
/// `dst` is a running executable and could leave a torn file behind.
pub fn atomic_copy(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }

    let temp_path = sibling_temp(dst, "partial");

    let result = (|| -> Result<()> {
        fs::copy(src, &temp_path).with_context(|| {
            format!("Failed to copy {} to {}", src.display(), temp_path.display())
        })?;

        let permissions = fs::metadata(src)
            .with_context(|| format!("Failed to read metadata of {}", src.display()))?
            .permissions();
        fs::set_permissions(&temp_path, permissions)
            .with_context(|| format!("Failed to set permissions on {}", temp_path.display()))?;

        fs::File::open(&temp_path)
            .and_then(|f| f.sync_all())
            .with_context(|| format!("Failed to sync {}", temp_path.display()))?;

        fs::rename(&temp_path, dst)
            .with_context(|| format!("Failed to rename {} to {}", temp_path.display(), dst.display()))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
