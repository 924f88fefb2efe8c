//! Platform helpers.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Checks whether `cmd` resolves to an executable on `PATH`.
///
/// This is how every supervisor probe decides whether its control tool is
/// installed on the host.
#[must_use]
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Path of the running binary, with symlinks resolved.
///
/// The update cycle replaces this path, so it must name the real file rather
/// than a symlink pointing at it; renaming onto a symlink would replace the
/// link and leave the real binary untouched.
pub fn current_executable() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to get current executable path")?;
    Ok(std::fs::canonicalize(&exe).unwrap_or(exe))
}
