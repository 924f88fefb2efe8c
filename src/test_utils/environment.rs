//! Temporary layout for exercising the update cycle.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

use crate::constants::{AGENT_SERVICE_NAME, ELF_MAGIC};
use crate::upgrade::UpdateSettings;

/// Bytes of a minimal file that passes the executable format check.
pub fn fake_elf(payload: &[u8]) -> Vec<u8> {
    let mut bytes = ELF_MAGIC.to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

/// Lowercase hex MD5 of `bytes`, as a control plane would publish it.
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// A live binary and a working directory inside one temp dir.
pub struct UpdateTestEnvironment {
    pub temp_dir: TempDir,
    pub live_binary: PathBuf,
    pub work_dir: PathBuf,
}

impl UpdateTestEnvironment {
    /// The original binary the environment starts with.
    pub fn original_binary() -> Vec<u8> {
        fake_elf(b"configflow-agent v1")
    }

    pub fn new() -> Result<Self> {
        super::init_test_logging(None);

        let temp_dir = TempDir::new()?;
        let bin_dir = temp_dir.path().join("bin");
        let work_dir = temp_dir.path().join("work");
        fs::create_dir_all(&bin_dir)?;

        let live_binary = bin_dir.join("configflow-agent");
        fs::write(&live_binary, Self::original_binary())?;

        Ok(Self {
            temp_dir,
            live_binary,
            work_dir,
        })
    }

    /// Settings pointing at this environment, with every delay zeroed.
    pub fn settings(&self) -> UpdateSettings {
        UpdateSettings {
            live_binary: self.live_binary.clone(),
            work_dir: self.work_dir.clone(),
            server_url: None,
            agent_service: AGENT_SERVICE_NAME.to_string(),
            download_timeout: Duration::from_secs(10),
            settle_delay: Duration::ZERO,
            restart_grace: Duration::ZERO,
            self_exit_delay: Duration::ZERO,
        }
    }

    pub fn live_contents(&self) -> Result<Vec<u8>> {
        fs::read(&self.live_binary)
            .with_context(|| format!("Failed to read {}", self.live_binary.display()))
    }

    pub fn backup_path(&self) -> PathBuf {
        self.settings().backup_path()
    }

    pub fn staging_path(&self) -> PathBuf {
        self.settings().staging_path()
    }

    /// Names of the regular files in the working directory, sorted.
    pub fn work_dir_files(&self) -> Result<Vec<String>> {
        list_files(&self.work_dir)
    }
}

fn list_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
