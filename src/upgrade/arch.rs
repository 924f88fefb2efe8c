//! Host architecture detection for artifact selection.

use std::fmt;

use crate::constants::ARTIFACT_PREFIX;

/// Architecture tag used in artifact names on the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchTag {
    LinuxAmd64,
    LinuxArm64,
    LinuxArmv7,
}

impl ArchTag {
    /// Tag for the running process.
    #[must_use]
    pub fn detect() -> Self {
        Self::from_target(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map a Rust target OS/arch pair to a tag.
    ///
    /// Only Linux artifacts are published. Anything unrecognised is logged
    /// and mapped to [`ArchTag::LinuxAmd64`].
    #[must_use]
    pub fn from_target(os: &str, arch: &str) -> Self {
        if os != "linux" {
            tracing::warn!("Unsupported OS {}, selecting a Linux artifact anyway", os);
        }

        match arch {
            "x86_64" => Self::LinuxAmd64,
            "aarch64" => Self::LinuxArm64,
            "arm" => Self::LinuxArmv7,
            other => {
                tracing::warn!("Unknown architecture {}, falling back to {}", other, Self::LinuxAmd64);
                Self::LinuxAmd64
            }
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LinuxAmd64 => "linux-amd64",
            Self::LinuxArm64 => "linux-arm64",
            Self::LinuxArmv7 => "linux-armv7",
        }
    }

    /// File name of the agent artifact for this architecture.
    #[must_use]
    pub fn artifact_name(self) -> String {
        format!("{ARTIFACT_PREFIX}-{}", self.as_str())
    }
}

impl fmt::Display for ArchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
