//! Filesystem and platform utilities
//!
//! # Modules
//!
//! - [`fs`] - Directory creation plus atomic write and copy
//! - [`platform`] - Tool lookup on `PATH` and executable path resolution

pub mod fs;
pub mod platform;

pub use fs::{atomic_copy, atomic_write, ensure_dir};
pub use platform::{command_exists, current_executable};
