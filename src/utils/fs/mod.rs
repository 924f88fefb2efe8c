//! File system utilities
//!
//! Directory helpers plus the atomic write/copy primitives the update cycle
//! relies on for replacing files that other processes may be reading.

pub mod atomic;
pub mod dirs;

pub use atomic::{atomic_copy, atomic_write, is_cross_device};
pub use dirs::ensure_dir;
