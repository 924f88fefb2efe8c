//! configflow-agent - host management agent with safe self-update
//!
//! The agent runs on every managed host. It reports the status of the
//! services it manages and, when the control plane asks, replaces its own
//! binary without an operator on the box.
//!
//! # Architecture Overview
//!
//! A self-update is a strictly ordered cycle:
//!
//! ```text
//! detect arch → fetch → verify → backup → install → restart → verify health
//!                                                                   │
//!                                                   failure ────────┴──→ rollback
//! ```
//!
//! Every step before `install` aborts without touching the live binary. After
//! the swap, a failed restart or health check restores the single backup and
//! restarts once more.
//!
//! Service status comes from a chain of probes tried in order: systemd,
//! OpenRC, supervisord, then the process table. The first definitive answer
//! wins; when none is definitive the status is `unknown`, which counts as not
//! running.
//!
//! # Core Modules
//!
//! - [`upgrade`] - the self-update cycle and its components
//! - [`service`] - supervisor probes, status resolution and restarts
//! - [`server`] - HTTP endpoints for the control plane
//! - [`config`] - JSON agent configuration
//! - [`cli`] - command-line entry points
//! - [`core`] - error types and user-facing error formatting
//! - [`utils`] - atomic file operations and platform helpers
//! - [`constants`] - timeouts, paths and tool names

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod server;
pub mod service;
pub mod upgrade;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
