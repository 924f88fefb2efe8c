//! Test utilities for the agent
//!
//! This module provides helpers shared by unit tests and the integration
//! suite:
//! - [`FakeRunner`], a scripted stand-in for supervisor tools
//! - [`UpdateTestEnvironment`], a temp dir with a live binary and work dir
//! - [`fake_elf`] and [`md5_hex`] for building downloadable artifacts
//!
//! # Example
//!
//! ```rust,no_run
//! use configflow_agent::service::CommandOutput;
//! use configflow_agent::test_utils::{FakeRunner, UpdateTestEnvironment};
//!
//! let env = UpdateTestEnvironment::new().unwrap();
//! let runner = FakeRunner::systemd_healthy("configflow-agent")
//!     .respond_once("systemctl restart configflow-agent", CommandOutput::failed(1, ""));
//! # let _ = (env, runner);
//! ```

pub mod environment;
pub mod runner;

pub use environment::{UpdateTestEnvironment, fake_elf, md5_hex};
pub use runner::FakeRunner;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has any effect. With `None`, logging is enabled only
/// when `RUST_LOG` is set:
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}
