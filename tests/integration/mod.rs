//! Integration test suite for configflow-agent
//!
//! End-to-end runs of the self-update cycle against a local HTTP server
//! (mockito) and a scripted command runner. No test spawns a real supervisor
//! tool or touches a binary outside its own temp dir.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **update_cycle**: fetch, verify, backup, install, restart and rollback
//! - **http_trigger**: updates started through the HTTP API

mod http_trigger;
mod update_cycle;
