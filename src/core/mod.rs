//! Core types for the agent
//!
//! Error types shared by every layer live here. The update cycle matches on
//! [`UpdateError`] to decide whether to abort, roll back or escalate; CLI and
//! server code work in `anyhow::Result` and convert at the edges with
//! [`user_friendly_error`].

pub mod error;

pub use error::{AgentError, ErrorContext, UpdateError, user_friendly_error};
