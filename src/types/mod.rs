//! Shared types

pub mod error;

pub use error::{AgentError, Result};
