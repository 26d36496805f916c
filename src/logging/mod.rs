//! Logging setup
//!
//! `RUST_LOG` takes precedence; otherwise the agent logs at the configured
//! level and dependencies at `info`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::types::{AgentError, Result};

/// Filter used when `RUST_LOG` is unset
pub fn default_filter(level: &str) -> String {
    format!("hsm_agent={},info", level)
}

/// Install the global tracing subscriber.
pub fn init(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| AgentError::Internal(format!("Failed to initialize logging: {e}")))
}
