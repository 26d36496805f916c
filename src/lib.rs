//! HSM agent - SSH certificates from hardware-held keys
//!
//! The agent keeps a WebSocket session open to each configured
//! fleet-management host. Hosts send encrypted certificate requests; the agent
//! verifies them, signs with the matching hardware key and sends the
//! certificate back on the same session. Private keys never leave the token.
//!
//! ## Components
//!
//! - **Envelope**: authenticated encryption of every message
//! - **Keys**: registry of signing keys with one lock per key
//! - **Authority**: request validation and certificate signing
//! - **Socket**: per-host sessions and their supervisor

pub mod authority;
pub mod config;
pub mod envelope;
pub mod keys;
pub mod logging;
pub mod socket;
pub mod types;

pub use authority::{CertificateEngine, SignedCertificate, SshRequest};
pub use config::Args;
pub use keys::{HardwareKey, KeyRegistry};
pub use socket::{Session, SessionSettings, Supervisor};
pub use types::{AgentError, Result};
