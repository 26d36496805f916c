//! SSH certificate authority
//!
//! # Issuance
//!
//! ```text
//! SshRequest ──▶ serial check ──▶ key lookup ──▶ parse key ──▶ validity window
//!                                                                   │
//!                          OpenSSH text ◀── sign ◀── signer ◀── key lock
//! ```
//!
//! # Security Model
//!
//! - A session may only use the key it was configured for
//! - Certificates are backdated five minutes and capped at the configured TTL
//! - The key lock is held only around signer acquisition and signing

pub mod engine;
pub mod request;

pub use engine::{CertificateEngine, CLOCK_SKEW_SECS, DEFAULT_MAX_TTL_SECS};
pub use request::{SignedCertificate, SshCertificateSpec, SshPermissions, SshRequest};
