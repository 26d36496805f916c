//! Decrypted message bodies
//!
//! Every body carries a `type` field. Inbound types the agent does not know
//! deserialize to [`InboundMessage::Unknown`] and are ignored.

use serde::{Deserialize, Serialize};

use crate::authority::{SignedCertificate, SshRequest};

/// Bodies sent by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    SshCertificate(SshRequest),

    #[serde(other)]
    Unknown,
}

/// Bodies sent by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    SshCertificate(SshResponse),
    Status(StatusReport),
}

/// Signed certificate response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshResponse {
    /// Base64 of the OpenSSH certificate line
    pub certificate: String,
}

impl From<&SignedCertificate> for SshResponse {
    fn from(cert: &SignedCertificate) -> Self {
        Self {
            certificate: cert.to_wire(),
        }
    }
}

/// Periodic report telling the remote service which key is online
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub serial: String,
}
