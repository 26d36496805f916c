//! SSH certificate request and result types

use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Critical options and extensions copied into the certificate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshPermissions {
    #[serde(default)]
    pub critical_options: BTreeMap<String, String>,

    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
}

/// Certificate fields requested by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCertificateSpec {
    /// Subject public key in OpenSSH text form
    pub key: String,

    /// 1 = user certificate, 2 = host certificate
    pub cert_type: u32,

    #[serde(default)]
    pub key_id: String,

    #[serde(default)]
    pub valid_principals: Vec<String>,

    /// Requested lifetime in seconds
    #[serde(default)]
    pub ttl: i64,

    #[serde(default)]
    pub permissions: SshPermissions,
}

/// A signing request addressed to one hardware key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshRequest {
    /// Serial of the key that should sign
    pub serial: String,

    pub certificate: SshCertificateSpec,
}

/// A signed certificate ready for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCertificate {
    /// OpenSSH one-line form, e.g. `ssh-ed25519-cert-v01@openssh.com AAAA...`
    pub certificate: String,

    /// Serial number embedded in the certificate
    pub serial: u64,

    pub valid_after: u64,
    pub valid_before: u64,
}

impl SignedCertificate {
    /// Certificate bytes as carried in the response body
    pub fn as_bytes(&self) -> &[u8] {
        self.certificate.as_bytes()
    }

    /// Base64 of the certificate bytes
    pub fn to_wire(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.as_bytes())
    }
}
