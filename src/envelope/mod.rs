//! Authenticated envelope protocol
//!
//! Every message exchanged with the remote service travels as an [`Envelope`]:
//!
//! ```text
//! {"id": "...", "token": "...", "signature": b64(hmac), "iv": b64(iv), "data": b64(ciphertext)}
//! ```
//!
//! `seal` pads and encrypts a JSON body, then MACs it. `open` checks the token,
//! then the MAC, and only then touches the ciphertext, so malformed or forged
//! ciphertext never reaches the decryptor.

pub mod crypto;
pub mod payload;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{AgentError, Result};

pub use payload::{InboundMessage, OutboundMessage, SshResponse, StatusReport};

/// The wire record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlates a response with its request
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,

    /// Pre-shared session credential
    #[serde(default, deserialize_with = "nullable")]
    pub token: String,

    /// Base64 HMAC-SHA512
    #[serde(default, deserialize_with = "nullable")]
    pub signature: String,

    /// Base64 initialization vector
    #[serde(default, deserialize_with = "nullable")]
    pub iv: String,

    /// Base64 ciphertext
    #[serde(default, deserialize_with = "nullable")]
    pub data: String,
}

fn nullable<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Envelope {
    /// Parse a WebSocket frame
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        serde_json::from_slice(frame)
            .map_err(|e| AgentError::Parse(format!("Failed to unmarshal payload: {e}")))
    }

    /// Serialize for a WebSocket text frame
    pub fn to_frame(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AgentError::Internal(format!("Failed to marshal payload: {e}")))
    }

    fn is_complete(&self) -> bool {
        !(self.id.is_empty()
            || self.token.is_empty()
            || self.signature.is_empty()
            || self.iv.is_empty()
            || self.data.is_empty())
    }
}

/// Encrypt and authenticate `body` for transmission.
pub fn seal<T: Serialize>(id: &str, token: &str, secret: &str, body: &T) -> Result<Envelope> {
    let plaintext = serde_json::to_vec(body)
        .map_err(|e| AgentError::Parse(format!("Failed to marshal payload data: {e}")))?;
    let plaintext = crypto::zero_pad(plaintext);

    let key = crypto::derive_key(secret);
    let iv = crypto::generate_iv();
    let ciphertext = crypto::encrypt(&key, &iv, &plaintext)?;
    let signature = crypto::sign(secret, &ciphertext)?;

    Ok(Envelope {
        id: id.to_string(),
        token: token.to_string(),
        signature: STANDARD.encode(signature),
        iv: STANDARD.encode(iv),
        data: STANDARD.encode(ciphertext),
    })
}

/// Verify and decrypt an envelope, returning its id and body.
///
/// Order of checks: field presence, token, encoding, MAC, lengths, decryption.
pub fn open<T: DeserializeOwned>(
    token: &str,
    secret: &str,
    envelope: &Envelope,
) -> Result<(String, T)> {
    if !envelope.is_complete() {
        return Err(AgentError::Parse("Invalid payload".into()));
    }

    if !crypto::constant_time_eq(token.as_bytes(), envelope.token.as_bytes()) {
        return Err(AgentError::Authentication("Invalid token".into()));
    }

    let iv = STANDARD.decode(&envelope.iv)?;
    let ciphertext = STANDARD.decode(&envelope.data)?;

    let expected = STANDARD.encode(crypto::sign(secret, &ciphertext)?);
    if !crypto::constant_time_eq(expected.as_bytes(), envelope.signature.as_bytes()) {
        return Err(AgentError::Authentication("Invalid signature".into()));
    }

    let key = crypto::derive_key(secret);
    let plaintext = crypto::decrypt(&key, &iv, &ciphertext)?;

    let body = serde_json::from_slice(crypto::strip_zero_padding(&plaintext))
        .map_err(|e| AgentError::Parse(format!("Failed to unmarshal payload data: {e}")))?;

    Ok((envelope.id.clone(), body))
}

/// Token and secret for one remote host
#[derive(Clone)]
pub struct Credentials {
    pub token: String,
    secret: zeroize::Zeroizing<String>,
}

impl Credentials {
    pub fn new(token: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            secret: zeroize::Zeroizing::new(secret.into()),
        }
    }

    pub fn seal<T: Serialize>(&self, id: &str, body: &T) -> Result<Envelope> {
        seal(id, &self.token, &self.secret, body)
    }

    pub fn open<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<(String, T)> {
        open(&self.token, &self.secret, envelope)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token)
            .field("secret", &"<redacted>")
            .finish()
    }
}
