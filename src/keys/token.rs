//! Hardware token interface
//!
//! The agent only needs two things from a token driver: a signer handle for a
//! serial (PIN login and slot selection happen behind it) and a raw sign
//! operation. [`HardwareSigner`] adapts such a handle to the `signature`
//! traits the SSH certificate builder expects.

use std::sync::Mutex;

use ssh_key::public::KeyData;
use ssh_key::Signature;

use crate::types::{AgentError, Result};

/// A logged-in signing slot on a token
pub trait KeySigner: Send {
    /// Public half of the signing key
    fn public_key(&self) -> KeyData;

    /// Raw sign operation. May block on the device.
    fn sign(&self, message: &[u8]) -> Result<Signature>;
}

/// One physical signing key
pub trait HardwareKey: Send + Sync {
    fn serial(&self) -> &str;

    /// Open a signer handle. Called with the key's lock held.
    fn signer(&self) -> Result<Box<dyn KeySigner>>;
}

/// Adapter between a [`KeySigner`] and `ssh_key`'s certificate builder.
///
/// The builder only sees an opaque `signature::Error`, so the underlying
/// failure is kept and can be recovered with [`HardwareSigner::take_failure`].
pub struct HardwareSigner {
    inner: Box<dyn KeySigner>,
    public_key: KeyData,
    failure: Mutex<Option<AgentError>>,
}

impl HardwareSigner {
    pub fn new(inner: Box<dyn KeySigner>) -> Self {
        let public_key = inner.public_key();
        Self {
            inner,
            public_key,
            failure: Mutex::new(None),
        }
    }

    pub fn public_key(&self) -> &KeyData {
        &self.public_key
    }

    /// The error from the last failed sign call, if any
    pub fn take_failure(&self) -> Option<AgentError> {
        self.failure.lock().ok().and_then(|mut failure| failure.take())
    }
}

impl signature::Signer<Signature> for HardwareSigner {
    fn try_sign(&self, msg: &[u8]) -> std::result::Result<Signature, signature::Error> {
        self.inner.sign(msg).map_err(|e| {
            if let Ok(mut failure) = self.failure.lock() {
                *failure = Some(e);
            }
            signature::Error::new()
        })
    }
}

impl From<&HardwareSigner> for KeyData {
    fn from(signer: &HardwareSigner) -> Self {
        signer.public_key.clone()
    }
}
