//! File-backed Ed25519 signing keys
//!
//! Stands in for a hardware token in development and tests. Each key lives in
//! `<dir>/<serial>.key` as a hex-encoded 32-byte seed.

use std::path::{Path, PathBuf};

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use ssh_key::public::{Ed25519PublicKey, KeyData};
use ssh_key::{Algorithm, PublicKey, Signature};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::token::{HardwareKey, KeySigner};
use crate::types::{AgentError, Result};

/// File extension for software key seeds
pub const KEY_EXTENSION: &str = "key";

/// An Ed25519 key held in process memory
pub struct SoftwareKey {
    serial: String,
    signing_key: SigningKey,
}

impl SoftwareKey {
    /// Generate a new random key.
    pub fn generate(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build a key from a hex-encoded 32-byte seed.
    pub fn from_seed_hex(serial: impl Into<String>, seed_hex: &str) -> Result<Self> {
        let seed = Zeroizing::new(
            hex::decode(seed_hex.trim())
                .map_err(|e| AgentError::Parse(format!("Invalid key seed: {e}")))?,
        );
        let seed: [u8; 32] = seed.as_slice().try_into().map_err(|_| {
            AgentError::Parse(format!("Invalid key seed length: {}", seed.len()))
        })?;

        Ok(Self {
            serial: serial.into(),
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Load one key file. The serial is the file stem.
    pub fn load(path: &Path) -> Result<Self> {
        let serial = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AgentError::Config(format!("Invalid key file name: {}", path.display())))?;

        let contents = Zeroizing::new(std::fs::read_to_string(path)?);
        Self::from_seed_hex(serial, &contents)
    }

    /// Load every `*.key` file in a directory, sorted by serial.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>> {
        let mut keys = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXTENSION) {
                continue;
            }

            match Self::load(&path) {
                Ok(key) => {
                    debug!(serial = %key.serial, path = %path.display(), "Loaded software key");
                    keys.push(key);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable key file");
                }
            }
        }

        keys.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(keys)
    }

    /// Write the seed to `<dir>/<serial>.key`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(format!("{}.{}", self.serial, KEY_EXTENSION));
        let seed = Zeroizing::new(hex::encode(self.signing_key.to_bytes()));

        std::fs::write(&path, seed.as_bytes())
            .map_err(|e| AgentError::Write(format!("Failed to write {}: {e}", path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| AgentError::Write(format!("Failed to restrict {}: {e}", path.display())))?;
        }

        Ok(path)
    }

    /// Public key in OpenSSH form, for installing as a trusted CA.
    pub fn public_key_openssh(&self) -> Result<String> {
        let mut public_key = PublicKey::from(ed25519_key_data(&self.signing_key));
        public_key.set_comment(self.serial.clone());
        Ok(public_key.to_openssh()?)
    }
}

impl HardwareKey for SoftwareKey {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn signer(&self) -> Result<Box<dyn KeySigner>> {
        Ok(Box::new(SoftwareSigner {
            signing_key: self.signing_key.clone(),
        }))
    }
}

struct SoftwareSigner {
    signing_key: SigningKey,
}

impl KeySigner for SoftwareSigner {
    fn public_key(&self) -> KeyData {
        ed25519_key_data(&self.signing_key)
    }

    fn sign(&self, message: &[u8]) -> Result<Signature> {
        let signature = self.signing_key.sign(message);
        Ok(Signature::new(Algorithm::Ed25519, signature.to_bytes().to_vec())?)
    }
}

fn ed25519_key_data(signing_key: &SigningKey) -> KeyData {
    KeyData::Ed25519(Ed25519PublicKey(signing_key.verifying_key().to_bytes()))
}
