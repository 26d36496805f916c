//! Cryptographic primitives for the envelope protocol.
//!
//! # Algorithms
//!
//! - **Key Derivation**: SHA-256 of the shared secret
//! - **Encryption**: AES-256-CBC with zero padding
//! - **Authentication**: HMAC-SHA512 over the ciphertext (encrypt-then-MAC)
//!
//! # Security Parameters
//!
//! The key derivation is a single unsalted hash with no stretching. The remote
//! service derives its key the same way, so strengthening it here breaks the
//! wire protocol.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::types::{AgentError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha512 = Hmac<Sha512>;

// =============================================================================
// Constants
// =============================================================================

/// AES block size, also the IV length
pub const BLOCK_SIZE: usize = 16;

/// Derived AES-256 key length
pub const KEY_LEN: usize = 32;

// =============================================================================
// Key Derivation
// =============================================================================

/// Derive the AES-256 key from the shared secret.
pub fn derive_key(secret: &str) -> Zeroizing<[u8; KEY_LEN]> {
    let digest = Sha256::digest(secret.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&digest);
    key
}

/// Generate a fresh random IV.
pub fn generate_iv() -> [u8; BLOCK_SIZE] {
    let mut iv = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

// =============================================================================
// Padding
// =============================================================================

/// Right-pad with zero bytes to the next block boundary.
///
/// Always appends between 1 and `BLOCK_SIZE` bytes, so an already aligned
/// body gains a whole block.
pub fn zero_pad(mut data: Vec<u8>) -> Vec<u8> {
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    data.resize(data.len() + pad, 0);
    data
}

/// Strip trailing zero bytes.
pub fn strip_zero_padding(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &data[..end]
}

// =============================================================================
// Encryption / Decryption
// =============================================================================

/// Encrypt block-aligned plaintext with AES-256-CBC.
pub fn encrypt(key: &[u8; KEY_LEN], iv: &[u8; BLOCK_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    if plaintext.is_empty() || plaintext.len() % BLOCK_SIZE != 0 {
        return Err(AgentError::Internal(format!(
            "Plaintext length {} is not block aligned",
            plaintext.len()
        )));
    }

    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| AgentError::Internal(format!("Failed to load cipher: {e}")))?;

    let mut buf = plaintext.to_vec();
    let len = buf.len();
    cipher
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|e| AgentError::Internal(format!("Encryption failed: {e}")))?;

    Ok(buf)
}

/// Decrypt AES-256-CBC ciphertext. Padding is left in place.
pub fn decrypt(key: &[u8; KEY_LEN], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != BLOCK_SIZE {
        return Err(AgentError::Parse("Invalid payload iv length".into()));
    }
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(AgentError::Parse("Invalid payload data length".into()));
    }

    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| AgentError::Parse(format!("Failed to load cipher: {e}")))?;

    let mut buf = ciphertext.to_vec();
    cipher
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| AgentError::Parse(format!("Decryption failed: {e}")))?;

    Ok(buf)
}

// =============================================================================
// Authentication
// =============================================================================

/// HMAC-SHA512 keyed with the raw secret over the ciphertext.
///
/// The IV is not covered. A modified IV only garbles the first plaintext
/// block, which then fails to parse.
pub fn sign(secret: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| AgentError::Internal(format!("Invalid HMAC key: {e}")))?;
    mac.update(ciphertext);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time equality. Inputs of different length compare unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

// =============================================================================
// Tests
// =============================================================================
