//! Certificate issuance
//!
//! Validates a request, derives the certificate fields and signs with the
//! requested hardware key. All validation happens before the key lock is
//! taken; the lock covers only signer acquisition and the sign call.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use ssh_key::certificate::{Builder, CertType};
use ssh_key::PublicKey;
use tracing::{debug, info, warn};

use super::request::{SignedCertificate, SshRequest};
use crate::keys::KeyRegistry;
use crate::types::{AgentError, Result};

/// Backdating applied to `valid_after` to absorb clock drift
pub const CLOCK_SKEW_SECS: u64 = 5 * 60;

/// Maximum certificate lifetime when none is configured
pub const DEFAULT_MAX_TTL_SECS: u64 = 24 * 60 * 60;

/// Certificate nonce length
const NONCE_LEN: usize = 32;

/// Issues SSH certificates with keys from the registry
pub struct CertificateEngine {
    registry: Arc<KeyRegistry>,
    max_ttl: u64,
}

impl CertificateEngine {
    /// `max_ttl` of zero selects [`DEFAULT_MAX_TTL_SECS`].
    pub fn new(registry: Arc<KeyRegistry>, max_ttl: u64) -> Self {
        let max_ttl = if max_ttl == 0 { DEFAULT_MAX_TTL_SECS } else { max_ttl };
        Self { registry, max_ttl }
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub fn max_ttl(&self) -> u64 {
        self.max_ttl
    }

    /// Issue a certificate for a session authorized for `authorized_serial`.
    pub async fn issue(&self, authorized_serial: &str, request: SshRequest) -> Result<SignedCertificate> {
        self.issue_at(authorized_serial, request, unix_now()).await
    }

    /// [`issue`](Self::issue) with an explicit current time.
    pub async fn issue_at(
        &self,
        authorized_serial: &str,
        request: SshRequest,
        now: u64,
    ) -> Result<SignedCertificate> {
        if request.serial != authorized_serial {
            return Err(AgentError::Authentication(format!(
                "HSM serial mismatch: session is authorized for {authorized_serial}"
            )));
        }

        let slot = self.registry.lookup(&request.serial)?;

        let spec = request.certificate;
        let public_key = PublicKey::from_openssh(spec.key.trim())
            .map_err(|e| AgentError::Parse(format!("Failed to parse public key: {e}")))?;
        let cert_type = parse_cert_type(spec.cert_type)?;

        let serial = certificate_serial();
        let (valid_after, valid_before) = validity_window(now, spec.ttl, self.max_ttl)?;

        let mut nonce = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut builder = Builder::new(nonce, public_key.key_data().clone(), valid_after, valid_before)?;
        builder.serial(serial)?;
        builder.cert_type(cert_type)?;
        builder.key_id(&spec.key_id)?;

        if spec.valid_principals.is_empty() {
            warn!(key_id = %spec.key_id, "Certificate has no principals and is valid for all");
            builder.all_principals_valid()?;
        } else {
            for principal in &spec.valid_principals {
                builder.valid_principal(principal)?;
            }
        }
        for (name, data) in &spec.permissions.critical_options {
            builder.critical_option(name, data)?;
        }
        for (name, data) in &spec.permissions.extensions {
            builder.extension(name, data)?;
        }

        let guard = slot.lock().await;
        let certificate = tokio::task::spawn_blocking(move || {
            let signer = guard.signer()?;
            let signed = builder.sign(&signer).map_err(|e| {
                signer
                    .take_failure()
                    .unwrap_or_else(|| AgentError::Hardware(format!("Failed to sign certificate: {e}")))
            });
            drop(guard);
            signed
        })
        .await
        .map_err(|e| AgentError::Internal(format!("Signing task failed: {e}")))??;

        let certificate = certificate.to_openssh()?;

        info!(
            serial = %authorized_serial,
            key_id = %spec.key_id,
            cert_serial = serial,
            valid_before,
            "Issued SSH certificate"
        );

        Ok(SignedCertificate {
            certificate,
            serial,
            valid_after,
            valid_before,
        })
    }
}

/// Compute `(valid_after, valid_before)` for a request made at `now`.
///
/// The start is backdated by [`CLOCK_SKEW_SECS`]; the end is the earlier of
/// the requested TTL and the configured maximum.
pub fn validity_window(now: u64, ttl: i64, max_ttl: u64) -> Result<(u64, u64)> {
    let valid_after = now.saturating_sub(CLOCK_SKEW_SECS);

    let requested = if ttl >= 0 {
        now.saturating_add(ttl.unsigned_abs())
    } else {
        now.saturating_sub(ttl.unsigned_abs())
    };
    let valid_before = requested.min(now.saturating_add(max_ttl));

    if valid_before <= valid_after {
        return Err(AgentError::Parse(
            "Certificate expire out of range, check clock".into(),
        ));
    }

    Ok((valid_after, valid_before))
}

/// 64-bit certificate serial: FNV-1a over a fresh UUID.
///
/// Serials only need to be unique, not unpredictable.
pub fn certificate_serial() -> u64 {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let serial = fnv1a64(id.as_bytes());
    debug!(id = %id, serial, "Generated certificate serial");
    serial
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn parse_cert_type(value: u32) -> Result<CertType> {
    match value {
        1 => Ok(CertType::User),
        2 => Ok(CertType::Host),
        other => Err(AgentError::Parse(format!("Unknown certificate type: {other}"))),
    }
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_window_uses_requested_ttl() {
        let (after, before) = validity_window(1_000_000, 600, 3600).unwrap();
        assert_eq!(after, 1_000_000 - CLOCK_SKEW_SECS);
        assert_eq!(before, 1_000_600);
    }

    #[test]
    fn test_validity_window_clamps_to_max() {
        let (_, before) = validity_window(1_000_000, 10 * 86400, 3600).unwrap();
        assert_eq!(before, 1_003_600);
    }

    #[test]
    fn test_validity_window_rejects_empty_window() {
        let ttl = -(CLOCK_SKEW_SECS as i64);
        assert!(matches!(validity_window(1_000_000, ttl, 3600), Err(AgentError::Parse(_))));
        assert!(matches!(validity_window(1_000_000, -3600, 3600), Err(AgentError::Parse(_))));
        assert!(matches!(validity_window(0, 0, 3600), Err(AgentError::Parse(_))));
    }

    #[test]
    fn test_zero_ttl_window_ends_now() {
        let (after, before) = validity_window(1_000_000, 0, 3600).unwrap();
        assert!(before > after);
        assert_eq!(before, 1_000_000);
    }

    #[test]
    fn test_fnv1a64_reference_values() {
        assert_eq!(fnv1a64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a64(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn test_serials_are_distinct() {
        let a = certificate_serial();
        let b = certificate_serial();
        assert_ne!(a, b);
    }

    #[test]
    fn test_cert_type_mapping() {
        assert_eq!(parse_cert_type(1).unwrap(), CertType::User);
        assert_eq!(parse_cert_type(2).unwrap(), CertType::Host);
        assert!(matches!(parse_cert_type(3), Err(AgentError::Parse(_))));
    }

    #[test]
    fn test_zero_max_ttl_uses_default() {
        let registry = Arc::new(KeyRegistry::new(Vec::new()).unwrap());
        let engine = CertificateEngine::new(registry, 0);
        assert_eq!(engine.max_ttl(), DEFAULT_MAX_TTL_SECS);
    }
}
