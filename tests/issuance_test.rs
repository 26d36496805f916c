//! Certificate engine tests with instrumented keys

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ssh_key::certificate::CertType;
use ssh_key::public::KeyData;
use ssh_key::{Certificate, Signature};
use tokio_test::{assert_err, assert_ok};

use hsm_agent::authority::{SshCertificateSpec, SshPermissions, CLOCK_SKEW_SECS};
use hsm_agent::keys::{HardwareKey, KeySigner, SoftwareKey};
use hsm_agent::{AgentError, CertificateEngine, KeyRegistry, Result, SshRequest};

/// Counters shared by every instrumented key in a test
#[derive(Default)]
struct Probe {
    signs: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// A software key that records sign calls and holds the device for `delay`
struct InstrumentedKey {
    inner: SoftwareKey,
    probe: Arc<Probe>,
    delay: Duration,
    fail_sign: bool,
}

impl InstrumentedKey {
    fn new(serial: &str, probe: &Arc<Probe>) -> Self {
        Self {
            inner: SoftwareKey::generate(serial),
            probe: Arc::clone(probe),
            delay: Duration::ZERO,
            fail_sign: false,
        }
    }
}

impl HardwareKey for InstrumentedKey {
    fn serial(&self) -> &str {
        self.inner.serial()
    }

    fn signer(&self) -> Result<Box<dyn KeySigner>> {
        Ok(Box::new(InstrumentedSigner {
            inner: self.inner.signer()?,
            probe: Arc::clone(&self.probe),
            delay: self.delay,
            fail_sign: self.fail_sign,
        }))
    }
}

struct InstrumentedSigner {
    inner: Box<dyn KeySigner>,
    probe: Arc<Probe>,
    delay: Duration,
    fail_sign: bool,
}

impl KeySigner for InstrumentedSigner {
    fn public_key(&self) -> KeyData {
        self.inner.public_key()
    }

    fn sign(&self, message: &[u8]) -> Result<Signature> {
        self.probe.signs.fetch_add(1, Ordering::SeqCst);
        let active = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.peak.fetch_max(active, Ordering::SeqCst);

        std::thread::sleep(self.delay);
        let result = if self.fail_sign {
            Err(AgentError::Hardware("card removed".into()))
        } else {
            self.inner.sign(message)
        };

        self.probe.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// A token whose login always fails
struct LockedToken;

impl HardwareKey for LockedToken {
    fn serial(&self) -> &str {
        "locked"
    }

    fn signer(&self) -> Result<Box<dyn KeySigner>> {
        Err(AgentError::Hardware("PIN verification failed".into()))
    }
}

fn engine_with(keys: Vec<Arc<dyn HardwareKey>>, max_ttl: u64) -> Arc<CertificateEngine> {
    Arc::new(CertificateEngine::new(
        Arc::new(KeyRegistry::new(keys).unwrap()),
        max_ttl,
    ))
}

fn subject_key() -> String {
    SoftwareKey::generate("alice-laptop").public_key_openssh().unwrap()
}

fn request(serial: &str, ttl: i64) -> SshRequest {
    let mut extensions = BTreeMap::new();
    extensions.insert("permit-pty".to_string(), String::new());

    SshRequest {
        serial: serial.to_string(),
        certificate: SshCertificateSpec {
            key: subject_key(),
            cert_type: 1,
            key_id: "alice".into(),
            valid_principals: vec!["alice".into(), "deploy".into()],
            ttl,
            permissions: SshPermissions {
                critical_options: BTreeMap::new(),
                extensions,
            },
        },
    }
}

#[tokio::test]
async fn test_issued_certificate_fields() {
    let probe = Arc::new(Probe::default());
    let key = InstrumentedKey::new("abc123", &probe);
    let ca_key = key.inner.signer().unwrap().public_key();
    let engine = engine_with(vec![Arc::new(key)], 3600);

    let now = 1_700_000_000;
    let signed = assert_ok!(engine.issue_at("abc123", request("abc123", 600), now).await);
    assert_eq!(signed.valid_after, now - CLOCK_SKEW_SECS);
    assert_eq!(signed.valid_before, now + 600);

    let cert = assert_ok!(Certificate::from_openssh(&signed.certificate));
    assert_eq!(cert.serial(), signed.serial);
    assert_eq!(cert.cert_type(), CertType::User);
    assert_eq!(cert.key_id(), "alice");
    assert_eq!(cert.valid_principals(), ["alice".to_string(), "deploy".to_string()]);
    assert!(cert.extensions().contains_key("permit-pty"));
    assert_eq!(cert.valid_after(), now - CLOCK_SKEW_SECS);
    assert_eq!(cert.valid_before(), now + 600);
    assert_eq!(cert.signature_key(), &ca_key);
    assert_eq!(probe.signs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ttl_clamped_to_max() {
    let probe = Arc::new(Probe::default());
    let engine = engine_with(vec![Arc::new(InstrumentedKey::new("abc123", &probe))], 3600);

    let now = 1_700_000_000;
    let signed = engine
        .issue_at("abc123", request("abc123", 7 * 86400), now)
        .await
        .unwrap();
    assert_eq!(signed.valid_before, now + 3600);
}

#[tokio::test]
async fn test_empty_window_rejected_without_signing() {
    let probe = Arc::new(Probe::default());
    let engine = engine_with(vec![Arc::new(InstrumentedKey::new("abc123", &probe))], 3600);

    let err = assert_err!(engine.issue_at("abc123", request("abc123", -600), 1_700_000_000).await);
    assert!(matches!(err, AgentError::Parse(_)), "got {err:?}");
    assert_eq!(probe.signs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cross_serial_request_rejected_without_signing() {
    let probe = Arc::new(Probe::default());
    let engine = engine_with(
        vec![
            Arc::new(InstrumentedKey::new("abc123", &probe)),
            Arc::new(InstrumentedKey::new("def456", &probe)),
        ],
        0,
    );

    let err = assert_err!(engine.issue("abc123", request("def456", 600)).await);
    assert!(matches!(err, AgentError::Authentication(_)), "got {err:?}");
    assert_eq!(probe.signs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_serial_not_found() {
    let probe = Arc::new(Probe::default());
    let engine = engine_with(vec![Arc::new(InstrumentedKey::new("abc123", &probe))], 0);

    let err = assert_err!(engine.issue("zzz999", request("zzz999", 600)).await);
    assert!(matches!(err, AgentError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn test_malformed_subject_key_is_parse_error() {
    let probe = Arc::new(Probe::default());
    let engine = engine_with(vec![Arc::new(InstrumentedKey::new("abc123", &probe))], 0);

    let mut req = request("abc123", 600);
    req.certificate.key = "ssh-ed25519 not-a-key".into();

    let err = assert_err!(engine.issue("abc123", req).await);
    assert!(matches!(err, AgentError::Parse(_)), "got {err:?}");
    assert_eq!(probe.signs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_cert_type_is_parse_error() {
    let probe = Arc::new(Probe::default());
    let engine = engine_with(vec![Arc::new(InstrumentedKey::new("abc123", &probe))], 0);

    let mut req = request("abc123", 600);
    req.certificate.cert_type = 7;

    let err = assert_err!(engine.issue("abc123", req).await);
    assert!(matches!(err, AgentError::Parse(_)), "got {err:?}");
}

#[tokio::test]
async fn test_empty_principals_valid_for_all() {
    let probe = Arc::new(Probe::default());
    let engine = engine_with(vec![Arc::new(InstrumentedKey::new("abc123", &probe))], 0);

    let mut req = request("abc123", 600);
    req.certificate.valid_principals.clear();
    req.certificate.cert_type = 2;

    let signed = engine.issue("abc123", req).await.unwrap();
    let cert = Certificate::from_openssh(&signed.certificate).unwrap();
    assert_eq!(cert.cert_type(), CertType::Host);
    assert!(cert.valid_principals().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_serial_signs_one_at_a_time() {
    let probe = Arc::new(Probe::default());
    let mut key = InstrumentedKey::new("abc123", &probe);
    key.delay = Duration::from_millis(150);
    let engine = engine_with(vec![Arc::new(key)], 0);

    let (a, b, c) = tokio::join!(
        engine.issue("abc123", request("abc123", 600)),
        engine.issue("abc123", request("abc123", 600)),
        engine.issue("abc123", request("abc123", 600)),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(probe.signs.load(Ordering::SeqCst), 3);
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_serials_sign_in_parallel() {
    let probe = Arc::new(Probe::default());
    let mut first = InstrumentedKey::new("abc123", &probe);
    let mut second = InstrumentedKey::new("def456", &probe);
    first.delay = Duration::from_millis(300);
    second.delay = Duration::from_millis(300);
    let engine = engine_with(vec![Arc::new(first), Arc::new(second)], 0);

    let (a, b) = tokio::join!(
        engine.issue("abc123", request("abc123", 600)),
        engine.issue("def456", request("def456", 600)),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_sign_failure_propagates() {
    let probe = Arc::new(Probe::default());
    let mut key = InstrumentedKey::new("abc123", &probe);
    key.fail_sign = true;
    let engine = engine_with(vec![Arc::new(key)], 0);

    let err = assert_err!(engine.issue("abc123", request("abc123", 600)).await);
    match err {
        AgentError::Hardware(msg) => assert_eq!(msg, "card removed"),
        other => panic!("unexpected error: {other:?}"),
    }

    // The lock is released after a failure
    let slot = engine.registry().lookup("abc123").unwrap();
    assert!(!slot.is_locked());
}

#[tokio::test]
async fn test_token_login_failure_propagates() {
    let engine = engine_with(vec![Arc::new(LockedToken)], 0);

    let err = assert_err!(engine.issue("locked", request("locked", 600)).await);
    assert!(matches!(err, AgentError::Hardware(_)), "got {err:?}");
}
