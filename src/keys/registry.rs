//! Registry of signing keys with per-serial mutual exclusion.
//!
//! Lookups never wait on a key lock. Locks are created lazily on first use and
//! never removed. Each issuance holds at most one key lock, so there is no lock
//! ordering to get wrong.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::token::{HardwareKey, HardwareSigner};
use crate::types::{AgentError, Result};

/// Handle to one key and its lock
#[derive(Clone)]
pub struct KeySlot {
    key: Arc<dyn HardwareKey>,
    lock: Arc<Mutex<()>>,
}

impl KeySlot {
    pub fn serial(&self) -> &str {
        self.key.serial()
    }

    /// Wait for exclusive use of the key.
    pub async fn lock(&self) -> KeyGuard {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        debug!(serial = %self.serial(), "Key locked");
        KeyGuard {
            key: Arc::clone(&self.key),
            _guard: guard,
        }
    }

    /// Whether another task currently holds the key
    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

impl std::fmt::Debug for KeySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySlot")
            .field("serial", &self.serial())
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Exclusive access to one key. Dropping the guard unlocks it.
pub struct KeyGuard {
    key: Arc<dyn HardwareKey>,
    _guard: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn serial(&self) -> &str {
        self.key.serial()
    }

    /// Open a signer on the locked key.
    pub fn signer(&self) -> Result<HardwareSigner> {
        Ok(HardwareSigner::new(self.key.signer()?))
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        debug!(serial = %self.key.serial(), "Key unlocked");
    }
}

/// All signing keys known to this process
pub struct KeyRegistry {
    keys: HashMap<String, Arc<dyn HardwareKey>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyRegistry {
    /// Build the registry from discovered keys.
    pub fn new<I>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn HardwareKey>>,
    {
        let mut map = HashMap::new();
        for key in keys {
            let serial = key.serial().to_string();
            if map.insert(serial.clone(), key).is_some() {
                return Err(AgentError::Config(format!("Duplicate key serial: {serial}")));
            }
            info!(serial = %serial, "Registered signing key");
        }

        Ok(Self {
            keys: map,
            locks: DashMap::new(),
        })
    }

    /// Find the slot for a serial.
    pub fn lookup(&self, serial: &str) -> Result<KeySlot> {
        let key = self
            .keys
            .get(serial)
            .ok_or_else(|| AgentError::NotFound(format!("Failed to find hsm {serial}")))?;

        let lock = Arc::clone(self.locks.entry(serial.to_string()).or_default().value());

        Ok(KeySlot {
            key: Arc::clone(key),
            lock,
        })
    }

    /// Lock a key by serial. Unlock by dropping the guard.
    pub async fn lock(&self, serial: &str) -> Result<KeyGuard> {
        Ok(self.lookup(serial)?.lock().await)
    }

    /// Registered serials, sorted
    pub fn serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.keys.keys().cloned().collect();
        serials.sort();
        serials
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
