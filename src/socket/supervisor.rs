//! Session supervisor
//!
//! Runs one session per configured host and restarts it forever. The process
//! lifecycle owns shutdown: it aborts the returned task handles.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::host::HostUri;
use super::session::Session;
use super::SessionSettings;
use crate::authority::CertificateEngine;
use crate::types::Result;

/// Owns the sessions for all configured hosts
pub struct Supervisor {
    sessions: Vec<Arc<Session>>,
}

impl Supervisor {
    /// Parse every host URI. Invalid entries are logged and skipped.
    pub fn new<I, S>(hosts: I, engine: Arc<CertificateEngine>, settings: SessionSettings) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sessions = Vec::new();

        for (index, uri) in hosts.into_iter().enumerate() {
            match HostUri::parse(uri.as_ref()) {
                Ok(uri) => {
                    if engine.registry().lookup(&uri.serial).is_err() {
                        warn!(
                            host = %uri.host,
                            serial = %uri.serial,
                            "No local key for host serial, requests will be rejected"
                        );
                    }
                    sessions.push(Arc::new(Session::new(uri, Arc::clone(&engine), settings.clone())));
                }
                Err(e) => {
                    error!(index, error = %e, "Skipping invalid host uri");
                }
            }
        }

        Self { sessions }
    }

    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start every session on its own task.
    pub fn spawn_all(&self) -> Vec<JoinHandle<()>> {
        self.sessions
            .iter()
            .map(|session| {
                info!(host = %session.host(), serial = %session.serial(), "Starting session");
                tokio::spawn(run_forever(Arc::clone(session)))
            })
            .collect()
    }
}

/// Stream, log the outcome, pause, repeat.
pub async fn run_forever(session: Arc<Session>) {
    let delay = session.settings().restart_delay;
    loop {
        if let Err(e) = run_once(&session, delay).await {
            debug!(host = %session.host(), kind = e.kind(), "Restarting session");
        }
    }
}

/// One connection attempt. Transport failures are the normal way a session
/// ends; anything else is unexpected and logged as an error.
async fn run_once(session: &Session, delay: Duration) -> Result<()> {
    let result = session.stream().await;
    match &result {
        Ok(()) => info!(host = %session.host(), "Session closed"),
        Err(e) if e.is_transport() => warn!(
            host = %session.host(),
            serial = %session.serial(),
            error = %e,
            "Socket stream error"
        ),
        Err(e) => error!(
            host = %session.host(),
            serial = %session.serial(),
            kind = e.kind(),
            error = %e,
            "Session failed"
        ),
    }
    tokio::time::sleep(delay).await;
    result
}
