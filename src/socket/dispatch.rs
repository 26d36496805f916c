//! Per-message handling
//!
//! Each inbound frame is opened, matched on its type and, for certificate
//! requests, passed to the engine. Failures stay inside the message: they are
//! logged and the message is dropped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use super::queue::OutboundQueue;
use crate::authority::CertificateEngine;
use crate::envelope::{Credentials, Envelope, InboundMessage, OutboundMessage, SshResponse, StatusReport};
use crate::types::{AgentError, Result};

/// Turns inbound frames into response envelopes for one session
pub struct Dispatcher {
    serial: String,
    credentials: Credentials,
    engine: Arc<CertificateEngine>,
    limiter: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        serial: impl Into<String>,
        credentials: Credentials,
        engine: Arc<CertificateEngine>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            serial: serial.into(),
            credentials,
            engine,
            limiter: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Handle one frame. `Ok(None)` means there is nothing to send back.
    pub async fn handle(&self, frame: &[u8]) -> Result<Option<Envelope>> {
        let envelope = Envelope::from_frame(frame)?;
        let (id, message): (String, InboundMessage) = self.credentials.open(&envelope)?;

        match message {
            InboundMessage::SshCertificate(request) => {
                debug!(id = %id, key_id = %request.certificate.key_id, "Certificate request");
                let certificate = self.engine.issue(&self.serial, request).await?;
                let body = OutboundMessage::SshCertificate(SshResponse::from(&certificate));
                Ok(Some(self.credentials.seal(&id, &body)?))
            }
            InboundMessage::Unknown => {
                debug!(id = %id, "Ignoring message of unknown type");
                Ok(None)
            }
        }
    }

    /// Sealed status report for the writer's periodic tick
    pub fn status(&self) -> Result<Envelope> {
        let id = uuid::Uuid::new_v4().to_string();
        let body = OutboundMessage::Status(StatusReport {
            serial: self.serial.clone(),
        });
        self.credentials.seal(&id, &body)
    }

    /// Handle a frame on its own task and queue any response.
    ///
    /// At most `max_in_flight` frames are processed at once; the rest wait for
    /// a permit. Errors and panics are logged here and never reach the reader.
    pub fn spawn(self: &Arc<Self>, frame: Vec<u8>, queue: OutboundQueue) {
        let dispatcher = Arc::clone(self);

        tokio::spawn(async move {
            let work = async {
                let _permit = Arc::clone(&dispatcher.limiter)
                    .acquire_owned()
                    .await
                    .map_err(|e| AgentError::Internal(format!("Dispatch limiter closed: {e}")))?;

                if let Some(response) = dispatcher.handle(&frame).await? {
                    queue.push(response).await?;
                }
                Ok(())
            };

            contain(&dispatcher.serial, work).await;
        });
    }
}

/// How one message's work ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Dropped,
    Panicked,
}

/// Run one message's work, logging its error or panic.
async fn contain<F>(serial: &str, work: F) -> Outcome
where
    F: std::future::Future<Output = Result<()>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(())) => Outcome::Done,
        Ok(Err(e)) => {
            warn!(serial = %serial, kind = e.kind(), error = %e, "Message dropped");
            Outcome::Dropped
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(serial = %serial, error = %reason, "Message handle panic");
            Outcome::Panicked
        }
    }
}
