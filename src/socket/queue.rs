//! Bounded outbound queue
//!
//! Producers wait when the queue is full. A signed certificate that is dropped
//! never reaches the host, so there is no lossy path.

use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::types::{AgentError, Result};

/// Default queue capacity per session
pub const QUEUE_SIZE: usize = 50;

/// Sending half, cloned into every dispatch task
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Envelope>,
}

impl OutboundQueue {
    /// Enqueue an envelope, waiting while the queue is full.
    pub async fn push(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| AgentError::Transport("Outbound queue closed".into()))
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a queue with room for `capacity` envelopes.
pub fn channel(capacity: usize) -> (OutboundQueue, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OutboundQueue { tx }, rx)
}
