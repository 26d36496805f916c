//! Session with one remote host
//!
//! A session dials `wss://<host>/hsm` and then runs three activities until
//! one of them fails:
//!
//! - **reader**: reads frames and hands each data frame to its own dispatch task
//! - **writer**: drains the outbound queue, sends pings and status reports
//! - **watchdog**: fails the session when nothing arrives within the wait window
//!
//! Per-message failures never end the session. Transport failures always do;
//! the supervisor then starts a fresh one.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::dispatch::Dispatcher;
use super::host::HostUri;
use super::queue::{self, OutboundQueue};
use super::SessionSettings;
use crate::authority::CertificateEngine;
use crate::envelope::Envelope;
use crate::types::{AgentError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Lifecycle of one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Closing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Persistent connection to one remote host
pub struct Session {
    uri: HostUri,
    dispatcher: Arc<Dispatcher>,
    settings: SessionSettings,
}

impl Session {
    pub fn new(uri: HostUri, engine: Arc<CertificateEngine>, settings: SessionSettings) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            uri.serial.clone(),
            uri.credentials.clone(),
            engine,
            settings.max_in_flight,
        ));

        Self {
            uri,
            dispatcher,
            settings,
        }
    }

    pub fn host(&self) -> &str {
        &self.uri.host
    }

    pub fn serial(&self) -> &str {
        &self.uri.serial
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Connect and stream until the connection fails.
    pub async fn stream(&self) -> Result<()> {
        self.transition(SessionState::Connecting);

        let endpoint = self.uri.endpoint();
        let (ws, _) = timeout(self.settings.write_timeout, connect_async(endpoint.as_str()))
            .await
            .map_err(|_| AgentError::Transport(format!("Timed out connecting to {endpoint}")))?
            .map_err(|e| AgentError::Transport(format!("Failed to connect to host {endpoint}: {e}")))?;

        self.transition(SessionState::Streaming);

        let (mut sink, source) = ws.split();
        let (queue, mut rx) = queue::channel(self.settings.queue_size);
        let activity = Arc::new(Notify::new());

        let result = tokio::select! {
            r = self.read_loop(source, queue, Arc::clone(&activity)) => r,
            r = self.write_loop(&mut sink, &mut rx) => r,
            r = watchdog(&activity, self.settings.ping_wait) => r,
        };

        self.transition(SessionState::Closing);

        rx.close();
        self.teardown(&mut sink).await;

        result
    }

    /// Best-effort close frame, then close the sink.
    async fn teardown(&self, sink: &mut WsSink) {
        match timeout(self.settings.write_timeout, sink.send(Message::Close(None))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(host = %self.uri.host, error = %e, "Close frame not sent"),
            Err(_) => debug!(host = %self.uri.host, "Close frame timed out"),
        }
        match timeout(self.settings.write_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(host = %self.uri.host, error = %e, "Connection close failed"),
            Err(_) => debug!(host = %self.uri.host, "Connection close timed out"),
        }
    }

    fn transition(&self, state: SessionState) {
        debug!(host = %self.uri.host, serial = %self.uri.serial, state = %state, "Session state");
    }

    async fn read_loop(
        &self,
        mut source: WsSource,
        queue: OutboundQueue,
        activity: Arc<Notify>,
    ) -> Result<()> {
        while let Some(frame) = source.next().await {
            let frame = frame.map_err(|e| AgentError::Transport(format!("Read failed: {e}")))?;
            activity.notify_one();

            match frame {
                Message::Text(text) => self.dispatcher.spawn(text.into_bytes(), queue.clone()),
                Message::Binary(data) => self.dispatcher.spawn(data, queue.clone()),
                Message::Close(frame) => {
                    info!(host = %self.uri.host, ?frame, "Host closed connection");
                    return Err(AgentError::Transport("Connection closed by host".into()));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }

        Err(AgentError::Transport("Connection closed".into()))
    }

    async fn write_loop(&self, sink: &mut WsSink, rx: &mut mpsc::Receiver<Envelope>) -> Result<()> {
        let start = Instant::now();
        let mut ping = interval_at(start + self.settings.ping_interval, self.settings.ping_interval);
        let mut status = interval_at(start, self.settings.status_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(envelope) => {
                        debug!(host = %self.uri.host, id = %envelope.id, "Sending response");
                        self.write(sink, Message::Text(envelope.to_frame()?)).await?;
                    }
                    None => return Ok(()),
                },
                _ = ping.tick() => {
                    self.write(sink, Message::Ping(Vec::new())).await?;
                }
                _ = status.tick() => {
                    let envelope = self.dispatcher.status()?;
                    self.write(sink, Message::Text(envelope.to_frame()?)).await?;
                }
            }
        }
    }

    async fn write(&self, sink: &mut WsSink, message: Message) -> Result<()> {
        match timeout(self.settings.write_timeout, sink.send(message)).await {
            Ok(result) => result.map_err(|e| AgentError::Transport(format!("Write failed: {e}"))),
            Err(_) => Err(AgentError::Transport("Write timed out".into())),
        }
    }
}

/// Fail once `wait` passes without inbound activity.
async fn watchdog(activity: &Notify, wait: Duration) -> Result<()> {
    loop {
        if timeout(wait, activity.notified()).await.is_err() {
            warn!(wait_secs = wait.as_secs_f64(), "No traffic from host within wait window");
            return Err(AgentError::Transport("Keepalive timeout".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watchdog_fires_without_activity() {
        let activity = Notify::new();
        let result = watchdog(&activity, Duration::from_millis(30)).await;
        assert!(matches!(result, Err(AgentError::Transport(_))));
    }

    #[tokio::test]
    async fn test_watchdog_kept_alive_by_activity() {
        let activity = Arc::new(Notify::new());
        let feeder = {
            let activity = Arc::clone(&activity);
            tokio::spawn(async move {
                for _ in 0..10 {
                    activity.notify_one();
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
        };

        let early = timeout(Duration::from_millis(80), watchdog(&activity, Duration::from_millis(50))).await;
        assert!(early.is_err(), "watchdog fired while traffic was flowing");
        feeder.await.unwrap();
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::Connecting.to_string(), "connecting");
        assert_eq!(SessionState::Streaming.to_string(), "streaming");
        assert_eq!(SessionState::Closing.to_string(), "closing");
    }

    #[tokio::test]
    async fn test_teardown_after_peer_hangs_up() {
        use crate::keys::{HardwareKey, KeyRegistry, SoftwareKey};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let host = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);
        });

        let (ws, _) = connect_async(format!("ws://127.0.0.1:{port}/hsm")).await.unwrap();
        host.await.unwrap();
        let (mut sink, _source) = ws.split();

        let keys: Vec<Arc<dyn HardwareKey>> = vec![Arc::new(SoftwareKey::generate("abc123"))];
        let engine = Arc::new(CertificateEngine::new(Arc::new(KeyRegistry::new(keys).unwrap()), 0));
        let uri = HostUri::parse(&format!("ws://tok:sec@127.0.0.1:{port}/abc123")).unwrap();
        let settings = SessionSettings {
            write_timeout: Duration::from_millis(500),
            ..SessionSettings::default()
        };
        let session = Session::new(uri, engine, settings);

        // Failures are logged, never returned or raised
        timeout(Duration::from_secs(3), session.teardown(&mut sink))
            .await
            .expect("teardown must be bounded by the write timeout");
    }
}
