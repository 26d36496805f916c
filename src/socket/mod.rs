//! Connections to the fleet-management hosts
//!
//! # Architecture
//!
//! ```text
//!  Supervisor ──spawns──▶ Session (one per host) ──restart on error──┐
//!                            │                                      │
//!            ┌───────────────┼──────────────┐                       │
//!            ▼               ▼              ▼                       │
//!         reader          writer        watchdog ◀──────────────────┘
//!            │               ▲
//!    task per message        │
//!            ▼               │
//!        Dispatcher ──▶ OutboundQueue (bounded)
//! ```

pub mod dispatch;
pub mod host;
pub mod queue;
pub mod session;
pub mod supervisor;

use std::time::Duration;

pub use dispatch::Dispatcher;
pub use host::HostUri;
pub use queue::OutboundQueue;
pub use session::{Session, SessionState};
pub use supervisor::Supervisor;

/// Absolute deadline for one frame write (also bounds the dial)
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between status reports
pub const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between WebSocket pings
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Window without inbound traffic after which the session is dead
pub const PING_WAIT: Duration = Duration::from_secs(40);

/// Pause before a failed session is restarted
pub const RESTART_DELAY: Duration = Duration::from_millis(100);

/// Default limit on concurrently processed messages per session
pub const MAX_IN_FLIGHT: usize = 16;

/// Timing and sizing for sessions
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub write_timeout: Duration,
    pub status_interval: Duration,
    pub ping_interval: Duration,
    pub ping_wait: Duration,
    pub restart_delay: Duration,
    pub queue_size: usize,
    pub max_in_flight: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            write_timeout: WRITE_TIMEOUT,
            status_interval: STATUS_INTERVAL,
            ping_interval: PING_INTERVAL,
            ping_wait: PING_WAIT,
            restart_delay: RESTART_DELAY,
            queue_size: queue::QUEUE_SIZE,
            max_in_flight: MAX_IN_FLIGHT,
        }
    }
}
