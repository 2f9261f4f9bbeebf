//! Runtime configuration.

use std::net::SocketAddr;
use std::time::Duration;

use dosr_wire::DEFAULT_MAX_FRAME_SIZE;

/// Socket and timer settings for [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_addr: SocketAddr,
    /// Period of the heartbeat and backup timer.
    pub tick_interval: Duration,
    /// How long an outbound connect may stay in flight.
    pub connect_timeout: Duration,
    /// Initial capacity of each connection's buffers.
    pub buffer_size: usize,
    pub max_connections: usize,
    /// Largest inbound frame. Also bounds each connection's write buffer.
    pub max_frame_size: usize,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<SocketAddr>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            tick_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(1),
            buffer_size: 4096,
            max_connections: 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }
}
