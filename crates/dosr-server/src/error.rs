//! Server error types.

use std::net::SocketAddr;

use dosr_failover::FailoverError;
use dosr_wire::WireError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while setting up or running a node.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Wire protocol error.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// The failover engine could not be built.
    #[error("failover engine error: {0}")]
    Failover(#[from] FailoverError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Maximum connections reached.
    #[error("maximum connections reached: {0}")]
    MaxConnectionsReached(usize),

    /// Bind failed.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// A peer stopped reading and its write buffer is full.
    #[error("write buffer full: {buffered} bytes buffered, limit {limit}")]
    WriteBufferFull { buffered: usize, limit: usize },

    /// A peer address did not resolve to any socket address.
    #[error("could not resolve {0}")]
    Unresolvable(String),
}
