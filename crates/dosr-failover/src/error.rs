//! Failover engine error types.

use std::io;

use dosr_types::{PeerAddr, PeerId};
use dosr_wire::WireError;
use thiserror::Error;

/// Result type for engine operations.
pub type FailoverResult<T> = Result<T, FailoverError>;

/// Errors surfaced by the failover engine.
///
/// Once the engine is running most of these are logged and absorbed by the
/// caller; only the builder errors are fatal.
#[derive(Debug, Error)]
pub enum FailoverError {
    /// The engine was built without an application service.
    #[error("no application service configured")]
    MissingService,

    /// The engine was built without a transport.
    #[error("no transport configured")]
    MissingTransport,

    /// The id has never been allocated by the identity registry.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// Messages are never sent to the local node.
    #[error("refusing to send to the local node")]
    SendToSelf,

    /// Opening a connection failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: PeerAddr,
        #[source]
        source: io::Error,
    },

    /// Writing to an established connection failed.
    #[error("failed to send to peer {peer}: {source}")]
    Send {
        peer: PeerId,
        #[source]
        source: io::Error,
    },

    /// The message could not be framed.
    #[error(transparent)]
    Wire(#[from] WireError),
}
