//! # dosr-types: Core types for `dosr`
//!
//! This crate contains shared types used across the `dosr` failover system:
//! - Peer identity ([`PeerId`], [`PeerAddr`])
//! - Temporal types ([`Timestamp`])
//! - Startup failover topology ([`Topology`])

use std::{
    fmt::{Debug, Display},
    net::SocketAddr,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

// ============================================================================
// Peer Identity
// ============================================================================

/// Stable integer identifier for a peer.
///
/// Allocated once per distinct [`PeerAddr`] and never reused within a
/// process lifetime. The value `-1` is reserved for this node itself
/// ([`PeerId::SELF`]); every other id is non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(i64);

impl PeerId {
    /// The id that always refers to the local node.
    pub const SELF: PeerId = PeerId(-1);

    /// Creates a peer id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is below `-1`.
    pub fn new(id: i64) -> Self {
        assert!(id >= -1, "peer id must be -1 (self) or non-negative");
        Self(id)
    }

    /// Returns true if this id refers to the local node.
    pub fn is_self(self) -> bool {
        self == Self::SELF
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_self() {
            write!(f, "self")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<PeerId> for i64 {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

/// Network address of a peer: a host string and a TCP port.
///
/// Hosts are kept as given (IP literal or DNS name) because they travel
/// verbatim inside failure notices and liveness probes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    host: String,
    port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns true if the host can be carried in a whitespace-separated
    /// wire payload.
    pub fn is_wire_safe(&self) -> bool {
        !self.host.is_empty() && !self.host.chars().any(char::is_whitespace)
    }
}

impl Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Error returned when a `host:port` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePeerAddrError(String);

impl Display for ParsePeerAddrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid peer address '{}': expected host:port", self.0)
    }
}

impl std::error::Error for ParsePeerAddrError {}

impl FromStr for PeerAddr {
    type Err = ParsePeerAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePeerAddrError(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(err)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let port = port.parse::<u16>().map_err(|_| err())?;
        let addr = PeerAddr::new(host, port);
        if addr.is_wire_safe() {
            Ok(addr)
        } else {
            Err(err())
        }
    }
}

// ============================================================================
// Temporal Types
// ============================================================================

/// Wall-clock timestamp in nanoseconds since the Unix epoch.
///
/// Backups carry the sender's timestamp; receivers compare them to decide
/// which snapshot is freshest. Liveness timing uses `std::time::Instant`
/// instead, so clock steps never declare a peer dead.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch (1970-01-01 00:00:00 UTC).
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from nanoseconds since Unix epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Returns the timestamp as seconds since Unix epoch (truncates nanoseconds).
    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Creates a timestamp for the current time.
    ///
    /// A system clock set before the epoch yields [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        Self(nanos)
    }

    /// Creates a timestamp ensuring monotonicity: `max(now, last + 1ns)`.
    ///
    /// Two backups pushed by the same node always carry strictly increasing
    /// timestamps, even if the system clock moves backwards.
    pub fn now_monotonic(last: Option<Timestamp>) -> Self {
        let now = Self::now();
        match last {
            Some(last) if now.0 <= last.0 => Self(last.0.saturating_add(1)),
            _ => now,
        }
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Timestamp {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

// ============================================================================
// Topology
// ============================================================================

/// The failover topology of one node, as read from the startup
/// configuration.
///
/// - `fail_rec`: peers this node is the hot standby for.
/// - `fail_to`: peers this node fails over to, in preference order.
/// - `dependents`: peers that list this node as one of their fail-to targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub fail_rec: Vec<PeerAddr>,
    pub fail_to: Vec<PeerAddr>,
    pub dependents: Vec<PeerAddr>,
}

impl Topology {
    /// Returns true if no role lists are populated.
    pub fn is_empty(&self) -> bool {
        self.fail_rec.is_empty() && self.fail_to.is_empty() && self.dependents.is_empty()
    }
}
