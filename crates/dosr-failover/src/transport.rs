//! Network seam between the engine and the runtime.
//!
//! The engine never touches sockets. It names connections by [`ConnId`] and
//! asks a [`Transport`] to open, write, and close them. The `dosr-server`
//! crate implements this over `mio`; [`MemoryTransport`] records traffic in
//! memory for tests and simulation.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};
use std::io;

use bytes::{Bytes, BytesMut};
use dosr_types::PeerAddr;
use dosr_wire::{Frame, Message};

/// Opaque handle for one transport-level connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(u64);

impl ConnId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Abstraction over the connection layer.
///
/// Implementations may block on write backpressure; the engine does not
/// treat slow writes as a liveness failure. A write error, on the other
/// hand, is taken as evidence that the peer is gone.
pub trait Transport {
    /// Opens a new outbound connection.
    ///
    /// The connection may still be in progress when this returns. Writes
    /// issued meanwhile are buffered, and an attempt that fails later is
    /// reported through [`Engine::on_connect_failed`](crate::Engine::on_connect_failed)
    /// instead of as a disconnect.
    fn connect(&mut self, addr: &PeerAddr) -> io::Result<ConnId>;

    /// Writes one encoded frame to a connection.
    fn send(&mut self, conn: ConnId, bytes: &[u8]) -> io::Result<()>;

    /// Closes a connection. Closing an unknown or already-closed connection
    /// is a no-op.
    fn close(&mut self, conn: ConnId);
}

/// In-memory transport that records every write.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    next_conn: u64,
    remotes: HashMap<ConnId, PeerAddr>,
    open: HashSet<ConnId>,
    broken: HashSet<ConnId>,
    unreachable: HashSet<PeerAddr>,
    connect_attempts: usize,
    sent: Vec<(ConnId, Bytes)>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an inbound connection from `remote` and returns its id.
    pub fn accept(&mut self, remote: PeerAddr) -> ConnId {
        let conn = self.allocate(remote);
        self.open.insert(conn);
        conn
    }

    /// Makes future `connect` calls to `addr` fail.
    pub fn set_unreachable(&mut self, addr: PeerAddr) {
        self.unreachable.insert(addr);
    }

    /// Makes future writes on `conn` fail.
    pub fn break_connection(&mut self, conn: ConnId) {
        self.broken.insert(conn);
    }

    pub fn is_open(&self, conn: ConnId) -> bool {
        self.open.contains(&conn)
    }

    /// Returns the remote address a connection was opened to or accepted from.
    pub fn remote(&self, conn: ConnId) -> Option<&PeerAddr> {
        self.remotes.get(&conn)
    }

    /// Number of `connect` calls, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts
    }

    /// Every successful write, in order.
    pub fn sent(&self) -> &[(ConnId, Bytes)] {
        &self.sent
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// Decoded messages written on `conn`, in order.
    pub fn messages_on(&self, conn: ConnId) -> Vec<Message> {
        self.sent
            .iter()
            .filter(|(c, _)| *c == conn)
            .filter_map(|(_, bytes)| decode(bytes))
            .collect()
    }

    /// Decoded messages written on any connection whose remote is `addr`,
    /// excluding identity announcements.
    pub fn messages_to(&self, addr: &PeerAddr) -> Vec<Message> {
        self.sent
            .iter()
            .filter(|(conn, _)| self.remotes.get(conn) == Some(addr))
            .filter_map(|(_, bytes)| decode(bytes))
            .filter(|msg| !matches!(msg, Message::Hello { .. }))
            .collect()
    }

    fn allocate(&mut self, remote: PeerAddr) -> ConnId {
        let conn = ConnId(self.next_conn);
        self.next_conn += 1;
        self.remotes.insert(conn, remote);
        conn
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, addr: &PeerAddr) -> io::Result<ConnId> {
        self.connect_attempts += 1;
        if self.unreachable.contains(addr) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{addr} is unreachable"),
            ));
        }
        let conn = self.allocate(addr.clone());
        self.open.insert(conn);
        Ok(conn)
    }

    fn send(&mut self, conn: ConnId, bytes: &[u8]) -> io::Result<()> {
        if !self.open.contains(&conn) || self.broken.contains(&conn) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("{conn} is not writable"),
            ));
        }
        self.sent.push((conn, Bytes::copy_from_slice(bytes)));
        Ok(())
    }

    fn close(&mut self, conn: ConnId) {
        self.open.remove(&conn);
    }
}

fn decode(bytes: &Bytes) -> Option<Message> {
    let mut buf = BytesMut::from(&bytes[..]);
    let frame = Frame::decode(&mut buf).ok().flatten()?;
    Message::from_frame(frame).ok()
}
