//! [`Transport`] over non-blocking `mio` sockets.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, ToSocketAddrs};
use std::time::{Duration, Instant};

use dosr_failover::{ConnId, Transport};
use dosr_types::PeerAddr;
use dosr_wire::Frame;
use mio::net::TcpStream;
use mio::{Registry, Token};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};

/// What one readiness event produced.
#[derive(Debug)]
pub struct Inbound {
    pub frames: Vec<Frame>,
    /// False once the peer closed the socket or it failed; the connection
    /// has then already been removed.
    pub open: bool,
}

/// A connection's write buffer may hold at most this many maximum-size
/// frames before sends to it fail.
pub const WRITE_BUFFER_FRAMES: usize = 4;

/// Progress of a non-blocking outbound connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectProgress {
    /// The socket is connected, or was never connecting.
    Established,
    /// The connect is still in flight.
    Pending,
    /// The connect failed and the connection has been removed.
    Failed,
}

/// Owns every peer socket of a node.
///
/// Outbound connects never block: the socket is registered for writability
/// and [`finish_connect`](Self::finish_connect) settles it on the next event,
/// or [`expire_connects`](Self::expire_connects) gives up on it after the
/// connect timeout. Writes go straight to the socket; whatever does not fit
/// is buffered, up to [`WRITE_BUFFER_FRAMES`] maximum-size frames, and
/// flushed on the next writable event.
pub struct MioTransport {
    registry: Registry,
    connections: HashMap<ConnId, Connection>,
    next_token: usize,
    connect_timeout: Duration,
    buffer_size: usize,
    max_frame_size: usize,
    max_connections: usize,
}

impl MioTransport {
    pub fn new(registry: Registry, first_token: usize, config: &ServerConfig) -> Self {
        Self {
            registry,
            connections: HashMap::new(),
            next_token: first_token,
            connect_timeout: config.connect_timeout,
            buffer_size: config.buffer_size,
            max_frame_size: config.max_frame_size,
            max_connections: config.max_connections,
        }
    }

    /// Registers a connected stream for readiness events.
    pub fn insert(&mut self, stream: TcpStream, remote: PeerAddr) -> ServerResult<ConnId> {
        self.register(stream, remote, None)
    }

    fn register(
        &mut self,
        stream: TcpStream,
        remote: PeerAddr,
        connecting_since: Option<Instant>,
    ) -> ServerResult<ConnId> {
        if self.connections.len() >= self.max_connections {
            return Err(ServerError::MaxConnectionsReached(self.max_connections));
        }
        let token = Token(self.next_token);
        self.next_token += 1;

        let mut connection =
            Connection::new(token, stream, remote, self.buffer_size, self.max_frame_size);
        if let Some(since) = connecting_since {
            connection = connection.connecting(since);
        }
        let interest = connection.interest();
        self.registry
            .register(&mut connection.stream, token, interest)?;

        let conn = conn_id(token);
        self.connections.insert(conn, connection);
        Ok(conn)
    }

    /// Settles an outbound connect after a readiness event.
    ///
    /// Connections that are not connecting report `Established`.
    pub fn finish_connect(&mut self, conn: ConnId) -> ConnectProgress {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return ConnectProgress::Established;
        };
        if !connection.is_connecting() {
            return ConnectProgress::Established;
        }

        let failure = match connection.stream.take_error() {
            Ok(Some(e)) | Err(e) => Some(e),
            Ok(None) => match connection.stream.peer_addr() {
                Ok(_) => None,
                Err(e)
                    if e.kind() == io::ErrorKind::NotConnected
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    return ConnectProgress::Pending;
                }
                Err(e) => Some(e),
            },
        };
        if let Some(e) = failure {
            warn!(%conn, remote = %connection.remote, error = %e, "connect failed");
            self.close(conn);
            return ConnectProgress::Failed;
        }

        connection.connecting_since = None;
        if let Err(e) = connection.stream.set_nodelay(true) {
            debug!(%conn, error = %e, "set_nodelay failed");
        }
        let interest = connection.interest();
        if let Err(e) = self
            .registry
            .reregister(&mut connection.stream, connection.token, interest)
        {
            warn!(%conn, error = %e, "reregister failed");
            self.close(conn);
            return ConnectProgress::Failed;
        }
        info!(%conn, remote = %connection.remote, "connected");
        ConnectProgress::Established
    }

    /// Closes every connect that has been in flight for longer than the
    /// connect timeout and returns their ids.
    pub fn expire_connects(&mut self, now: Instant) -> Vec<ConnId> {
        let expired: Vec<ConnId> = self
            .connections
            .iter()
            .filter(|(_, c)| {
                c.connecting_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= self.connect_timeout)
            })
            .map(|(conn, _)| *conn)
            .collect();
        for conn in &expired {
            warn!(conn = %conn, timeout_ms = self.connect_timeout.as_millis() as u64, "connect timed out");
            self.close(*conn);
        }
        expired
    }

    /// Reads everything available on `conn` and decodes complete frames.
    ///
    /// Returns `None` for a connection that is no longer open.
    pub fn read(&mut self, conn: ConnId) -> Option<Inbound> {
        let connection = self.connections.get_mut(&conn)?;
        let open = match connection.read() {
            Ok(open) => open,
            Err(e) => {
                warn!(%conn, remote = %connection.remote, error = %e, "read failed");
                false
            }
        };
        let frames = connection.drain_frames();
        if !open {
            self.close(conn);
        }
        Some(Inbound { frames, open })
    }

    /// Flushes buffered writes. Returns false if the connection failed and
    /// was removed.
    pub fn flush(&mut self, conn: ConnId) -> bool {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return true;
        };
        let result = connection.write().and_then(|_| {
            let interest = connection.interest();
            self.registry
                .reregister(&mut connection.stream, connection.token, interest)
        });
        if let Err(e) = result {
            warn!(%conn, error = %e, "flush failed");
            self.close(conn);
            return false;
        }
        true
    }

    /// Closes every connection.
    pub fn close_all(&mut self) {
        let conns: Vec<ConnId> = self.connections.keys().copied().collect();
        for conn in conns {
            self.close(conn);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Transport for MioTransport {
    fn connect(&mut self, addr: &PeerAddr) -> io::Result<ConnId> {
        let target = (addr.host(), addr.port())
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::other(ServerError::Unresolvable(addr.to_string())))?;

        let stream = TcpStream::connect(target)?;
        let conn = self
            .register(stream, addr.clone(), Some(Instant::now()))
            .map_err(io::Error::other)?;
        debug!(%conn, %addr, %target, "connecting");
        Ok(conn)
    }

    fn send(&mut self, conn: ConnId, bytes: &[u8]) -> io::Result<()> {
        let limit = self.max_frame_size.saturating_mul(WRITE_BUFFER_FRAMES);
        let connection = self.connections.get_mut(&conn).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, format!("{conn} is not open"))
        })?;
        let buffered = connection.write_buf.len();
        if buffered.saturating_add(bytes.len()) > limit {
            return Err(io::Error::other(ServerError::WriteBufferFull { buffered, limit }));
        }
        connection.write_buf.extend_from_slice(bytes);
        if !connection.write()? {
            let interest = connection.interest();
            self.registry
                .reregister(&mut connection.stream, connection.token, interest)?;
        }
        Ok(())
    }

    fn close(&mut self, conn: ConnId) {
        let Some(mut connection) = self.connections.remove(&conn) else {
            return;
        };
        if let Err(e) = self.registry.deregister(&mut connection.stream) {
            debug!(%conn, error = %e, "deregister failed");
        }
        if let Err(e) = connection.stream.shutdown(Shutdown::Both) {
            debug!(%conn, error = %e, "shutdown failed");
        }
        debug!(%conn, remote = %connection.remote, "closed");
    }
}

/// Connection ids are the poll tokens they are registered under.
pub(crate) fn conn_id(token: Token) -> ConnId {
    ConnId::new(token.0 as u64)
}
