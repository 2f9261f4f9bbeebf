//! Connection state management.

use std::io::{self, Read, Write};
use std::time::Instant;

use bytes::BytesMut;
use dosr_types::PeerAddr;
use dosr_wire::{Frame, FrameDecoder};
use mio::net::TcpStream;
use mio::{Interest, Token};
use tracing::warn;

/// Buffered state of one peer socket.
pub struct Connection {
    pub token: Token,
    pub stream: TcpStream,
    /// Address the socket is connected to (an ephemeral port for accepted
    /// connections).
    pub remote: PeerAddr,
    pub read_buf: BytesMut,
    pub write_buf: BytesMut,
    pub decoder: FrameDecoder,
    /// Set while an outbound connect is in progress.
    pub connecting_since: Option<Instant>,
}

impl Connection {
    pub fn new(
        token: Token,
        stream: TcpStream,
        remote: PeerAddr,
        buffer_size: usize,
        max_frame_size: usize,
    ) -> Self {
        Self {
            token,
            stream,
            remote,
            read_buf: BytesMut::with_capacity(buffer_size),
            write_buf: BytesMut::with_capacity(buffer_size),
            decoder: FrameDecoder::new(max_frame_size),
            connecting_since: None,
        }
    }

    /// Marks the socket as still connecting. Writes stay buffered until
    /// the connect completes.
    pub fn connecting(mut self, since: Instant) -> Self {
        self.connecting_since = Some(since);
        self
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting_since.is_some()
    }

    /// Reads data from the socket into the read buffer.
    ///
    /// Returns `true` if the connection is still open.
    pub fn read(&mut self) -> io::Result<bool> {
        let mut temp_buf = [0u8; 4096];

        loop {
            match self.stream.read(&mut temp_buf) {
                Ok(0) => return Ok(false),
                Ok(n) => self.read_buf.extend_from_slice(&temp_buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes data from the write buffer to the socket.
    ///
    /// Returns `true` if all data was written.
    pub fn write(&mut self) -> io::Result<bool> {
        if self.is_connecting() {
            return Ok(self.write_buf.is_empty());
        }
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write to socket",
                    ));
                }
                Ok(n) => {
                    let _ = self.write_buf.split_to(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Decodes every complete frame in the read buffer.
    ///
    /// Undecodable input is logged and skipped; the codec has already
    /// consumed (or, for oversized input, discarded) the offending bytes.
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            match self.decoder.decode(&mut self.read_buf) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return frames,
                Err(e) => warn!(remote = %self.remote, error = %e, "dropping undecodable input"),
            }
        }
    }

    /// Returns the interest flags for this connection.
    pub fn interest(&self) -> Interest {
        if self.write_buf.is_empty() && !self.is_connecting() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }
}
