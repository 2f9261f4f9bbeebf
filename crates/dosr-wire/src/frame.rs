//! Frame encoding and decoding.
//!
//! A frame is a fixed 5-byte tag, an opaque payload, and the 4-byte
//! terminator `|::|`:
//!
//! ```text
//! ┌──────────┬─────────────────────┬───────────┐
//! │ tag (5B) │ payload (variable)  │ `|::|`    │
//! └──────────┴─────────────────────┴───────────┘
//! ```
//!
//! There is no length prefix, so the payload must never contain the
//! terminator. [`Frame::new`] enforces this on the sending side.

use std::fmt::{self, Display};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult};

/// Width of every frame tag.
pub const TAG_LEN: usize = 5;

/// Frame terminator.
pub const DELIMITER: &[u8; 4] = b"|::|";

/// Default upper bound on a buffered, undelimited frame (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// A 5-byte message tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag([u8; TAG_LEN]);

impl Tag {
    /// Remote requests this node shut down.
    pub const KILL: Tag = Tag(*b"kill ");
    /// Backup push.
    pub const BACKUP: Tag = Tag(*b"back ");
    /// Failure notice.
    pub const FAIL: Tag = Tag(*b"fail ");
    /// Liveness probe or reply.
    pub const ALIVE: Tag = Tag(*b"alive");
    /// Listening-address announcement on a freshly opened connection.
    pub const HELLO: Tag = Tag(*b"hello");

    pub const fn new(bytes: [u8; TAG_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TAG_LEN] {
        &self.0
    }

    /// Returns true if this tag is handled by the coordination layer rather
    /// than forwarded to the application.
    pub fn is_control(&self) -> bool {
        matches!(
            *self,
            Self::KILL | Self::BACKUP | Self::FAIL | Self::ALIVE | Self::HELLO
        )
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0).trim_end())
    }
}

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: Tag,
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame, rejecting payloads that would terminate it early.
    pub fn new(tag: Tag, payload: impl Into<Bytes>) -> WireResult<Self> {
        let payload = payload.into();
        if contains_delimiter(&tag, &payload) {
            return Err(WireError::DelimiterInPayload);
        }
        Ok(Self { tag, payload })
    }

    /// Returns the number of bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        TAG_LEN + self.payload.len() + DELIMITER.len()
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_slice(self.tag.as_bytes());
        buf.put_slice(&self.payload);
        buf.put_slice(DELIMITER);
    }

    /// Encodes the frame into a standalone buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// The tag followed by the payload, as handed to the application for
    /// frames the coordination layer does not recognize.
    pub fn application_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TAG_LEN + self.payload.len());
        buf.put_slice(self.tag.as_bytes());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes one frame from the front of `buf` using the default size limit.
    pub fn decode(buf: &mut BytesMut) -> WireResult<Option<Frame>> {
        Self::decode_with_limit(buf, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the delimiter has not arrived yet. On
    /// `TruncatedFrame` the bad bytes are consumed so the caller can keep
    /// decoding; on `FrameTooLarge` the whole buffer is discarded.
    ///
    /// Scans `buf` from the start on every call. Streams that arrive in
    /// many reads should use a [`FrameDecoder`].
    pub fn decode_with_limit(buf: &mut BytesMut, max_frame_size: usize) -> WireResult<Option<Frame>> {
        FrameDecoder::new(max_frame_size).decode(buf)
    }

    fn split(buf: &mut BytesMut, end: usize, max_frame_size: usize) -> WireResult<Frame> {
        let mut raw = buf.split_to(end + DELIMITER.len());
        if end < TAG_LEN {
            return Err(WireError::TruncatedFrame { len: end });
        }
        if end > max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: end,
                max: max_frame_size,
            });
        }

        raw.truncate(end);
        let payload = raw.split_off(TAG_LEN).freeze();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&raw);

        Ok(Frame {
            tag: Tag(tag),
            payload,
        })
    }
}

/// Incremental decoder for one connection's read buffer.
///
/// Remembers how far the buffer has been searched for a delimiter, so a
/// large frame arriving in many reads is scanned once. Between calls the
/// caller may only append to the buffer.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: usize,
    scanned: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            scanned: 0,
        }
    }

    /// Bytes at the front of the buffer already known not to start a
    /// delimiter.
    pub fn scanned(&self) -> usize {
        self.scanned
    }

    /// Decodes one frame from the front of `buf`, with the same results as
    /// [`Frame::decode_with_limit`].
    pub fn decode(&mut self, buf: &mut BytesMut) -> WireResult<Option<Frame>> {
        let start = self.scanned.min(buf.len());
        let Some(offset) = find_delimiter(&buf[start..]) else {
            if buf.len() > self.max_frame_size {
                let size = buf.len();
                buf.clear();
                self.scanned = 0;
                return Err(WireError::FrameTooLarge {
                    size,
                    max: self.max_frame_size,
                });
            }
            // A delimiter may still begin in the last three bytes.
            self.scanned = buf.len().saturating_sub(DELIMITER.len() - 1);
            return Ok(None);
        };

        self.scanned = 0;
        Frame::split(buf, start + offset, self.max_frame_size).map(Some)
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

/// Checks the tag, the payload, and the seam between them.
fn contains_delimiter(tag: &Tag, payload: &[u8]) -> bool {
    if find_delimiter(tag.as_bytes()).is_some() || find_delimiter(payload).is_some() {
        return true;
    }
    let overlap = DELIMITER.len() - 1;
    let mut seam = Vec::with_capacity(overlap * 2);
    seam.extend_from_slice(&tag.as_bytes()[TAG_LEN - overlap..]);
    seam.extend_from_slice(&payload[..payload.len().min(overlap)]);
    find_delimiter(&seam).is_some()
}
