//! Wire protocol error types.

use thiserror::Error;

use crate::frame::TAG_LEN;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur while framing or parsing peer messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// No delimiter was found within the frame size limit.
    #[error("frame too large: {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A delimiter arrived before a full tag.
    #[error("truncated frame: {len} bytes before delimiter, tag needs {TAG_LEN}")]
    TruncatedFrame { len: usize },

    /// The payload would terminate the frame early.
    #[error("payload contains the frame delimiter")]
    DelimiterInPayload,

    /// The payload does not match the grammar for its tag.
    #[error("malformed '{tag}' payload: {reason}")]
    Malformed { tag: String, reason: String },

    /// A text payload is not UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The address contains whitespace or is empty.
    #[error("address cannot be sent on the wire: {0}")]
    InvalidAddress(String),
}

impl WireError {
    pub(crate) fn malformed(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            tag: tag.into(),
            reason: reason.into(),
        }
    }
}
