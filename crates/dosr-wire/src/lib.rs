//! # dosr-wire: Peer wire protocol for `dosr`
//!
//! Every message between peers is a delimited text frame:
//!
//! ```text
//! <tag:5 bytes><payload>|::|
//! ```
//!
//! The coordination layer owns five tags (`kill `, `back `, `fail `,
//! `alive`, `hello`). Frames with any other tag belong to the application
//! and are passed through as [`Message::Application`].
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use dosr_types::PeerAddr;
//! use dosr_wire::{Frame, Message};
//!
//! let probe = Message::probe(PeerAddr::new("10.0.0.1", 9000));
//! let mut buf = BytesMut::new();
//! probe.to_frame().unwrap().encode(&mut buf);
//! assert_eq!(&buf[..], b"alive send 10.0.0.1 9000|::|");
//!
//! let frame = Frame::decode(&mut buf).unwrap().unwrap();
//! assert_eq!(Message::from_frame(frame).unwrap(), probe);
//! ```

mod error;
mod frame;
mod message;

pub use error::{WireError, WireResult};
pub use frame::{DEFAULT_MAX_FRAME_SIZE, DELIMITER, Frame, FrameDecoder, TAG_LEN, Tag};
pub use message::{AliveMessage, BACKUP_SEPARATOR, Message};
