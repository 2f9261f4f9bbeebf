//! Typed peer messages.
//!
//! Payload grammars, one per recognized tag:
//!
//! | Tag | Payload |
//! |---|---|
//! | `kill ` | empty |
//! | `back ` | `<timestamp>\|: <snapshot>` |
//! | `fail ` | `<fromAddr> <fromPort> <toAddr> <toPort>` |
//! | `alive` | ` send <addr> <port>` or ` ret <addr> <port> <bool>` |
//! | `hello` | ` <addr> <port>` |
//!
//! Any other tag is carried through untouched as [`Message::Application`].

use bytes::{BufMut, Bytes, BytesMut};
use dosr_types::{PeerAddr, Timestamp};

use crate::error::{WireError, WireResult};
use crate::frame::{Frame, Tag};

/// Separates the timestamp from the snapshot in a backup payload.
pub const BACKUP_SEPARATOR: &[u8; 3] = b"|: ";

/// Liveness probe traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliveMessage {
    /// "Are you alive?" `origin` is the prober's listening address.
    Probe { origin: PeerAddr },
    /// Answer to a probe, echoing the prober's address.
    Reply { origin: PeerAddr, alive: bool },
}

/// A message exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// The sender asks this node to shut down.
    Kill,
    /// A serialized application snapshot stamped by the sender.
    Backup { timestamp: Timestamp, snapshot: Bytes },
    /// `from` has failed and `to` is taking over its traffic.
    Fail { from: PeerAddr, to: PeerAddr },
    /// Liveness probe or reply.
    Alive(AliveMessage),
    /// The sender's listening address, sent first on every dialed connection.
    Hello { addr: PeerAddr },
    /// Unrecognized tag; forwarded to the application verbatim.
    Application(Frame),
}

impl Message {
    pub fn probe(origin: PeerAddr) -> Self {
        Self::Alive(AliveMessage::Probe { origin })
    }

    pub fn reply(origin: PeerAddr, alive: bool) -> Self {
        Self::Alive(AliveMessage::Reply { origin, alive })
    }

    pub fn fail(from: PeerAddr, to: PeerAddr) -> Self {
        Self::Fail { from, to }
    }

    pub fn backup(timestamp: Timestamp, snapshot: impl Into<Bytes>) -> Self {
        Self::Backup {
            timestamp,
            snapshot: snapshot.into(),
        }
    }

    /// Returns the tag this message is framed with.
    pub fn tag(&self) -> Tag {
        match self {
            Self::Kill => Tag::KILL,
            Self::Backup { .. } => Tag::BACKUP,
            Self::Fail { .. } => Tag::FAIL,
            Self::Alive(_) => Tag::ALIVE,
            Self::Hello { .. } => Tag::HELLO,
            Self::Application(frame) => frame.tag,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kill => "kill",
            Self::Backup { .. } => "backup",
            Self::Fail { .. } => "fail",
            Self::Alive(AliveMessage::Probe { .. }) => "alive-probe",
            Self::Alive(AliveMessage::Reply { .. }) => "alive-reply",
            Self::Hello { .. } => "hello",
            Self::Application(_) => "application",
        }
    }

    /// Parses a frame into a typed message.
    pub fn from_frame(frame: Frame) -> WireResult<Self> {
        match frame.tag {
            Tag::KILL => Ok(Self::Kill),
            Tag::BACKUP => parse_backup(&frame.payload),
            Tag::FAIL => {
                let fields = fields(&frame.payload)?;
                match fields.as_slice() {
                    [from_host, from_port, to_host, to_port] => Ok(Self::Fail {
                        from: parse_addr("fail", from_host, from_port)?,
                        to: parse_addr("fail", to_host, to_port)?,
                    }),
                    _ => Err(WireError::malformed(
                        "fail",
                        format!("expected 4 fields, got {}", fields.len()),
                    )),
                }
            }
            Tag::ALIVE => {
                let fields = fields(&frame.payload)?;
                match fields.as_slice() {
                    ["send", host, port] => Ok(Self::probe(parse_addr("alive", host, port)?)),
                    ["ret", host, port, alive] => {
                        let alive = match *alive {
                            "true" => true,
                            "false" => false,
                            other => {
                                return Err(WireError::malformed(
                                    "alive",
                                    format!("invalid liveness flag '{other}'"),
                                ));
                            }
                        };
                        Ok(Self::reply(parse_addr("alive", host, port)?, alive))
                    }
                    _ => Err(WireError::malformed("alive", "expected 'send' or 'ret' form")),
                }
            }
            Tag::HELLO => {
                let fields = fields(&frame.payload)?;
                match fields.as_slice() {
                    [host, port] => Ok(Self::Hello {
                        addr: parse_addr("hello", host, port)?,
                    }),
                    _ => Err(WireError::malformed("hello", "expected '<addr> <port>'")),
                }
            }
            _ => Ok(Self::Application(frame)),
        }
    }

    /// Builds the frame for this message.
    pub fn to_frame(&self) -> WireResult<Frame> {
        let payload: Bytes = match self {
            Self::Kill => Bytes::new(),
            Self::Backup {
                timestamp,
                snapshot,
            } => {
                let stamp = timestamp.to_string();
                let mut buf =
                    BytesMut::with_capacity(stamp.len() + BACKUP_SEPARATOR.len() + snapshot.len());
                buf.put_slice(stamp.as_bytes());
                buf.put_slice(BACKUP_SEPARATOR);
                buf.put_slice(snapshot);
                buf.freeze()
            }
            Self::Fail { from, to } => format!(
                "{} {} {} {}",
                wire_host(from)?,
                from.port(),
                wire_host(to)?,
                to.port()
            )
            .into(),
            Self::Alive(AliveMessage::Probe { origin }) => {
                format!(" send {} {}", wire_host(origin)?, origin.port()).into()
            }
            Self::Alive(AliveMessage::Reply { origin, alive }) => {
                format!(" ret {} {} {alive}", wire_host(origin)?, origin.port()).into()
            }
            Self::Hello { addr } => format!(" {} {}", wire_host(addr)?, addr.port()).into(),
            Self::Application(frame) => return Ok(frame.clone()),
        };
        Frame::new(self.tag(), payload)
    }

    /// Encodes this message into a standalone buffer.
    pub fn to_bytes(&self) -> WireResult<Bytes> {
        Ok(self.to_frame()?.to_bytes())
    }
}

fn parse_backup(payload: &Bytes) -> WireResult<Message> {
    let split = payload
        .windows(BACKUP_SEPARATOR.len())
        .position(|w| w == BACKUP_SEPARATOR)
        .ok_or_else(|| WireError::malformed("back", "missing timestamp separator"))?;

    let stamp = std::str::from_utf8(&payload[..split])?;
    let timestamp = stamp
        .parse::<Timestamp>()
        .map_err(|e| WireError::malformed("back", format!("invalid timestamp '{stamp}': {e}")))?;

    Ok(Message::Backup {
        timestamp,
        snapshot: payload.slice(split + BACKUP_SEPARATOR.len()..),
    })
}

fn fields(payload: &[u8]) -> WireResult<Vec<&str>> {
    Ok(std::str::from_utf8(payload)?.split_whitespace().collect())
}

fn parse_addr(tag: &str, host: &str, port: &str) -> WireResult<PeerAddr> {
    let port = port
        .parse::<u16>()
        .map_err(|_| WireError::malformed(tag, format!("invalid port '{port}'")))?;
    Ok(PeerAddr::new(host, port))
}

fn wire_host(addr: &PeerAddr) -> WireResult<&str> {
    if addr.is_wire_safe() {
        Ok(addr.host())
    } else {
        Err(WireError::InvalidAddress(addr.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;
    use test_case::test_case;

    fn parse(raw: &[u8]) -> WireResult<Message> {
        let mut buf = BytesMut::from(raw);
        let frame = Frame::decode(&mut buf)?.expect("complete frame");
        Message::from_frame(frame)
    }

    fn addr(host: &str, port: u16) -> PeerAddr {
        PeerAddr::new(host, port)
    }

    #[test_case(b"kill |::|", Message::Kill; "kill")]
    #[test_case(
        b"fail 10.0.0.2 9000 10.0.0.1 9000|::|",
        Message::fail(addr("10.0.0.2", 9000), addr("10.0.0.1", 9000));
        "fail notice"
    )]
    #[test_case(
        b"alive send 10.0.0.1 9000|::|",
        Message::probe(addr("10.0.0.1", 9000));
        "liveness probe"
    )]
    #[test_case(
        b"alive ret 10.0.0.1 9000 true|::|",
        Message::reply(addr("10.0.0.1", 9000), true);
        "affirmative reply"
    )]
    #[test_case(
        b"alive ret 10.0.0.1 9000 false|::|",
        Message::reply(addr("10.0.0.1", 9000), false);
        "negative reply"
    )]
    #[test_case(
        b"hello node-a 7000|::|",
        Message::Hello { addr: addr("node-a", 7000) };
        "hello"
    )]
    #[test_case(
        b"back 1700000000000000001|: state: {k: v}|::|",
        Message::backup(Timestamp::from_nanos(1_700_000_000_000_000_001), &b"state: {k: v}"[..]);
        "backup"
    )]
    fn parses_control_messages(raw: &[u8], expected: Message) {
        assert_eq!(parse(raw).unwrap(), expected);
    }

    #[test_case(b"fail 10.0.0.2 9000 10.0.0.1|::|"; "fail missing field")]
    #[test_case(b"fail a port b 1|::|"; "fail non numeric port")]
    #[test_case(b"alive ping 10.0.0.1 9000|::|"; "alive unknown selector")]
    #[test_case(b"alive ret 10.0.0.1 9000 maybe|::|"; "alive bad flag")]
    #[test_case(b"back no-separator|::|"; "backup missing separator")]
    #[test_case(b"back yesterday|: data|::|"; "backup bad timestamp")]
    #[test_case(b"hello 10.0.0.1|::|"; "hello missing port")]
    fn rejects_malformed_payloads(raw: &[u8]) {
        assert!(matches!(parse(raw), Err(WireError::Malformed { .. })));
    }

    #[test]
    fn unknown_tags_pass_through() {
        let msg = parse(b"put: key=value|::|").unwrap();
        match msg {
            Message::Application(frame) => {
                assert_eq!(&frame.application_bytes()[..], b"put: key=value");
            }
            other => panic!("expected application message, got {other:?}"),
        }
    }

    #[test]
    fn encodes_exact_wire_text() {
        let probe = Message::probe(addr("10.0.0.1", 9000)).to_bytes().unwrap();
        assert_eq!(&probe[..], b"alive send 10.0.0.1 9000|::|");

        let reply = Message::reply(addr("10.0.0.1", 9000), true)
            .to_bytes()
            .unwrap();
        assert_eq!(&reply[..], b"alive ret 10.0.0.1 9000 true|::|");

        let fail = Message::fail(addr("b", 2), addr("a", 1)).to_bytes().unwrap();
        assert_eq!(&fail[..], b"fail b 2 a 1|::|");

        let kill = Message::Kill.to_bytes().unwrap();
        assert_eq!(&kill[..], b"kill |::|");
    }

    #[test]
    fn backup_snapshot_may_contain_separator_text() {
        let snapshot = Bytes::from_static(b"a|: b|: c");
        let msg = Message::backup(Timestamp::from_nanos(42), snapshot.clone());
        let mut buf = BytesMut::new();
        msg.to_frame().unwrap().encode(&mut buf);
        let decoded = Message::from_frame(Frame::decode(&mut buf).unwrap().unwrap()).unwrap();
        assert_eq!(
            decoded,
            Message::Backup {
                timestamp: Timestamp::from_nanos(42),
                snapshot
            }
        );
    }

    #[test]
    fn backup_snapshot_with_delimiter_cannot_be_framed() {
        let msg = Message::backup(Timestamp::from_nanos(1), &b"x|::|y"[..]);
        assert!(matches!(msg.to_frame(), Err(WireError::DelimiterInPayload)));
    }

    #[test]
    fn addresses_with_whitespace_cannot_be_framed() {
        let msg = Message::fail(addr("bad host", 1), addr("ok", 2));
        assert!(matches!(msg.to_frame(), Err(WireError::InvalidAddress(_))));
    }

    proptest! {
        #[test]
        fn fail_notice_survives_framing(
            from_port in any::<u16>(),
            to_port in any::<u16>(),
            from_host in "[a-z0-9.-]{1,24}",
            to_host in "[a-z0-9.-]{1,24}",
        ) {
            let msg = Message::fail(addr(&from_host, from_port), addr(&to_host, to_port));
            let mut buf = BytesMut::new();
            msg.to_frame().unwrap().encode(&mut buf);
            let frame = Frame::decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(Message::from_frame(frame).unwrap(), msg);
        }
    }
}
