//! Wire protocol for the RelayMQ coordination service.
//!
//! Same length-prefixed framing as the broker protocol, with one addition:
//! the server can push watch-event frames at any time, tagged with the
//! reserved correlation id [`EVENT_CORRELATION_ID`].

use bytes::{BufMut, Bytes, BytesMut};
use std::io::Cursor;

use crate::error::{NodeError, TransportError};
use crate::topic::protocol::wire;

pub type CorrelationId = i32;

/// Correlation id reserved for server-pushed watch events.
pub const EVENT_CORRELATION_ID: CorrelationId = -1;

/// Operation codes.
pub const OP_CONNECT: u8 = 0;
pub const OP_EXISTS: u8 = 1;
pub const OP_CREATE: u8 = 2;
pub const OP_GET_DATA: u8 = 3;
pub const OP_SET_DATA: u8 = 4;
pub const OP_WATCH: u8 = 5;

/// Server error codes.
pub const ERR_NONE: i16 = 0;
pub const ERR_NOT_FOUND: i16 = 1;
pub const ERR_NODE_EXISTS: i16 = 2;
pub const ERR_VERSION_CONFLICT: i16 = 3;
pub const ERR_ACCESS_DENIED: i16 = 4;

/// Wire encoding of "any version" for a compare-and-set write.
pub const VERSION_ANY: i32 = -1;

/// Existence probe result: the node's current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    pub version: i32,
}

#[derive(Debug, Clone)]
pub enum CoordOp {
    /// Session handshake; first frame on every connection.
    Connect { session_timeout_ms: u32 },
    Exists { path: String },
    Create { path: String, data: Bytes },
    GetData { path: String },
    SetData {
        path: String,
        data: Bytes,
        expected_version: i32,
    },
    /// Register a one-shot data-change watch on the path.
    Watch { path: String },
}

impl CoordOp {
    pub fn code(&self) -> u8 {
        match self {
            CoordOp::Connect { .. } => OP_CONNECT,
            CoordOp::Exists { .. } => OP_EXISTS,
            CoordOp::Create { .. } => OP_CREATE,
            CoordOp::GetData { .. } => OP_GET_DATA,
            CoordOp::SetData { .. } => OP_SET_DATA,
            CoordOp::Watch { .. } => OP_WATCH,
        }
    }
}

/// A client request frame.
#[derive(Debug, Clone)]
pub struct RequestFrame {
    pub correlation_id: CorrelationId,
    pub op: CoordOp,
}

impl RequestFrame {
    /// Encode the frame body (without the length prefix).
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), TransportError> {
        buf.put_i32(self.correlation_id);
        buf.put_u8(self.op.code());
        match &self.op {
            CoordOp::Connect { session_timeout_ms } => {
                buf.put_u32(*session_timeout_ms);
            }
            CoordOp::Exists { path } | CoordOp::GetData { path } | CoordOp::Watch { path } => {
                wire::put_string(buf, path)?;
            }
            CoordOp::Create { path, data } => {
                wire::put_string(buf, path)?;
                wire::put_bytes(buf, data);
            }
            CoordOp::SetData {
                path,
                data,
                expected_version,
            } => {
                wire::put_string(buf, path)?;
                wire::put_bytes(buf, data);
                buf.put_i32(*expected_version);
            }
        }
        Ok(())
    }

    /// Decode a frame body (without the length prefix).
    pub fn decode(frame: &[u8]) -> Result<RequestFrame, TransportError> {
        let mut buf = Cursor::new(frame);
        let correlation_id = wire::get_i32(&mut buf)?;
        let code = wire::get_u8(&mut buf)?;
        let op = match code {
            OP_CONNECT => CoordOp::Connect {
                session_timeout_ms: wire::get_u32(&mut buf)?,
            },
            OP_EXISTS => CoordOp::Exists {
                path: wire::get_string(&mut buf)?,
            },
            OP_CREATE => CoordOp::Create {
                path: wire::get_string(&mut buf)?,
                data: wire::get_bytes(&mut buf)?,
            },
            OP_GET_DATA => CoordOp::GetData {
                path: wire::get_string(&mut buf)?,
            },
            OP_SET_DATA => CoordOp::SetData {
                path: wire::get_string(&mut buf)?,
                data: wire::get_bytes(&mut buf)?,
                expected_version: wire::get_i32(&mut buf)?,
            },
            OP_WATCH => CoordOp::Watch {
                path: wire::get_string(&mut buf)?,
            },
            other => {
                return Err(TransportError::codec(format!(
                    "unknown coordination op {other}"
                )))
            }
        };
        Ok(RequestFrame { correlation_id, op })
    }
}

/// Payload of a successful reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Connect { session_id: u64 },
    Exists { stat: Option<NodeStat> },
    Create,
    GetData { version: i32, data: Bytes },
    SetData { version: i32 },
    Watch,
    /// Version-conflict replies carry the node's current version.
    Conflict { current: i32 },
    /// Any other error reply.
    Empty,
}

/// A server reply frame.
#[derive(Debug, Clone)]
pub struct ReplyFrame {
    pub correlation_id: CorrelationId,
    pub op: u8,
    pub error_code: i16,
    pub body: ReplyBody,
}

impl ReplyFrame {
    pub fn ok(correlation_id: CorrelationId, op: u8, body: ReplyBody) -> Self {
        Self {
            correlation_id,
            op,
            error_code: ERR_NONE,
            body,
        }
    }

    pub fn error(correlation_id: CorrelationId, op: u8, error_code: i16) -> Self {
        Self {
            correlation_id,
            op,
            error_code,
            body: ReplyBody::Empty,
        }
    }

    pub fn conflict(correlation_id: CorrelationId, current: i32) -> Self {
        Self {
            correlation_id,
            op: OP_SET_DATA,
            error_code: ERR_VERSION_CONFLICT,
            body: ReplyBody::Conflict { current },
        }
    }

    /// Encode the frame body (without the length prefix).
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), TransportError> {
        buf.put_i32(self.correlation_id);
        buf.put_u8(self.op);
        buf.put_i16(self.error_code);

        if self.error_code != ERR_NONE {
            if let ReplyBody::Conflict { current } = &self.body {
                buf.put_i32(*current);
            }
            return Ok(());
        }

        match &self.body {
            ReplyBody::Connect { session_id } => buf.put_u64(*session_id),
            ReplyBody::Exists { stat } => match stat {
                Some(stat) => {
                    buf.put_u8(1);
                    buf.put_i32(stat.version);
                }
                None => buf.put_u8(0),
            },
            ReplyBody::GetData { version, data } => {
                buf.put_i32(*version);
                wire::put_bytes(buf, data);
            }
            ReplyBody::SetData { version } => buf.put_i32(*version),
            ReplyBody::Create | ReplyBody::Watch | ReplyBody::Empty => {}
            ReplyBody::Conflict { .. } => {
                return Err(TransportError::codec(
                    "conflict body requires a version-conflict error code",
                ))
            }
        }
        Ok(())
    }

    fn decode(buf: &mut Cursor<&[u8]>, correlation_id: CorrelationId) -> Result<Self, TransportError> {
        let op = wire::get_u8(buf)?;
        let error_code = wire::get_i16(buf)?;

        if error_code != ERR_NONE {
            let body = if error_code == ERR_VERSION_CONFLICT {
                ReplyBody::Conflict {
                    current: wire::get_i32(buf)?,
                }
            } else {
                ReplyBody::Empty
            };
            return Ok(Self {
                correlation_id,
                op,
                error_code,
                body,
            });
        }

        let body = match op {
            OP_CONNECT => ReplyBody::Connect {
                session_id: wire::get_u64(buf)?,
            },
            OP_EXISTS => {
                let present = wire::get_u8(buf)? != 0;
                let stat = if present {
                    Some(NodeStat {
                        version: wire::get_i32(buf)?,
                    })
                } else {
                    None
                };
                ReplyBody::Exists { stat }
            }
            OP_CREATE => ReplyBody::Create,
            OP_GET_DATA => ReplyBody::GetData {
                version: wire::get_i32(buf)?,
                data: wire::get_bytes(buf)?,
            },
            OP_SET_DATA => ReplyBody::SetData {
                version: wire::get_i32(buf)?,
            },
            OP_WATCH => ReplyBody::Watch,
            other => {
                return Err(TransportError::codec(format!(
                    "unknown coordination reply op {other}"
                )))
            }
        };
        Ok(Self {
            correlation_id,
            op,
            error_code,
            body,
        })
    }
}

/// Kinds of server-pushed watch events.
pub const EVENT_DATA_CHANGED: u8 = 0;

/// A server-pushed watch event frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    pub path: String,
    pub kind: u8,
}

impl EventFrame {
    /// Encode the frame body (without the length prefix).
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), TransportError> {
        buf.put_i32(EVENT_CORRELATION_ID);
        wire::put_string(buf, &self.path)?;
        buf.put_u8(self.kind);
        Ok(())
    }
}

/// Everything the server can send.
#[derive(Debug, Clone)]
pub enum Inbound {
    Reply(ReplyFrame),
    Event(EventFrame),
}

impl Inbound {
    /// Decode a frame body (without the length prefix).
    pub fn decode(frame: &[u8]) -> Result<Inbound, TransportError> {
        let mut buf = Cursor::new(frame);
        let correlation_id = wire::get_i32(&mut buf)?;
        if correlation_id == EVENT_CORRELATION_ID {
            return Ok(Inbound::Event(EventFrame {
                path: wire::get_string(&mut buf)?,
                kind: wire::get_u8(&mut buf)?,
            }));
        }
        ReplyFrame::decode(&mut buf, correlation_id).map(Inbound::Reply)
    }
}

/// Map a server error code to its typed node error.
pub fn error_for(frame: &ReplyFrame, path: &str, expected_version: i32) -> NodeError {
    match frame.error_code {
        ERR_NOT_FOUND => NodeError::NotFound {
            path: path.to_string(),
        },
        ERR_VERSION_CONFLICT => {
            let current = match frame.body {
                ReplyBody::Conflict { current } => current,
                _ => VERSION_ANY,
            };
            NodeError::VersionConflict {
                path: path.to_string(),
                expected: expected_version,
                current,
            }
        }
        ERR_ACCESS_DENIED => NodeError::AccessDenied {
            path: path.to_string(),
        },
        other => NodeError::protocol(format!("server error code {other} for '{path}'")),
    }
}

/// Codec for the client side of the session.
#[derive(Debug, Default)]
pub struct SessionCodec;

impl tokio_util::codec::Encoder<RequestFrame> for SessionCodec {
    type Error = TransportError;

    fn encode(&mut self, item: RequestFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        item.encode(&mut body)?;
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl tokio_util::codec::Decoder for SessionCodec {
    type Item = Inbound;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = wire::take_frame(src)? else {
            return Ok(None);
        };
        Inbound::decode(&frame).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_request(op: CoordOp) -> RequestFrame {
        let frame = RequestFrame {
            correlation_id: 9,
            op,
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        RequestFrame::decode(&buf).unwrap()
    }

    fn roundtrip_reply(frame: ReplyFrame) -> ReplyFrame {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        match Inbound::decode(&buf).unwrap() {
            Inbound::Reply(reply) => reply,
            Inbound::Event(event) => panic!("unexpected event: {event:?}"),
        }
    }

    #[test]
    fn set_data_request_roundtrip() {
        let decoded = roundtrip_request(CoordOp::SetData {
            path: "/myapp".to_string(),
            data: Bytes::from_static(b"updated"),
            expected_version: VERSION_ANY,
        });
        match decoded.op {
            CoordOp::SetData {
                path,
                data,
                expected_version,
            } => {
                assert_eq!(path, "/myapp");
                assert_eq!(data, Bytes::from_static(b"updated"));
                assert_eq!(expected_version, VERSION_ANY);
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn exists_reply_roundtrip() {
        let decoded = roundtrip_reply(ReplyFrame::ok(
            4,
            OP_EXISTS,
            ReplyBody::Exists {
                stat: Some(NodeStat { version: 2 }),
            },
        ));
        assert_eq!(decoded.error_code, ERR_NONE);
        assert_eq!(
            decoded.body,
            ReplyBody::Exists {
                stat: Some(NodeStat { version: 2 })
            }
        );

        let decoded = roundtrip_reply(ReplyFrame::ok(5, OP_EXISTS, ReplyBody::Exists { stat: None }));
        assert_eq!(decoded.body, ReplyBody::Exists { stat: None });
    }

    #[test]
    fn conflict_reply_carries_current_version() {
        let decoded = roundtrip_reply(ReplyFrame::conflict(6, 3));
        assert_eq!(decoded.error_code, ERR_VERSION_CONFLICT);
        assert_eq!(decoded.body, ReplyBody::Conflict { current: 3 });

        let err = error_for(&decoded, "/myapp", 1);
        assert!(matches!(
            err,
            NodeError::VersionConflict {
                expected: 1,
                current: 3,
                ..
            }
        ));
    }

    #[test]
    fn event_frame_roundtrip() {
        let event = EventFrame {
            path: "/myapp".to_string(),
            kind: EVENT_DATA_CHANGED,
        };
        let mut buf = BytesMut::new();
        event.encode(&mut buf).unwrap();
        match Inbound::decode(&buf).unwrap() {
            Inbound::Event(decoded) => assert_eq!(decoded, event),
            Inbound::Reply(reply) => panic!("unexpected reply: {reply:?}"),
        }
    }
}
