//! Wire protocol for the RelayMQ broker.
//!
//! Length-prefixed binary frames. Both directions are implemented so that
//! tooling and tests can speak the protocol as either peer; the client itself
//! only encodes requests and decodes responses.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

use crate::error::{ConsumerError, PublishError, TransportError};

pub type CorrelationId = i32;
pub type PartitionId = u32;
pub type Offset = u64;

/// Broker API keys.
pub const PRODUCE_API_KEY: i16 = 0;
pub const FETCH_API_KEY: i16 = 1;
pub const METADATA_API_KEY: i16 = 3;

const API_VERSION: i16 = 0;

/// A record as carried on the wire, key and value still raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRecord {
    pub offset: Offset,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub timestamp: u64,
}

/// Request to append one record; the broker assigns partition and offset.
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub correlation_id: CorrelationId,
    pub client_id: Option<String>,
    pub topic: String,
    pub acks: i16,
    pub timeout_ms: u32,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct ProduceResponse {
    pub correlation_id: CorrelationId,
    pub error_code: i16,
    pub error_message: Option<String>,
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
}

/// Request for records from one partition starting at an offset.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub correlation_id: CorrelationId,
    pub client_id: Option<String>,
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
    pub max_bytes: u32,
    pub max_wait_ms: u32,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub correlation_id: CorrelationId,
    pub error_code: i16,
    pub error_message: Option<String>,
    pub topic: String,
    pub partition: PartitionId,
    pub records: Vec<WireRecord>,
}

/// Request for a topic's partition layout and retained offset range.
#[derive(Debug, Clone)]
pub struct MetadataRequest {
    pub correlation_id: CorrelationId,
    pub client_id: Option<String>,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMetadata {
    pub id: PartitionId,
    /// Earliest offset still retained.
    pub earliest_offset: Offset,
    /// Offset one past the last appended record.
    pub latest_offset: Offset,
}

#[derive(Debug, Clone)]
pub struct MetadataResponse {
    pub correlation_id: CorrelationId,
    pub error_code: i16,
    pub error_message: Option<String>,
    pub topic: String,
    pub partitions: Vec<PartitionMetadata>,
}

#[derive(Debug, Clone)]
pub enum Request {
    Produce(ProduceRequest),
    Fetch(FetchRequest),
    Metadata(MetadataRequest),
}

#[derive(Debug, Clone)]
pub enum Response {
    Produce(ProduceResponse),
    Fetch(FetchResponse),
    Metadata(MetadataResponse),
}

impl Request {
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            Request::Produce(r) => r.correlation_id,
            Request::Fetch(r) => r.correlation_id,
            Request::Metadata(r) => r.correlation_id,
        }
    }

    pub(crate) fn set_correlation_id(&mut self, id: CorrelationId) {
        match self {
            Request::Produce(r) => r.correlation_id = id,
            Request::Fetch(r) => r.correlation_id = id,
            Request::Metadata(r) => r.correlation_id = id,
        }
    }

    /// Encode the frame body (without the length prefix).
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), TransportError> {
        match self {
            Request::Produce(r) => {
                buf.put_i16(PRODUCE_API_KEY);
                buf.put_i16(API_VERSION);
                buf.put_i32(r.correlation_id);
                wire::put_opt_string(buf, r.client_id.as_deref())?;
                wire::put_string(buf, &r.topic)?;
                buf.put_i16(r.acks);
                buf.put_u32(r.timeout_ms);
                wire::put_opt_bytes(buf, r.key.as_deref());
                wire::put_bytes(buf, &r.value);
                buf.put_u64(r.timestamp);
            }
            Request::Fetch(r) => {
                buf.put_i16(FETCH_API_KEY);
                buf.put_i16(API_VERSION);
                buf.put_i32(r.correlation_id);
                wire::put_opt_string(buf, r.client_id.as_deref())?;
                wire::put_string(buf, &r.topic)?;
                buf.put_u32(r.partition);
                buf.put_u64(r.offset);
                buf.put_u32(r.max_bytes);
                buf.put_u32(r.max_wait_ms);
            }
            Request::Metadata(r) => {
                buf.put_i16(METADATA_API_KEY);
                buf.put_i16(API_VERSION);
                buf.put_i32(r.correlation_id);
                wire::put_opt_string(buf, r.client_id.as_deref())?;
                wire::put_string(buf, &r.topic)?;
            }
        }
        Ok(())
    }

    /// Decode a frame body (without the length prefix).
    pub fn decode(frame: &[u8]) -> Result<Request, TransportError> {
        let mut buf = Cursor::new(frame);
        let api_key = wire::get_i16(&mut buf)?;
        let version = wire::get_i16(&mut buf)?;
        if version != API_VERSION {
            return Err(TransportError::codec(format!(
                "unsupported api version {version}"
            )));
        }
        let correlation_id = wire::get_i32(&mut buf)?;
        let client_id = wire::get_opt_string(&mut buf)?;

        match api_key {
            PRODUCE_API_KEY => {
                let topic = wire::get_string(&mut buf)?;
                let acks = wire::get_i16(&mut buf)?;
                let timeout_ms = wire::get_u32(&mut buf)?;
                let key = wire::get_opt_bytes(&mut buf)?;
                let value = wire::get_bytes(&mut buf)?;
                let timestamp = wire::get_u64(&mut buf)?;
                Ok(Request::Produce(ProduceRequest {
                    correlation_id,
                    client_id,
                    topic,
                    acks,
                    timeout_ms,
                    key,
                    value,
                    timestamp,
                }))
            }
            FETCH_API_KEY => Ok(Request::Fetch(FetchRequest {
                correlation_id,
                client_id,
                topic: wire::get_string(&mut buf)?,
                partition: wire::get_u32(&mut buf)?,
                offset: wire::get_u64(&mut buf)?,
                max_bytes: wire::get_u32(&mut buf)?,
                max_wait_ms: wire::get_u32(&mut buf)?,
            })),
            METADATA_API_KEY => Ok(Request::Metadata(MetadataRequest {
                correlation_id,
                client_id,
                topic: wire::get_string(&mut buf)?,
            })),
            other => Err(TransportError::codec(format!(
                "unknown request api key {other}"
            ))),
        }
    }
}

impl Response {
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            Response::Produce(r) => r.correlation_id,
            Response::Fetch(r) => r.correlation_id,
            Response::Metadata(r) => r.correlation_id,
        }
    }

    /// Encode the frame body (without the length prefix).
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), TransportError> {
        match self {
            Response::Produce(r) => {
                buf.put_i16(PRODUCE_API_KEY);
                buf.put_i32(r.correlation_id);
                buf.put_i16(r.error_code);
                wire::put_opt_string(buf, r.error_message.as_deref())?;
                wire::put_string(buf, &r.topic)?;
                buf.put_u32(r.partition);
                buf.put_u64(r.offset);
            }
            Response::Fetch(r) => {
                buf.put_i16(FETCH_API_KEY);
                buf.put_i32(r.correlation_id);
                buf.put_i16(r.error_code);
                wire::put_opt_string(buf, r.error_message.as_deref())?;
                wire::put_string(buf, &r.topic)?;
                buf.put_u32(r.partition);
                buf.put_u32(r.records.len() as u32);
                for record in &r.records {
                    buf.put_u64(record.offset);
                    wire::put_opt_bytes(buf, record.key.as_deref());
                    wire::put_bytes(buf, &record.value);
                    buf.put_u64(record.timestamp);
                }
            }
            Response::Metadata(r) => {
                buf.put_i16(METADATA_API_KEY);
                buf.put_i32(r.correlation_id);
                buf.put_i16(r.error_code);
                wire::put_opt_string(buf, r.error_message.as_deref())?;
                wire::put_string(buf, &r.topic)?;
                buf.put_u32(r.partitions.len() as u32);
                for partition in &r.partitions {
                    buf.put_u32(partition.id);
                    buf.put_u64(partition.earliest_offset);
                    buf.put_u64(partition.latest_offset);
                }
            }
        }
        Ok(())
    }

    /// Decode a frame body (without the length prefix).
    pub fn decode(frame: &[u8]) -> Result<Response, TransportError> {
        let mut buf = Cursor::new(frame);
        let api_key = wire::get_i16(&mut buf)?;
        let correlation_id = wire::get_i32(&mut buf)?;
        let error_code = wire::get_i16(&mut buf)?;
        let error_message = wire::get_opt_string(&mut buf)?;

        match api_key {
            PRODUCE_API_KEY => Ok(Response::Produce(ProduceResponse {
                correlation_id,
                error_code,
                error_message,
                topic: wire::get_string(&mut buf)?,
                partition: wire::get_u32(&mut buf)?,
                offset: wire::get_u64(&mut buf)?,
            })),
            FETCH_API_KEY => {
                let topic = wire::get_string(&mut buf)?;
                let partition = wire::get_u32(&mut buf)?;
                let count = wire::get_u32(&mut buf)?;
                let mut records = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    records.push(WireRecord {
                        offset: wire::get_u64(&mut buf)?,
                        key: wire::get_opt_bytes(&mut buf)?,
                        value: wire::get_bytes(&mut buf)?,
                        timestamp: wire::get_u64(&mut buf)?,
                    });
                }
                Ok(Response::Fetch(FetchResponse {
                    correlation_id,
                    error_code,
                    error_message,
                    topic,
                    partition,
                    records,
                }))
            }
            METADATA_API_KEY => {
                let topic = wire::get_string(&mut buf)?;
                let count = wire::get_u32(&mut buf)?;
                let mut partitions = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    partitions.push(PartitionMetadata {
                        id: wire::get_u32(&mut buf)?,
                        earliest_offset: wire::get_u64(&mut buf)?,
                        latest_offset: wire::get_u64(&mut buf)?,
                    });
                }
                Ok(Response::Metadata(MetadataResponse {
                    correlation_id,
                    error_code,
                    error_message,
                    topic,
                    partitions,
                }))
            }
            other => Err(TransportError::codec(format!(
                "unknown response api key {other}"
            ))),
        }
    }
}

/// Broker error codes carried in response frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    None = 0,
    Unknown = -1,
    OffsetOutOfRange = 1,
    UnknownTopic = 3,
    MessageTooLarge = 4,
    RequestTimedOut = 7,
}

impl From<i16> for ErrorCode {
    fn from(code: i16) -> Self {
        match code {
            0 => ErrorCode::None,
            1 => ErrorCode::OffsetOutOfRange,
            3 => ErrorCode::UnknownTopic,
            4 => ErrorCode::MessageTooLarge,
            7 => ErrorCode::RequestTimedOut,
            _ => ErrorCode::Unknown,
        }
    }
}

impl ErrorCode {
    /// Map a broker error on the produce path to its typed publish error.
    pub fn to_publish_error(code: i16, message: Option<&str>, topic: &str) -> PublishError {
        match ErrorCode::from(code) {
            ErrorCode::UnknownTopic => PublishError::TopicNotFound {
                topic: topic.to_string(),
            },
            _ => PublishError::Broker {
                code,
                message: message.unwrap_or("broker rejected produce").to_string(),
            },
        }
    }

    /// Map a broker error on the fetch path to its typed consumer error.
    pub fn to_consumer_error(code: i16, message: Option<&str>, topic: &str) -> ConsumerError {
        match ErrorCode::from(code) {
            ErrorCode::UnknownTopic => ConsumerError::SubscriptionRejected {
                topic: topic.to_string(),
                message: message.unwrap_or("unknown topic").to_string(),
            },
            _ => ConsumerError::Broker {
                code,
                message: message.unwrap_or("broker rejected fetch").to_string(),
            },
        }
    }
}

/// Codec for the client side of the connection.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl tokio_util::codec::Encoder<Request> for ClientCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        item.encode(&mut body)?;
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl tokio_util::codec::Decoder for ClientCodec {
    type Item = Response;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = wire::take_frame(src)? else {
            return Ok(None);
        };
        Response::decode(&frame).map(Some)
    }
}

/// Primitive readers and writers shared by both RelayMQ protocols.
pub mod wire {
    use super::*;

    /// Maximum accepted frame body length.
    pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

    /// Split one length-prefixed frame body off the front of `src`, if a
    /// complete frame has arrived.
    pub fn take_frame(src: &mut BytesMut) -> Result<Option<Bytes>, TransportError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = (&src[0..4]).get_u32() as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::codec(format!(
                "frame of {len} bytes exceeds limit"
            )));
        }
        if src.len() < 4 + len {
            return Ok(None);
        }
        src.advance(4);
        Ok(Some(src.split_to(len).freeze()))
    }

    pub fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), TransportError> {
        if s.len() > i16::MAX as usize {
            return Err(TransportError::codec("string exceeds wire limit"));
        }
        buf.put_i16(s.len() as i16);
        buf.put_slice(s.as_bytes());
        Ok(())
    }

    pub fn put_opt_string(buf: &mut BytesMut, s: Option<&str>) -> Result<(), TransportError> {
        match s {
            Some(s) => put_string(buf, s),
            None => {
                buf.put_i16(-1);
                Ok(())
            }
        }
    }

    pub fn get_string(buf: &mut Cursor<&[u8]>) -> Result<String, TransportError> {
        get_opt_string(buf)?.ok_or_else(|| TransportError::codec("unexpected null string"))
    }

    pub fn get_opt_string(buf: &mut Cursor<&[u8]>) -> Result<Option<String>, TransportError> {
        if buf.remaining() < 2 {
            return Err(TransportError::codec("truncated string length"));
        }
        let len = buf.get_i16();
        if len == -1 {
            return Ok(None);
        }
        if len < 0 || buf.remaining() < len as usize {
            return Err(TransportError::codec("invalid string length"));
        }
        let mut bytes = vec![0; len as usize];
        buf.copy_to_slice(&mut bytes);
        let s =
            String::from_utf8(bytes).map_err(|_| TransportError::codec("non-UTF-8 string"))?;
        Ok(Some(s))
    }

    pub fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
        buf.put_i32(bytes.len() as i32);
        buf.put_slice(bytes);
    }

    pub fn put_opt_bytes(buf: &mut BytesMut, bytes: Option<&[u8]>) {
        match bytes {
            Some(bytes) => put_bytes(buf, bytes),
            None => buf.put_i32(-1),
        }
    }

    pub fn get_bytes(buf: &mut Cursor<&[u8]>) -> Result<Bytes, TransportError> {
        get_opt_bytes(buf)?.ok_or_else(|| TransportError::codec("unexpected null bytes"))
    }

    pub fn get_opt_bytes(buf: &mut Cursor<&[u8]>) -> Result<Option<Bytes>, TransportError> {
        if buf.remaining() < 4 {
            return Err(TransportError::codec("truncated bytes length"));
        }
        let len = buf.get_i32();
        if len == -1 {
            return Ok(None);
        }
        if len < 0 || buf.remaining() < len as usize {
            return Err(TransportError::codec("invalid bytes length"));
        }
        let mut bytes = vec![0; len as usize];
        buf.copy_to_slice(&mut bytes);
        Ok(Some(Bytes::from(bytes)))
    }

    pub fn get_i16(buf: &mut Cursor<&[u8]>) -> Result<i16, TransportError> {
        if buf.remaining() < 2 {
            return Err(TransportError::codec("truncated i16"));
        }
        Ok(buf.get_i16())
    }

    pub fn get_i32(buf: &mut Cursor<&[u8]>) -> Result<i32, TransportError> {
        if buf.remaining() < 4 {
            return Err(TransportError::codec("truncated i32"));
        }
        Ok(buf.get_i32())
    }

    pub fn get_u32(buf: &mut Cursor<&[u8]>) -> Result<u32, TransportError> {
        if buf.remaining() < 4 {
            return Err(TransportError::codec("truncated u32"));
        }
        Ok(buf.get_u32())
    }

    pub fn get_u64(buf: &mut Cursor<&[u8]>) -> Result<u64, TransportError> {
        if buf.remaining() < 8 {
            return Err(TransportError::codec("truncated u64"));
        }
        Ok(buf.get_u64())
    }

    pub fn get_u8(buf: &mut Cursor<&[u8]>) -> Result<u8, TransportError> {
        if !buf.has_remaining() {
            return Err(TransportError::codec("truncated u8"));
        }
        Ok(buf.get_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_request(request: Request) -> Request {
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        Request::decode(&buf).unwrap()
    }

    fn roundtrip_response(response: Response) -> Response {
        let mut buf = BytesMut::new();
        response.encode(&mut buf).unwrap();
        Response::decode(&buf).unwrap()
    }

    #[test]
    fn produce_request_roundtrip() {
        let decoded = roundtrip_request(Request::Produce(ProduceRequest {
            correlation_id: 7,
            client_id: Some("demo".to_string()),
            topic: "demo-topic".to_string(),
            acks: 1,
            timeout_ms: 5000,
            key: None,
            value: Bytes::from_static(b"hello"),
            timestamp: 42,
        }));

        match decoded {
            Request::Produce(r) => {
                assert_eq!(r.correlation_id, 7);
                assert_eq!(r.client_id.as_deref(), Some("demo"));
                assert_eq!(r.topic, "demo-topic");
                assert_eq!(r.key, None);
                assert_eq!(r.value, Bytes::from_static(b"hello"));
                assert_eq!(r.timestamp, 42);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn fetch_response_roundtrip_preserves_records() {
        let decoded = roundtrip_response(Response::Fetch(FetchResponse {
            correlation_id: 3,
            error_code: 0,
            error_message: None,
            topic: "demo-topic".to_string(),
            partition: 0,
            records: vec![
                WireRecord {
                    offset: 0,
                    key: Some(Bytes::from_static(b"k")),
                    value: Bytes::from_static(b"first"),
                    timestamp: 1,
                },
                WireRecord {
                    offset: 1,
                    key: None,
                    value: Bytes::from_static(b"second"),
                    timestamp: 2,
                },
            ],
        }));

        match decoded {
            Response::Fetch(r) => {
                assert_eq!(r.records.len(), 2);
                assert_eq!(r.records[0].key, Some(Bytes::from_static(b"k")));
                assert_eq!(r.records[1].offset, 1);
                assert_eq!(r.records[1].key, None);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn metadata_response_carries_offset_range() {
        let decoded = roundtrip_response(Response::Metadata(MetadataResponse {
            correlation_id: 1,
            error_code: 0,
            error_message: None,
            topic: "demo-topic".to_string(),
            partitions: vec![PartitionMetadata {
                id: 0,
                earliest_offset: 4,
                latest_offset: 9,
            }],
        }));

        match decoded {
            Response::Metadata(r) => {
                assert_eq!(
                    r.partitions,
                    vec![PartitionMetadata {
                        id: 0,
                        earliest_offset: 4,
                        latest_offset: 9,
                    }]
                );
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn take_frame_waits_for_complete_body() {
        let mut buf = BytesMut::new();
        buf.put_u32(8);
        buf.put_u32(1);
        assert!(wire::take_frame(&mut buf).unwrap().is_none());

        buf.put_u32(2);
        let frame = wire::take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.len(), 8);
        assert!(buf.is_empty());
    }

    #[test]
    fn unknown_topic_maps_to_typed_errors() {
        let err = ErrorCode::to_publish_error(3, None, "missing");
        assert!(matches!(err, PublishError::TopicNotFound { topic } if topic == "missing"));

        let err = ErrorCode::to_consumer_error(3, Some("no such topic"), "missing");
        assert!(
            matches!(err, ConsumerError::SubscriptionRejected { topic, .. } if topic == "missing")
        );
    }
}
