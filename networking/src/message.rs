use std::fmt;
use std::io::{self, Read, Write};

use bincode::Options;
use containers::{
    BodiesRequest, BodiesResponse, Hash, HeadAnnouncement, HeaderQuery, HeaderResponse,
    SyncRequest, SyncResponse, TxsRequest, TxsResponse,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use snap::read::FrameDecoder;
use snap::write::FrameEncoder;
use thiserror::Error;

/// Upper bound on a decoded envelope or payload.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Payload of a pong.
pub const PONG_PAYLOAD: [u8; 1] = [1];

/// Integer tag of every message kind on the wire.
///
/// Codes 4..=6 belong to transaction gossip, which this crate does not speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum MessageType {
    Ping = 0,
    Pong = 1,
    FetchByHashRequest = 2,
    FetchByHashResponse = 3,
    SequencerHeader = 7,
    BodiesRequest = 8,
    BodiesResponse = 9,
    TxsRequest = 10,
    TxsResponse = 11,
    HeaderRequest = 12,
    HeaderResponse = 13,
}

impl MessageType {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(MessageType::Ping),
            1 => Some(MessageType::Pong),
            2 => Some(MessageType::FetchByHashRequest),
            3 => Some(MessageType::FetchByHashResponse),
            7 => Some(MessageType::SequencerHeader),
            8 => Some(MessageType::BodiesRequest),
            9 => Some(MessageType::BodiesResponse),
            10 => Some(MessageType::TxsRequest),
            11 => Some(MessageType::TxsResponse),
            12 => Some(MessageType::HeaderRequest),
            13 => Some(MessageType::HeaderResponse),
            _ => None,
        }
    }

    pub fn code(&self) -> u64 {
        *self as u64
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Ping => "MessageTypePing",
            MessageType::Pong => "MessageTypePong",
            MessageType::FetchByHashRequest => "MessageTypeFetchByHashRequest",
            MessageType::FetchByHashResponse => "MessageTypeFetchByHashResponse",
            MessageType::SequencerHeader => "MessageTypeSequencerHeader",
            MessageType::BodiesRequest => "MessageTypeBodiesRequest",
            MessageType::BodiesResponse => "MessageTypeBodiesResponse",
            MessageType::TxsRequest => "MessageTypeTxsRequest",
            MessageType::TxsResponse => "MessageTypeTxsResponse",
            MessageType::HeaderRequest => "MessageTypeHeaderRequest",
            MessageType::HeaderResponse => "MessageTypeHeaderResponse",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(bincode::Error),
    #[error("decode of {message_type} failed: {source}")]
    Decode {
        message_type: MessageType,
        source: bincode::Error,
    },
    #[error("envelope decode failed: {0}")]
    Envelope(bincode::Error),
    #[error("unknown message type {0}")]
    UnknownMessageType(u64),
    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("snappy framing failed: {0}")]
    Framing(#[from] io::Error),
}

/// One sync protocol message, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping,
    Pong,
    FetchByHashRequest(SyncRequest),
    FetchByHashResponse(SyncResponse),
    SequencerHeader(HeadAnnouncement),
    BodiesRequest(BodiesRequest),
    BodiesResponse(BodiesResponse),
    TxsRequest(TxsRequest),
    TxsResponse(TxsResponse),
    HeaderRequest(HeaderQuery),
    HeaderResponse(HeaderResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Ping => MessageType::Ping,
            Message::Pong => MessageType::Pong,
            Message::FetchByHashRequest(_) => MessageType::FetchByHashRequest,
            Message::FetchByHashResponse(_) => MessageType::FetchByHashResponse,
            Message::SequencerHeader(_) => MessageType::SequencerHeader,
            Message::BodiesRequest(_) => MessageType::BodiesRequest,
            Message::BodiesResponse(_) => MessageType::BodiesResponse,
            Message::TxsRequest(_) => MessageType::TxsRequest,
            Message::TxsResponse(_) => MessageType::TxsResponse,
            Message::HeaderRequest(_) => MessageType::HeaderRequest,
            Message::HeaderResponse(_) => MessageType::HeaderResponse,
        }
    }

    pub fn encode_payload(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Message::Ping | Message::Pong => Ok(PONG_PAYLOAD.to_vec()),
            Message::FetchByHashRequest(msg) => encode_value(msg),
            Message::FetchByHashResponse(msg) => encode_value(msg),
            Message::SequencerHeader(msg) => encode_value(msg),
            Message::BodiesRequest(msg) => encode_value(msg),
            Message::BodiesResponse(msg) => encode_value(msg),
            Message::TxsRequest(msg) => encode_value(msg),
            Message::TxsResponse(msg) => encode_value(msg),
            Message::HeaderRequest(msg) => encode_value(msg),
            Message::HeaderResponse(msg) => encode_value(msg),
        }
    }

    pub fn decode(message_type: MessageType, payload: &[u8]) -> Result<Self, CodecError> {
        let message = match message_type {
            MessageType::Ping => Message::Ping,
            MessageType::Pong => Message::Pong,
            MessageType::FetchByHashRequest => {
                Message::FetchByHashRequest(decode_value(message_type, payload)?)
            }
            MessageType::FetchByHashResponse => {
                Message::FetchByHashResponse(decode_value(message_type, payload)?)
            }
            MessageType::SequencerHeader => {
                Message::SequencerHeader(decode_value(message_type, payload)?)
            }
            MessageType::BodiesRequest => {
                Message::BodiesRequest(decode_value(message_type, payload)?)
            }
            MessageType::BodiesResponse => {
                Message::BodiesResponse(decode_value(message_type, payload)?)
            }
            MessageType::TxsRequest => Message::TxsRequest(decode_value(message_type, payload)?),
            MessageType::TxsResponse => Message::TxsResponse(decode_value(message_type, payload)?),
            MessageType::HeaderRequest => {
                Message::HeaderRequest(decode_value(message_type, payload)?)
            }
            MessageType::HeaderResponse => {
                Message::HeaderResponse(decode_value(message_type, payload)?)
            }
        };
        Ok(message)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::FetchByHashRequest(req) => {
                write!(f, "FetchByHashRequest(hashes={})", req.hashes.len())
            }
            Message::FetchByHashResponse(resp) => write!(f, "FetchByHashResponse({resp})"),
            Message::SequencerHeader(head) => write!(f, "SequencerHeader(number={})", head.number),
            Message::HeaderRequest(query) => write!(
                f,
                "HeaderRequest(number={}, amount={}, skip={}, reverse={})",
                query.origin.number, query.amount, query.skip, query.reverse
            ),
            Message::HeaderResponse(resp) => {
                write!(f, "HeaderResponse(headers={})", resp.sequencers.len())
            }
            Message::BodiesRequest(req) => {
                write!(f, "BodiesRequest(hashes={})", req.sequencer_hashes.len())
            }
            Message::BodiesResponse(resp) => write!(f, "BodiesResponse(bodies={})", resp.bodies.len()),
            Message::TxsRequest(req) => write!(f, "TxsRequest(id={})", req.id),
            Message::TxsResponse(resp) => write!(f, "TxsResponse(txs={})", resp.txs.len()),
            Message::Ping | Message::Pong => write!(f, "{}", self.message_type()),
        }
    }
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_MESSAGE_SIZE as u64)
}

/// Binary encoding shared by payloads, envelopes and body bundles.
pub fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    wire_options().serialize(value).map_err(CodecError::Encode)
}

pub fn decode_value<T: DeserializeOwned>(
    message_type: MessageType,
    bytes: &[u8],
) -> Result<T, CodecError> {
    wire_options()
        .deserialize(bytes)
        .map_err(|source| CodecError::Decode {
            message_type,
            source,
        })
}

/// Wire envelope of every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pMessage {
    #[serde(with = "message_type_code")]
    pub message_type: MessageType,
    pub source_id: String,
    pub version: u32,
    pub payload: Vec<u8>,
    pub source_hash: Option<Hash>,
}

impl P2pMessage {
    pub fn new(source_id: impl Into<String>, version: u32, message: &Message) -> Result<Self, CodecError> {
        Ok(Self {
            message_type: message.message_type(),
            source_id: source_id.into(),
            version,
            payload: message.encode_payload()?,
            source_hash: None,
        })
    }

    pub fn message(&self) -> Result<Message, CodecError> {
        Message::decode(self.message_type, &self.payload)
    }

    /// Serialize and frame with snappy.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let bytes = encode_value(self)?;
        let mut encoder = FrameEncoder::new(Vec::new());
        encoder.write_all(&bytes)?;
        encoder
            .into_inner()
            .map_err(|err| CodecError::Framing(io::Error::other(format!("{err}"))))
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut decoder = FrameDecoder::new(data).take(MAX_MESSAGE_SIZE as u64 + 1);
        let mut bytes = Vec::new();
        decoder.read_to_end(&mut bytes)?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::TooLarge {
                limit: MAX_MESSAGE_SIZE,
            });
        }

        wire_options()
            .deserialize(&bytes)
            .map_err(CodecError::Envelope)
    }
}

mod message_type_code {
    use super::MessageType;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as SerdeError};

    pub fn serialize<S>(value: &MessageType, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.code())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<MessageType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = u64::deserialize(deserializer)?;
        MessageType::from_code(code)
            .ok_or_else(|| SerdeError::custom(format!("unknown message type {code}")))
    }
}
