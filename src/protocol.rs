//! Wire protocol between ranks
//!
//! Every message travels as a raw tag plus an opaque body. The tags are
//! fixed:
//!
//! | Tag | Message       | Body                                     |
//! |-----|---------------|------------------------------------------|
//! | 0   | `WorkRequest` | empty                                    |
//! | 1   | `WorkReply`   | bincode `Reply<T>` (`NoWork` or items)   |
//! | 2   | `Token`       | one byte, 0 = White, 1 = Black           |
//! | 3   | `Shutdown`    | empty                                    |
//! | 4   | `SeedDigest`  | bincode `SeedDigest`, before the loop    |
//! | 5   | `Quiesce`     | empty, after shutdown                    |
//!
//! A rank sends `Quiesce` to every peer once it has stopped issuing work
//! requests. Channels are FIFO per pair, so a `Quiesce` from a peer means
//! every request that peer will ever send us has already arrived.
//!
//! Anything else is a protocol violation.

use crate::error::{ProtocolError, ProtocolResult, Result, WalkerError};
use crate::transport::Envelope;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Message tags on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    WorkRequest = 0,
    WorkReply = 1,
    Token = 2,
    Shutdown = 3,
    SeedDigest = 4,
    Quiesce = 5,
}

impl Tag {
    /// Raw tag value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a raw tag received from `source_rank`
    pub fn from_u8(tag: u8, source_rank: usize) -> ProtocolResult<Self> {
        match tag {
            0 => Ok(Tag::WorkRequest),
            1 => Ok(Tag::WorkReply),
            2 => Ok(Tag::Token),
            3 => Ok(Tag::Shutdown),
            4 => Ok(Tag::SeedDigest),
            5 => Ok(Tag::Quiesce),
            _ => Err(ProtocolError::UnknownTag { tag, source_rank }),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Tag::WorkRequest => "work request",
            Tag::WorkReply => "work reply",
            Tag::Token => "token",
            Tag::Shutdown => "shutdown",
            Tag::SeedDigest => "seed digest",
            Tag::Quiesce => "quiesce",
        }
    }
}

/// Rank and token colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Colour {
    White,
    Black,
}

impl Colour {
    fn to_byte(self) -> u8 {
        match self {
            Colour::White => 0,
            Colour::Black => 1,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Colour::White),
            1 => Some(Colour::Black),
            _ => None,
        }
    }
}

/// Body of a work reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply<T> {
    /// The peer had at most one item and kept it
    NoWork,
    /// Items split off the front of the peer's queue, never empty
    Items(Vec<T>),
}

/// Fingerprint of a seed list, compared across ranks before the walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeedDigest {
    /// Number of seeds
    pub len: u64,
    /// Hash over the encoded seeds
    pub hash: u64,
}

/// A decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<T> {
    WorkRequest,
    WorkReply(Reply<T>),
    Token(Colour),
    Shutdown,
    SeedDigest(SeedDigest),
    Quiesce,
}

impl<T> Message<T> {
    /// Tag this message travels under
    pub fn tag(&self) -> Tag {
        match self {
            Message::WorkRequest => Tag::WorkRequest,
            Message::WorkReply(_) => Tag::WorkReply,
            Message::Token(_) => Tag::Token,
            Message::Shutdown => Tag::Shutdown,
            Message::SeedDigest(_) => Tag::SeedDigest,
            Message::Quiesce => Tag::Quiesce,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Message<T> {
    /// Encode into a (tag, body) pair
    pub fn encode(&self) -> Result<(u8, Vec<u8>)> {
        let body = match self {
            Message::WorkRequest | Message::Shutdown | Message::Quiesce => Vec::new(),
            Message::WorkReply(reply) => {
                bincode::serialize(reply).map_err(|e| WalkerError::Encode(e.to_string()))?
            }
            Message::Token(colour) => vec![colour.to_byte()],
            Message::SeedDigest(digest) => {
                bincode::serialize(digest).map_err(|e| WalkerError::Encode(e.to_string()))?
            }
        };
        Ok((self.tag().as_u8(), body))
    }

    /// Decode a received envelope
    pub fn decode(envelope: &Envelope) -> ProtocolResult<Self> {
        let source_rank = envelope.source;
        let tag = Tag::from_u8(envelope.tag, source_rank)?;
        let malformed = |reason: String| ProtocolError::MalformedBody {
            kind: tag.name(),
            source_rank,
            reason,
        };

        match tag {
            Tag::WorkRequest | Tag::Shutdown | Tag::Quiesce => {
                if !envelope.body.is_empty() {
                    return Err(malformed(format!(
                        "expected empty body, got {} bytes",
                        envelope.body.len()
                    )));
                }
                Ok(match tag {
                    Tag::WorkRequest => Message::WorkRequest,
                    Tag::Shutdown => Message::Shutdown,
                    _ => Message::Quiesce,
                })
            }
            Tag::WorkReply => {
                let reply: Reply<T> =
                    bincode::deserialize(&envelope.body).map_err(|e| malformed(e.to_string()))?;
                if let Reply::Items(items) = &reply {
                    if items.is_empty() {
                        return Err(ProtocolError::EmptyReply { source_rank });
                    }
                }
                Ok(Message::WorkReply(reply))
            }
            Tag::Token => match envelope.body.as_slice() {
                [byte] => Colour::from_byte(*byte)
                    .map(Message::Token)
                    .ok_or_else(|| malformed(format!("invalid colour byte {}", byte))),
                other => Err(malformed(format!("expected 1 byte, got {}", other.len()))),
            },
            Tag::SeedDigest => bincode::deserialize(&envelope.body)
                .map(Message::SeedDigest)
                .map_err(|e| malformed(e.to_string())),
        }
    }
}
