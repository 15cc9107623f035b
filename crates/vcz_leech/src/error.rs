use std::io;

use thiserror::Error;

use crate::tcp_wire::messages::MessageId;

/// Broad family of an [`Error`], used by the retry policy to decide what
/// happens to a worker after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Dial, handshake or info hash problems. Fatal to one worker.
    Connection,
    /// A frame or payload that does not match its kind's schema.
    Decode,
    /// Downloaded bytes that don't hash to the expected value.
    Integrity,
    /// The socket failed or the peer vanished mid-transfer.
    Io,
    /// Problems with the session as a whole, not with a single peer.
    Session,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error")]
    IO(#[from] io::Error),

    #[error("The peer took to long to accept the TCP connection")]
    ConnectTimeout,

    #[error("The peer took to long to send the handshake")]
    HandshakeTimeout,

    #[error("The handshake received is not valid")]
    HandshakeInvalid,

    #[error("The info_hash from the received handshake does not match ours")]
    InfoHashMismatch,

    #[error("The peer didn't send a handshake as the first message")]
    NoHandshake,

    #[error("The handshake protocol string length must not be zero")]
    PstrLenInvalid,

    #[error("Message of {size} bytes is larger than the maximum of {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Expected a {expected:?} message but got {got}")]
    UnexpectedMessage { expected: MessageId, got: String },

    #[error(
        "Payload of {id:?} should have {expected} bytes but it has {got} bytes"
    )]
    PayloadLength { id: MessageId, expected: usize, got: usize },

    #[error("Expected a block of piece {expected} but got piece {got}")]
    PieceIndexMismatch { expected: u32, got: u32 },

    #[error("Begin offset {begin} is out of bounds for a piece of {len} bytes")]
    BeginOutOfBounds { begin: u32, len: usize },

    #[error(
        "Block of {block_len} bytes at offset {begin} overflows a piece of \
         {len} bytes"
    )]
    BlockOutOfBounds { begin: u32, block_len: usize, len: usize },

    #[error("The piece {0} downloaded does not have a valid hash")]
    PieceInvalid(usize),

    #[error("The peer closed the socket")]
    PeerClosedSocket,

    #[error("The peer took to long to respond")]
    Timeout,

    #[error("No peers in the torrent")]
    NoPeers,

    #[error(
        "Download stalled with {done} of {total} pieces, no peer is making \
         progress"
    )]
    Stalled { done: usize, total: usize },

    #[error(
        "The torrent has {hashes} piece hashes but its length of {length} \
         bytes requires {expected}"
    )]
    LengthMismatch { hashes: usize, expected: usize, length: usize },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Error while trying to load configuration: `{0}")]
    FromConfigError(#[from] config::ConfigError),

    #[error("Could not parse the session file: {0}")]
    SessionFileError(#[from] toml::de::Error),

    #[error("Invalid hex string: {0}")]
    HexError(#[from] hex::FromHexError),

    #[error("Invalid peer address `{0}`")]
    PeerSocketAddr(String),
}

impl Error {
    /// Which family of the error taxonomy this error belongs to.
    pub fn class(&self) -> ErrorClass {
        use Error::*;
        match self {
            ConnectTimeout | HandshakeTimeout | HandshakeInvalid
            | InfoHashMismatch | NoHandshake => ErrorClass::Connection,

            PstrLenInvalid
            | MessageTooLarge { .. }
            | UnexpectedMessage { .. }
            | PayloadLength { .. }
            | PieceIndexMismatch { .. }
            | BeginOutOfBounds { .. }
            | BlockOutOfBounds { .. } => ErrorClass::Decode,

            PieceInvalid(_) => ErrorClass::Integrity,

            IO(_) | PeerClosedSocket | Timeout => ErrorClass::Io,

            NoPeers
            | Stalled { .. }
            | LengthMismatch { .. }
            | ConfigError(_)
            | FromConfigError(_)
            | SessionFileError(_)
            | HexError(_)
            | PeerSocketAddr(_) => ErrorClass::Session,
        }
    }
}
