//! Messages exchanged after a successful handshake, and the codec that
//! frames them on the socket.
//!
//! All of the messages in the protocol take the form of
//! `<length prefix><message ID><payload>`. The length prefix is a four byte
//! big-endian value, the message ID is a single byte and the payload is
//! message dependent. A zero length prefix is a keep-alive.
use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{
    bitfield::{Bitfield, VczBitfield},
    error::Error,
    tcp_wire::{Block, BlockInfo, MAX_MESSAGE_SIZE},
};

/// The IDs of the [`Message`]s.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageId::*;
        Ok(match value {
            0 => Choke,
            1 => Unchoke,
            2 => Interested,
            3 => NotInterested,
            4 => Have,
            5 => Bitfield,
            6 => Request,
            7 => Piece,
            8 => Cancel,
            other => return Err(other),
        })
    }
}

/// Messages of the vanilla protocol, with no extensions.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `<len=0000>`
    KeepAlive,
    /// `<len=0001><id=0>`
    /// The sender will not answer requests until it sends an unchoke.
    Choke,
    /// `<len=0001><id=1>`
    Unchoke,
    /// `<len=0001><id=2>`
    Interested,
    /// `<len=0001><id=3>`
    NotInterested,
    /// `<len=0005><id=4><piece index>`
    /// The sender has downloaded and verified a new piece.
    Have(u32),
    /// `<len=0001+X><id=5><bitfield>`
    /// Only sent right after the handshake. Byte 0 corresponds to pieces
    /// 0-7, from most significant bit to least significant bit.
    ///
    /// The payload is byte-granular: a bitfield of 10 pieces is sent with 6
    /// zeroed spare bits and decodes as 16 bits. The receiver truncates it to
    /// its piece count.
    Bitfield(Bitfield),
    /// `<len=0013><id=6><index><begin><length>`
    Request(BlockInfo),
    /// `<len=0009+X><id=7><index><begin><block>`
    Piece(Block),
    /// `<len=0013><id=8><index><begin><length>`
    Cancel(BlockInfo),
}

impl Message {
    /// Build a `request` for `len` bytes at `begin` of the piece `index`.
    pub fn request(index: u32, begin: u32, len: u32) -> Self {
        Self::Request(BlockInfo { index, begin, len })
    }

    /// Build a `have` announcing the piece `index`.
    pub fn have(index: u32) -> Self {
        Self::Have(index)
    }

    /// The wire id of the message, keep-alives don't have one.
    pub fn id(&self) -> Option<MessageId> {
        Some(match self {
            Message::KeepAlive => return None,
            Message::Choke => MessageId::Choke,
            Message::Unchoke => MessageId::Unchoke,
            Message::Interested => MessageId::Interested,
            Message::NotInterested => MessageId::NotInterested,
            Message::Have(_) => MessageId::Have,
            Message::Bitfield(_) => MessageId::Bitfield,
            Message::Request(_) => MessageId::Request,
            Message::Piece(_) => MessageId::Piece,
            Message::Cancel(_) => MessageId::Cancel,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "KeepAlive",
            Message::Choke => "Choke",
            Message::Unchoke => "Unchoke",
            Message::Interested => "Interested",
            Message::NotInterested => "NotInterested",
            Message::Have(_) => "Have",
            Message::Bitfield(_) => "Bitfield",
            Message::Request(_) => "Request",
            Message::Piece(_) => "Piece",
            Message::Cancel(_) => "Cancel",
        }
    }

    /// Length of the payload, without the length prefix and the id.
    pub fn payload_len(&self) -> usize {
        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => 0,
            Message::Have(_) => 4,
            Message::Bitfield(bitfield) => bitfield.len().div_ceil(8),
            Message::Request(_) | Message::Cancel(_) => 4 + 4 + 4,
            Message::Piece(block) => 4 + 4 + block.block.len(),
        }
    }

    /// Encode the message with its length prefix.
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(4 + 1 + self.payload_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Copy the block of a `piece` message into `buf`, which holds the whole
    /// piece `index`. Returns how many bytes were copied.
    ///
    /// Everything is validated before `buf` is touched, on error it is left
    /// as it was.
    pub fn parse_piece(
        &self,
        index: u32,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let Message::Piece(block) = self else {
            return Err(Error::UnexpectedMessage {
                expected: MessageId::Piece,
                got: self.name().to_owned(),
            });
        };

        if block.index != index {
            return Err(Error::PieceIndexMismatch {
                expected: index,
                got: block.index,
            });
        }

        let begin = block.begin as usize;

        if begin >= buf.len() {
            return Err(Error::BeginOutOfBounds {
                begin: block.begin,
                len: buf.len(),
            });
        }

        let end = begin + block.block.len();

        if end > buf.len() {
            return Err(Error::BlockOutOfBounds {
                begin: block.begin,
                block_len: block.block.len(),
                len: buf.len(),
            });
        }

        buf[begin..end].copy_from_slice(&block.block);

        Ok(block.block.len())
    }

    /// The piece index announced by a `have` message.
    pub fn parse_have(&self) -> Result<u32, Error> {
        match self {
            Message::Have(index) => Ok(*index),
            other => Err(Error::UnexpectedMessage {
                expected: MessageId::Have,
                got: other.name().to_owned(),
            }),
        }
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        let Some(id) = self.id() else {
            buf.put_u32(0);
            return;
        };

        buf.put_u32(1 + self.payload_len() as u32);
        buf.put_u8(id as u8);

        match self {
            Message::Have(index) => buf.put_u32(*index),
            Message::Bitfield(bitfield) => {
                buf.extend_from_slice(bitfield.as_raw_slice())
            }
            Message::Request(block_info) | Message::Cancel(block_info) => {
                block_info.encode(buf)
            }
            Message::Piece(block) => block.encode(buf),
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::KeepAlive => f.write_str(self.name()),
            _ => write!(f, "{} [{}]", self.name(), self.payload_len()),
        }
    }
}

impl From<Message> for BytesMut {
    fn from(val: Message) -> Self {
        val.serialize()
    }
}

/// Frames [`Message`]s on a socket that already exchanged handshakes.
#[derive(Debug, Clone, Copy)]
pub struct PeerCodec {
    /// Frames with a larger length prefix are rejected, the prefix comes
    /// from an untrusted peer.
    pub max_message_size: usize,
}

impl Default for PeerCodec {
    fn default() -> Self {
        Self { max_message_size: MAX_MESSAGE_SIZE }
    }
}

impl PeerCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Decode the payload of a complete frame, `frame` is positioned right
    /// after the message id.
    fn decode_payload(
        id: MessageId,
        mut frame: BytesMut,
    ) -> Result<Message, Error> {
        let exact = |expected: usize| {
            if frame.len() != expected {
                return Err(Error::PayloadLength {
                    id,
                    expected,
                    got: frame.len(),
                });
            }
            Ok(())
        };

        let msg = match id {
            MessageId::Choke => {
                exact(0)?;
                Message::Choke
            }
            MessageId::Unchoke => {
                exact(0)?;
                Message::Unchoke
            }
            MessageId::Interested => {
                exact(0)?;
                Message::Interested
            }
            MessageId::NotInterested => {
                exact(0)?;
                Message::NotInterested
            }
            MessageId::Have => {
                exact(4)?;
                Message::Have(frame.get_u32())
            }
            MessageId::Bitfield => {
                Message::Bitfield(Bitfield::from_payload(&frame))
            }
            MessageId::Request => {
                exact(12)?;
                Message::Request(BlockInfo {
                    index: frame.get_u32(),
                    begin: frame.get_u32(),
                    len: frame.get_u32(),
                })
            }
            MessageId::Cancel => {
                exact(12)?;
                Message::Cancel(BlockInfo {
                    index: frame.get_u32(),
                    begin: frame.get_u32(),
                    len: frame.get_u32(),
                })
            }
            MessageId::Piece => {
                if frame.len() < 8 {
                    return Err(Error::PayloadLength {
                        id,
                        expected: 8,
                        got: frame.len(),
                    });
                }
                let index = frame.get_u32();
                let begin = frame.get_u32();

                Message::Piece(Block { index, begin, block: frame.freeze() })
            }
        };

        Ok(msg)
    }
}

impl Encoder<Message> for PeerCodec {
    type Error = Error;

    fn encode(
        &mut self,
        item: Message,
        buf: &mut BytesMut,
    ) -> Result<(), Error> {
        buf.reserve(4 + 1 + item.payload_len());
        item.encode_into(buf);
        Ok(())
    }
}

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, Error> {
        loop {
            // the message length header must be present at the minimum,
            // otherwise we can't determine the message type
            if buf.len() < 4 {
                return Ok(None);
            }

            // peek at length prefix without consuming
            let size =
                u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

            if size == 0 {
                buf.advance(4);
                return Ok(Some(Message::KeepAlive));
            }

            if size > self.max_message_size {
                return Err(Error::MessageTooLarge {
                    size,
                    max: self.max_message_size,
                });
            }

            // incomplete message, wait until the rest of the frame arrives
            // without advancing the cursor.
            if buf.len() < 4 + size {
                buf.reserve(4 + size - buf.len());
                return Ok(None);
            }

            buf.advance(4);
            let mut frame = buf.split_to(size);
            let id = frame.get_u8();

            match MessageId::try_from(id) {
                Ok(id) => return Self::decode_payload(id, frame).map(Some),
                // unknown message id, skip the frame and try the next one
                Err(id) => {
                    warn!("unknown message_id {id}, skipping {size} bytes")
                }
            }
        }
    }
}
