//! Codec for encoding and decoding handshakes.
//!
//! This has to be a separate codec as the handshake has a different
//! structure than the rest of the messages. Moreover, handshakes may only
//! be sent once at the beginning of a connection, preceding all other
//! messages. Thus, after receiving and sending a handshake the codec
//! should be switched to [`PeerCodec`], but care should be taken not to
//! discard the underlying receive and send buffers.
//!
//! [`PeerCodec`]: super::PeerCodec

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{error::Error, peer::PeerId, tcp_wire::PSTR, torrent::InfoHash};

#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), Error> {
        let Handshake { pstr, reserved, info_hash, peer_id } = handshake;

        // protocol length prefix
        let pstr_len: u8 =
            pstr.len().try_into().map_err(|_| Error::PstrLenInvalid)?;
        if pstr_len == 0 {
            return Err(Error::PstrLenInvalid);
        }

        buf.reserve(Handshake::frame_len(pstr.len()));
        buf.put_u8(pstr_len);

        // payload
        buf.extend_from_slice(&pstr);
        buf.extend_from_slice(&reserved);
        buf.extend_from_slice(&info_hash.0);
        buf.extend_from_slice(&<[u8; 20]>::from(peer_id));

        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Handshake>, Error> {
        if buf.is_empty() {
            return Ok(None);
        }

        // peek at the length prefix, the buffer cursor is only advanced once
        // the whole frame is in the buffer.
        let pstr_len = buf[0] as usize;
        if pstr_len == 0 {
            return Err(Error::PstrLenInvalid);
        }

        let frame_len = Handshake::frame_len(pstr_len);
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(1);

        // protocol string
        let pstr = buf.split_to(pstr_len).freeze();
        // reserved field
        let mut reserved = [0; 8];
        buf.copy_to_slice(&mut reserved);
        // info hash
        let mut info_hash = [0; 20];
        buf.copy_to_slice(&mut info_hash);
        // peer id
        let mut peer_id = [0; 20];
        buf.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake {
            pstr,
            reserved,
            info_hash: InfoHash(info_hash),
            peer_id: PeerId::from(peer_id),
        }))
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Handshake>, Error> {
        match self.decode(buf)? {
            Some(handshake) => Ok(Some(handshake)),
            None if buf.is_empty() => Ok(None),
            // the socket closed in the middle of the handshake
            None => Err(Error::NoHandshake),
        }
    }
}

/// pstrlen = 19
/// pstr = "BitTorrent protocol"
/// This is the very first message exchanged. If the peer's protocol string
/// (`BitTorrent protocol`) or the info hash differs from ours, the connection
/// is severed. The reserved field is 8 zero bytes, we don't announce any
/// extension. The peer id is usually the client name and version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub pstr: Bytes,
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(
        info_hash: impl Into<InfoHash>,
        peer_id: impl Into<PeerId>,
    ) -> Self {
        Self {
            pstr: Bytes::from_static(&PSTR),
            reserved: [0u8; 8],
            info_hash: info_hash.into(),
            peer_id: peer_id.into(),
        }
    }

    /// Length of a whole handshake frame with a protocol string of
    /// `pstr_len` bytes.
    pub const fn frame_len(pstr_len: usize) -> usize {
        1 + pstr_len + 8 + 20 + 20
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let mut buf = BytesMut::new();
        HandshakeCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }

    /// Validate the handshake that the remote peer sent us against ours.
    pub fn validate(&self, theirs: &Self) -> Result<(), Error> {
        if theirs.pstr != self.pstr {
            warn!("! handshake with wrong pstr, dropping connection");
            return Err(Error::HandshakeInvalid);
        }
        if theirs.info_hash != self.info_hash {
            warn!("! info_hash from receiving handshake does not match ours");
            return Err(Error::InfoHashMismatch);
        }
        Ok(())
    }
}
