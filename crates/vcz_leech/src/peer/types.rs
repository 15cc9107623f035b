use std::fmt::Display;

use rand::{distributions::Alphanumeric, Rng};

use crate::bitfield::{Bitfield, VczBitfield};

/// Azureus-style client prefix of the ids we generate.
pub const CLIENT_PREFIX: &[u8; 8] = b"-VL0001-";

#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// A new id made of [`CLIENT_PREFIX`] and 12 random alphanumerics.
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(CLIENT_PREFIX);

        let chars = rand::thread_rng().sample_iter(&Alphanumeric);
        for (slot, c) in id[8..].iter_mut().zip(chars) {
            *slot = c;
        }

        Self(id)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s)
    }
}

impl From<PeerId> for [u8; 20] {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

impl From<[u8; 20]> for PeerId {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl std::str::FromStr for PeerId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buf = [0u8; 20];
        hex::decode_to_slice(s, &mut buf)?;
        Ok(Self(buf))
    }
}

/// State of the remote peer as seen from our side of the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerState {
    /// If the peer is choking us. Every connection starts choked.
    pub choked: bool,
    /// Pieces that the peer announced to have.
    pub bitfield: Bitfield,
}

impl PeerState {
    pub fn new(pieces: usize) -> Self {
        Self { choked: true, bitfield: Bitfield::from_piece(pieces) }
    }
}
