//! Wrapper types around Bitvec.
use bitvec::prelude::*;

/// Bitfield where index = piece.
///
/// Bits are stored most-significant-bit first, byte 0 holds pieces 0..=7,
/// which is the exact layout of the `bitfield` message payload.
pub type Bitfield = BitVec<u8, Msb0>;

pub trait VczBitfield {
    /// An empty bitfield with one bit per piece.
    fn from_piece(pieces: usize) -> Bitfield {
        bitvec![u8, Msb0; 0; pieces]
    }

    /// A bitfield over the raw bytes of a `bitfield` message, its length in
    /// bits is `8 * payload.len()` and never changes afterwards.
    fn from_payload(payload: &[u8]) -> Bitfield {
        Bitfield::from_slice(payload)
    }

    /// If the piece is set. Indices outside of the bitfield are reported as
    /// missing.
    fn has_piece(&self, index: usize) -> bool;

    /// Mark the piece as present. Indices outside of the bitfield are
    /// ignored, they come straight from the network.
    fn set_piece(&mut self, index: usize);
}

impl VczBitfield for Bitfield {
    fn has_piece(&self, index: usize) -> bool {
        self.get(index).map(|bit| *bit).unwrap_or(false)
    }

    fn set_piece(&mut self, index: usize) {
        if index < self.len() {
            self.set(index, true);
        }
    }
}
