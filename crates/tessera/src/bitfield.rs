//! Wrapper types around Bitvec.
use bitvec::prelude::*;

/// Bitfield where index = piece.
pub type Bitfield = BitVec<u8, Msb0>;

pub trait TsrBitfield {
    /// A bitfield of `pieces` bits, all unset.
    fn from_piece(pieces: usize) -> Bitfield {
        bitvec![u8, Msb0; 0; pieces]
    }

    /// Bitfield from the raw bytes of a bitfield message, truncated or
    /// extended to exactly `pieces` bits.
    fn from_wire(vec: Vec<u8>, pieces: usize) -> Bitfield {
        let mut s = Bitfield::from_vec(vec);
        s.resize(pieces, false);
        s
    }

    /// Decode the progress file format, one byte per piece, 1 = complete.
    fn from_progress(bytes: &[u8], pieces: usize) -> Bitfield {
        let mut s = Self::from_piece(pieces);
        for (i, b) in bytes.iter().take(pieces).enumerate() {
            s.set(i, *b == 1);
        }
        s
    }

    /// Encode to the progress file format.
    fn to_progress(&self) -> Vec<u8>;

    /// Set a bit, ignoring indices out of range.
    fn safe_set(&mut self, index: usize) -> bool;

    /// Get a bit, out of range indices are unset.
    fn has(&self, index: usize) -> bool;
}

impl TsrBitfield for Bitfield {
    fn to_progress(&self) -> Vec<u8> {
        self.iter().map(|b| u8::from(*b)).collect()
    }

    fn safe_set(&mut self, index: usize) -> bool {
        if index >= self.len() {
            return false;
        }
        self.set(index, true);
        true
    }

    fn has(&self, index: usize) -> bool {
        self.get(index).map(|b| *b).unwrap_or(false)
    }
}
