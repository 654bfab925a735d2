//! The "TCP Wire" protocol spoken between peers: a fixed 68-byte handshake
//! followed by length-prefixed messages.
mod handshake;
mod messages;

pub use handshake::{Handshake, HandshakeCodec, HANDSHAKE_LEN};
pub use messages::{Message, MessageId, PeerCodec, MAX_MESSAGE_SIZE};

use bytes::{BufMut, BytesMut};

/// The request granularity. Every block of a piece is this long except the
/// last one, which might be smaller.
pub const BLOCK_LEN: u32 = 16384;

/// Protocol String
/// String identifier of the string "BitTorrent protocol", in bytes.
pub const PSTR: [u8; 19] = *b"BitTorrent protocol";

/// A Block is a subset of a Piece, pieces are subsets of the entire
/// Torrent data.
///
/// Sent on the "Piece" message of the peer wire protocol.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    /// The index of the piece this block belongs to.
    pub index: usize,
    /// The zero-based byte offset into the piece.
    pub begin: u32,
    /// The block's data.
    pub block: Vec<u8>,
}

impl Block {
    /// Encodes the block in the network binary protocol's format into the
    /// given buffer, without the message header.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.index as u32);
        buf.put_u32(self.begin);
        buf.extend_from_slice(&self.block);
    }
}

/// The representation of a [`Block`], sent on "Request" and "Cancel"
/// messages.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockInfo {
    /// The index of the piece of which this is a block.
    pub index: u32,
    /// The zero-based byte offset into the piece.
    pub begin: u32,
    /// The block's length in bytes. <= 16 KiB
    pub len: u32,
}

impl From<&Block> for BlockInfo {
    fn from(val: &Block) -> Self {
        BlockInfo {
            index: val.index as u32,
            begin: val.begin,
            len: val.block.len() as u32,
        }
    }
}

impl BlockInfo {
    pub fn new(index: u32, begin: u32, len: u32) -> Self {
        Self { index, begin, len }
    }

    /// Encodes the block info in the network binary protocol's format into
    /// the given buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.index);
        buf.put_u32(self.begin);
        buf.put_u32(self.len);
    }

    /// Like most clients, we only serve and request data <= 16kiB.
    pub fn is_valid(&self) -> bool {
        self.len <= BLOCK_LEN && self.len > 0
    }
}
