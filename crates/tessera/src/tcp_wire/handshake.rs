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

use bytes::{Buf, BufMut, BytesMut};
use speedy::{BigEndian, Readable, Writable};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::PSTR;
use crate::{error::Error, metainfo::InfoHash, peer::PeerId};

/// Size of a handshake on the wire.
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

#[derive(Debug)]
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), Error> {
        let Handshake { pstr_len, pstr, reserved, info_hash, peer_id } =
            handshake;

        // we should only be sending the bittorrent protocol string
        debug_assert_eq!(pstr_len, 19);
        debug_assert_eq!(pstr, PSTR);

        buf.reserve(HANDSHAKE_LEN);
        buf.put_u8(pstr_len);
        buf.extend_from_slice(&pstr);
        buf.extend_from_slice(&reserved);
        buf.extend_from_slice(&info_hash.0);
        buf.extend_from_slice(&peer_id.0);

        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Handshake>, Error> {
        if buf.is_empty() {
            return Ok(None);
        }

        // peek, the full handshake might not be here yet.
        let prot_len = buf[0] as usize;
        if prot_len != PSTR.len() {
            warn!("! handshake with wrong pstr_len {prot_len}");
            return Err(Error::HandshakeInvalid);
        }

        if buf.len() < HANDSHAKE_LEN {
            return Ok(None);
        }

        buf.advance(1);

        let mut pstr = [0; 19];
        buf.copy_to_slice(&mut pstr);
        let mut reserved = [0; 8];
        buf.copy_to_slice(&mut reserved);
        let mut info_hash = [0; 20];
        buf.copy_to_slice(&mut info_hash);
        let mut peer_id = [0; 20];
        buf.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake {
            pstr_len: prot_len as u8,
            pstr,
            reserved,
            info_hash: InfoHash(info_hash),
            peer_id: PeerId(peer_id),
        }))
    }
}

/// pstrlen = 19
/// pstr = "BitTorrent protocol"
/// This is the very first message exchanged. If the peer's protocol string
/// or the info hash differs from ours, the connection is severed. The
/// reserved field is sent as 8 zero bytes and ignored on receipt. The peer
/// id is the remote's self chosen identifier.
#[derive(Clone, Debug, PartialEq, Writable, Readable)]
pub struct Handshake {
    pub pstr_len: u8,
    pub pstr: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            pstr_len: PSTR.len() as u8,
            pstr: PSTR,
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn serialize(&self) -> Result<[u8; HANDSHAKE_LEN], Error> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        let temp = self
            .write_to_vec_with_ctx(BigEndian {})
            .map_err(|_| Error::HandshakeInvalid)?;

        buf.copy_from_slice(&temp[..]);

        Ok(buf)
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, Error> {
        Self::read_from_buffer_with_ctx(BigEndian {}, buf)
            .map_err(|_| Error::HandshakeInvalid)
    }

    /// Validate a handshake received from a remote against ours.
    pub fn validate(&self, target: &Self) -> Result<(), Error> {
        if self.pstr_len != 19 || self.pstr != PSTR {
            warn!("! handshake with wrong pstr, dropping connection");
            return Err(Error::HandshakeInvalid);
        }
        if self.info_hash != target.info_hash {
            warn!("! info_hash from receiving handshake does not match ours");
            return Err(Error::InfoHashMismatch);
        }
        Ok(())
    }
}
