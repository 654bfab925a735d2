use std::fmt::Display;

use rand::{distributions::Alphanumeric, Rng};
use speedy::{Readable, Writable};

/// Prefix of the peer ids generated by this client.
pub const PEER_ID_PREFIX: &[u8; 8] = b"-TS0001-";

/// The self chosen identifier of a participant, sent on the handshake.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Readable, Writable)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// `-TS0001-` followed by 12 random alphanumerics.
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(PEER_ID_PREFIX);

        let mut rng = rand::thread_rng();
        for b in &mut id[8..] {
            *b = rng.sample(Alphanumeric);
        }
        Self(id)
    }

    /// Id from arbitrary bytes, zero padded or truncated to 20 bytes.
    pub fn padded(bytes: &[u8]) -> Self {
        let mut id = [0u8; 20];
        let len = bytes.len().min(20);
        id[..len].copy_from_slice(&bytes[..len]);
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

impl From<[u8; 20]> for PeerId {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl From<PeerId> for [u8; 20] {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

/// Messages broadcasted by the torrent to all of its connections.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerBrMsg {
    /// We downloaded a full piece, send Have to the peers that don't have
    /// it.
    HavePiece(usize),
    /// The program is shutting down, the connection must be closed.
    Quit,
}

/// Determines who initiated the connection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Direction {
    /// Outbound means we initiated the connection
    Outbound,
    /// Inbound means the peer initiated the connection
    Inbound,
}
