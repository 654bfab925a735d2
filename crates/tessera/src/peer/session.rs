/// The lifecycle of a connection with a remote peer.
#[derive(Clone, Default, Copy, Debug, PartialEq)]
pub enum ConnectionState {
    /// The TCP connection is being established.
    #[default]
    Connecting,

    /// Exchanging and validating handshakes.
    Handshaking,

    /// Handshaked, exchanging messages.
    Active,

    /// The connection is closed and its requests were released.
    Closed,
}

/// Contains the state of both sides of the connection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoreState {
    /// If we're choking, we don't allow the peer to download pieces from us.
    pub am_choking: bool,

    /// If we're interested, peer has pieces that we don't have.
    pub am_interested: bool,

    /// If peer is choking, peer doesn't allow us to download pieces from
    /// them.
    pub peer_choking: bool,

    /// If peer is interested in us, they mean to download pieces that we
    /// have.
    pub peer_interested: bool,
}

impl Default for CoreState {
    /// By default, both sides of the connection start off as choked and not
    /// interested in the other.
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

impl CoreState {
    /// Blocks may be requested only while the peer is not choking us and we
    /// are interested.
    pub fn can_request(&self) -> bool {
        !self.peer_choking && self.am_interested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_choked_and_not_interested() {
        let mut state = CoreState::default();
        assert!(state.am_choking && state.peer_choking);
        assert!(!state.am_interested && !state.peer_interested);
        assert!(!state.can_request());

        state.am_interested = true;
        assert!(!state.can_request());
        state.peer_choking = false;
        assert!(state.can_request());
    }
}
