//! Announcing to a tracker to discover the peers of a torrent.
//!
//! The scheme of the announce url selects the exchange: `http://` and
//! `https://` speak the HTTP tracker protocol, `tcp://host:port` speaks the
//! bencoded protocol of [`crate::directory`].
pub mod http;

use std::{fmt::Display, net::SocketAddr};

use crate::{directory::DirectoryClient, error::Error, metainfo::InfoHash, peer::PeerId};
use http::HttpTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Started,
    Completed,
    Stopped,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Started => "started",
            Event::Completed => "completed",
            Event::Stopped => "stopped",
        }
    }
}

/// The state of the local peer sent on every announce.
#[derive(Debug, Clone, PartialEq)]
pub struct Announce {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: Option<Event>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnounceResponse {
    /// Seconds to wait between announces.
    pub interval: u64,
    pub peers: Vec<SocketAddr>,
}

#[derive(Debug)]
pub enum Tracker {
    Http(HttpTracker),
    Directory(DirectoryClient),
}

impl Tracker {
    pub fn new(url: &str) -> Result<Self, Error> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(Self::Http(HttpTracker::new(url)?));
        }
        if let Some(addr) = url.strip_prefix("tcp://") {
            let addr = addr.trim_end_matches('/');
            if addr.is_empty() {
                return Err(Error::TrackerUrlInvalid(url.to_owned()));
            }
            return Ok(Self::Directory(DirectoryClient::new(addr)));
        }
        Err(Error::TrackerUrlInvalid(url.to_owned()))
    }

    pub async fn announce(&self, announce: &Announce) -> Result<AnnounceResponse, Error> {
        match self {
            Self::Http(tracker) => tracker.announce(announce).await,
            Self::Directory(client) => client.announce(announce).await,
        }
    }
}

impl Display for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(tracker) => write!(f, "{}", tracker.url()),
            Self::Directory(client) => write!(f, "tcp://{}", client.addr()),
        }
    }
}
