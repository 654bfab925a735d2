use std::io;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::{bencode::FormatError, torrent::TorrentMsg};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to decode or encode the bencode buffer: {0}")]
    Format(#[from] FormatError),

    #[error("The metainfo is not valid: {0}")]
    MetaInfoInvalid(String),

    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    #[error("The handshake received is not valid")]
    HandshakeInvalid,

    #[error("The info_hash of the handshake does not match ours")]
    InfoHashMismatch,

    #[error("The peer took to long to send the handshake")]
    HandshakeTimeout,

    #[error("Could not connect to the peer in time")]
    ConnectTimeout,

    #[error("The peer closed the socket")]
    PeerClosedSocket,

    #[error("The message received from the peer is malformed")]
    MessageInvalid,

    #[error("The message is larger than the maximum allowed size")]
    MessageTooLarge,

    #[error("The block requested is out of the torrent bounds")]
    BlockOutOfBounds,

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("The tracker url `{0}` is not supported")]
    TrackerUrlInvalid(String),

    #[error("Tracker HTTP request failed: {0}")]
    TrackerHttp(#[from] reqwest::Error),

    #[error("The directory answered with an error: {0}")]
    Directory(String),

    #[error("The directory closed the connection without a response")]
    DirectoryNoResponse,

    #[error("Error while trying to load configuration: `{0}")]
    FromConfigError(#[from] config::ConfigError),

    #[error("Error while writing the configuration file: `{0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to create dirs."
    )]
    HomeInvalid,

    #[error("Could not set the global logger: {0}")]
    Logging(String),

    #[error("Could not send message to Torrent")]
    SendErrorTorrent(#[from] mpsc::error::SendError<TorrentMsg>),

    #[error("The task panicked or was cancelled")]
    Join(#[from] tokio::task::JoinError),
}
