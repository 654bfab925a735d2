//! The directory service: a tracker that keeps which files are shared and
//! which peers share them.
//!
//! Every connection carries exactly one request, a bencoded dictionary with
//! an `action` key, and one bencoded reply. Errors are replied as
//! `{error: <message>}`.
//!
//! | action     | request fields                                                    | reply                                         |
//! |------------|-------------------------------------------------------------------|-----------------------------------------------|
//! | `upload`   | `file_name`, `info_hash`, `file_size`, `peer_id`, `port`          | `{status: "success"}`                         |
//! | `list`     |                                                                   | `{files: [{file_name, info_hash, file_size, peers}]}` |
//! | `announce` | `info_hash`, `peer_id`, `port`, `uploaded`, `downloaded`, `left`  | `{interval, peers: [{peer id, ip, port}]}`    |
mod client;
mod registry;
mod server;

pub use client::DirectoryClient;
pub use registry::{FileEntry, PeerEntry, Registry};
pub use server::DirectoryServer;

use crate::{
    bencode::{FormatError, Value},
    error::Error,
    metainfo::InfoHash,
    peer::PeerId,
};

/// Seconds between announces asked of the peers.
pub const DEFAULT_INTERVAL: u64 = 1800;

/// A request of the directory protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Upload {
        file_name: String,
        info_hash: InfoHash,
        file_size: u64,
        peer_id: PeerId,
        port: u16,
    },
    List,
    Announce {
        info_hash: InfoHash,
        peer_id: PeerId,
        port: u16,
        uploaded: u64,
        downloaded: u64,
        left: u64,
    },
}

impl Request {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Upload { file_name, info_hash, file_size, peer_id, port } => {
                Value::dict()
                    .insert("action", "upload")
                    .insert("file_name", file_name.as_str())
                    .insert("info_hash", &info_hash.0[..])
                    .insert("file_size", *file_size)
                    .insert("peer_id", &peer_id.0[..])
                    .insert("port", *port)
            }
            Self::List => Value::dict().insert("action", "list"),
            Self::Announce { info_hash, peer_id, port, uploaded, downloaded, left } => {
                Value::dict()
                    .insert("action", "announce")
                    .insert("info_hash", &info_hash.0[..])
                    .insert("peer_id", &peer_id.0[..])
                    .insert("port", *port)
                    .insert("uploaded", *uploaded)
                    .insert("downloaded", *downloaded)
                    .insert("left", *left)
            }
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let action = value.str_field("action")?;

        match action {
            "upload" => Ok(Self::Upload {
                file_name: value.str_field("file_name")?.to_owned(),
                info_hash: InfoHash::try_from(value.bytes_field("info_hash")?)?,
                file_size: unsigned(value, "file_size")?,
                peer_id: PeerId::padded(value.bytes_field("peer_id")?),
                port: port(value)?,
            }),
            "list" => Ok(Self::List),
            "announce" => Ok(Self::Announce {
                info_hash: InfoHash::try_from(value.bytes_field("info_hash")?)?,
                peer_id: PeerId::padded(value.bytes_field("peer_id")?),
                port: port(value)?,
                uploaded: unsigned(value, "uploaded")?,
                downloaded: unsigned(value, "downloaded")?,
                left: unsigned(value, "left")?,
            }),
            other => Err(Error::Directory(format!("unknown action `{other}`"))),
        }
    }
}

fn unsigned(value: &Value, key: &'static str) -> Result<u64, Error> {
    u64::try_from(value.int_field(key)?)
        .map_err(|_| FormatError::MissingField(key, "non negative integer").into())
}

fn port(value: &Value) -> Result<u16, Error> {
    u16::try_from(value.int_field("port")?)
        .map_err(|_| FormatError::MissingField("port", "port number").into())
}

/// An entry of the `list` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileListing {
    pub file_name: String,
    pub info_hash: InfoHash,
    pub file_size: u64,
    /// How many peers share the file.
    pub peers: usize,
}

impl FileListing {
    pub fn to_value(&self) -> Value {
        Value::dict()
            .insert("file_name", self.file_name.as_str())
            .insert("info_hash", &self.info_hash.0[..])
            .insert("file_size", self.file_size)
            .insert("peers", self.peers as u64)
    }

    pub fn from_value(value: &Value) -> Result<Self, Error> {
        Ok(Self {
            file_name: value.str_field("file_name")?.to_owned(),
            info_hash: InfoHash::try_from(value.bytes_field("info_hash")?)?,
            file_size: unsigned(value, "file_size")?,
            peers: unsigned(value, "peers")? as usize,
        })
    }
}

/// Reply sent for a failed request.
pub fn error_reply(message: &str) -> Value {
    Value::dict().insert("error", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let requests = [
            Request::Upload {
                file_name: "movie.mkv".into(),
                info_hash: InfoHash([3; 20]),
                file_size: 1 << 33,
                peer_id: PeerId([4; 20]),
                port: 6881,
            },
            Request::List,
            Request::Announce {
                info_hash: InfoHash([3; 20]),
                peer_id: PeerId([5; 20]),
                port: 6882,
                uploaded: 10,
                downloaded: 20,
                left: 0,
            },
        ];

        for request in requests {
            assert_eq!(Request::from_value(&request.to_value()).unwrap(), request);
        }
    }

    #[test]
    fn invalid_requests() {
        let unknown = Value::dict().insert("action", "delete");
        assert!(matches!(Request::from_value(&unknown), Err(Error::Directory(_))));

        let no_action = Value::dict().insert("file_name", "x");
        assert!(Request::from_value(&no_action).is_err());

        let bad_port = Request::Announce {
            info_hash: InfoHash([3; 20]),
            peer_id: PeerId([5; 20]),
            port: 1,
            uploaded: 0,
            downloaded: 0,
            left: 0,
        }
        .to_value()
        .insert("port", 70_000u64);
        assert!(Request::from_value(&bad_port).is_err());

        let short_hash = Request::List
            .to_value()
            .insert("action", "announce")
            .insert("info_hash", &[1u8; 4][..]);
        assert!(Request::from_value(&short_hash).is_err());
    }
}
