//! A library for distributing files between peers.
//!
//! Files are described by a metainfo file and split in pieces of equal
//! size, each one verified by its SHA-1 digest. Peers exchange pieces over
//! TCP, in blocks of 16 KiB, and find each other through a tracker.
//!
//! The library contains:
//!
//! * [bencode], the format of metainfo files and tracker messages
//! * [tcp_wire] and [peer], the protocol spoken between peers
//! * [scheduler] and [disk], which pick the blocks to request, verify
//!   pieces and write them to their files
//! * [torrent], which ties it all together for one torrent
//! * [tracker] and [directory], the client and server sides of peer
//!   discovery
//!
//! # Example
//!
//! Download (and then seed) a torrent:
//!
//! ```no_run
//! # async fn run() -> Result<(), tessera::error::Error> {
//! use std::sync::Arc;
//! use tessera::{config::ResolvedConfig, metainfo::MetaInfo, torrent::Torrent};
//!
//! let meta = MetaInfo::from_file("debian.torrent").await?;
//! let config = Arc::new(ResolvedConfig::with_download_dir("downloads"));
//!
//! let mut torrent = Torrent::new(meta, config).await?;
//! let listener = torrent.listen().await?;
//! torrent.run(listener).await?;
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod bitfield;
pub mod config;
pub mod directory;
pub mod disk;
pub mod error;
pub mod logging;
pub mod metainfo;
pub mod peer;
pub mod scheduler;
pub mod tcp_wire;
pub mod torrent;
pub mod tracker;
