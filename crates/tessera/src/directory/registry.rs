use std::net::{IpAddr, SocketAddr};

use hashbrown::HashMap;

use super::FileListing;
use crate::{metainfo::InfoHash, peer::PeerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub file_name: String,
    pub info_hash: InfoHash,
    pub file_size: u64,
}

/// A peer as last announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub peer_id: PeerId,
    pub ip: IpAddr,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

impl PeerEntry {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Files and the peers of each file. Peers are unique by peer id within a
/// file.
#[derive(Debug, Default)]
pub struct Registry {
    files: HashMap<InfoHash, FileEntry>,
    peers: HashMap<InfoHash, Vec<PeerEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file, the uploader becomes its first seeder.
    pub fn upload(&mut self, file: FileEntry, uploader: PeerEntry) {
        let info_hash = file.info_hash;
        self.files.insert(info_hash, file);
        self.upsert_peer(info_hash, uploader);
    }

    pub fn list(&self) -> Vec<FileListing> {
        let mut files: Vec<FileListing> = self
            .files
            .values()
            .map(|f| FileListing {
                file_name: f.file_name.clone(),
                info_hash: f.info_hash,
                file_size: f.file_size,
                peers: self.peers.get(&f.info_hash).map_or(0, Vec::len),
            })
            .collect();
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        files
    }

    /// Record the announcing peer, replacing its previous record, and
    /// return the other peers of the file.
    pub fn announce(&mut self, info_hash: InfoHash, peer: PeerEntry) -> Vec<PeerEntry> {
        let peer_id = peer.peer_id;
        self.upsert_peer(info_hash, peer);

        self.peers
            .get(&info_hash)
            .map(|peers| peers.iter().filter(|p| p.peer_id != peer_id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn peers(&self, info_hash: &InfoHash) -> &[PeerEntry] {
        self.peers.get(info_hash).map(Vec::as_slice).unwrap_or(&[])
    }

    fn upsert_peer(&mut self, info_hash: InfoHash, peer: PeerEntry) {
        let peers = self.peers.entry(info_hash).or_default();
        peers.retain(|p| p.peer_id != peer.peer_id);
        peers.push(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: u8, left: u64) -> PeerEntry {
        PeerEntry {
            peer_id: PeerId([id; 20]),
            ip: "10.0.0.1".parse().unwrap(),
            port: 6000 + id as u16,
            uploaded: 0,
            downloaded: 0,
            left,
        }
    }

    #[test]
    fn upload_and_list() {
        let mut registry = Registry::new();
        let file = FileEntry {
            file_name: "a.iso".into(),
            info_hash: InfoHash([1; 20]),
            file_size: 100,
        };

        registry.upload(file.clone(), peer(1, 0));
        // uploading twice does not duplicate the uploader
        registry.upload(file, peer(1, 0));

        let list = registry.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].file_name, "a.iso");
        assert_eq!(list[0].peers, 1);
    }

    #[test]
    fn announce_replaces_by_peer_id() {
        let mut registry = Registry::new();
        let hash = InfoHash([1; 20]);

        assert!(registry.announce(hash, peer(1, 100)).is_empty());

        let others = registry.announce(hash, peer(2, 100));
        assert_eq!(others, vec![peer(1, 100)]);

        // a second announce of peer 1 replaces its record
        let others = registry.announce(hash, peer(1, 0));
        assert_eq!(others, vec![peer(2, 100)]);
        assert_eq!(registry.peers(&hash).len(), 2);
        assert!(registry.peers(&hash).contains(&peer(1, 0)));

        // announces alone do not list a file
        assert!(registry.list().is_empty());
    }
}
