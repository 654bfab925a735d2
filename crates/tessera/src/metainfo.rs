//! Metainfo is a .torrent file with information about the Torrent.
use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use speedy::{Readable, Writable};

use crate::{
    bencode::{self, Value},
    error::Error,
    tcp_wire::{BlockInfo, BLOCK_LEN},
};

/// Length of a SHA-1 digest, and of every id exchanged on the wire.
pub const DIGEST_LEN: usize = 20;

/// Largest accepted `piece length`. A piece is assembled in memory and
/// block offsets inside it are sent as `u32`.
pub const MAX_PIECE_LENGTH: u64 = 1 << 28;

/// SHA-1 of the encoded `info` dictionary, identifies a torrent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Readable, Writable)]
pub struct InfoHash(pub [u8; 20]);

impl Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl From<[u8; 20]> for InfoHash {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for InfoHash {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let hash: [u8; 20] = value.try_into().map_err(|_| {
            Error::MetaInfoInvalid("info_hash must have 20 bytes".into())
        })?;
        Ok(Self(hash))
    }
}

impl InfoHash {
    /// SHA-1 of `buf`.
    pub fn digest(buf: &[u8]) -> Self {
        let mut hasher = sha1_smol::Sha1::new();
        hasher.update(buf);
        Self(hasher.digest().bytes())
    }
}

/// Metainfo is a .torrent file with information about the Torrent.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct MetaInfo {
    pub announce: String,
    pub announce_list: Option<Vec<Vec<String>>>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<i64>,
    pub encoding: Option<String>,
    pub info: Info,
}

/// File related information.
///
/// In a single file torrent `name` is the file name and `file_length` is
/// set. In a multi file torrent `name` is the name of the root directory
/// and `files` is set instead.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Info {
    /// length in bytes of each piece, the last piece may have a smaller length
    pub piece_length: u64,
    /// A (byte) string consisting of the concatenation of all 20-byte SHA1
    /// hash values, one per piece.
    pub pieces: Vec<u8>,
    pub private: bool,
    pub name: String,
    pub file_length: Option<u64>,
    pub files: Option<Vec<File>>,
    /// Computed when decoding, not part of the encoded dictionary.
    pub info_hash: InfoHash,
}

/// Files in the [`Info`] are relative to the root folder name,
/// but do not contain them as the first item in the vector.
#[derive(Debug, PartialEq, Clone, Default, Hash, Eq)]
pub struct File {
    /// Length of the file in bytes.
    pub length: u64,
    /// Path of the file, excluding the parent name.
    pub path: Vec<String>,
}

impl MetaInfo {
    pub fn from_bencode(buf: &[u8]) -> Result<Self, Error> {
        let root = bencode::decode(buf)?;

        if root.as_dict().is_none() {
            return Err(Error::MetaInfoInvalid("root is not a dictionary".into()));
        }

        let info = root
            .get("info")
            .ok_or(Error::MetaInfoInvalid("missing `info`".into()))?;

        let announce_list = root.get("announce-list").and_then(|l| {
            l.as_list()?
                .iter()
                .map(|tier| {
                    tier.as_list()?
                        .iter()
                        .map(|url| url.as_str().map(String::from))
                        .collect::<Option<Vec<String>>>()
                })
                .collect::<Option<Vec<Vec<String>>>>()
        });

        let opt_str = |key| root.get(key).and_then(Value::as_str).map(String::from);

        Ok(Self {
            announce: opt_str("announce").unwrap_or_default(),
            announce_list,
            comment: opt_str("comment"),
            created_by: opt_str("created by"),
            creation_date: root.get("creation date").and_then(Value::as_int),
            encoding: opt_str("encoding"),
            info: Info::from_value(info)?,
        })
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let buf = tokio::fs::read(path).await?;
        Self::from_bencode(&buf)
    }

    pub fn to_value(&self) -> Value {
        let mut v = Value::dict().insert("announce", self.announce.as_str());

        if let Some(list) = &self.announce_list {
            let tiers = list
                .iter()
                .map(|tier| {
                    Value::List(tier.iter().map(|u| u.as_str().into()).collect())
                })
                .collect::<Vec<_>>();
            v = v.insert("announce-list", tiers);
        }
        if let Some(comment) = &self.comment {
            v = v.insert("comment", comment.as_str());
        }
        if let Some(created_by) = &self.created_by {
            v = v.insert("created by", created_by.as_str());
        }
        if let Some(date) = self.creation_date {
            v = v.insert("creation date", date);
        }
        if let Some(encoding) = &self.encoding {
            v = v.insert("encoding", encoding.as_str());
        }

        v.insert("info", self.info.to_value())
    }

    pub fn to_bencode(&self) -> Vec<u8> {
        self.to_value().encode()
    }

    /// All tracker urls, `announce` first, without duplicates.
    pub fn trackers(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if !self.announce.is_empty() {
            urls.push(self.announce.clone());
        }
        for url in self.announce_list.iter().flatten().flatten() {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }

    /// Create the metainfo of a local file or directory, hashing its
    /// content in pieces of `piece_length` bytes.
    pub async fn from_path(
        path: impl AsRef<Path>,
        announce: String,
        piece_length: u64,
    ) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let info = tokio::task::spawn_blocking(move || {
            Info::from_path(&path, piece_length)
        })
        .await??;

        Ok(Self {
            announce,
            created_by: Some(format!("tessera {}", env!("CARGO_PKG_VERSION"))),
            info,
            ..Default::default()
        })
    }
}

impl Info {
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let piece_length = non_negative(value.int_field("piece length")?)?;
        let pieces = value.bytes_field("pieces")?.to_vec();
        let name = value.str_field("name")?.to_owned();
        let private = value.get("private").and_then(Value::as_int) == Some(1);

        let file_length = match value.get("length") {
            Some(v) => Some(non_negative(
                v.as_int().ok_or(Error::MetaInfoInvalid("`length`".into()))?,
            )?),
            None => None,
        };

        let files = match value.get("files") {
            Some(list) => {
                let list = list
                    .as_list()
                    .ok_or(Error::MetaInfoInvalid("`files` is not a list".into()))?;
                let mut files = Vec::with_capacity(list.len());
                for f in list {
                    let length = non_negative(f.int_field("length")?)?;
                    let path = f
                        .get("path")
                        .and_then(Value::as_list)
                        .ok_or(Error::MetaInfoInvalid("file without `path`".into()))?
                        .iter()
                        .map(|c| c.as_str().map(String::from))
                        .collect::<Option<Vec<String>>>()
                        .ok_or(Error::MetaInfoInvalid("path is not UTF-8".into()))?;
                    files.push(File { length, path });
                }
                Some(files)
            }
            None => None,
        };

        let info = Self {
            piece_length,
            pieces,
            private,
            name,
            file_length,
            files,
            info_hash: InfoHash::digest(&value.encode()),
        };

        info.validate()?;

        Ok(info)
    }

    /// Encode back to a dictionary, keys in lexicographic order.
    pub fn to_value(&self) -> Value {
        let mut v = Value::dict();

        if let Some(files) = &self.files {
            let files = files
                .iter()
                .map(|f| {
                    Value::dict().insert("length", f.length).insert(
                        "path",
                        f.path.iter().map(|c| Value::string(c)).collect::<Vec<Value>>(),
                    )
                })
                .collect::<Vec<_>>();
            v = v.insert("files", files);
        }
        if let Some(length) = self.file_length {
            v = v.insert("length", length);
        }

        v = v
            .insert("name", self.name.as_str())
            .insert("piece length", self.piece_length)
            .insert("pieces", self.pieces.clone());

        if self.private {
            v = v.insert("private", 1i64);
        }
        v
    }

    /// Build an info from its parts, computing the info hash.
    pub fn new(
        name: String,
        piece_length: u64,
        pieces: Vec<u8>,
        file_length: Option<u64>,
        files: Option<Vec<File>>,
    ) -> Result<Self, Error> {
        let mut info = Self {
            piece_length,
            pieces,
            private: false,
            name,
            file_length,
            files,
            info_hash: InfoHash::default(),
        };
        info.info_hash = InfoHash::digest(&info.to_value().encode());
        info.validate()?;
        Ok(info)
    }

    /// Check the invariants between lengths, digests and paths.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| Err(Error::MetaInfoInvalid(msg));

        if self.piece_length == 0 {
            return invalid("`piece length` is zero".into());
        }
        if self.piece_length > MAX_PIECE_LENGTH {
            return invalid(format!(
                "`piece length` {} is larger than {MAX_PIECE_LENGTH}",
                self.piece_length
            ));
        }
        if self.pieces.len() % DIGEST_LEN != 0 {
            return invalid(format!(
                "`pieces` has {} bytes, not a multiple of {DIGEST_LEN}",
                self.pieces.len()
            ));
        }
        if !is_safe_component(&self.name) {
            return invalid(format!("unsafe name `{}`", self.name));
        }

        match (&self.file_length, &self.files) {
            (Some(_), None) => {}
            (None, Some(files)) if !files.is_empty() => {
                for f in files {
                    if f.path.is_empty() || !f.path.iter().all(|c| is_safe_component(c)) {
                        return invalid(format!("unsafe path {:?}", f.path));
                    }
                }
            }
            _ => return invalid("expected exactly one of `length` or `files`".into()),
        }

        // every other size is derived from this sum
        let total = match &self.files {
            Some(files) => files
                .iter()
                .try_fold(0u64, |total, f| total.checked_add(f.length)),
            None => self.file_length,
        };
        let Some(total) = total else {
            return invalid("the file lengths overflow".into());
        };
        if total > i64::MAX as u64 {
            return invalid(format!("the torrent size {total} is too large"));
        }
        let expected = total.div_ceil(self.piece_length) as usize;

        if total == 0 {
            return invalid("the torrent has no data".into());
        }
        if self.pieces() != expected {
            return invalid(format!(
                "{} digests for {expected} pieces",
                self.pieces()
            ));
        }
        Ok(())
    }

    /// Calculate how many pieces there are.
    #[inline]
    pub fn pieces(&self) -> usize {
        self.pieces.len() / DIGEST_LEN
    }

    /// Expected digest of a piece.
    pub fn piece_hash(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(DIGEST_LEN)?;
        self.pieces.get(start..start + DIGEST_LEN)
    }

    /// Get the size in bytes of the files of the torrent.
    pub fn total_size(&self) -> u64 {
        match &self.files {
            Some(files) => files.iter().map(|f| f.length).sum(),
            None => self.file_length.unwrap_or(0),
        }
    }

    /// Get the size (in bytes) of a piece, the last one might be shorter.
    pub fn piece_size(&self, index: usize) -> u64 {
        let start = index as u64 * self.piece_length;
        self.total_size().saturating_sub(start).min(self.piece_length)
    }

    /// Calculate how many blocks there are in a piece.
    pub fn blocks_in_piece(&self, index: usize) -> usize {
        self.piece_size(index).div_ceil(BLOCK_LEN as u64) as usize
    }

    /// The `block`th block of a piece, the last block may be shorter.
    pub fn block_info(&self, index: usize, block: usize) -> BlockInfo {
        let begin = block as u64 * BLOCK_LEN as u64;
        let len = self.piece_size(index).saturating_sub(begin).min(BLOCK_LEN as u64);
        BlockInfo::new(index as u32, begin as u32, len as u32)
    }

    /// The files of the torrent, a single file torrent has one file
    /// whose path is its name.
    pub fn files(&self) -> Vec<File> {
        match &self.files {
            Some(files) => files.clone(),
            None => vec![File {
                length: self.file_length.unwrap_or(0),
                path: vec![self.name.clone()],
            }],
        }
    }

    fn from_path(path: &Path, piece_length: u64) -> Result<Self, Error> {
        if piece_length == 0 || piece_length > MAX_PIECE_LENGTH {
            return Err(Error::MetaInfoInvalid(format!(
                "`piece length` must be between 1 and {MAX_PIECE_LENGTH}"
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(Error::MetaInfoInvalid(format!("invalid path {path:?}")))?
            .to_owned();

        let meta = std::fs::metadata(path)?;

        let (disk_files, file_length, files) = if meta.is_dir() {
            let mut disk_files = Vec::new();
            walk_dir(path, &mut disk_files)?;
            disk_files.sort();

            let mut files = Vec::with_capacity(disk_files.len());
            for f in &disk_files {
                let rel = f.strip_prefix(path).map_err(|_| {
                    Error::MetaInfoInvalid(format!("invalid path {f:?}"))
                })?;
                let components = rel
                    .components()
                    .map(|c| c.as_os_str().to_str().map(String::from))
                    .collect::<Option<Vec<String>>>()
                    .ok_or(Error::MetaInfoInvalid(format!("path {rel:?} is not UTF-8")))?;
                files.push(File { length: std::fs::metadata(f)?.len(), path: components });
            }
            (disk_files, None, Some(files))
        } else {
            (vec![path.to_path_buf()], Some(meta.len()), None)
        };

        // hash the concatenation of all files, pieces span file boundaries.
        let mut pieces = Vec::new();
        let mut piece = Vec::with_capacity(piece_length as usize);

        for f in disk_files {
            let data = std::fs::read(f)?;
            let mut rest = &data[..];

            while !rest.is_empty() {
                let take = (piece_length as usize - piece.len()).min(rest.len());
                piece.extend_from_slice(&rest[..take]);
                rest = &rest[take..];

                if piece.len() == piece_length as usize {
                    pieces.extend_from_slice(&InfoHash::digest(&piece).0);
                    piece.clear();
                }
            }
        }
        if !piece.is_empty() {
            pieces.extend_from_slice(&InfoHash::digest(&piece).0);
        }

        Self::new(name, piece_length, pieces, file_length, files)
    }
}

fn walk_dir(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), Error> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn non_negative(n: i64) -> Result<u64, Error> {
    u64::try_from(n).map_err(|_| Error::MetaInfoInvalid(format!("negative length {n}")))
}

/// A path component that stays inside its parent directory.
fn is_safe_component(c: &str) -> bool {
    !c.is_empty() && c != "." && c != ".." && !c.contains(|ch: char| ch == '/' || ch == '\\')
}
