//! File I/O of a torrent: maps the torrent's byte stream onto its files and
//! keeps the progress file.
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};

use tokio::{
    fs::{create_dir_all, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::debug;

use crate::{
    bitfield::{Bitfield, TsrBitfield},
    error::Error,
    metainfo::Info,
    tcp_wire::BlockInfo,
};

/// A file of the torrent, placed in the torrent's byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskFile {
    pub path: PathBuf,
    /// Offset of the first byte of this file in the torrent.
    pub offset: u64,
    pub length: u64,
}

/// The part of a byte range of the torrent that falls inside one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    /// Index into [`Disk::files`].
    pub file: usize,
    /// Where the span starts inside the file.
    pub file_offset: u64,
    /// Where the span starts inside the caller's buffer.
    pub buf_offset: usize,
    pub len: usize,
}

#[derive(Debug)]
pub struct Disk {
    files: Vec<DiskFile>,
    piece_length: u64,
    total_size: u64,
    progress_path: PathBuf,
}

impl Disk {
    /// Layout of the torrent inside `download_dir`. Single file torrents
    /// are written to `download_dir/name`, multi file torrents inside the
    /// `download_dir/name` directory.
    pub fn new(info: &Info, download_dir: impl AsRef<Path>) -> Self {
        let download_dir = download_dir.as_ref();
        let mut base = download_dir.to_path_buf();
        base.push(&info.name);

        let mut offset = 0;
        let files = match &info.files {
            Some(files) => files
                .iter()
                .map(|f| {
                    let mut path = base.clone();
                    path.extend(&f.path);
                    let file = DiskFile { path, offset, length: f.length };
                    offset += f.length;
                    file
                })
                .collect(),
            None => vec![DiskFile {
                path: base,
                offset: 0,
                length: info.file_length.unwrap_or(0),
            }],
        };

        let progress_path =
            download_dir.join(format!(".{}.progress", info.info_hash));

        Self {
            files,
            piece_length: info.piece_length,
            total_size: info.total_size(),
            progress_path,
        }
    }

    pub fn files(&self) -> &[DiskFile] {
        &self.files
    }

    pub fn progress_path(&self) -> &Path {
        &self.progress_path
    }

    /// Create the directories and files of the torrent. Files shorter
    /// than their final length are extended, nothing is truncated.
    pub async fn create_file_tree(&self) -> Result<(), Error> {
        for f in &self.files {
            if let Some(parent) = f.path.parent() {
                create_dir_all(parent).await?;
            }

            let file = Self::open_file(&f.path).await?;

            if file.metadata().await?.len() < f.length {
                file.set_len(f.length).await?;
            }
        }
        debug!("created file tree of {} files", self.files.len());
        Ok(())
    }

    pub async fn open_file(path: impl AsRef<Path>) -> Result<File, Error> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?)
    }

    /// Split the byte range `offset..offset + len` of the torrent into the
    /// files it covers, in order. Empty files never appear in the result.
    pub fn spans(&self, offset: u64, len: usize) -> Vec<FileSpan> {
        let end = offset + len as u64;

        self.files
            .iter()
            .enumerate()
            .filter_map(|(i, f)| {
                let start = offset.max(f.offset);
                let stop = end.min(f.offset + f.length);
                (start < stop).then(|| FileSpan {
                    file: i,
                    file_offset: start - f.offset,
                    buf_offset: (start - offset) as usize,
                    len: (stop - start) as usize,
                })
            })
            .collect()
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<(), Error> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.total_size => Ok(()),
            _ => Err(Error::BlockOutOfBounds),
        }
    }

    /// Write `data` at `offset` of the torrent, across as many files as it
    /// covers.
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<(), Error> {
        self.check_range(offset, data.len())?;

        for span in self.spans(offset, data.len()) {
            let mut file = Self::open_file(&self.files[span.file].path).await?;
            file.seek(SeekFrom::Start(span.file_offset)).await?;
            file.write_all(&data[span.buf_offset..span.buf_offset + span.len])
                .await?;
            file.flush().await?;
        }
        Ok(())
    }

    /// Read `len` bytes at `offset` of the torrent.
    pub async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        self.check_range(offset, len)?;

        let mut buf = vec![0u8; len];

        for span in self.spans(offset, len) {
            let mut file = Self::open_file(&self.files[span.file].path).await?;
            file.seek(SeekFrom::Start(span.file_offset)).await?;
            file.read_exact(&mut buf[span.buf_offset..span.buf_offset + span.len])
                .await?;
        }
        Ok(buf)
    }

    pub async fn write_piece(&self, index: usize, data: &[u8]) -> Result<(), Error> {
        self.write(index as u64 * self.piece_length, data).await
    }

    /// Read a whole piece, the last one might be shorter.
    pub async fn read_piece(&self, index: usize) -> Result<Vec<u8>, Error> {
        let offset = index as u64 * self.piece_length;
        let len = self.total_size.saturating_sub(offset).min(self.piece_length);
        if len == 0 {
            return Err(Error::BlockOutOfBounds);
        }
        self.read(offset, len as usize).await
    }

    pub async fn read_block(&self, info: &BlockInfo) -> Result<Vec<u8>, Error> {
        let offset =
            info.index as u64 * self.piece_length + info.begin as u64;
        self.read(offset, info.len as usize).await
    }

    /// Read the progress file, `None` if there is none yet.
    pub async fn load_progress(&self, pieces: usize) -> Result<Option<Bitfield>, Error> {
        match tokio::fs::read(&self.progress_path).await {
            Ok(bytes) => Ok(Some(Bitfield::from_progress(&bytes, pieces))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the local bitfield, one byte per piece.
    pub async fn save_progress(&self, bitfield: &Bitfield) -> Result<(), Error> {
        if let Some(parent) = self.progress_path.parent() {
            create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.progress_path, bitfield.to_progress()).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use rand::{distributions::Alphanumeric, Rng};

    use super::*;
    use crate::metainfo::{File as MetaFile, Info};

    /// A random directory under the OS temp dir.
    pub(crate) fn temp_dir() -> PathBuf {
        let name: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        std::env::temp_dir().join(format!("tessera-{name}"))
    }

    fn info(lengths: &[u64], piece_length: u64) -> Info {
        let files = lengths
            .iter()
            .enumerate()
            .map(|(i, l)| MetaFile { length: *l, path: vec![format!("{i}.bin")] })
            .collect::<Vec<_>>();
        let total: u64 = lengths.iter().sum();
        let pieces = total.div_ceil(piece_length) as usize;

        Info::new("t".into(), piece_length, vec![0; pieces * 20], None, Some(files))
            .unwrap()
    }

    #[test]
    fn spans_of_whole_torrent() {
        let disk = Disk::new(&info(&[10, 20, 5], 35), "/tmp");

        assert_eq!(
            disk.spans(0, 35),
            vec![
                FileSpan { file: 0, file_offset: 0, buf_offset: 0, len: 10 },
                FileSpan { file: 1, file_offset: 0, buf_offset: 10, len: 20 },
                FileSpan { file: 2, file_offset: 0, buf_offset: 30, len: 5 },
            ]
        );
    }

    #[test]
    fn spans_on_file_boundaries() {
        let disk = Disk::new(&info(&[10, 20, 5], 10), "/tmp");

        // piece 1 starts exactly where the second file starts
        assert_eq!(
            disk.spans(10, 10),
            vec![FileSpan { file: 1, file_offset: 0, buf_offset: 0, len: 10 }]
        );
        // piece 2 ends exactly where the second file ends
        assert_eq!(
            disk.spans(20, 10),
            vec![FileSpan { file: 1, file_offset: 10, buf_offset: 0, len: 10 }]
        );
        assert_eq!(
            disk.spans(30, 5),
            vec![FileSpan { file: 2, file_offset: 0, buf_offset: 0, len: 5 }]
        );

        // a piece crossing a boundary in the middle
        let disk = Disk::new(&info(&[10, 20, 5], 15), "/tmp");
        assert_eq!(
            disk.spans(0, 15),
            vec![
                FileSpan { file: 0, file_offset: 0, buf_offset: 0, len: 10 },
                FileSpan { file: 1, file_offset: 0, buf_offset: 10, len: 5 },
            ]
        );
    }

    #[test]
    fn empty_files_are_skipped() {
        let disk = Disk::new(&info(&[4, 0, 4], 8), "/tmp");

        let spans = disk.spans(0, 8);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].file, 2);
    }

    #[tokio::test]
    async fn write_piece_across_files() -> Result<(), Error> {
        let dir = temp_dir();
        let disk = Disk::new(&info(&[10, 20, 5], 35), &dir);
        disk.create_file_tree().await?;

        let data: Vec<u8> = (0..35).collect();
        disk.write_piece(0, &data).await?;

        let files = disk.files();
        assert_eq!(files[0].path, dir.join("t").join("0.bin"));
        assert_eq!(tokio::fs::read(&files[0].path).await?, (0..10).collect::<Vec<u8>>());
        assert_eq!(tokio::fs::read(&files[1].path).await?, (10..30).collect::<Vec<u8>>());
        assert_eq!(tokio::fs::read(&files[2].path).await?, (30..35).collect::<Vec<u8>>());

        assert_eq!(disk.read(8, 4).await?, vec![8, 9, 10, 11]);
        assert_eq!(
            disk.read_block(&BlockInfo::new(0, 28, 7)).await?,
            vec![28, 29, 30, 31, 32, 33, 34]
        );
        assert!(matches!(disk.read(30, 6).await, Err(Error::BlockOutOfBounds)));

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[tokio::test]
    async fn progress_file() -> Result<(), Error> {
        let dir = temp_dir();
        let disk = Disk::new(&info(&[10, 20, 5], 10), &dir);

        assert_eq!(disk.load_progress(4).await?, None);

        let mut bitfield = Bitfield::from_piece(4);
        bitfield.set(2, true);
        disk.save_progress(&bitfield).await?;

        assert_eq!(tokio::fs::read(disk.progress_path()).await?, vec![0, 0, 1, 0]);
        assert_eq!(disk.load_progress(4).await?, Some(bitfield));

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }
}
