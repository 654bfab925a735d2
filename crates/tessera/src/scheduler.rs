//! Piece and block bookkeeping shared by every connection of a torrent.
//!
//! The scheduler decides which block a connection requests next, assembles
//! the blocks of each piece, verifies completed pieces against their digest
//! and writes them to disk. All of its state lives behind one mutex.
use std::time::Duration;

use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    bitfield::{Bitfield, TsrBitfield},
    disk::Disk,
    error::Error,
    metainfo::{Info, InfoHash},
    tcp_wire::{Block, BlockInfo, BLOCK_LEN},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PieceStatus {
    #[default]
    Pending,
    /// At least one block is requested or received.
    InFlight,
    /// Every block is received and the digest is being checked.
    Verifying,
    Complete,
    /// The piece failed verification more times than allowed and is never
    /// requested again.
    Failed,
}

/// What happened to a block given to [`Scheduler::on_block_received`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Stored, the piece still misses blocks.
    Accepted,
    /// The block was already received.
    Duplicate,
    /// The block does not belong to a piece we are downloading.
    Ignored,
    /// The piece was verified and written to disk.
    PieceComplete(usize),
    /// The piece did not match its digest and will be downloaded again.
    PieceCorrupted(usize),
    /// The piece did not match its digest too many times.
    PieceFailed(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// After this long an in-flight block may be handed out again.
    pub request_timeout: Duration,
    pub max_piece_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { request_timeout: Duration::from_secs(15), max_piece_retries: 3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    /// Bytes of verified pieces downloaded in this session.
    pub downloaded: u64,
    /// Bytes of pieces not complete yet.
    pub left: u64,
    pub complete: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    requested_at: Option<Instant>,
    received: bool,
}

#[derive(Debug, Default)]
struct Piece {
    status: PieceStatus,
    retries: u32,
    slots: Vec<Slot>,
    /// Allocated on the first block received.
    buf: Vec<u8>,
    received: usize,
}

impl Piece {
    fn new(blocks: usize) -> Self {
        Self { slots: vec![Slot::default(); blocks], ..Default::default() }
    }

    fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = Slot::default());
        self.buf = Vec::new();
        self.received = 0;
        self.status = PieceStatus::Pending;
    }

    fn is_done(&self) -> bool {
        matches!(self.status, PieceStatus::Complete | PieceStatus::Failed)
    }
}

#[derive(Debug)]
struct State {
    pieces: Vec<Piece>,
    bitfield: Bitfield,
    downloaded: u64,
}

#[derive(Debug)]
pub struct Scheduler {
    info: Info,
    disk: Disk,
    config: SchedulerConfig,
    state: Mutex<State>,
}

impl Scheduler {
    /// A scheduler with no piece downloaded yet.
    pub fn new(info: Info, disk: Disk, config: SchedulerConfig) -> Self {
        let bitfield = Bitfield::from_piece(info.pieces());
        Self::with_bitfield(info, disk, config, bitfield)
    }

    fn with_bitfield(
        info: Info,
        disk: Disk,
        config: SchedulerConfig,
        bitfield: Bitfield,
    ) -> Self {
        let pieces = (0..info.pieces())
            .map(|i| {
                let mut piece = Piece::new(info.blocks_in_piece(i));
                if bitfield.has(i) {
                    piece.status = PieceStatus::Complete;
                }
                piece
            })
            .collect();

        Self {
            info,
            disk,
            config,
            state: Mutex::new(State { pieces, bitfield, downloaded: 0 }),
        }
    }

    /// Seed the local bitfield from the progress file. When there is no
    /// progress file, every piece already on disk is verified, and the
    /// result is persisted.
    #[tracing::instrument(skip_all, fields(info_hash = %info.info_hash))]
    pub async fn load(
        info: Info,
        disk: Disk,
        config: SchedulerConfig,
    ) -> Result<Self, Error> {
        let pieces = info.pieces();

        let bitfield = match disk.load_progress(pieces).await? {
            Some(bitfield) => bitfield,
            None => {
                let mut bitfield = Bitfield::from_piece(pieces);
                for i in 0..pieces {
                    let Ok(data) = disk.read_piece(i).await else { continue };
                    if info.piece_hash(i) == Some(&InfoHash::digest(&data).0[..]) {
                        bitfield.set(i, true);
                    }
                }
                disk.save_progress(&bitfield).await?;
                bitfield
            }
        };

        info!("{} of {pieces} pieces on disk", bitfield.count_ones());

        Ok(Self::with_bitfield(info, disk, config, bitfield))
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    /// The next block to request from a remote with `remote` pieces, if any.
    /// Pieces are scanned in index order. The block is marked in flight.
    pub async fn next_block(&self, remote: &Bitfield) -> Option<BlockInfo> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        for (index, piece) in state.pieces.iter_mut().enumerate() {
            if piece.is_done()
                || piece.status == PieceStatus::Verifying
                || !remote.has(index)
            {
                continue;
            }

            let free = piece.slots.iter().position(|s| {
                !s.received
                    && s.requested_at.map_or(true, |at| {
                        now.duration_since(at) >= self.config.request_timeout
                    })
            });

            if let Some(b) = free {
                piece.slots[b].requested_at = Some(now);
                piece.status = PieceStatus::InFlight;
                return Some(self.info.block_info(index, b));
            }
        }
        None
    }

    /// If `remote` has a piece we still want.
    pub async fn is_interesting(&self, remote: &Bitfield) -> bool {
        let state = self.state.lock().await;
        state
            .pieces
            .iter()
            .enumerate()
            .any(|(i, piece)| !piece.is_done() && remote.has(i))
    }

    /// Store a block. When it completes its piece the piece is verified,
    /// written to disk and the progress file updated.
    pub async fn on_block_received(&self, block: Block) -> Result<BlockOutcome, Error> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let index = block.index;

        let Some(piece) = state.pieces.get_mut(index) else {
            return Ok(BlockOutcome::Ignored);
        };
        if piece.is_done() || block.begin % BLOCK_LEN != 0 {
            return Ok(BlockOutcome::Ignored);
        }

        let b = (block.begin / BLOCK_LEN) as usize;
        if b >= piece.slots.len()
            || self.info.block_info(index, b).len as usize != block.block.len()
        {
            return Ok(BlockOutcome::Ignored);
        }
        if piece.slots[b].received {
            return Ok(BlockOutcome::Duplicate);
        }

        if piece.buf.is_empty() {
            piece.buf = vec![0; self.info.piece_size(index) as usize];
        }
        let begin = block.begin as usize;
        piece.buf[begin..begin + block.block.len()].copy_from_slice(&block.block);
        piece.slots[b] = Slot { requested_at: None, received: true };
        piece.received += 1;
        piece.status = PieceStatus::InFlight;

        if piece.received < piece.slots.len() {
            return Ok(BlockOutcome::Accepted);
        }

        piece.status = PieceStatus::Verifying;
        let digest = InfoHash::digest(&piece.buf);

        if self.info.piece_hash(index) != Some(&digest.0[..]) {
            piece.reset();
            piece.retries += 1;

            if piece.retries > self.config.max_piece_retries {
                piece.status = PieceStatus::Failed;
                warn!(
                    "piece {index} failed verification {} times, giving up",
                    piece.retries
                );
                return Ok(BlockOutcome::PieceFailed(index));
            }
            warn!("piece {index} is corrupted, retry {}", piece.retries);
            return Ok(BlockOutcome::PieceCorrupted(index));
        }

        if let Err(e) = self.disk.write_piece(index, &piece.buf).await {
            piece.reset();
            return Err(e);
        }

        let len = piece.buf.len() as u64;
        piece.buf = Vec::new();
        piece.status = PieceStatus::Complete;
        state.bitfield.set(index, true);
        state.downloaded += len;

        self.disk.save_progress(&state.bitfield).await?;
        debug!("piece {index} complete");

        Ok(BlockOutcome::PieceComplete(index))
    }

    /// Clear the in-flight markers of blocks that will not arrive.
    pub async fn release(&self, blocks: &[BlockInfo]) {
        let mut state = self.state.lock().await;

        for block in blocks {
            let Some(piece) = state.pieces.get_mut(block.index as usize) else {
                continue;
            };
            if piece.is_done() {
                continue;
            }
            if let Some(slot) = piece.slots.get_mut((block.begin / BLOCK_LEN) as usize) {
                slot.requested_at = None;
            }
            if piece.received == 0
                && piece.slots.iter().all(|s| s.requested_at.is_none())
            {
                piece.status = PieceStatus::Pending;
            }
        }
    }

    /// Read a block of a verified piece, to serve a request.
    pub async fn read_block(&self, block: &BlockInfo) -> Result<Vec<u8>, Error> {
        let index = block.index as usize;

        if !block.is_valid()
            || !self.state.lock().await.bitfield.has(index)
            || block.begin as u64 + block.len as u64 > self.info.piece_size(index)
        {
            return Err(Error::BlockOutOfBounds);
        }

        self.disk.read_block(block).await
    }

    pub async fn bitfield(&self) -> Bitfield {
        self.state.lock().await.bitfield.clone()
    }

    pub async fn has_piece(&self, index: usize) -> bool {
        self.state.lock().await.bitfield.has(index)
    }

    /// True when every piece is verified.
    pub async fn is_complete(&self) -> bool {
        self.state.lock().await.bitfield.all()
    }

    /// True when there is nothing left to download, every piece is either
    /// complete or failed.
    pub async fn is_finished(&self) -> bool {
        self.state.lock().await.pieces.iter().all(Piece::is_done)
    }

    pub async fn piece_status(&self, index: usize) -> Option<PieceStatus> {
        self.state.lock().await.pieces.get(index).map(|p| p.status)
    }

    pub async fn stats(&self) -> Stats {
        let state = self.state.lock().await;

        let mut stats = Stats { downloaded: state.downloaded, ..Default::default() };

        for (i, piece) in state.pieces.iter().enumerate() {
            match piece.status {
                PieceStatus::Complete => stats.complete += 1,
                PieceStatus::Failed => stats.failed += 1,
                _ => {}
            }
            if piece.status != PieceStatus::Complete {
                stats.left += self.info.piece_size(i);
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{disk::tests::temp_dir, metainfo::File};

    const PIECE_LEN: u64 = 2 * BLOCK_LEN as u64;

    /// Two full pieces of two blocks and a last piece of one short block.
    fn data() -> Vec<u8> {
        (0..PIECE_LEN * 2 + 1000).map(|i| (i % 251) as u8).collect()
    }

    fn info(data: &[u8]) -> Info {
        let pieces = data
            .chunks(PIECE_LEN as usize)
            .flat_map(|c| InfoHash::digest(c).0)
            .collect();
        let files = vec![
            File { length: 40_000, path: vec!["a".into()] },
            File { length: data.len() as u64 - 40_000, path: vec!["b".into()] },
        ];
        Info::new("s".into(), PIECE_LEN, pieces, None, Some(files)).unwrap()
    }

    async fn scheduler(config: SchedulerConfig) -> (Scheduler, std::path::PathBuf) {
        let data = data();
        let info = info(&data);
        let dir = temp_dir();
        let disk = Disk::new(&info, &dir);
        disk.create_file_tree().await.unwrap();
        (Scheduler::new(info, disk, config), dir)
    }

    fn block(data: &[u8], info: &BlockInfo) -> Block {
        let start = info.index as usize * PIECE_LEN as usize + info.begin as usize;
        Block {
            index: info.index as usize,
            begin: info.begin,
            block: data[start..start + info.len as usize].to_vec(),
        }
    }

    fn all(pieces: usize) -> Bitfield {
        let mut b = Bitfield::from_piece(pieces);
        b.fill(true);
        b
    }

    #[tokio::test]
    async fn blocks_in_any_order() {
        let (scheduler, dir) = scheduler(SchedulerConfig::default()).await;
        let data = data();

        let b0 = BlockInfo::new(0, 0, BLOCK_LEN);
        let b1 = BlockInfo::new(0, BLOCK_LEN, BLOCK_LEN);

        assert_eq!(
            scheduler.on_block_received(block(&data, &b1)).await.unwrap(),
            BlockOutcome::Accepted
        );
        assert_eq!(
            scheduler.on_block_received(block(&data, &b1)).await.unwrap(),
            BlockOutcome::Duplicate
        );
        assert_eq!(
            scheduler.on_block_received(block(&data, &b0)).await.unwrap(),
            BlockOutcome::PieceComplete(0)
        );

        // the piece is done, later copies change nothing
        assert_eq!(
            scheduler.on_block_received(block(&data, &b0)).await.unwrap(),
            BlockOutcome::Ignored
        );
        let stats = scheduler.stats().await;
        assert_eq!(stats.downloaded, PIECE_LEN);
        assert_eq!(stats.complete, 1);
        assert_eq!(stats.left, PIECE_LEN + 1000);
        assert!(scheduler.has_piece(0).await);
        assert_eq!(scheduler.read_block(&b1).await.unwrap(), block(&data, &b1).block);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn next_block_follows_remote_pieces() {
        let (scheduler, dir) = scheduler(SchedulerConfig::default()).await;

        let mut remote = Bitfield::from_piece(3);
        assert_eq!(scheduler.next_block(&remote).await, None);
        assert!(!scheduler.is_interesting(&remote).await);

        remote.set(2, true);
        assert!(scheduler.is_interesting(&remote).await);
        assert_eq!(
            scheduler.next_block(&remote).await,
            Some(BlockInfo::new(2, 0, 1000))
        );
        // the only block of piece 2 is in flight
        assert_eq!(scheduler.next_block(&remote).await, None);
        assert_eq!(scheduler.piece_status(2).await, Some(PieceStatus::InFlight));

        let remote = all(3);
        assert_eq!(scheduler.next_block(&remote).await, Some(BlockInfo::new(0, 0, BLOCK_LEN)));
        assert_eq!(
            scheduler.next_block(&remote).await,
            Some(BlockInfo::new(0, BLOCK_LEN, BLOCK_LEN))
        );
        assert_eq!(scheduler.next_block(&remote).await, Some(BlockInfo::new(1, 0, BLOCK_LEN)));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn released_and_expired_blocks_are_requested_again() {
        let (s, dir) = scheduler(SchedulerConfig::default()).await;
        let remote = all(3);

        let first = s.next_block(&remote).await.unwrap();
        s.release(&[first.clone()]).await;
        assert_eq!(s.piece_status(0).await, Some(PieceStatus::Pending));
        assert_eq!(s.next_block(&remote).await, Some(first));
        let _ = std::fs::remove_dir_all(dir);

        let (s, dir) = scheduler(SchedulerConfig {
            request_timeout: Duration::ZERO,
            ..Default::default()
        })
        .await;
        let first = s.next_block(&remote).await;
        assert_eq!(s.next_block(&remote).await, first);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn corrupted_piece_is_retried_then_failed() {
        let (scheduler, dir) = scheduler(SchedulerConfig::default()).await;
        let remote = all(3);

        let bad = Block { index: 2, begin: 0, block: vec![0; 1000] };

        for retry in 1..=3 {
            assert_eq!(
                scheduler.on_block_received(bad.clone()).await.unwrap(),
                BlockOutcome::PieceCorrupted(2),
                "retry {retry}"
            );
            assert_eq!(scheduler.piece_status(2).await, Some(PieceStatus::Pending));
        }
        assert_eq!(
            scheduler.on_block_received(bad.clone()).await.unwrap(),
            BlockOutcome::PieceFailed(2)
        );
        assert_eq!(scheduler.piece_status(2).await, Some(PieceStatus::Failed));

        // never requested again, later blocks ignored
        let mut only_two = Bitfield::from_piece(3);
        only_two.set(2, true);
        assert_eq!(scheduler.next_block(&only_two).await, None);
        assert_eq!(
            scheduler.on_block_received(bad).await.unwrap(),
            BlockOutcome::Ignored
        );
        assert!(scheduler.next_block(&remote).await.is_some());
        assert_eq!(scheduler.stats().await.failed, 1);
        assert!(!scheduler.has_piece(2).await);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn blocks_not_matching_the_layout_are_ignored() {
        let (scheduler, dir) = scheduler(SchedulerConfig::default()).await;

        for block in [
            Block { index: 9, begin: 0, block: vec![0; 10] },
            Block { index: 0, begin: 1, block: vec![0; 10] },
            Block { index: 0, begin: 0, block: vec![0; 10] },
            Block { index: 2, begin: BLOCK_LEN, block: vec![0; 10] },
        ] {
            assert_eq!(
                scheduler.on_block_received(block).await.unwrap(),
                BlockOutcome::Ignored
            );
        }
        assert!(scheduler.read_block(&BlockInfo::new(0, 0, BLOCK_LEN)).await.is_err());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn load_checks_data_on_disk() {
        let data = data();
        let info = info(&data);
        let dir = temp_dir();

        let disk = Disk::new(&info, &dir);
        disk.create_file_tree().await.unwrap();
        disk.write(0, &data).await.unwrap();

        let scheduler =
            Scheduler::load(info.clone(), disk, SchedulerConfig::default()).await.unwrap();
        assert!(scheduler.is_complete().await);
        assert_eq!(scheduler.stats().await.left, 0);
        assert_eq!(scheduler.next_block(&all(3)).await, None);

        // the next load trusts the progress file
        let disk = Disk::new(&info, &dir);
        assert!(disk.progress_path().exists());
        disk.write(0, &[0; 10]).await.unwrap();
        let scheduler = Scheduler::load(info, disk, SchedulerConfig::default()).await.unwrap();
        assert!(scheduler.is_complete().await);

        let _ = std::fs::remove_dir_all(dir);
    }
}
