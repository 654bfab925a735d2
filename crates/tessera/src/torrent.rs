//! A torrent being downloaded and seeded: owns the scheduler, the listener
//! for incoming peers, the tracker announces and one task per connection.
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use hashbrown::HashSet;
use tokio::{
    net::TcpListener,
    select,
    sync::{broadcast, mpsc, Semaphore},
    task::JoinSet,
    time::{interval_at, timeout, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::ResolvedConfig,
    directory::DEFAULT_INTERVAL,
    disk::Disk,
    error::Error,
    metainfo::{InfoHash, MetaInfo},
    peer::{self, PeerBrMsg, PeerId},
    scheduler::Scheduler,
    tracker::{Announce, AnnounceResponse, Event, Tracker},
};

/// Messages used to control the torrent.
#[derive(Debug, Clone, PartialEq)]
pub enum TorrentMsg {
    /// Connect to these peers, usually sent after an announce.
    AddPeers(Vec<SocketAddr>),
    /// Sent by a peer that completed and verified a piece.
    PieceComplete(usize),
    /// Sent by a peer when a piece failed verification too many times.
    PieceFailed(usize),
    /// Close every connection and stop.
    Quit,
}

/// State shared by the torrent and all of its connections.
#[derive(Debug)]
pub struct TorrentCtx {
    pub info_hash: InfoHash,
    pub local_peer_id: PeerId,
    pub scheduler: Scheduler,
    pub config: Arc<ResolvedConfig>,
    pub br_tx: broadcast::Sender<PeerBrMsg>,
    pub tx: mpsc::Sender<TorrentMsg>,
    /// Bytes served to other peers.
    pub uploaded: AtomicU64,
}

pub struct Torrent {
    pub ctx: Arc<TorrentCtx>,
    pub meta: MetaInfo,
    rx: mpsc::Receiver<TorrentMsg>,
    trackers: Vec<Tracker>,
    download_permits: Arc<Semaphore>,
    upload_permits: Arc<Semaphore>,
    peers: JoinSet<()>,
    /// Addresses we already connected to, never dialed twice.
    dialed: HashSet<SocketAddr>,
    local_addr: Option<SocketAddr>,
    announced_complete: bool,
}

impl Torrent {
    /// Create the files of the torrent and load what is already
    /// downloaded.
    #[tracing::instrument(skip_all, fields(name = %meta.info.name))]
    pub async fn new(meta: MetaInfo, config: Arc<ResolvedConfig>) -> Result<Self, Error> {
        let disk = Disk::new(&meta.info, &config.download_dir);
        disk.create_file_tree().await?;

        let scheduler =
            Scheduler::load(meta.info.clone(), disk, config.scheduler_config()).await?;

        let trackers = meta
            .trackers()
            .iter()
            .filter_map(|url| match Tracker::new(url) {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("ignoring tracker: {e}");
                    None
                }
            })
            .collect();

        let (tx, rx) = mpsc::channel::<TorrentMsg>(300);
        let (br_tx, _) = broadcast::channel::<PeerBrMsg>(128);

        let ctx = Arc::new(TorrentCtx {
            info_hash: meta.info.info_hash,
            local_peer_id: PeerId::generate(),
            scheduler,
            br_tx,
            tx,
            uploaded: AtomicU64::new(0),
            config: config.clone(),
        });

        Ok(Self {
            announced_complete: ctx.scheduler.is_complete().await,
            ctx,
            meta,
            rx,
            trackers,
            download_permits: Arc::new(Semaphore::new(config.max_download_peers)),
            upload_permits: Arc::new(Semaphore::new(config.max_upload_peers)),
            peers: JoinSet::new(),
            dialed: HashSet::new(),
            local_addr: None,
        })
    }

    pub fn tx(&self) -> mpsc::Sender<TorrentMsg> {
        self.ctx.tx.clone()
    }

    /// Bind the listener for incoming peers.
    pub async fn listen(&self) -> Result<TcpListener, Error> {
        let listener = TcpListener::bind(self.ctx.config.listen).await?;
        info!("listening for peers on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Run the torrent until it receives [`TorrentMsg::Quit`], or until the
    /// download completes if `quit_after_complete` is set.
    #[tracing::instrument(skip_all, fields(info_hash = %self.ctx.info_hash))]
    pub async fn run(&mut self, listener: TcpListener) -> Result<(), Error> {
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        if self.trackers.is_empty() {
            warn!("the torrent has no usable tracker, waiting for peers");
        }

        let mut announce_secs = DEFAULT_INTERVAL;
        if let Some(res) = self.announce(Some(Event::Started)).await {
            announce_secs = res.interval;
            self.spawn_outbound_peers(res.peers);
        }

        let mut announce_interval = Self::announce_interval(announce_secs);

        loop {
            select! {
                r = listener.accept() => {
                    match r {
                        Ok((socket, addr)) => {
                            let Ok(permit) = self.upload_permits.clone().try_acquire_owned() else {
                                debug!("{addr} refused, too many incoming peers");
                                continue;
                            };
                            let ctx = self.ctx.clone();

                            self.peers.spawn(async move {
                                if let Err(e) = peer::accept_and_run(ctx, socket).await {
                                    debug!("{addr} {e}");
                                }
                                drop(permit);
                            });
                        }
                        Err(e) => error!("could not accept peer: {e}"),
                    }
                }
                Some(msg) = self.rx.recv() => {
                    match msg {
                        TorrentMsg::AddPeers(peers) => {
                            self.spawn_outbound_peers(peers);
                        }
                        TorrentMsg::PieceComplete(piece) => {
                            debug!("piece {piece} complete");

                            if !self.announced_complete && self.ctx.scheduler.is_complete().await {
                                info!("download complete");
                                self.announced_complete = true;
                                self.announce(Some(Event::Completed)).await;

                                if self.ctx.config.quit_after_complete {
                                    break;
                                }
                            }
                        }
                        TorrentMsg::PieceFailed(piece) => {
                            warn!("piece {piece} could not be downloaded");

                            if self.ctx.scheduler.is_finished().await {
                                let stats = self.ctx.scheduler.stats().await;
                                error!(
                                    "download finished with {} failed pieces",
                                    stats.failed
                                );
                            }
                        }
                        TorrentMsg::Quit => break,
                    }
                }
                _ = announce_interval.tick() => {
                    if let Some(res) = self.announce(None).await {
                        if res.interval != announce_secs {
                            announce_secs = res.interval;
                            announce_interval = Self::announce_interval(announce_secs);
                        }
                        self.spawn_outbound_peers(res.peers);
                    }
                }
                Some(r) = self.peers.join_next() => {
                    if let Err(e) = r {
                        if e.is_panic() {
                            error!("a peer task panicked: {e}");
                        }
                    }
                }
            }
        }

        drop(listener);
        self.shutdown().await;
        Ok(())
    }

    fn announce_interval(secs: u64) -> tokio::time::Interval {
        let period = Duration::from_secs(secs.max(30));
        interval_at(Instant::now() + period, period)
    }

    /// Close every connection, waiting at most `shutdown_grace` for them.
    async fn shutdown(&mut self) {
        info!("shutting down");
        let _ = self.ctx.br_tx.send(PeerBrMsg::Quit);

        let grace = self.ctx.config.shutdown_grace;

        // best effort
        let _ = timeout(grace, self.announce(Some(Event::Stopped))).await;

        let peers = &mut self.peers;
        let drained = timeout(grace, async {
            while peers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("connections did not close in time, aborting them");
            self.peers.abort_all();
        }
    }

    /// Connect to peers that were not dialed yet, at most `max_peers` per
    /// call. Connections wait for a download permit before connecting.
    fn spawn_outbound_peers(&mut self, peers: Vec<SocketAddr>) {
        let max = self.ctx.config.max_peers;

        let new: Vec<SocketAddr> = peers
            .into_iter()
            .filter(|addr| Some(*addr) != self.local_addr && !self.dialed.contains(addr))
            .take(max)
            .collect();

        if !new.is_empty() {
            info!("connecting to {} peers", new.len());
        }

        for addr in new {
            self.dialed.insert(addr);

            let ctx = self.ctx.clone();
            let permits = self.download_permits.clone();

            self.peers.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else { return };

                if let Err(e) = peer::connect_and_run(ctx, addr).await {
                    debug!("{addr} {e}");
                }
            });
        }
    }

    /// Announce to the trackers in order, until one answers.
    async fn announce(&self, event: Option<Event>) -> Option<AnnounceResponse> {
        let stats = self.ctx.scheduler.stats().await;

        let announce = Announce {
            info_hash: self.ctx.info_hash,
            peer_id: self.ctx.local_peer_id,
            port: self.local_addr.map(|a| a.port()).unwrap_or(self.ctx.config.listen.port()),
            uploaded: self.ctx.uploaded.load(Ordering::Relaxed),
            downloaded: stats.downloaded,
            left: stats.left,
            event,
        };

        for tracker in &self.trackers {
            match tracker.announce(&announce).await {
                Ok(res) => {
                    info!("{tracker} sent {} peers", res.peers.len());
                    return Some(res);
                }
                Err(e) => warn!("{tracker} announce failed: {e}"),
            }
        }
        None
    }
}
