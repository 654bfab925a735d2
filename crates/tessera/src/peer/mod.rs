//! A remote peer in the network that downloads and uploads data
mod request_manager;
pub mod session;
mod types;

// re-exports
pub use types::*;

use std::{net::SocketAddr, sync::atomic::Ordering, sync::Arc, time::Duration};

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    net::TcpStream,
    select,
    sync::broadcast::{self, error::RecvError},
    time::{interval, interval_at, timeout, Instant},
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, info, warn};

use crate::{
    bitfield::{Bitfield, TsrBitfield},
    error::Error,
    scheduler::BlockOutcome,
    tcp_wire::{Block, BlockInfo, Handshake, HandshakeCodec, Message, PeerCodec},
    torrent::{TorrentCtx, TorrentMsg},
};
use request_manager::RequestManager;
use session::{ConnectionState, CoreState};

/// Connect to `addr` and run the connection until it ends.
#[tracing::instrument(skip(ctx))]
pub async fn connect_and_run(ctx: Arc<TorrentCtx>, addr: SocketAddr) -> Result<(), Error> {
    debug!("{addr} connecting");

    let socket = timeout(ctx.config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::ConnectTimeout)??;

    let mut peer = Peer::handshake(ctx, socket, Direction::Outbound).await?;
    peer.run().await
}

/// Run a connection initiated by a remote.
#[tracing::instrument(skip_all)]
pub async fn accept_and_run(ctx: Arc<TorrentCtx>, socket: TcpStream) -> Result<(), Error> {
    let mut peer = Peer::handshake(ctx, socket, Direction::Inbound).await?;
    peer.run().await
}

/// A handshaked connection with a remote peer.
pub struct Peer {
    pub id: PeerId,
    pub remote_addr: SocketAddr,
    pub direction: Direction,
    pub state: CoreState,
    pub connection: ConnectionState,
    /// Pieces the remote has.
    pub pieces: Bitfield,
    ctx: Arc<TorrentCtx>,
    sink: SplitSink<Framed<TcpStream, PeerCodec>, Message>,
    stream: SplitStream<Framed<TcpStream, PeerCodec>>,
    br_rx: broadcast::Receiver<PeerBrMsg>,
    outgoing_requests: RequestManager,
}

impl Peer {
    /// Exchange handshakes, the side that connects sends first. Nothing
    /// else is ever sent on a connection whose handshake fails.
    pub async fn handshake(
        ctx: Arc<TorrentCtx>,
        socket: TcpStream,
        direction: Direction,
    ) -> Result<Self, Error> {
        let remote = socket.peer_addr()?;

        let (socket, peer_id) =
            timeout(ctx.config.handshake_timeout, Self::exchange_handshakes(&ctx, socket, direction))
                .await
                .map_err(|_| Error::HandshakeTimeout)??;

        info!("{remote} handshaked, peer id {peer_id}");

        // subscribe before reading the bitfield so no Have is lost
        let br_rx = ctx.br_tx.subscribe();
        let (sink, stream) = socket.split();

        Ok(Self {
            id: peer_id,
            remote_addr: remote,
            direction,
            state: CoreState::default(),
            connection: ConnectionState::Handshaking,
            pieces: Bitfield::from_piece(ctx.scheduler.info().pieces()),
            ctx,
            sink,
            stream,
            br_rx,
            outgoing_requests: RequestManager::new(),
        })
    }

    async fn exchange_handshakes(
        ctx: &TorrentCtx,
        socket: TcpStream,
        direction: Direction,
    ) -> Result<(Framed<TcpStream, PeerCodec>, PeerId), Error> {
        let remote = socket.peer_addr()?;
        let mut socket = Framed::new(socket, HandshakeCodec);

        let our_handshake = Handshake::new(ctx.info_hash, ctx.local_peer_id);

        // if we are connecting, send the first handshake
        if direction == Direction::Outbound {
            debug!("{remote} sending the first handshake");
            socket.send(our_handshake.clone()).await?;
        }

        // wait for, and validate, their handshake
        let their_handshake = match socket.next().await {
            Some(handshake) => handshake?,
            None => {
                warn!("{remote} did not send a handshake");
                return Err(Error::PeerClosedSocket);
            }
        };
        their_handshake.validate(&our_handshake)?;

        // if inbound, we have already received their handshake,
        // send ours now that it is known to be valid
        if direction == Direction::Inbound {
            debug!("{remote} sending the second handshake");
            socket.send(our_handshake).await?;
        }

        let old_parts = socket.into_parts();
        let mut new_parts = FramedParts::new(old_parts.io, PeerCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;

        Ok((Framed::from_parts(new_parts), their_handshake.peer_id))
    }

    /// Start the event loop of the Peer, listen to messages sent by others
    /// on the peer wire protocol. Our requests still outstanding when the
    /// loop ends are released back to the scheduler.
    pub async fn run(&mut self) -> Result<(), Error> {
        self.connection = ConnectionState::Active;

        let r = self.event_loop().await;

        self.free_pending_blocks().await;
        self.connection = ConnectionState::Closed;

        match &r {
            Ok(_) => debug!("{} closed", self.remote_addr),
            Err(e) => debug!("{} closed: {e}", self.remote_addr),
        }
        r
    }

    async fn event_loop(&mut self) -> Result<(), Error> {
        let remote = self.remote_addr;

        // send message to keep the connection alive
        let mut keep_alive_interval = interval_at(
            Instant::now() + Duration::from_secs(120),
            Duration::from_secs(120),
        );

        // drop timed out requests and request again
        let mut request_timeout_interval = interval(Duration::from_secs(5));

        let bitfield = self.ctx.scheduler.bitfield().await;
        if bitfield.any() {
            debug!("{remote} sending bitfield");
            self.sink.send(Message::Bitfield(bitfield)).await?;
        }

        loop {
            select! {
                msg = self.stream.next() => {
                    match msg {
                        Some(msg) => self.handle_msg(msg?).await?,
                        None => return Err(Error::PeerClosedSocket),
                    }
                }
                msg = self.br_rx.recv() => {
                    match msg {
                        Ok(PeerBrMsg::HavePiece(piece)) => {
                            // send Have to this peer if he doesnt have this piece
                            if !self.pieces.has(piece) {
                                debug!("{remote} sending have {piece}");
                                self.sink.send(Message::Have(piece)).await?;
                            }
                            self.update_interest().await?;
                        }
                        Ok(PeerBrMsg::Quit) | Err(RecvError::Closed) => {
                            debug!("{remote} quit");
                            return Ok(());
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!("{remote} missed {n} broadcast messages");
                        }
                    }
                }
                _ = keep_alive_interval.tick() => {
                    self.sink.send(Message::KeepAlive).await?;
                }
                _ = request_timeout_interval.tick() => {
                    let timed_out = self.outgoing_requests.take_timed_out(Instant::now());
                    if !timed_out.is_empty() {
                        debug!("{remote} {} requests timed out", timed_out.len());
                        self.ctx.scheduler.release(&timed_out).await;
                        self.request_blocks().await?;
                    }
                }
            }
        }
    }

    /// Apply the effects of a message received from the remote.
    pub async fn handle_msg(&mut self, msg: Message) -> Result<(), Error> {
        let remote = self.remote_addr;

        match msg {
            Message::KeepAlive => {
                debug!("{remote} keep alive");
            }
            Message::Choke => {
                debug!("{remote} choked us");
                self.state.peer_choking = true;
                self.free_pending_blocks().await;
            }
            Message::Unchoke => {
                debug!("{remote} unchoked us");
                self.state.peer_choking = false;
                self.request_blocks().await?;
            }
            Message::Interested => {
                debug!("{remote} is interested");
                self.state.peer_interested = true;

                if self.state.am_choking {
                    debug!("{remote} sending unchoke");
                    self.state.am_choking = false;
                    self.sink.send(Message::Unchoke).await?;
                }
            }
            Message::NotInterested => {
                debug!("{remote} is not interested");
                self.state.peer_interested = false;
            }
            Message::Have(piece) => {
                debug!("{remote} has piece {piece}");
                if !self.pieces.safe_set(piece) {
                    debug!("{remote} sent have of a piece out of range");
                }
                self.update_interest().await?;
            }
            Message::Bitfield(bitfield) => {
                self.pieces = Bitfield::from_wire(bitfield.into_vec(), self.pieces.len());
                debug!("{remote} has {} pieces", self.pieces.count_ones());
                self.update_interest().await?;
            }
            Message::Request(block_info) => {
                self.handle_request_msg(block_info).await?;
            }
            Message::Piece(block) => {
                self.handle_piece_msg(block).await?;
            }
            Message::Cancel(block_info) => {
                // requests are answered as they arrive, there is no queue
                // to cancel from
                debug!("{remote} cancel {block_info:?}");
            }
        }
        Ok(())
    }

    /// Serve a block of a verified piece if we are not choking the remote.
    async fn handle_request_msg(&mut self, block_info: BlockInfo) -> Result<(), Error> {
        let remote = self.remote_addr;

        if self.state.am_choking {
            debug!("{remote} requested while choked, ignoring");
            return Ok(());
        }

        match self.ctx.scheduler.read_block(&block_info).await {
            Ok(block) => {
                let len = block.len() as u64;
                self.sink
                    .send(Message::Piece(Block {
                        index: block_info.index as usize,
                        begin: block_info.begin,
                        block,
                    }))
                    .await?;
                self.ctx.uploaded.fetch_add(len, Ordering::Relaxed);
            }
            Err(e) => {
                debug!("{remote} ignoring request {block_info:?}: {e}");
            }
        }
        Ok(())
    }

    /// Handle a new Piece msg from the peer, a Piece msg actually sends
    /// a block, and not a piece.
    async fn handle_piece_msg(&mut self, block: Block) -> Result<(), Error> {
        let remote = self.remote_addr;

        let block_info = BlockInfo::from(&block);

        if !self.outgoing_requests.remove_request(&block_info) {
            debug!("{remote} sent a block we did not request {block_info:?}");
        }

        match self.ctx.scheduler.on_block_received(block).await? {
            BlockOutcome::PieceComplete(piece) => {
                info!("{remote} downloaded piece {piece}");
                let _ = self.ctx.br_tx.send(PeerBrMsg::HavePiece(piece));
                let _ = self.ctx.tx.send(TorrentMsg::PieceComplete(piece)).await;
            }
            BlockOutcome::PieceFailed(piece) => {
                let _ = self.ctx.tx.send(TorrentMsg::PieceFailed(piece)).await;
                self.update_interest().await?;
            }
            BlockOutcome::Duplicate | BlockOutcome::Ignored => {
                debug!("{remote} block not used {block_info:?}");
            }
            BlockOutcome::Accepted | BlockOutcome::PieceCorrupted(_) => {}
        }

        self.request_blocks().await
    }

    /// Send interested or not interested when our interest in the remote
    /// changes: we are interested while the remote has a piece we still
    /// want.
    async fn update_interest(&mut self) -> Result<(), Error> {
        let remote = self.remote_addr;
        let should_be_interested = self.ctx.scheduler.is_interesting(&self.pieces).await;

        if should_be_interested && !self.state.am_interested {
            info!("{remote} sending interested");
            self.state.am_interested = true;
            self.sink.send(Message::Interested).await?;
        }

        // sorry, you're not the problem, it's me.
        if !should_be_interested && self.state.am_interested {
            info!("{remote} sending not interested");
            self.state.am_interested = false;
            self.sink.send(Message::NotInterested).await?;
        }

        self.request_blocks().await
    }

    /// Fill the pipeline of outstanding requests, if the remote is not
    /// choking us and we are interested.
    async fn request_blocks(&mut self) -> Result<(), Error> {
        if !self.state.can_request() {
            return Ok(());
        }

        let deadline = Instant::now() + self.ctx.config.request_timeout;

        while self.outgoing_requests.len() < self.ctx.config.request_queue_len {
            let Some(block_info) = self.ctx.scheduler.next_block(&self.pieces).await else {
                break;
            };
            self.outgoing_requests.add_request(block_info.clone(), deadline);
            self.sink.send(Message::Request(block_info)).await?;
        }
        Ok(())
    }

    /// Take outgoing block infos that are in queue and send them back
    /// to the scheduler so that other peers can request those blocks.
    async fn free_pending_blocks(&mut self) {
        let blocks = self.outgoing_requests.drain();

        if !blocks.is_empty() {
            debug!("{} freeing {} blocks", self.remote_addr, blocks.len());
            self.ctx.scheduler.release(&blocks).await;
        }
    }
}
