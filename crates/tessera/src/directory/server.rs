use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
    sync::RwLock,
    task::JoinSet,
    time::timeout,
};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use super::{error_reply, FileEntry, PeerEntry, Registry, Request};
use crate::{
    bencode::{BencodeCodec, Value},
    error::Error,
};

/// How long a client has to send its request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The directory service. Each connection is served by its own task and
/// carries exactly one request.
#[derive(Debug)]
pub struct DirectoryServer {
    listener: TcpListener,
    registry: Arc<RwLock<Registry>>,
    interval: u64,
}

impl DirectoryServer {
    pub async fn bind(addr: impl ToSocketAddrs, interval: u64) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            registry: Arc::new(RwLock::new(Registry::new())),
            interval,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<RwLock<Registry>> {
        self.registry.clone()
    }

    /// Accept connections until `shutdown` resolves. Connections still
    /// being served at that point are aborted before returning.
    #[tracing::instrument(skip_all)]
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        info!("directory listening on {}", self.local_addr()?);

        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("directory shutting down");
                    connections.abort_all();
                    while connections.join_next().await.is_some() {}
                    return Ok(());
                }
                Some(r) = connections.join_next() => {
                    if let Err(e) = r {
                        if e.is_panic() {
                            error!("a directory connection panicked: {e}");
                        }
                    }
                }
                r = self.listener.accept() => {
                    let (socket, addr) = match r {
                        Ok(v) => v,
                        Err(e) => {
                            error!("could not accept connection: {e}");
                            continue;
                        }
                    };

                    let registry = self.registry.clone();
                    let interval = self.interval;

                    connections.spawn(async move {
                        if let Err(e) = Self::handle_connection(socket, addr, registry, interval).await {
                            debug!("{addr} {e}");
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(
        socket: TcpStream,
        addr: SocketAddr,
        registry: Arc<RwLock<Registry>>,
        interval: u64,
    ) -> Result<(), Error> {
        let mut socket = Framed::new(socket, BencodeCodec);

        let request = match timeout(REQUEST_TIMEOUT, socket.next()).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(_) => {
                debug!("{addr} did not send a request in time");
                return Ok(());
            }
        };

        let reply = match request {
            Ok(request) => handle_request(&registry, &request, addr, interval).await,
            Err(e) => {
                warn!("{addr} sent a malformed request: {e}");
                error_reply(&e.to_string())
            }
        };

        socket.send(&reply).await?;
        Ok(())
    }
}

/// Apply a request to the registry and build its reply. `addr` is the
/// address of the connection, whose ip is recorded for the peer.
pub async fn handle_request(
    registry: &RwLock<Registry>,
    request: &Value,
    addr: SocketAddr,
    interval: u64,
) -> Value {
    let request = match Request::from_value(request) {
        Ok(r) => r,
        Err(e) => {
            warn!("{addr} invalid request: {e}");
            return error_reply(&e.to_string());
        }
    };

    match request {
        Request::Upload { file_name, info_hash, file_size, peer_id, port } => {
            info!("{addr} uploaded {file_name} ({file_size} bytes) {info_hash}");

            let file = FileEntry { file_name, info_hash, file_size };
            let uploader = PeerEntry {
                peer_id,
                ip: addr.ip(),
                port,
                uploaded: 0,
                downloaded: 0,
                left: 0,
            };
            registry.write().await.upload(file, uploader);

            Value::dict().insert("status", "success")
        }
        Request::List => {
            let files = registry.read().await.list();
            let files: Vec<Value> = files.iter().map(|f| f.to_value()).collect();
            Value::dict().insert("files", files)
        }
        Request::Announce { info_hash, peer_id, port, uploaded, downloaded, left } => {
            debug!("{addr} announced {info_hash}, left {left}");

            let peer = PeerEntry { peer_id, ip: addr.ip(), port, uploaded, downloaded, left };
            let others = registry.write().await.announce(info_hash, peer);

            let peers: Vec<Value> = others
                .iter()
                .map(|p| {
                    Value::dict()
                        .insert("peer id", &p.peer_id.0[..])
                        .insert("ip", p.ip.to_string())
                        .insert("port", p.port)
                })
                .collect();

            Value::dict()
                .insert("interval", interval)
                .insert("peers", peers)
        }
    }
}
