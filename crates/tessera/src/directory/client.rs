use std::{net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, time::timeout};
use tokio_util::codec::Framed;
use tracing::debug;

use super::{FileListing, Request};
use crate::{
    bencode::{BencodeCodec, Value},
    error::Error,
    tracker::{Announce, AnnounceResponse},
};

const TIMEOUT: Duration = Duration::from_secs(30);

/// Client of a [`super::DirectoryServer`], one connection per request.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    addr: String,
}

impl DirectoryClient {
    /// `addr` is `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send a request and wait for its reply. A reply with an `error` key
    /// is returned as [`Error::Directory`].
    pub async fn request(&self, request: &Request) -> Result<Value, Error> {
        let exchange = async {
            let socket = TcpStream::connect(&self.addr).await?;
            let mut socket = Framed::new(socket, BencodeCodec);

            socket.send(&request.to_value()).await?;

            let reply = socket.next().await.ok_or(Error::DirectoryNoResponse)??;
            Ok::<Value, Error>(reply)
        };

        let reply = timeout(TIMEOUT, exchange)
            .await
            .map_err(|_| Error::DirectoryNoResponse)??;

        if let Some(error) = reply.get("error") {
            let message = error.as_str().unwrap_or("unknown error");
            return Err(Error::Directory(message.to_owned()));
        }
        Ok(reply)
    }

    pub async fn upload(&self, request: &Request) -> Result<(), Error> {
        let reply = self.request(request).await?;
        debug!("upload status {:?}", reply.get("status"));
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<FileListing>, Error> {
        let reply = self.request(&Request::List).await?;

        reply
            .get("files")
            .and_then(Value::as_list)
            .unwrap_or_default()
            .iter()
            .map(FileListing::from_value)
            .collect()
    }

    pub async fn announce(&self, announce: &Announce) -> Result<AnnounceResponse, Error> {
        let request = Request::Announce {
            info_hash: announce.info_hash,
            peer_id: announce.peer_id,
            port: announce.port,
            uploaded: announce.uploaded,
            downloaded: announce.downloaded,
            left: announce.left,
        };

        let reply = self.request(&request).await?;

        let interval = reply.int_field("interval")?.max(0) as u64;
        let peers = reply
            .get("peers")
            .and_then(Value::as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(|peer| {
                let ip = peer.get("ip")?.as_str()?.parse().ok()?;
                let port = u16::try_from(peer.get("port")?.as_int()?).ok()?;
                Some(SocketAddr::new(ip, port))
            })
            .collect();

        Ok(AnnounceResponse { interval, peers })
    }
}
