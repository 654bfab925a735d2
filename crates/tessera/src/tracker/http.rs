use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use reqwest::Client;
use tracing::{debug, warn};

use super::{Announce, AnnounceResponse};
use crate::{bencode, error::Error};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    pub fn new(url: &str) -> Result<Self, Error> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::TrackerUrlInvalid(url.to_owned()));
        }

        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self { client, url: url.to_owned() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The announce url with every query parameter, the binary ids are
    /// percent encoded byte by byte.
    pub fn announce_url(&self, announce: &Announce) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };

        let mut url = format!(
            "{}{separator}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            self.url,
            urlencoding::encode_binary(&announce.info_hash.0),
            urlencoding::encode_binary(&announce.peer_id.0),
            announce.port,
            announce.uploaded,
            announce.downloaded,
            announce.left,
        );

        if let Some(event) = announce.event {
            url.push_str("&event=");
            url.push_str(event.as_str());
        }
        url
    }

    pub async fn announce(&self, announce: &Announce) -> Result<AnnounceResponse, Error> {
        let url = self.announce_url(announce);
        debug!("announcing to {url}");

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;

        parse_response(&bytes)
    }
}

/// Parse the bencoded body of an announce response. Peers may come in the
/// compact form, 6 bytes per peer, or as a list of dictionaries.
pub fn parse_response(buf: &[u8]) -> Result<AnnounceResponse, Error> {
    let value = bencode::decode(buf)?;

    if let Some(reason) = value.get("failure reason") {
        let reason = reason.as_str().unwrap_or("unknown failure");
        return Err(Error::Tracker(reason.to_owned()));
    }
    if let Some(warning) = value.get("warning message").and_then(|w| w.as_str()) {
        warn!("tracker warning: {warning}");
    }

    let interval = value.int_field("interval")?.max(0) as u64;

    let peers = match value.get("peers") {
        None => Vec::new(),
        Some(peers) => {
            if let Some(compact) = peers.as_bytes() {
                compact
                    .chunks_exact(6)
                    .map(|c| {
                        let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
                        let port = u16::from_be_bytes([c[4], c[5]]);
                        SocketAddr::new(IpAddr::V4(ip), port)
                    })
                    .collect()
            } else {
                peers
                    .as_list()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|peer| {
                        let ip: IpAddr = peer.get("ip")?.as_str()?.parse().ok()?;
                        let port = u16::try_from(peer.get("port")?.as_int()?).ok()?;
                        Some(SocketAddr::new(ip, port))
                    })
                    .collect()
            }
        }
    };

    Ok(AnnounceResponse { interval, peers })
}
