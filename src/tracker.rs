use percent_encoding::{NON_ALPHANUMERIC, percent_encode};
use reqwest::Client;
use serde::Deserialize;
use serde_bencode::value::Value;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::{error::ApplicationError, peer::Peer, torrent::Torrent};

const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);

/// Handles communication with an HTTP BitTorrent tracker
pub struct Tracker {
    pub peer_id: [u8; 20],
    pub port:    u16,
}

/// Represents the response returned by a tracker announce request
#[derive(Debug, Deserialize)]
pub struct AnnounceResponse {
    #[serde(rename = "failure reason")]
    pub failure:    Option<String>,
    pub interval:   Option<i64>,
    #[serde(rename = "peers")]
    pub peers_data: Option<Value>,
}

impl AnnounceResponse {
    /// Extracts peers from either the compact 6-byte-per-peer string or the
    /// list-of-dictionaries form.
    pub fn peers(&self) -> Vec<Peer> {
        match &self.peers_data {
            Some(Value::Bytes(data)) => data
                .chunks_exact(6)
                .map(|chunk| Peer {
                    ip:   IpAddr::V4(Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3])),
                    port: u16::from_be_bytes([chunk[4], chunk[5]]),
                })
                .collect(),
            Some(Value::List(list)) => list.iter().filter_map(dict_peer).collect(),
            _ => Vec::new(),
        }
    }
}

fn dict_peer(item: &Value) -> Option<Peer> {
    let Value::Dict(dict) = item else {
        return None;
    };

    let ip = match dict.get(b"ip".as_slice())? {
        Value::Bytes(b) => std::str::from_utf8(b).ok()?.parse::<IpAddr>().ok()?,
        _ => return None,
    };
    let port = match dict.get(b"port".as_slice())? {
        Value::Int(n) => u16::try_from(*n).ok()?,
        _ => return None,
    };

    Some(Peer { ip, port })
}

impl Tracker {
    pub fn new(peer_id: [u8; 20], port: u16) -> Self {
        Self { peer_id, port }
    }

    /// Builds the announce URL. The binary query values are percent-encoded
    /// by hand because `Url` only accepts UTF-8 query pairs.
    pub fn announce_url(&self, torrent: &Torrent) -> Result<String, ApplicationError> {
        let base_url = Url::parse(&torrent.announce)
            .map_err(|e| ApplicationError::TrackerError(format!("{}", e)))?;

        let params = [
            ("info_hash",  percent_encode(&torrent.info_hash(), NON_ALPHANUMERIC).to_string()),
            ("peer_id",    percent_encode(&self.peer_id, NON_ALPHANUMERIC).to_string()),
            ("port",       self.port.to_string()),
            ("uploaded",   "0".to_string()),
            ("downloaded", "0".to_string()),
            ("left",       torrent.total_size().to_string()),
            ("compact",    "1".to_string()),
            ("event",      "started".to_string()),
        ];

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let sep = if base_url.query().is_some() { '&' } else { '?' };
        Ok(format!("{}{}{}", base_url, sep, query))
    }

    /// Sends an announce request to the tracker and returns the list of peers
    pub async fn announce(&self, torrent: &Torrent) -> Result<Vec<Peer>, ApplicationError> {
        let url = self.announce_url(torrent)?;
        debug!(%url, "Announcing");

        let client = Client::builder()
            .timeout(ANNOUNCE_TIMEOUT)
            .build()
            .map_err(tracker_err)?;
        let raw = client
            .get(&url)
            .send()
            .await
            .map_err(tracker_err)?
            .bytes()
            .await
            .map_err(tracker_err)?;

        let resp = Self::parse_response(&raw)?;
        let peers = resp.peers();
        info!(peers = peers.len(), interval = ?resp.interval, "Tracker answered");
        Ok(peers)
    }

    pub fn parse_response(raw: &[u8]) -> Result<AnnounceResponse, ApplicationError> {
        let resp: AnnounceResponse = serde_bencode::from_bytes(raw)
            .map_err(|e| ApplicationError::TrackerError(format!("{}", e)))?;

        if let Some(reason) = &resp.failure {
            return Err(ApplicationError::TrackerError(reason.clone()));
        }
        Ok(resp)
    }
}

fn tracker_err(e: reqwest::Error) -> ApplicationError {
    ApplicationError::TrackerError(e.to_string())
}
