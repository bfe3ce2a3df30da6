use std::net::Ipv4Addr;
use std::time::Duration;

use once_cell::sync::OnceCell;
use percent_encoding::{NON_ALPHANUMERIC, percent_encode};
use rand::Rng as _;
use rand::distr::Alphanumeric;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::bencode_parser::errors::BencodeError;
use crate::bencode_parser::parser::{Value, parse};
use crate::peer::Peer;
use crate::torrent::Metainfo;

pub const PEER_ID_PREFIX: &[u8; 8] = b"-RF0001-";
const TRACKER_TIMEOUT: Duration = Duration::from_secs(15);
const COMPACT_PEER_LEN: usize = 6;

static HTTP_CLIENT: OnceCell<Client> = OnceCell::new();

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid announce url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker responded with {0}")]
    Status(StatusCode),

    #[error("tracker refused announce: {0}")]
    Failure(String),

    #[error("malformed tracker response: {0}")]
    Bencode(#[from] BencodeError),

    #[error("tracker response missing '{0}'")]
    MissingField(&'static str),

    #[error("peer list of {len} bytes is not a multiple of 6")]
    CorruptPeerList { len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {
    /// Seconds the tracker wants between announces.
    pub interval: i64,
    pub peers: Vec<Peer>,
}

/// A fresh local peer id: the client prefix and 12 random alphanumerics.
pub fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(PEER_ID_PREFIX);
    let mut rng = rand::rng();
    for byte in &mut id[8..] {
        *byte = rng.sample(Alphanumeric);
    }
    id
}

fn http_client() -> Result<&'static Client, TrackerError> {
    let client = HTTP_CLIENT.get_or_try_init(|| {
        Client::builder()
            .user_agent(concat!("torrent_fetch/", env!("CARGO_PKG_VERSION")))
            .timeout(TRACKER_TIMEOUT)
            .build()
    })?;
    Ok(client)
}

fn encode_bytes(bytes: &[u8]) -> String {
    percent_encode(bytes, NON_ALPHANUMERIC).to_string()
}

fn build_tracker_url(meta: &Metainfo, peer_id: &[u8; 20], port: u16) -> Result<Url, TrackerError> {
    let mut url = Url::parse(&meta.announce)?;

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&compact=1&left={}",
        encode_bytes(&meta.infohash),
        encode_bytes(peer_id),
        port,
        meta.length
    );
    // Keep any query the announce url already carries.
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
        _ => query,
    };

    url.set_query(Some(&query));
    Ok(url)
}

/// Decodes a compact peer list: 4 address bytes and 2 port bytes per peer.
pub fn decode_peers(bytes: &[u8]) -> Result<Vec<Peer>, TrackerError> {
    if bytes.len() % COMPACT_PEER_LEN != 0 {
        return Err(TrackerError::CorruptPeerList { len: bytes.len() });
    }
    let peers = bytes
        .chunks_exact(COMPACT_PEER_LEN)
        .map(|chunk| Peer {
            ip_addr: Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
            port: u16::from_be_bytes([chunk[4], chunk[5]]),
        })
        .collect();
    Ok(peers)
}

pub fn parse_announce_response(body: &[u8]) -> Result<AnnounceResponse, TrackerError> {
    let root = parse(body)?;

    if let Some(reason) = root.get(b"failure reason") {
        let reason = reason.as_str().unwrap_or("<non-utf8 reason>");
        return Err(TrackerError::Failure(reason.to_string()));
    }

    let interval = root
        .get(b"interval")
        .and_then(Value::as_integer)
        .ok_or(TrackerError::MissingField("interval"))?;
    let peers = root
        .get(b"peers")
        .and_then(Value::as_bytes)
        .ok_or(TrackerError::MissingField("peers"))?;

    Ok(AnnounceResponse {
        interval,
        peers: decode_peers(peers)?,
    })
}

/// Announces to the torrent's tracker and returns the peers it hands out.
pub async fn announce(
    meta: &Metainfo,
    peer_id: &[u8; 20],
    port: u16,
) -> Result<AnnounceResponse, TrackerError> {
    let url = build_tracker_url(meta, peer_id, port)?;
    debug!(url = %url, "announcing");

    let response = http_client()?.get(url).send().await?;
    if !response.status().is_success() {
        return Err(TrackerError::Status(response.status()));
    }
    let body = response.bytes().await?;

    let announce = parse_announce_response(&body)?;
    info!(
        interval = announce.interval,
        peers = announce.peers.len(),
        "tracker answered"
    );
    Ok(announce)
}
