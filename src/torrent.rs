use std::{fs, path::Path};

use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::bencode_parser::errors::BencodeError;
use crate::bencode_parser::parser::{Value, parse};
use crate::peer::Peer;
use crate::peer::piece::PieceWork;

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("failed to read torrent file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bencode: {0}")]
    Bencode(#[from] BencodeError),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{0}'")]
    InvalidField(&'static str),

    #[error("multi-file torrents are not supported")]
    MultiFile,

    #[error("piece hashes must be a multiple of 20 bytes, got {0}")]
    InvalidPieceHashes(usize),

    #[error("piece length must be positive")]
    ZeroPieceLength,

    #[error("expected {expected} piece hashes, got {actual}")]
    PieceCountMismatch { expected: usize, actual: usize },

    #[error("no peers to download from")]
    NoPeers,
}

/// The single-file subset of a `.torrent` file that a download needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metainfo {
    pub announce: String,
    pub name: String,
    pub length: u64,
    pub piece_length: u32,
    pub pieces: Vec<[u8; 20]>,
    /// SHA-1 of the encoded `info` dictionary.
    pub infohash: [u8; 20],
}

fn get<'v, 'a>(dict: &'v Value<'a>, key: &'static str) -> Result<&'v Value<'a>, TorrentError> {
    dict.get(key.as_bytes())
        .ok_or(TorrentError::MissingField(key))
}

fn get_str<'a>(dict: &Value<'a>, key: &'static str) -> Result<String, TorrentError> {
    get(dict, key)?
        .as_str()
        .map(str::to_string)
        .ok_or(TorrentError::InvalidField(key))
}

fn get_int(dict: &Value<'_>, key: &'static str) -> Result<i64, TorrentError> {
    get(dict, key)?
        .as_integer()
        .ok_or(TorrentError::InvalidField(key))
}

/// Parse torrent from file path
pub fn parse_torrent_file(path: impl AsRef<Path>) -> Result<Metainfo, TorrentError> {
    let data = fs::read(path)?;
    parse_torrent_bytes(&data)
}

/// Parse torrent from byte slice
pub fn parse_torrent_bytes(data: &[u8]) -> Result<Metainfo, TorrentError> {
    let root = parse(data)?;
    if !matches!(root, Value::Dictionary { .. }) {
        return Err(TorrentError::InvalidField("root"));
    }

    let announce = get_str(&root, "announce")?;
    let info = get(&root, "info")?;
    let Value::Dictionary { raw, .. } = info else {
        return Err(TorrentError::InvalidField("info"));
    };
    let infohash: [u8; 20] = Sha1::digest(raw).into();

    if info.get(b"files").is_some() {
        return Err(TorrentError::MultiFile);
    }

    let name = get_str(info, "name")?;
    let length =
        u64::try_from(get_int(info, "length")?).map_err(|_| TorrentError::InvalidField("length"))?;
    let piece_length = u32::try_from(get_int(info, "piece length")?)
        .map_err(|_| TorrentError::InvalidField("piece length"))?;

    let hashes = get(info, "pieces")?
        .as_bytes()
        .ok_or(TorrentError::InvalidField("pieces"))?;
    if hashes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPieceHashes(hashes.len()));
    }
    let pieces = hashes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect();

    Ok(Metainfo {
        announce,
        name,
        length,
        piece_length,
        pieces,
        infohash,
    })
}

impl Metainfo {
    pub fn into_torrent(self, peer_id: [u8; 20], peers: Vec<Peer>) -> Result<Torrent, TorrentError> {
        Torrent::new(
            self.name,
            self.length,
            self.piece_length,
            self.pieces,
            self.infohash,
            peer_id,
            peers,
        )
    }
}

/// Everything the download core needs, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torrent {
    pub name: String,
    pub length: u64,
    pub piece_length: u32,
    pub pieces: Vec<[u8; 20]>,
    pub infohash: [u8; 20],
    pub peer_id: [u8; 20],
    pub peers: Vec<Peer>,
}

impl Torrent {
    pub fn new(
        name: String,
        length: u64,
        piece_length: u32,
        pieces: Vec<[u8; 20]>,
        infohash: [u8; 20],
        peer_id: [u8; 20],
        peers: Vec<Peer>,
    ) -> Result<Self, TorrentError> {
        if piece_length == 0 {
            return Err(TorrentError::ZeroPieceLength);
        }
        let expected = length.div_ceil(piece_length as u64) as usize;
        if pieces.len() != expected {
            return Err(TorrentError::PieceCountMismatch {
                expected,
                actual: pieces.len(),
            });
        }
        if peers.is_empty() {
            return Err(TorrentError::NoPeers);
        }

        Ok(Self {
            name,
            length,
            piece_length,
            pieces,
            infohash,
            peer_id,
            peers,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Byte range `[begin, end)` of piece `index` in the output; the last
    /// piece is clamped to the total length.
    pub fn piece_bounds(&self, index: u32) -> (usize, usize) {
        let begin = index as u64 * self.piece_length as u64;
        let end = (begin + self.piece_length as u64).min(self.length);
        (begin.min(self.length) as usize, end as usize)
    }

    pub fn piece_size(&self, index: u32) -> u32 {
        let (begin, end) = self.piece_bounds(index);
        (end - begin) as u32
    }

    /// One work item per piece, in ascending index order.
    pub fn piece_work(&self) -> Vec<PieceWork> {
        self.pieces
            .iter()
            .enumerate()
            .map(|(i, hash)| PieceWork {
                index: i as u32,
                hash: *hash,
                length: self.piece_size(i as u32),
            })
            .collect()
    }
}
