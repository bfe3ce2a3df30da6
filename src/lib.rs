pub mod bencode_parser;
pub mod config;
pub mod peer;
pub mod torrent;
pub mod tracker;

// Re-export commonly used types and functions for easier access
pub use bencode_parser::parser::{Value, parse};
pub use config::DownloadConfig;
pub use peer::Peer;
pub use peer::client::{BitTorrentClient, DownloadError, download};
pub use torrent::{Metainfo, Torrent, TorrentError, parse_torrent_bytes, parse_torrent_file};
pub use tracker::{AnnounceResponse, TrackerError, announce, generate_peer_id};
