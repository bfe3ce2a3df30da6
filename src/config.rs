use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
const BITFIELD_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const PIECE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_PEER_STRIKES: usize = 5;

/// Deadlines and retry limits for a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadConfig {
    pub connect_timeout: Duration,
    /// Covers the whole handshake round trip.
    pub handshake_timeout: Duration,
    pub bitfield_timeout: Duration,
    pub write_timeout: Duration,
    /// Deadline for one attempt at one piece; expiry re-queues the piece.
    pub piece_timeout: Duration,
    /// Consecutive failed pieces (bad hash or timeout) before a peer is dropped.
    pub max_peer_strikes: usize,
    /// Overall deadline. `None` waits as long as some worker is alive.
    pub download_timeout: Option<Duration>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            bitfield_timeout: BITFIELD_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            piece_timeout: PIECE_TIMEOUT,
            max_peer_strikes: MAX_PEER_STRIKES,
            download_timeout: None,
        }
    }
}
