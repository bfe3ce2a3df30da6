use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::config::DownloadConfig;
use crate::peer::Peer;
use crate::peer::error::PeerError;
use crate::peer::piece::PieceResult;
use crate::peer::state::WorkQueue;
use crate::peer::worker::PeerWorker;
use crate::torrent::Torrent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DownloadError {
    #[error("insufficient peers to complete download ({completed}/{total} pieces)")]
    InsufficientPeers { completed: usize, total: usize },

    #[error("download timed out ({completed}/{total} pieces)")]
    TimedOut { completed: usize, total: usize },
}

/// Fans a torrent's pieces out over one worker per peer and assembles the
/// verified results.
pub struct BitTorrentClient {
    torrent: Arc<Torrent>,
    config: DownloadConfig,
}

impl BitTorrentClient {
    pub fn new(torrent: Torrent, config: DownloadConfig) -> Self {
        Self {
            torrent: Arc::new(torrent),
            config,
        }
    }

    pub fn torrent(&self) -> &Torrent {
        &self.torrent
    }

    /// Downloads the whole file and returns it.
    ///
    /// Returns once every piece is in, every worker has given up, or the
    /// configured overall deadline passes. Every connection is closed before
    /// this returns.
    pub async fn download(&self) -> Result<Vec<u8>, DownloadError> {
        let total = self.torrent.piece_count();
        info!(
            name = %self.torrent.name,
            pieces = total,
            peers = self.torrent.peers.len(),
            "starting download"
        );

        let queue = Arc::new(WorkQueue::new(self.torrent.piece_work()));
        let (tx, mut rx) = mpsc::channel::<PieceResult>(self.torrent.peers.len().max(1));

        let mut workers = JoinSet::new();
        for &peer in &self.torrent.peers {
            let worker = PeerWorker::new(
                peer,
                self.torrent.clone(),
                self.config,
                queue.clone(),
                tx.clone(),
            );
            workers.spawn(async move { (peer, worker.run().await) });
        }
        // Only workers hold senders now, so `recv` yields `None` once all exit.
        drop(tx);

        let deadline = self.config.download_timeout.map(|d| Instant::now() + d);
        let mut buf = vec![0u8; self.torrent.length as usize];
        let mut done = vec![false; total];
        let mut completed = 0;

        let outcome = loop {
            if completed == total {
                break Ok(());
            }

            let next = match deadline {
                Some(deadline) => match timeout_at(deadline, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => break Err(DownloadError::TimedOut { completed, total }),
                },
                None => rx.recv().await,
            };
            let Some(result) = next else {
                break Err(DownloadError::InsufficientPeers { completed, total });
            };

            let index = result.index as usize;
            if done.get(index).copied() != Some(false) {
                debug!(piece = result.index, "ignoring duplicate piece");
                continue;
            }
            let (begin, end) = self.torrent.piece_bounds(result.index);
            if result.data.len() != end - begin {
                warn!(
                    piece = result.index,
                    len = result.data.len(),
                    "ignoring piece of wrong size"
                );
                continue;
            }

            buf[begin..end].copy_from_slice(&result.data);
            done[index] = true;
            completed += 1;

            while let Some(joined) = workers.try_join_next() {
                log_worker_exit(joined);
            }
            let percent = completed as f64 / total as f64 * 100.0;
            info!(
                piece = result.index,
                progress = %format_args!("{percent:.2}%"),
                workers = workers.len(),
                "downloaded piece"
            );
        };

        queue.close().await;
        workers.shutdown().await;

        match &outcome {
            Ok(()) => info!(bytes = buf.len(), "download complete"),
            Err(e) => warn!(error = %e, "download failed"),
        }
        outcome.map(|()| buf)
    }
}

fn log_worker_exit(joined: Result<(Peer, Result<(), PeerError>), JoinError>) {
    match joined {
        Ok((peer, Ok(()))) => debug!(peer = %peer, "worker finished"),
        Ok((peer, Err(e))) => debug!(peer = %peer, error = %e, "worker dropped peer"),
        Err(e) => warn!(error = %e, "worker task failed"),
    }
}

/// Downloads `torrent` with the default configuration.
pub async fn download(torrent: Torrent) -> Result<Vec<u8>, DownloadError> {
    BitTorrentClient::new(torrent, DownloadConfig::default())
        .download()
        .await
}
