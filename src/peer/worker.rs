use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::DownloadConfig;
use crate::peer::Peer;
use crate::peer::connection::PeerConnection;
use crate::peer::error::PeerError;
use crate::peer::message::{Message, MessageId};
use crate::peer::piece::{PieceProgress, PieceResult, PieceWork, verify};
use crate::peer::state::WorkQueue;
use crate::torrent::Torrent;

/// Downloads pieces from one peer until the queue has nothing it can serve.
pub struct PeerWorker {
    peer: Peer,
    torrent: Arc<Torrent>,
    config: DownloadConfig,
    queue: Arc<WorkQueue>,
    results: mpsc::Sender<PieceResult>,
}

impl PeerWorker {
    pub fn new(
        peer: Peer,
        torrent: Arc<Torrent>,
        config: DownloadConfig,
        queue: Arc<WorkQueue>,
        results: mpsc::Sender<PieceResult>,
    ) -> Self {
        Self {
            peer,
            torrent,
            config,
            queue,
            results,
        }
    }

    /// Runs the worker to completion. Errors only describe why this peer was
    /// dropped; claimed work is always back in the queue by then.
    #[instrument(name = "peer", skip_all, fields(peer = %self.peer))]
    pub async fn run(self) -> Result<(), PeerError> {
        match self.work().await {
            Ok(()) => {
                debug!("no more work for this peer");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "dropping peer");
                Err(e)
            }
        }
    }

    async fn work(&self) -> Result<(), PeerError> {
        let mut conn = PeerConnection::connect(
            self.peer,
            self.torrent.infohash,
            self.torrent.peer_id,
            &self.config,
        )
        .await?;
        info!(pieces = conn.bitfield.count_ones(), "connected");

        conn.send_unchoke().await?;
        conn.send_interested().await?;
        self.await_unchoke(&mut conn).await?;

        let mut strikes = 0;
        // Pieces whose attempt on this connection timed out; their blocks may
        // still be on the wire.
        let mut abandoned = HashSet::new();

        loop {
            let bitfield = &conn.bitfield;
            let Some(work) = self
                .queue
                .claim(|index| bitfield.has_piece(index as usize))
                .await
            else {
                return Ok(());
            };

            let data = match self.download_piece(&mut conn, &work, &abandoned).await {
                Ok(Some(data)) if verify(&data, &work.hash) => data,
                Ok(Some(_)) => {
                    warn!(piece = work.index, "piece failed integrity check");
                    self.strike(work, &mut strikes).await?;
                    continue;
                }
                Ok(None) => {
                    warn!(piece = work.index, "piece timed out");
                    abandoned.insert(work.index);
                    self.strike(work, &mut strikes).await?;
                    continue;
                }
                Err(e) => {
                    debug!(piece = work.index, error = %e, "piece attempt aborted");
                    self.queue.release(work).await;
                    return Err(e);
                }
            };
            strikes = 0;

            debug!(piece = work.index, "piece verified");
            // A failed `Have` still lets the verified piece through.
            let announced = conn.send_have(work.index).await;
            let delivered = self
                .results
                .send(PieceResult {
                    index: work.index,
                    data,
                })
                .await;
            self.queue.complete().await;
            if delivered.is_err() {
                // Scheduler already has everything it wants.
                return Ok(());
            }
            announced?;
        }
    }

    /// Re-queues a piece after a recoverable failure and counts it against
    /// the peer.
    async fn strike(&self, work: PieceWork, strikes: &mut usize) -> Result<(), PeerError> {
        self.queue.release(work).await;
        *strikes += 1;
        if *strikes >= self.config.max_peer_strikes {
            return Err(PeerError::TooManyFailures(*strikes));
        }
        Ok(())
    }

    /// Reads until the peer unchokes us, picking up any `Have` on the way.
    async fn await_unchoke(&self, conn: &mut PeerConnection) -> Result<(), PeerError> {
        let deadline = Instant::now() + self.config.piece_timeout;
        while conn.choked {
            let message = match timeout_at(deadline, conn.receive_message()).await {
                Err(_) => return Err(PeerError::Timeout("unchoke")),
                Ok(Ok(Some(message))) => message,
                Ok(Ok(None)) | Ok(Err(PeerError::UnknownMessageId(_))) => continue,
                Ok(Err(e)) => return Err(e),
            };
            if message.kind == MessageId::Piece {
                trace!("dropping unrequested block");
                continue;
            }
            apply_control(conn, &message)?;
        }
        Ok(())
    }

    /// One attempt at one piece. `Ok(None)` means the piece deadline passed.
    ///
    /// Blocks for `abandoned` pieces are dropped; any other block for a piece
    /// we are not downloading is an error.
    async fn download_piece(
        &self,
        conn: &mut PeerConnection,
        work: &PieceWork,
        abandoned: &HashSet<u32>,
    ) -> Result<Option<Vec<u8>>, PeerError> {
        let deadline = Instant::now() + self.config.piece_timeout;
        let mut progress = PieceProgress::new(work);

        while !progress.is_complete() {
            if !conn.choked {
                while let Some((begin, length)) = progress.next_request() {
                    conn.send_request(work.index, begin, length).await?;
                    progress.mark_requested(length);
                }
            }

            let message = match timeout_at(deadline, conn.receive_message()).await {
                Err(_) => return Ok(None),
                Ok(Ok(Some(message))) => message,
                Ok(Ok(None)) => {
                    trace!("keep-alive");
                    continue;
                }
                Ok(Err(PeerError::UnknownMessageId(id))) => {
                    trace!(id, "ignoring unknown message");
                    continue;
                }
                Ok(Err(e)) => return Err(e),
            };

            if message.kind != MessageId::Piece {
                apply_control(conn, &message)?;
                continue;
            }
            match message.piece_index() {
                Some(index) if index != work.index && abandoned.contains(&index) => {
                    trace!(piece = index, "dropping late block");
                }
                _ => match progress.apply_block(&message)? {
                    Some(n) => trace!(piece = work.index, bytes = n, "block received"),
                    None => trace!(piece = work.index, "dropping duplicate block"),
                },
            }
        }

        Ok(Some(progress.into_buffer()))
    }
}

/// Applies a choke-state or availability message to the connection; other
/// kinds are ignored.
fn apply_control(conn: &mut PeerConnection, message: &Message) -> Result<(), PeerError> {
    match message.kind {
        MessageId::Unchoke => {
            trace!("unchoked");
            conn.choked = false;
        }
        MessageId::Choke => {
            trace!("choked");
            conn.choked = true;
        }
        MessageId::Have => {
            let index = message.parse_have()?;
            conn.bitfield.set_piece(index as usize);
        }
        _ => {}
    }
    Ok(())
}
