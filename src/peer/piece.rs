use std::collections::HashSet;

use sha1::{Digest, Sha1};

use crate::peer::error::PeerError;
use crate::peer::message::Message;

/// Largest block requested in one `Request`.
pub const MAX_BLOCK_SIZE: u32 = 16384;
/// Most unanswered requests kept in flight for one piece.
pub const MAX_BACKLOG: usize = 5;

/// One piece to fetch: its index, expected digest and true byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceWork {
    pub index: u32,
    pub hash: [u8; 20],
    pub length: u32,
}

/// A piece whose buffer already matched its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceResult {
    pub index: u32,
    pub data: Vec<u8>,
}

/// Progress of a single attempt at one piece.
#[derive(Debug)]
pub struct PieceProgress {
    pub index: u32,
    buf: Vec<u8>,
    received: HashSet<u32>,
    pub downloaded: usize,
    pub requested: usize,
    pub backlog: usize,
}

impl PieceProgress {
    pub fn new(work: &PieceWork) -> Self {
        Self {
            index: work.index,
            buf: vec![0; work.length as usize],
            received: HashSet::new(),
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }

    /// Next `(begin, length)` to request, or `None` when the window is full
    /// or everything has been requested.
    pub fn next_request(&self) -> Option<(u32, u32)> {
        if self.backlog >= MAX_BACKLOG || self.requested >= self.buf.len() {
            return None;
        }
        let remaining = self.buf.len() - self.requested;
        let length = remaining.min(MAX_BLOCK_SIZE as usize);
        Some((self.requested as u32, length as u32))
    }

    pub fn mark_requested(&mut self, length: u32) {
        self.requested += length as usize;
        self.backlog += 1;
    }

    /// Copies a `Piece` block into the buffer and returns its size.
    ///
    /// `Ok(None)` means the block was dropped: it repeats an offset already
    /// filled or answers nothing requested in this attempt.
    pub fn apply_block(&mut self, message: &Message) -> Result<Option<usize>, PeerError> {
        if message.piece_index() == Some(self.index) {
            if let Some(begin) = message.piece_begin() {
                let offset = begin as usize;
                if offset < self.buf.len()
                    && (offset >= self.requested || self.received.contains(&begin))
                {
                    return Ok(None);
                }
            }
        }

        let n = message.parse_piece(self.index, &mut self.buf)?;
        if let Some(begin) = message.piece_begin() {
            self.received.insert(begin);
        }
        self.downloaded += n;
        self.backlog = self.backlog.saturating_sub(1);
        Ok(Some(n))
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.buf.len()
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }
}

/// Whether `buf` hashes to `expected`.
pub fn verify(buf: &[u8], expected: &[u8; 20]) -> bool {
    Sha1::digest(buf).as_slice() == expected
}
