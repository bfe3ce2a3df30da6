use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::peer::piece::PieceWork;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PieceWork>,
    in_flight: usize,
    closed: bool,
}

/// Pieces still needed, shared by every peer worker.
///
/// An item is either pending or claimed by exactly one worker. A claimed item
/// goes back with [`WorkQueue::release`] or leaves for good with
/// [`WorkQueue::complete`].
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    changed: Notify,
}

impl WorkQueue {
    pub fn new(work: impl IntoIterator<Item = PieceWork>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: work.into_iter().collect(),
                ..QueueState::default()
            }),
            changed: Notify::new(),
        }
    }

    /// Claims the first pending item for which `has_piece` is true.
    ///
    /// Parks while other workers hold claims that may come back. Returns
    /// `None` once the queue is closed, or when nothing is claimable and no
    /// claim is outstanding anywhere.
    pub async fn claim(&self, has_piece: impl Fn(u32) -> bool) -> Option<PieceWork> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before inspecting so a wakeup between unlock and await is kept.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                if let Some(pos) = state.pending.iter().position(|w| has_piece(w.index)) {
                    let work = state.pending.remove(pos)?;
                    state.in_flight += 1;
                    return Some(work);
                }
                if state.in_flight == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Returns a claimed item to the back of the queue.
    pub async fn release(&self, work: PieceWork) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        if !state.closed {
            state.pending.push_back(work);
        }
        drop(state);
        self.changed.notify_waiters();
    }

    /// Drops a claim whose piece was delivered.
    pub async fn complete(&self) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.changed.notify_waiters();
    }

    /// Wakes every parked worker and makes further claims return `None`.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.pending.clear();
        drop(state);
        self.changed.notify_waiters();
    }

    /// Pending plus claimed items.
    pub async fn remaining(&self) -> usize {
        let state = self.state.lock().await;
        state.pending.len() + state.in_flight
    }
}
