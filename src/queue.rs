use async_channel::{Receiver, Sender, TrySendError};
use tracing::error;

use crate::{error::DownloadError, piece::PieceWork};

/// Outstanding pieces, shared by every worker.
///
/// The capacity equals the number of pieces and each `PieceWork` exists
/// exactly once, owned either by the queue or by a single worker. The queue
/// therefore can never be full when a worker hands an item back, and a
/// requeue never waits.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: Sender<PieceWork>,
    rx: Receiver<PieceWork>,
}

impl WorkQueue {
    /// Builds a queue holding every item of `work`.
    pub fn seeded(work: Vec<PieceWork>) -> Result<Self, DownloadError> {
        let (tx, rx) = async_channel::bounded(work.len().max(1));
        for pw in work {
            tx.try_send(pw)
                .map_err(|e| DownloadError::Queue(e.into_inner().index))?;
        }
        Ok(Self { tx, rx })
    }

    /// Waits for the next item. `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<PieceWork> {
        self.rx.recv().await.ok()
    }

    /// Hands an item back to the pool.
    pub fn requeue(&self, pw: PieceWork) {
        match self.tx.try_send(pw) {
            Ok(()) => {}
            Err(TrySendError::Closed(pw)) => {
                // only happens after every piece has been collected
                error!(piece = pw.index, "Work queue closed, dropping piece");
            }
            Err(TrySendError::Full(pw)) => {
                error!(piece = pw.index, "Work queue full, piece ownership duplicated");
            }
        }
    }

    /// Wakes every waiting worker; they observe `None` once drained.
    pub fn close(&self) {
        self.tx.close();
    }

    /// Items currently waiting; pieces held by workers are not counted.
    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }
}
