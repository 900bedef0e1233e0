use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    attempt::attempt_download,
    backlog::Backlog,
    bitfield::Bitfield,
    config::Config,
    error::PeerError,
    peer::{Connection, Connector, Peer},
    piece::PieceResult,
    queue::WorkQueue,
};

/// Number of workers currently running. Only read for display.
#[derive(Debug, Clone, Default)]
pub struct ActiveWorkers(Arc<AtomicUsize>);

impl ActiveWorkers {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn enter(&self) -> ActiveGuard {
        self.0.fetch_add(1, Ordering::Relaxed);
        ActiveGuard(Arc::clone(&self.0))
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Pieces the aggregator has accepted, visible to every worker.
#[derive(Debug, Clone)]
pub struct Collected(Arc<[AtomicBool]>);

impl Collected {
    pub fn new(piece_count: usize) -> Self {
        Self((0..piece_count).map(|_| AtomicBool::new(false)).collect())
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.get(index).is_some_and(|done| done.load(Ordering::Acquire))
    }

    /// Marks `index` as accepted. Returns `false` if it already was, or if it
    /// is out of range.
    pub fn insert(&self, index: usize) -> bool {
        self.0
            .get(index)
            .is_some_and(|done| !done.swap(true, Ordering::AcqRel))
    }

    /// Whether `bitfield` advertises any piece not yet accepted.
    pub fn still_needs_any(&self, bitfield: &Bitfield) -> bool {
        (0..self.0.len()).any(|index| bitfield.has_piece(index) && !self.contains(index))
    }
}

/// Why a worker stopped.
#[derive(Debug)]
pub enum WorkerExit {
    /// The queue was closed and drained.
    QueueClosed,
    /// Connecting or the handshake failed.
    ConnectFailed(PeerError),
    /// The connection failed mid-download or while announcing.
    PeerFailed(PeerError),
    /// Nobody is collecting results any more.
    ResultsClosed,
    /// Every piece the peer advertises has already been collected.
    NothingToOffer,
}

/// Downloads pieces from a single peer until the queue runs dry or the
/// connection breaks.
pub struct Worker<C: Connector> {
    pub(crate) peer:      Peer,
    pub(crate) connector: Arc<C>,
    pub(crate) queue:     WorkQueue,
    pub(crate) results:   mpsc::Sender<PieceResult>,
    pub(crate) backlog:   Arc<Backlog>,
    pub(crate) active:    ActiveWorkers,
    pub(crate) collected: Collected,
    pub(crate) cfg:       Arc<Config>,
}

impl<C: Connector> Worker<C> {
    /// Runs the worker to completion. The connection is dropped, and with it
    /// the socket closed, on every return path.
    pub async fn run(self) -> WorkerExit {
        let _alive = self.active.enter();

        let mut conn = match self.connector.connect(&self.peer).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(peer = %self.peer, "Could not handshake: {}. Disconnecting", e);
                return WorkerExit::ConnectFailed(e);
            }
        };
        info!(peer = %self.peer, pieces = conn.bitfield().count(), "Completed handshake");

        // this client never chokes and is always interested
        if let Err(e) = conn.send_unchoke().await {
            warn!(peer = %self.peer, "Failed to send unchoke: {}", e);
            return WorkerExit::PeerFailed(e);
        }
        if let Err(e) = conn.send_interested().await {
            warn!(peer = %self.peer, "Failed to send interested: {}", e);
            return WorkerExit::PeerFailed(e);
        }

        let exit = self.serve(&mut conn).await;
        debug!(peer = %self.peer, ?exit, "Worker done");
        exit
    }

    async fn serve(&self, conn: &mut C::Conn) -> WorkerExit {
        let mut skipped = 0;

        while let Some(pw) = self.queue.pop().await {
            if !conn.bitfield().has_piece(pw.index) {
                self.queue.requeue(pw);
                skipped += 1;
                if skipped < self.queue.len() {
                    tokio::task::yield_now().await;
                    continue;
                }

                // a whole lap of the queue without a piece this peer has
                skipped = 0;
                if !self.collected.still_needs_any(conn.bitfield()) {
                    info!(peer = %self.peer, "Peer has no outstanding pieces");
                    return WorkerExit::NothingToOffer;
                }
                tokio::time::sleep(self.cfg.idle_backoff).await;
                continue;
            }
            skipped = 0;

            let buf = match attempt_download(conn, &pw, &self.backlog, &self.cfg).await {
                Ok(buf) => buf,
                Err(e) => {
                    warn!(peer = %self.peer, piece = pw.index, "Exiting: {}", e);
                    self.queue.requeue(pw);
                    return WorkerExit::PeerFailed(e);
                }
            };

            if let Err(e) = pw.check_integrity(&buf) {
                warn!(peer = %self.peer, "{}", e);
                self.queue.requeue(pw);
                continue;
            }

            if let Err(e) = conn.send_have(pw.index).await {
                warn!(peer = %self.peer, piece = pw.index, "Failed to send have: {}", e);
            }

            debug!(peer = %self.peer, piece = pw.index, "Downloaded piece");
            let result = PieceResult { index: pw.index, buf };
            if self.results.send(result).await.is_err() {
                return WorkerExit::ResultsClosed;
            }
        }

        WorkerExit::QueueClosed
    }
}
