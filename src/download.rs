use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinSet};
use tracing::{info, warn};

use crate::{
    backlog::Backlog,
    config::Config,
    error::DownloadError,
    peer::Connector,
    plan::DownloadPlan,
    queue::WorkQueue,
    worker::{ActiveWorkers, Collected, Worker},
};

/// Snapshot handed to the progress callback after each collected piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub done:           usize,
    pub total:          usize,
    pub index:          usize,
    pub active_workers: usize,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.done as f64 / self.total as f64
    }

    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }
}

type ProgressFn = Box<dyn FnMut(&Progress) + Send>;

/// Downloads a whole torrent into memory.
///
/// One worker is spawned per peer. Pieces come back in whatever order the
/// peers deliver them and are copied into place as they arrive.
pub struct Downloader<C: Connector> {
    plan:      DownloadPlan,
    connector: Arc<C>,
    cfg:       Config,
    progress:  Option<ProgressFn>,
}

impl<C: Connector> Downloader<C> {
    pub fn new(plan: DownloadPlan, connector: C) -> Self {
        Self {
            plan,
            connector: Arc::new(connector),
            cfg: Config::default(),
            progress: None,
        }
    }

    pub fn with_config(mut self, cfg: Config) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Progress) + Send + 'static,
    {
        self.progress = Some(Box::new(f));
        self
    }

    /// Runs until every piece is verified and in place.
    ///
    /// Fails with [`DownloadError::Stalled`] if every worker has exited while
    /// pieces are still missing.
    pub async fn run(mut self) -> Result<Vec<u8>, DownloadError> {
        let plan = &self.plan;
        if plan.peers.is_empty() {
            return Err(DownloadError::NoPeers);
        }
        plan.validate()?;
        self.cfg.validate()?;

        let total = plan.piece_count();
        info!(
            name = %plan.name,
            pieces = total,
            peers = plan.peers.len(),
            "Starting download"
        );

        let queue = WorkQueue::seeded(plan.piece_work())?;
        let (tx, mut rx) = mpsc::channel(plan.peers.len());
        let backlog = Arc::new(Backlog::new(self.cfg.backlog));
        let active = ActiveWorkers::default();
        let collected = Collected::new(total);
        let cfg = Arc::new(self.cfg.clone());

        let mut workers = JoinSet::new();
        for peer in &plan.peers {
            let worker = Worker {
                peer:      peer.clone(),
                connector: Arc::clone(&self.connector),
                queue:     queue.clone(),
                results:   tx.clone(),
                backlog:   Arc::clone(&backlog),
                active:    active.clone(),
                collected: collected.clone(),
                cfg:       Arc::clone(&cfg),
            };
            workers.spawn(worker.run());
        }
        // workers hold the only senders; the channel closes when all exit
        drop(tx);

        let mut buf = vec![0u8; plan.length];
        let mut done = 0;

        while done < total {
            let Some(res) = rx.recv().await else {
                warn!(
                    remaining = total - done,
                    queued = queue.len(),
                    "All peer workers exited"
                );
                queue.close();
                return Err(DownloadError::Stalled { remaining: total - done });
            };

            if !collected.insert(res.index) {
                warn!(piece = res.index, "Ignoring duplicate result");
                continue;
            }

            let (begin, end) = plan.piece_bounds(res.index);
            buf[begin..end].copy_from_slice(&res.buf);
            done += 1;

            let progress = Progress {
                done,
                total,
                index: res.index,
                active_workers: active.count(),
            };
            info!(
                "({:.2}%) Downloaded piece #{} from {} peers",
                progress.percent(),
                progress.index,
                progress.active_workers
            );
            if let Some(report) = self.progress.as_mut() {
                report(&progress);
            }
        }

        queue.close();
        // workers still connecting hold no piece; stop them
        workers.shutdown().await;

        info!(name = %plan.name, bytes = buf.len(), "Download complete");
        Ok(buf)
    }
}

/// Convenience wrapper around [`Downloader`] with the default config.
pub async fn download<C: Connector>(
    plan:      DownloadPlan,
    connector: C,
) -> Result<Vec<u8>, DownloadError> {
    Downloader::new(plan, connector).run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_fraction() {
        let p = Progress { done: 1, total: 4, index: 2, active_workers: 3 };
        assert_eq!(p.fraction(), 0.25);
        assert_eq!(p.percent(), 25.0);

        let empty = Progress { done: 0, total: 0, index: 0, active_workers: 0 };
        assert_eq!(empty.fraction(), 1.0);
    }
}
