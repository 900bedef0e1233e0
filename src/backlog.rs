use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::config::BacklogConfig;

/// Target number of unanswered block requests, shared by every worker.
///
/// Each protocol round reports success or failure, nudging the depth up or
/// down by one step. Readers may see a value that another worker is about to
/// change; updates themselves never get lost.
#[derive(Debug)]
pub struct Backlog {
    depth: AtomicUsize,
    cfg:   BacklogConfig,
}

impl Backlog {
    pub fn new(cfg: BacklogConfig) -> Self {
        let initial = cfg.initial.clamp(cfg.min, cfg.max);
        Self {
            depth: AtomicUsize::new(initial),
            cfg,
        }
    }

    pub fn current(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Applies one round's outcome and returns the resulting depth.
    pub fn report(&self, success: bool) -> usize {
        match self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                self.adjusted(cur, success)
            }) {
            Ok(prev) => {
                let next = self.adjusted(prev, success).unwrap_or(prev);
                if success {
                    debug!("Increased backlog to {}", next);
                } else {
                    debug!("Decreased backlog to {}", next);
                }
                next
            }
            Err(unchanged) => unchanged,
        }
    }

    fn adjusted(&self, cur: usize, success: bool) -> Option<usize> {
        let BacklogConfig { min, max, step, .. } = self.cfg;
        if success && cur < max {
            Some(cur.saturating_add(step).min(max))
        } else if !success && cur > min {
            Some(cur.saturating_sub(step).max(min))
        } else {
            None
        }
    }
}
