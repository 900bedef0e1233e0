use std::time::Duration;

use crate::error::DownloadError;

/// Largest number of bytes a single block request asks for.
pub const BLOCK_SIZE: usize = 16 * 1024;

/// Pipeline depth every download starts at.
pub const INITIAL_BACKLOG: usize = 5;
/// Floor of the pipeline depth; one request is always allowed in flight.
pub const MIN_BACKLOG: usize = 1;
/// Ceiling of the pipeline depth.
pub const MAX_BACKLOG: usize = 50;
/// Amount the pipeline depth moves per success or failure report.
pub const BACKLOG_STEP: usize = 5;

/// Wall-clock budget for downloading one piece from one peer.
pub const PIECE_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause taken by a worker after a full lap of the queue turned up nothing
/// its peer has.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(250);

/// Bounds and step of the adaptive pipeline depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogConfig {
    pub initial: usize,
    pub min:     usize,
    pub max:     usize,
    pub step:    usize,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            initial: INITIAL_BACKLOG,
            min:     MIN_BACKLOG,
            max:     MAX_BACKLOG,
            step:    BACKLOG_STEP,
        }
    }
}

/// Tunables of a download.
#[derive(Debug, Clone)]
pub struct Config {
    pub block_size:    usize,
    pub piece_timeout: Duration,
    pub idle_backoff:  Duration,
    pub backlog:       BacklogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size:    BLOCK_SIZE,
            piece_timeout: PIECE_TIMEOUT,
            idle_backoff:  IDLE_BACKOFF,
            backlog:       BacklogConfig::default(),
        }
    }
}

impl Config {
    /// Rejects values that would stall every attempt.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.block_size == 0 {
            return Err(DownloadError::InvalidConfig("block size must be positive".into()));
        }
        let BacklogConfig { min, max, .. } = self.backlog;
        if min == 0 || min > max {
            return Err(DownloadError::InvalidConfig(format!(
                "backlog bounds [{}, {}] must be non-empty and start at 1 or more",
                min, max
            )));
        }
        Ok(())
    }
}
