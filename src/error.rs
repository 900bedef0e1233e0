use thiserror::Error;

/// Failures raised by the binary front end: metainfo, tracker and disk.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("parser error: {0}")]
    ParserError(String),
    #[error("tracker error: {0}")]
    TrackerError(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Download(#[from] DownloadError),
}

/// Connection-level errors. Any of these ends the worker that hit it.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("deadline exceeded")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A completed piece whose SHA-1 does not match the metainfo.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("piece {index} failed integrity check")]
pub struct IntegrityError {
    pub index: usize,
}

/// Errors surfaced by the aggregator to the caller of a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no peers to download from")]
    NoPeers,
    #[error("every peer worker exited with {remaining} pieces outstanding")]
    Stalled { remaining: usize },
    #[error("work queue rejected piece {0}")]
    Queue(usize),
    #[error("invalid download plan: {0}")]
    InvalidPlan(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
