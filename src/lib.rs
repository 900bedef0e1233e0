//! In-memory BitTorrent piece downloader.
//!
//! A [`Downloader`] seeds a work queue with every piece of a [`DownloadPlan`],
//! runs one worker per peer, and assembles verified pieces into a single
//! buffer. Workers pipeline block requests under a shared, adaptive
//! [`Backlog`]; failed or corrupt pieces go back on the queue for any worker
//! to pick up again.

pub mod attempt;
pub mod backlog;
pub mod bitfield;
pub mod config;
pub mod download;
pub mod error;
pub mod peer;
pub mod piece;
pub mod plan;
pub mod protocol;
pub mod queue;
pub mod torrent;
pub mod tracker;
pub mod worker;

pub use backlog::Backlog;
pub use bitfield::Bitfield;
pub use config::{BacklogConfig, Config};
pub use download::{Downloader, Progress, download};
pub use error::{ApplicationError, DownloadError, IntegrityError, PeerError};
pub use peer::{Connection, Connector, Peer, PeerConnection, TcpConnector};
pub use piece::{PieceResult, PieceWork};
pub use plan::DownloadPlan;
pub use protocol::{Handshake, Message};
pub use torrent::Torrent;
pub use tracker::Tracker;
