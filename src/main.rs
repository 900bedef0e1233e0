use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swarmfetch::{
    ApplicationError, Config, Downloader, TcpConnector, Torrent, Tracker,
    config::{CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT, PIECE_TIMEOUT},
};

const PEER_ID: [u8; 20] = *b"-SF0001-123456789010";

/// Downloads a single torrent into memory and writes it out.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the .torrent file
    torrent: PathBuf,

    /// Output file (defaults to the name from the torrent)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seconds allowed for one piece from one peer
    #[arg(long, default_value_t = PIECE_TIMEOUT.as_secs())]
    piece_timeout: u64,

    /// Port announced to the tracker
    #[arg(long, default_value_t = 6881)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load torrent file and fetch the peers
    let torrent = Torrent::from_file(&args.torrent)?;
    torrent.log_info();

    let tracker = Tracker::new(PEER_ID, args.port);
    let peers = tracker.announce(&torrent).await?;

    let connector = TcpConnector {
        info_hash:         torrent.info_hash(),
        peer_id:           PEER_ID,
        connect_timeout:   CONNECT_TIMEOUT,
        handshake_timeout: HANDSHAKE_TIMEOUT,
    };
    let cfg = Config {
        piece_timeout: std::time::Duration::from_secs(args.piece_timeout),
        ..Config::default()
    };

    let buf = Downloader::new(torrent.plan(peers), connector)
        .with_config(cfg)
        .run()
        .await?;

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(torrent.name()));
    tokio::fs::write(&output, &buf).await?;

    info!(path = %output.display(), bytes = buf.len(), "Saved");
    Ok(())
}
