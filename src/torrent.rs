use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::{error::ApplicationError, peer::Peer, plan::DownloadPlan};

/// Represents a parsed .torrent file
#[derive(Debug, Serialize, Deserialize)]
pub struct Torrent {
    pub announce: String,
    pub info:     Info,
    #[serde(skip)]
    pub info_raw_bytes: Vec<u8>,
}

/// Fields inside the 'info' dictionary of a .torrent file
#[derive(Debug, Serialize, Deserialize)]
pub struct Info {
    pub name: String,
    #[serde(rename = "piece length")]
    pub piece_length: i64,
    pub pieces: ByteBuf,
    pub length: Option<i64>,
    pub files:  Option<Vec<TorrentFile>>,
}

/// A file entry in a multi-file torrent
#[derive(Debug, Serialize, Deserialize)]
pub struct TorrentFile {
    pub length: i64,
    pub path:   Vec<String>,
}

/// Represents a file with its full path and length
#[derive(Debug)]
pub struct FileEntry {
    pub length: i64,
    pub path:   PathBuf,
}

impl Torrent {
    /// Reads a `.torrent` file from disk and parses it into a [`Torrent`] struct
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ApplicationError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Parses bencoded metainfo and keeps the raw `info` dictionary so the
    /// info hash can be computed over exactly what the tracker expects.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ApplicationError> {
        let bencoded_map: BTreeMap<String, serde_bencode::value::Value> =
            serde_bencode::from_bytes(data).map_err(parse_err)?;

        let info_value = bencoded_map
            .get("info")
            .ok_or_else(|| ApplicationError::ParserError("missing info".into()))?;
        let info_raw_bytes = serde_bencode::to_bytes(info_value).map_err(parse_err)?;

        let torrent: Torrent = serde_bencode::from_bytes(data).map_err(parse_err)?;
        let torrent = Torrent { info_raw_bytes, ..torrent };
        torrent.validate()?;
        Ok(torrent)
    }

    fn validate(&self) -> Result<(), ApplicationError> {
        if self.info.piece_length <= 0 {
            return Err(ApplicationError::ParserError(format!(
                "invalid piece length {}",
                self.info.piece_length
            )));
        }
        if self.info.pieces.len() % 20 != 0 {
            return Err(ApplicationError::ParserError(format!(
                "pieces string of {} bytes is not a multiple of 20",
                self.info.pieces.len()
            )));
        }
        if self.files().iter().any(|f| f.length < 0) {
            return Err(ApplicationError::ParserError("negative file length".into()));
        }

        let expected = (self.total_size() as usize).div_ceil(self.piece_length() as usize);
        if expected != self.pieces_count() {
            return Err(ApplicationError::ParserError(format!(
                "{} piece hashes for {} pieces",
                self.pieces_count(),
                expected
            )));
        }
        Ok(())
    }

    /// Computes the SHA1 hash of the bencoded `info` dictionary
    pub fn info_hash(&self) -> [u8; 20] {
        let digest = Sha1::digest(&self.info_raw_bytes);
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&digest);
        arr
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Calculates the total size of all files described by the torrent
    pub fn total_size(&self) -> i64 {
        self.files().iter().map(|f| f.length).sum()
    }

    /// Returns all files in the torrent with their full paths and sizes
    pub fn files(&self) -> Vec<FileEntry> {
        match &self.info.files {
            Some(files) => files
                .iter()
                .map(|f| FileEntry {
                    length: f.length,
                    path:   f.path.iter().fold(PathBuf::from(&self.info.name), |pb, p| pb.join(p)),
                })
                .collect(),
            None => vec![FileEntry {
                length: self.info.length.unwrap_or(0),
                path:   PathBuf::from(&self.info.name),
            }],
        }
    }

    /// Returns the number of pieces the torrent is divided into
    pub fn pieces_count(&self) -> usize {
        self.info.pieces.len() / 20
    }

    /// Returns the declared length of each piece (in bytes)
    ///
    /// The last piece may be shorter.
    pub fn piece_length(&self) -> i64 {
        self.info.piece_length
    }

    /// Returns the SHA1 hash of each piece
    pub fn piece_hashes(&self) -> Vec<[u8; 20]> {
        self.info
            .pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut arr = [0u8; 20];
                arr.copy_from_slice(chunk);
                arr
            })
            .collect()
    }

    /// Pairs the metainfo with the peers to download from.
    pub fn plan(&self, peers: Vec<Peer>) -> DownloadPlan {
        DownloadPlan {
            name: self.info.name.clone(),
            length: self.total_size() as usize,
            piece_length: self.piece_length() as usize,
            piece_hashes: self.piece_hashes(),
            peers,
        }
    }

    pub fn log_info(&self) {
        info!(
            name = %self.info.name,
            announce = %self.announce,
            info_hash = %hex::encode(self.info_hash()),
            piece_length = self.piece_length(),
            pieces = self.pieces_count(),
            size = self.total_size(),
            "Torrent info"
        );
        for file in self.files() {
            info!("  - {} ({} bytes)", file.path.display(), file.length);
        }
    }
}

fn parse_err(e: serde_bencode::Error) -> ApplicationError {
    ApplicationError::ParserError(e.to_string())
}
