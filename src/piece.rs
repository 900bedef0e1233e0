use sha1::{Digest, Sha1};

use crate::error::IntegrityError;

/// One unit of work: a piece index with the hash and exact length expected
/// for it.
///
/// A `PieceWork` is moved, never cloned, between the work queue and the
/// workers, so at most one copy of each index is ever in flight.
#[derive(Debug, PartialEq, Eq)]
pub struct PieceWork {
    pub index:  usize,
    pub hash:   [u8; 20],
    pub length: usize,
}

/// A downloaded piece whose hash has been checked.
#[derive(Debug)]
pub struct PieceResult {
    pub index: usize,
    pub buf:   Vec<u8>,
}

impl PieceWork {
    pub fn new(index: usize, hash: [u8; 20], length: usize) -> Self {
        Self { index, hash, length }
    }

    /// Hashes `buf` and compares it to the expected digest.
    pub fn check_integrity(&self, buf: &[u8]) -> Result<(), IntegrityError> {
        let digest = Sha1::digest(buf);
        if digest[..] != self.hash[..] {
            return Err(IntegrityError { index: self.index });
        }
        Ok(())
    }
}
