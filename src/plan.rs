use crate::{error::DownloadError, peer::Peer, piece::PieceWork};

/// Everything the engine needs to know about one download.
///
/// `piece_hashes[i]` covers the bytes `piece_bounds(i)` of the final file.
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub name:         String,
    pub length:       usize,
    pub piece_length: usize,
    pub piece_hashes: Vec<[u8; 20]>,
    pub peers:        Vec<Peer>,
}

impl DownloadPlan {
    /// Checks that the hashes tile the file exactly.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.piece_length == 0 {
            return Err(DownloadError::InvalidPlan("piece length must be positive".into()));
        }
        let expected = self.length.div_ceil(self.piece_length);
        if self.piece_hashes.len() != expected {
            return Err(DownloadError::InvalidPlan(format!(
                "{} bytes in pieces of {} need {} hashes, got {}",
                self.length,
                self.piece_length,
                expected,
                self.piece_hashes.len()
            )));
        }
        Ok(())
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Byte range `[begin, end)` of piece `index`; the last piece is clipped
    /// to the file length.
    pub fn piece_bounds(&self, index: usize) -> (usize, usize) {
        let begin = (index * self.piece_length).min(self.length);
        let end = (begin + self.piece_length).min(self.length);
        (begin, end)
    }

    pub fn piece_size(&self, index: usize) -> usize {
        let (begin, end) = self.piece_bounds(index);
        end - begin
    }

    /// One work item per piece, in index order.
    pub fn piece_work(&self) -> Vec<PieceWork> {
        self.piece_hashes
            .iter()
            .enumerate()
            .map(|(index, hash)| PieceWork::new(index, *hash, self.piece_size(index)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(length: usize, piece_length: usize) -> DownloadPlan {
        DownloadPlan {
            name: "test".into(),
            length,
            piece_length,
            piece_hashes: vec![[0u8; 20]; length.div_ceil(piece_length)],
            peers: vec![],
        }
    }

    #[test]
    fn short_last_piece() {
        let plan = plan(3400, 1000);
        assert_eq!(plan.piece_count(), 4);
        assert_eq!(plan.piece_bounds(0), (0, 1000));
        assert_eq!(plan.piece_bounds(2), (2000, 3000));
        assert_eq!(plan.piece_bounds(3), (3000, 3400));
        assert_eq!(plan.piece_size(3), 400);
    }

    #[test]
    fn exact_multiple_has_full_last_piece() {
        let plan = plan(4096, 1024);
        assert_eq!(plan.piece_count(), 4);
        assert_eq!(plan.piece_bounds(3), (4096 - 1024, 4096));
    }

    #[test]
    fn validate_checks_hash_count() {
        assert!(plan(3400, 1000).validate().is_ok());

        let mut short = plan(3400, 1000);
        short.piece_hashes.pop();
        assert!(matches!(short.validate(), Err(DownloadError::InvalidPlan(_))));

        let mut long = plan(4096, 1024);
        long.piece_hashes.push([0u8; 20]);
        assert!(long.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_piece_length() {
        let zero = DownloadPlan { piece_length: 0, ..plan(100, 10) };
        assert!(matches!(zero.validate(), Err(DownloadError::InvalidPlan(_))));
    }

    #[test]
    fn work_items_match_bounds() {
        let plan = plan(2500, 1000);
        let sizes: Vec<usize> = plan.piece_work().iter().map(|pw| pw.length).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(sizes.iter().sum::<usize>(), plan.length);
    }
}
