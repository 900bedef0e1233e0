//! The per-piece request pipeline.
//!
//! One attempt drives one connection through a single piece: keep up to
//! `backlog` block requests outstanding while the peer has us unchoked, and
//! copy every returned block to the offset it declares. An attempt either
//! yields the whole piece or fails; nothing survives a failed attempt.

use tokio::time::Instant;
use tracing::trace;

use crate::{
    backlog::Backlog,
    bitfield::Bitfield,
    config::Config,
    error::PeerError,
    peer::Connection,
    piece::PieceWork,
    protocol::Message,
};

/// Book-keeping for one attempt at one piece.
struct PieceProgress<'a, C: ?Sized> {
    index:      usize,
    conn:       &'a mut C,
    buf:        Vec<u8>,
    downloaded: usize,
    requested:  usize,
    in_flight:  usize,
}

impl<'a, C> PieceProgress<'a, C>
where
    C: Connection + ?Sized,
{
    fn new(work: &PieceWork, conn: &'a mut C) -> Self {
        Self {
            index: work.index,
            conn,
            buf: vec![0u8; work.length],
            downloaded: 0,
            requested: 0,
            in_flight: 0,
        }
    }

    async fn run(mut self, backlog: &Backlog, block_size: usize) -> Result<Vec<u8>, PeerError> {
        let length = self.buf.len();

        while self.downloaded < length {
            if !self.conn.is_choked() {
                while self.in_flight < backlog.current() && self.requested < length {
                    let size = block_size.min(length - self.requested);
                    if let Err(e) = self.conn.send_request(self.index, self.requested, size).await {
                        backlog.report(false);
                        return Err(e);
                    }
                    self.in_flight += 1;
                    self.requested += size;
                }
            }

            if let Err(e) = self.read_message().await {
                backlog.report(false);
                return Err(e);
            }
            backlog.report(true);
        }

        Ok(self.buf)
    }

    async fn read_message(&mut self) -> Result<(), PeerError> {
        let Some(msg) = self.conn.read_message().await? else {
            return Ok(());
        };

        match msg {
            Message::Unchoke => self.conn.set_choked(false),
            Message::Choke => self.conn.set_choked(true),
            Message::Have(index) => self.conn.bitfield_mut().set_piece(index as usize),
            Message::Bitfield(bits) => *self.conn.bitfield_mut() = Bitfield::from_bytes(bits),
            Message::Piece { index, begin, block } => {
                self.write_block(index as usize, begin as usize, &block)?;
                self.downloaded += block.len();
                self.in_flight = self.in_flight.saturating_sub(1);
            }
            other => trace!(piece = self.index, "Ignoring {:?}", other),
        }
        Ok(())
    }

    fn write_block(&mut self, index: usize, begin: usize, block: &[u8]) -> Result<(), PeerError> {
        if index != self.index {
            return Err(PeerError::Protocol(format!(
                "expected a block of piece {}, got piece {}",
                self.index, index
            )));
        }

        let end = begin
            .checked_add(block.len())
            .filter(|&end| begin < self.buf.len() && end <= self.buf.len())
            .ok_or_else(|| {
                PeerError::Protocol(format!(
                    "block [{}, +{}) overruns piece {} of {} bytes",
                    begin,
                    block.len(),
                    self.index,
                    self.buf.len()
                ))
            })?;

        self.buf[begin..end].copy_from_slice(block);
        Ok(())
    }
}

/// Downloads `work` over `conn`, bounded by the configured piece deadline.
///
/// The deadline is removed from the connection before returning, whether or
/// not the attempt succeeded.
pub async fn attempt_download<C>(
    conn:    &mut C,
    work:    &PieceWork,
    backlog: &Backlog,
    cfg:     &Config,
) -> Result<Vec<u8>, PeerError>
where
    C: Connection + ?Sized,
{
    conn.set_deadline(Some(Instant::now() + cfg.piece_timeout));
    let res = PieceProgress::new(work, &mut *conn).run(backlog, cfg.block_size).await;
    conn.set_deadline(None);
    res
}
