/// Which pieces a remote peer has advertised.
///
/// Bits are numbered from the high bit of the first byte, so piece 0 is
/// `0b1000_0000` of byte 0. The length is fixed when the field is built:
/// lookups past the end report `false` and setting a bit past the end is a
/// no-op, so a peer cannot make it grow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
}

impl Bitfield {
    pub fn from_bytes(bits: Vec<u8>) -> Self {
        Self { bits }
    }

    /// An empty bitfield with room for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self { bits: vec![0; piece_count.div_ceil(8)] }
    }

    /// A bitfield with every one of the first `piece_count` pieces set.
    pub fn full(piece_count: usize) -> Self {
        let mut bf = Self::new(piece_count);
        for index in 0..piece_count {
            bf.set_piece(index);
        }
        bf
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.bits
            .get(index / 8)
            .is_some_and(|byte| byte & (0b1000_0000 >> (index % 8)) != 0)
    }

    pub fn set_piece(&mut self, index: usize) {
        if let Some(byte) = self.bits.get_mut(index / 8) {
            *byte |= 0b1000_0000 >> (index % 8);
        }
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}
