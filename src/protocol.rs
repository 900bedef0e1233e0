use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::PeerError;

/// The BitTorrent protocol identifier string
pub const PROTOCOL_STR: &str = "BitTorrent protocol";

/// Length of the full handshake message (always 68 bytes)
pub const HANDSHAKE_LEN: usize = 68;

/// Largest frame accepted from a peer: a 16 KiB block plus generous headroom
/// for bitfields of very large torrents.
pub const MAX_FRAME_LEN: usize = 1 << 20;

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;

/// The 68-byte opening message of every peer connection.
///
/// It identifies the torrent being requested (`info_hash`) and the client
/// (`peer_id`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id:   [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL_STR.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL_STR.as_bytes());
        // bytes 20..28 are the reserved extension flags, all zero
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, PeerError> {
        if buf.len() != HANDSHAKE_LEN {
            return Err(PeerError::Handshake(format!(
                "expected {} bytes, got {}",
                HANDSHAKE_LEN,
                buf.len()
            )));
        }

        let pstrlen = buf[0] as usize;
        if pstrlen != PROTOCOL_STR.len() || &buf[1..1 + pstrlen] != PROTOCOL_STR.as_bytes() {
            return Err(PeerError::Handshake("unknown protocol string".into()));
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self { info_hash, peer_id })
    }
}

/// A peer wire message exchanged after the handshake.
///
/// Keep-alives carry no id and are represented as `None` by the decoders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    fn id(&self) -> u8 {
        match self {
            Message::Choke => ID_CHOKE,
            Message::Unchoke => ID_UNCHOKE,
            Message::Interested => ID_INTERESTED,
            Message::NotInterested => ID_NOT_INTERESTED,
            Message::Have(_) => ID_HAVE,
            Message::Bitfield(_) => ID_BITFIELD,
            Message::Request { .. } => ID_REQUEST,
            Message::Piece { .. } => ID_PIECE,
            Message::Cancel { .. } => ID_CANCEL,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => 0,
            Message::Have(_) => 4,
            Message::Bitfield(bits) => bits.len(),
            Message::Request { .. } | Message::Cancel { .. } => 12,
            Message::Piece { block, .. } => 8 + block.len(),
        }
    }

    /// Serializes the message as `<length><id><payload>`.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload_len();
        let mut buf = vec![0u8; 5 + payload_len];
        BigEndian::write_u32(&mut buf[0..4], (1 + payload_len) as u32);
        buf[4] = self.id();

        let payload = &mut buf[5..];
        match self {
            Message::Have(index) => BigEndian::write_u32(payload, *index),
            Message::Bitfield(bits) => payload.copy_from_slice(bits),
            Message::Request { index, begin, length } | Message::Cancel { index, begin, length } => {
                BigEndian::write_u32(&mut payload[0..4], *index);
                BigEndian::write_u32(&mut payload[4..8], *begin);
                BigEndian::write_u32(&mut payload[8..12], *length);
            }
            Message::Piece { index, begin, block } => {
                BigEndian::write_u32(&mut payload[0..4], *index);
                BigEndian::write_u32(&mut payload[4..8], *begin);
                payload[8..].copy_from_slice(block);
            }
            _ => {}
        }
        buf
    }

    /// Encoding of a keep-alive frame.
    pub fn keep_alive() -> [u8; 4] {
        [0u8; 4]
    }

    /// Parses a whole length-prefixed frame.
    pub fn decode(frame: &[u8]) -> Result<Option<Self>, PeerError> {
        if frame.len() < 4 {
            return Err(PeerError::Protocol("frame shorter than length prefix".into()));
        }

        let len = BigEndian::read_u32(&frame[0..4]) as usize;
        if frame.len() - 4 != len {
            return Err(PeerError::Protocol(format!(
                "frame declares {} bytes, carries {}",
                len,
                frame.len() - 4
            )));
        }

        Self::from_body(&frame[4..])
    }

    /// Parses the bytes following the length prefix. An empty body is a
    /// keep-alive.
    pub fn from_body(body: &[u8]) -> Result<Option<Self>, PeerError> {
        let Some((&id, payload)) = body.split_first() else {
            return Ok(None);
        };

        let mut rd = Cursor::new(payload);
        let msg = match id {
            ID_CHOKE => Message::Choke,
            ID_UNCHOKE => Message::Unchoke,
            ID_INTERESTED => Message::Interested,
            ID_NOT_INTERESTED => Message::NotInterested,
            ID_HAVE => {
                expect_len("have", payload, 4)?;
                Message::Have(read_u32(&mut rd)?)
            }
            ID_BITFIELD => Message::Bitfield(payload.to_vec()),
            ID_REQUEST | ID_CANCEL => {
                expect_len(if id == ID_REQUEST { "request" } else { "cancel" }, payload, 12)?;
                let index = read_u32(&mut rd)?;
                let begin = read_u32(&mut rd)?;
                let length = read_u32(&mut rd)?;
                if id == ID_REQUEST {
                    Message::Request { index, begin, length }
                } else {
                    Message::Cancel { index, begin, length }
                }
            }
            ID_PIECE => {
                if payload.len() < 8 {
                    return Err(PeerError::Protocol(format!(
                        "piece payload too short: {} bytes",
                        payload.len()
                    )));
                }
                let index = read_u32(&mut rd)?;
                let begin = read_u32(&mut rd)?;
                let mut block = Vec::with_capacity(payload.len() - 8);
                rd.read_to_end(&mut block)?;
                Message::Piece { index, begin, block }
            }
            other => {
                return Err(PeerError::Protocol(format!("unknown message id {}", other)));
            }
        };

        Ok(Some(msg))
    }
}

fn expect_len(kind: &str, payload: &[u8], len: usize) -> Result<(), PeerError> {
    if payload.len() != len {
        return Err(PeerError::Protocol(format!(
            "{} payload must be {} bytes, got {}",
            kind,
            len,
            payload.len()
        )));
    }
    Ok(())
}

fn read_u32(rd: &mut Cursor<&[u8]>) -> Result<u32, PeerError> {
    rd.read_u32::<BigEndian>()
        .map_err(|e| PeerError::Protocol(format!("truncated field: {}", e)))
}
