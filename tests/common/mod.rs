#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    net::{IpAddr, Ipv4Addr},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use futures::future::{self, BoxFuture, FutureExt};
use sha1::{Digest, Sha1};
use swarmfetch::{Bitfield, Connection, Connector, DownloadPlan, Message, Peer, PeerError};
use tokio::time::Instant;

pub fn peer(n: u8) -> Peer {
    Peer { ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)), port: 6881 }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

pub fn hash_of(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Sha1::digest(data));
    out
}

pub fn plan_for(data: &[u8], piece_length: usize, peers: Vec<Peer>) -> DownloadPlan {
    DownloadPlan {
        name: "sim".into(),
        length: data.len(),
        piece_length,
        piece_hashes: data.chunks(piece_length).map(hash_of).collect(),
        peers,
    }
}

/// How a simulated peer misbehaves.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Refuse the connection outright.
    pub refuse:            bool,
    /// Pieces advertised in the bitfield; `None` means all of them.
    pub has:               Option<Vec<usize>>,
    /// Drop the connection after delivering this many blocks.
    pub fail_after_blocks: Option<usize>,
    /// Flip the last byte of this piece the first time it is served.
    pub corrupt_once:      Option<usize>,
    /// Never lift the initial choke.
    pub never_unchoke:     bool,
}

/// What a simulated peer observed.
#[derive(Debug, Default)]
pub struct Stats {
    pub connects:  AtomicUsize,
    pub dropped:   AtomicUsize,
    pub requests:  Mutex<Vec<(u32, u32, u32)>>,
    pub haves:     Mutex<Vec<u32>>,
    pub corrupted: AtomicBool,
}

impl Stats {
    pub fn requests(&self) -> Vec<(u32, u32, u32)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn haves(&self) -> Vec<u32> {
        self.haves.lock().unwrap().clone()
    }

    pub fn offsets_for(&self, index: u32) -> Vec<u32> {
        self.requests()
            .into_iter()
            .filter(|&(i, _, _)| i == index)
            .map(|(_, begin, _)| begin)
            .collect()
    }
}

/// A swarm of in-memory peers serving the same file.
pub struct Swarm {
    data:         Arc<Vec<u8>>,
    piece_length: usize,
    peers:        HashMap<Peer, (Behavior, Arc<Stats>)>,
}

impl Swarm {
    pub fn new(data: Vec<u8>, piece_length: usize) -> Self {
        Self { data: Arc::new(data), piece_length, peers: HashMap::new() }
    }

    pub fn add(&mut self, peer: Peer, behavior: Behavior) -> Arc<Stats> {
        let stats = Arc::new(Stats::default());
        self.peers.insert(peer, (behavior, Arc::clone(&stats)));
        stats
    }

    fn piece_count(&self) -> usize {
        self.data.len().div_ceil(self.piece_length)
    }
}

impl Connector for Swarm {
    type Conn = SimConn;

    fn connect<'a>(&'a self, peer: &'a Peer) -> BoxFuture<'a, Result<SimConn, PeerError>> {
        let res = match self.peers.get(peer) {
            None => Err(PeerError::ConnectionClosed),
            Some((behavior, _)) if behavior.refuse => Err(PeerError::Handshake("refused".into())),
            Some((behavior, stats)) => {
                stats.connects.fetch_add(1, Ordering::SeqCst);
                let bitfield = match &behavior.has {
                    None => Bitfield::full(self.piece_count()),
                    Some(pieces) => {
                        let mut bf = Bitfield::new(self.piece_count());
                        pieces.iter().for_each(|&i| bf.set_piece(i));
                        bf
                    }
                };
                Ok(SimConn {
                    data: Arc::clone(&self.data),
                    piece_length: self.piece_length,
                    behavior: behavior.clone(),
                    stats: Arc::clone(stats),
                    inbox: VecDeque::new(),
                    choked: true,
                    bitfield,
                    deadline: None,
                    delivered: 0,
                })
            }
        };
        future::ready(res).boxed()
    }
}

pub struct SimConn {
    data:         Arc<Vec<u8>>,
    piece_length: usize,
    behavior:     Behavior,
    stats:        Arc<Stats>,
    inbox:        VecDeque<Message>,
    choked:       bool,
    bitfield:     Bitfield,
    deadline:     Option<Instant>,
    delivered:    usize,
}

impl SimConn {
    fn block(&self, index: u32, begin: u32, length: u32) -> Vec<u8> {
        let start = index as usize * self.piece_length + begin as usize;
        let mut block = self.data[start..start + length as usize].to_vec();

        let piece_end = ((index as usize + 1) * self.piece_length).min(self.data.len());
        let is_last_block = start + block.len() == piece_end;
        if self.behavior.corrupt_once == Some(index as usize)
            && is_last_block
            && !self.stats.corrupted.swap(true, Ordering::SeqCst)
        {
            if let Some(last) = block.last_mut() {
                *last ^= 0xff;
            }
        }
        block
    }
}

impl Connection for SimConn {
    fn read_message(&mut self) -> BoxFuture<'_, Result<Option<Message>, PeerError>> {
        let next_is_block = matches!(self.inbox.front(), Some(Message::Piece { .. }));
        if next_is_block && self.behavior.fail_after_blocks == Some(self.delivered) {
            return future::ready(Err(PeerError::ConnectionClosed)).boxed();
        }

        if let Some(msg) = self.inbox.pop_front() {
            if next_is_block {
                self.delivered += 1;
            }
            return future::ready(Ok(Some(msg))).boxed();
        }

        match self.deadline {
            Some(at) => async move {
                tokio::time::sleep_until(at).await;
                Err::<Option<Message>, _>(PeerError::Timeout)
            }
            .boxed(),
            None => future::pending().boxed(),
        }
    }

    fn send(&mut self, msg: Message) -> BoxFuture<'_, Result<(), PeerError>> {
        match msg {
            Message::Interested if !self.behavior.never_unchoke => {
                self.inbox.push_back(Message::Unchoke);
            }
            Message::Request { index, begin, length } => {
                self.stats.requests.lock().unwrap().push((index, begin, length));
                let block = self.block(index, begin, length);
                self.inbox.push_back(Message::Piece { index, begin, block });
            }
            Message::Have(index) => self.stats.haves.lock().unwrap().push(index),
            _ => {}
        }
        future::ready(Ok(())).boxed()
    }

    fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    fn bitfield_mut(&mut self) -> &mut Bitfield {
        &mut self.bitfield
    }

    fn is_choked(&self) -> bool {
        self.choked
    }

    fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }
}

impl Drop for SimConn {
    fn drop(&mut self) {
        self.stats.dropped.fetch_add(1, Ordering::SeqCst);
    }
}
