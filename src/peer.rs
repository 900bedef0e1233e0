use std::{
    fmt,
    future::Future,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf},
    net::TcpStream,
    time::{Instant, timeout, timeout_at},
};
use tracing::debug;

use crate::{
    bitfield::Bitfield,
    error::PeerError,
    protocol::{HANDSHAKE_LEN, Handshake, MAX_FRAME_LEN, Message},
};

/// Represents a peer in the BitTorrent network
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub ip:   IpAddr,
    pub port: u16,
}

impl Peer {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr())
    }
}

/// An established, handshaken link to one peer.
///
/// The download engine only ever talks to peers through this trait. Each
/// connection is owned by exactly one worker, so the choke flag and the
/// bitfield are plain fields rather than shared state.
pub trait Connection: Send {
    /// Waits for the next message. `None` is a keep-alive.
    fn read_message(&mut self) -> BoxFuture<'_, Result<Option<Message>, PeerError>>;

    fn send(&mut self, msg: Message) -> BoxFuture<'_, Result<(), PeerError>>;

    fn bitfield(&self) -> &Bitfield;

    fn bitfield_mut(&mut self) -> &mut Bitfield;

    fn is_choked(&self) -> bool;

    fn set_choked(&mut self, choked: bool);

    /// Bounds every subsequent read and write; `None` removes the bound.
    fn set_deadline(&mut self, deadline: Option<Instant>);

    fn send_request(
        &mut self,
        index: usize,
        begin: usize,
        length: usize,
    ) -> BoxFuture<'_, Result<(), PeerError>> {
        self.send(Message::Request {
            index:  index as u32,
            begin:  begin as u32,
            length: length as u32,
        })
    }

    fn send_have(&mut self, index: usize) -> BoxFuture<'_, Result<(), PeerError>> {
        self.send(Message::Have(index as u32))
    }

    fn send_interested(&mut self) -> BoxFuture<'_, Result<(), PeerError>> {
        self.send(Message::Interested)
    }

    fn send_unchoke(&mut self) -> BoxFuture<'_, Result<(), PeerError>> {
        self.send(Message::Unchoke)
    }
}

/// Opens connections: TCP connect, handshake and the initial bitfield.
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection + 'static;

    fn connect<'a>(&'a self, peer: &'a Peer) -> BoxFuture<'a, Result<Self::Conn, PeerError>>;
}

/// Manages the connection to a peer, including reading and writing
pub struct PeerConnection<S = TcpStream> {
    peer:     Peer,
    choked:   bool,
    reader:   BufReader<ReadHalf<S>>,
    writer:   BufWriter<WriteHalf<S>>,
    bitfield: Bitfield,
    deadline: Option<Instant>,
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Performs the handshake over an already connected stream and waits for
    /// the peer's bitfield. Everything is bounded by `limit`.
    pub async fn handshake(
        stream:    S,
        peer:      Peer,
        info_hash: [u8; 20],
        peer_id:   [u8; 20],
        limit:     Duration,
    ) -> Result<Self, PeerError> {
        let (rh, wh) = tokio::io::split(stream);
        let mut conn = PeerConnection {
            peer,
            choked:   true,
            reader:   BufReader::new(rh),
            writer:   BufWriter::new(wh),
            bitfield: Bitfield::default(),
            deadline: Some(Instant::now() + limit),
        };

        let (reader, writer) = (&mut conn.reader, &mut conn.writer);
        let theirs = with_deadline(conn.deadline, async move {
            writer
                .write_all(&Handshake::new(info_hash, peer_id).encode())
                .await?;
            writer.flush().await?;

            let mut buf = [0u8; HANDSHAKE_LEN];
            reader.read_exact(&mut buf).await.map_err(closed_on_eof)?;
            Handshake::decode(&buf)
        })
        .await?;

        if theirs.info_hash != info_hash {
            return Err(PeerError::Handshake("info hash mismatch".into()));
        }

        conn.bitfield = conn.receive_bitfield().await?;
        conn.deadline = None;
        Ok(conn)
    }

    async fn receive_bitfield(&mut self) -> Result<Bitfield, PeerError> {
        loop {
            match self.read_message().await? {
                None => continue,
                Some(Message::Bitfield(bits)) => return Ok(Bitfield::from_bytes(bits)),
                Some(other) => {
                    return Err(PeerError::Protocol(format!(
                        "expected bitfield, got {:?}",
                        other
                    )));
                }
            }
        }
    }
}

impl<S> Connection for PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn read_message(&mut self) -> BoxFuture<'_, Result<Option<Message>, PeerError>> {
        with_deadline(self.deadline, read_frame(&mut self.reader)).boxed()
    }

    fn send(&mut self, msg: Message) -> BoxFuture<'_, Result<(), PeerError>> {
        let deadline = self.deadline;
        let writer = &mut self.writer;
        with_deadline(deadline, async move {
            writer.write_all(&msg.encode()).await?;
            writer.flush().await?;
            Ok::<(), PeerError>(())
        })
        .boxed()
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

impl<S> Drop for PeerConnection<S> {
    fn drop(&mut self) {
        debug!(peer = %self.peer, "Disconnected");
    }
}

async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>, PeerError>
where
    R: AsyncRead + Unpin,
{
    let mut length = [0u8; 4];
    reader.read_exact(&mut length).await.map_err(closed_on_eof)?;

    let size = u32::from_be_bytes(length) as usize;
    if size == 0 {
        return Ok(None);
    }
    if size > MAX_FRAME_LEN {
        return Err(PeerError::Protocol(format!("frame of {} bytes refused", size)));
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await.map_err(closed_on_eof)?;
    Message::from_body(&body)
}

async fn with_deadline<F, T>(deadline: Option<Instant>, fut: F) -> Result<T, PeerError>
where
    F: Future<Output = Result<T, PeerError>>,
{
    match deadline {
        Some(at) => timeout_at(at, fut).await.map_err(|_| PeerError::Timeout)?,
        None => fut.await,
    }
}

fn closed_on_eof(e: std::io::Error) -> PeerError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        PeerError::ConnectionClosed
    } else {
        PeerError::Io(e)
    }
}

/// Dials peers over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub info_hash:         [u8; 20],
    pub peer_id:           [u8; 20],
    pub connect_timeout:   Duration,
    pub handshake_timeout: Duration,
}

impl Connector for TcpConnector {
    type Conn = PeerConnection<TcpStream>;

    fn connect<'a>(&'a self, peer: &'a Peer) -> BoxFuture<'a, Result<Self::Conn, PeerError>> {
        async move {
            let stream = timeout(self.connect_timeout, TcpStream::connect(peer.addr()))
                .await
                .map_err(|_| PeerError::Timeout)??;

            PeerConnection::handshake(
                stream,
                peer.clone(),
                self.info_hash,
                self.peer_id,
                self.handshake_timeout,
            )
            .await
        }
        .boxed()
    }
}
