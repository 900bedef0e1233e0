mod common;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use common::{pattern, plan_for};
use swarmfetch::{Bitfield, Downloader, Handshake, Message, Peer, TcpConnector};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

const INFO_HASH: [u8; 20] = [0xab; 20];

/// Serves `data` to every client over the real peer wire protocol.
async fn seed(data: Arc<Vec<u8>>, piece_length: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, Arc::clone(&data), piece_length));
        }
    });
    addr
}

async fn serve(mut stream: TcpStream, data: Arc<Vec<u8>>, piece_length: usize) {
    let mut hs = [0u8; 68];
    if stream.read_exact(&mut hs).await.is_err() {
        return;
    }
    let theirs = Handshake::decode(&hs).unwrap();
    assert_eq!(theirs.info_hash, INFO_HASH);

    let pieces = data.len().div_ceil(piece_length);
    let mut out = Handshake::new(INFO_HASH, [0x42; 20]).encode().to_vec();
    out.extend(Message::Bitfield(Bitfield::full(pieces).as_bytes().to_vec()).encode());
    out.extend(Message::keep_alive());
    stream.write_all(&out).await.unwrap();

    loop {
        let mut len = [0u8; 4];
        if stream.read_exact(&mut len).await.is_err() {
            return;
        }
        let mut frame = len.to_vec();
        frame.resize(4 + u32::from_be_bytes(len) as usize, 0);
        if stream.read_exact(&mut frame[4..]).await.is_err() {
            return;
        }

        let reply = match Message::decode(&frame).unwrap() {
            Some(Message::Interested) => Message::Unchoke,
            Some(Message::Request { index, begin, length }) => {
                let start = index as usize * piece_length + begin as usize;
                Message::Piece {
                    index,
                    begin,
                    block: data[start..start + length as usize].to_vec(),
                }
            }
            _ => continue,
        };
        if stream.write_all(&reply.encode()).await.is_err() {
            return;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn downloads_over_tcp() {
    let piece_length = 3 * 16 * 1024;
    let data = Arc::new(pattern(5 * piece_length + 1234));

    let a = seed(Arc::clone(&data), piece_length).await;
    let b = seed(Arc::clone(&data), piece_length).await;
    let peers = [a, b]
        .iter()
        .map(|addr| Peer { ip: addr.ip(), port: addr.port() })
        .collect();

    let connector = TcpConnector {
        info_hash:         INFO_HASH,
        peer_id:           [0x11; 20],
        connect_timeout:   Duration::from_secs(3),
        handshake_timeout: Duration::from_secs(5),
    };

    let buf = Downloader::new(plan_for(&data, piece_length, peers), connector)
        .run()
        .await
        .unwrap();
    assert_eq!(buf, *data);
}

#[tokio::test]
async fn unreachable_peer_stalls() {
    // bind then drop to get a port nobody listens on
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();

    let data = pattern(1000);
    let connector = TcpConnector {
        info_hash:         INFO_HASH,
        peer_id:           [0x11; 20],
        connect_timeout:   Duration::from_secs(1),
        handshake_timeout: Duration::from_secs(1),
    };
    let plan = plan_for(&data, 1000, vec![Peer { ip: addr.ip(), port: addr.port() }]);

    let res = Downloader::new(plan, connector).run().await;
    assert!(matches!(res, Err(swarmfetch::DownloadError::Stalled { remaining: 1 })));
}
