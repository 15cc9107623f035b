//! A fake seeder that speaks just enough of the protocol to serve pieces.
#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use sha1_smol::Sha1;
use tokio::{
    net::{TcpListener, TcpStream},
    spawn,
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::Level;
use vcz_leech::{
    bitfield::{Bitfield, VczBitfield},
    peer::PeerId,
    tcp_wire::{Block, Handshake, HandshakeCodec, Message, PeerCodec},
    torrent::Session,
};

pub const INFO_HASH: [u8; 20] = [7u8; 20];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Answers every request with the right data.
    Honest,
    /// Answers every request with flipped bytes.
    Corrupt,
    /// Never answers a request.
    Silent,
}

pub fn setup_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .without_time()
        .with_test_writer()
        .try_init();
}

pub fn random_data(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill(&mut data[..]);
    data
}

pub fn session(
    data: &[u8],
    piece_length: usize,
    peers: Vec<SocketAddr>,
) -> Session {
    let hashes = data
        .chunks(piece_length)
        .map(|chunk| Sha1::from(chunk).digest().bytes())
        .collect();

    Session::new(
        "test",
        INFO_HASH,
        PeerId::generate(),
        hashes,
        piece_length,
        data.len(),
        peers,
    )
    .unwrap()
}

/// An address where nobody is listening.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Spawn a seeder that has the pieces `have` of `data` and return its
/// address.
pub async fn seeder(
    data: Arc<Vec<u8>>,
    piece_length: usize,
    have: Vec<usize>,
    mode: Mode,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let pieces = data.len().div_ceil(piece_length);
    let mut bitfield = Bitfield::from_piece(pieces);
    for index in have {
        bitfield.set_piece(index);
    }

    spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let bitfield = bitfield.clone();
            spawn(serve(socket, data.clone(), piece_length, bitfield, mode));
        }
    });

    addr
}

async fn serve(
    socket: TcpStream,
    data: Arc<Vec<u8>>,
    piece_length: usize,
    bitfield: Bitfield,
    mode: Mode,
) {
    let mut socket = Framed::new(socket, HandshakeCodec);

    let Some(Ok(theirs)) = socket.next().await else { return };
    assert_eq!(theirs.info_hash.0, INFO_HASH);

    if socket.send(Handshake::new(INFO_HASH, [1u8; 20])).await.is_err() {
        return;
    }

    let old_parts = socket.into_parts();
    let mut new_parts =
        FramedParts::new::<Message>(old_parts.io, PeerCodec::default());
    new_parts.read_buf = old_parts.read_buf;
    new_parts.write_buf = old_parts.write_buf;
    let mut socket = Framed::from_parts(new_parts);

    if socket.send(Message::Bitfield(bitfield.clone())).await.is_err()
        || socket.send(Message::Unchoke).await.is_err()
    {
        return;
    }

    while let Some(Ok(msg)) = socket.next().await {
        let Message::Request(info) = msg else { continue };

        if mode == Mode::Silent || !bitfield.has_piece(info.index as usize) {
            continue;
        }

        let begin = info.index as usize * piece_length + info.begin as usize;
        let mut block = data[begin..begin + info.len as usize].to_vec();

        if mode == Mode::Corrupt {
            block.iter_mut().for_each(|b| *b = !*b);
        }

        let piece = Message::Piece(Block {
            index: info.index,
            begin: info.begin,
            block: Bytes::from(block),
        });

        if socket.send(piece).await.is_err() {
            return;
        }
    }
}
