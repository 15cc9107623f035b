//! A remote peer in the network that we download data from.
mod types;

// re-exports
pub use types::*;

use std::{net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, time::timeout};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, warn};

use crate::{
    bitfield::VczBitfield,
    config::Config,
    error::Error,
    tcp_wire::{Handshake, HandshakeCodec, Message, PeerCodec},
    torrent::InfoHash,
};

/// A connection with a remote peer that already exchanged handshakes.
///
/// A `Peer` is owned by exactly one task, it is never shared.
#[derive(Debug)]
pub struct Peer {
    pub addr: SocketAddr,
    /// The id that the peer sent on its handshake.
    pub id: PeerId,
    pub state: PeerState,
    socket: Framed<TcpStream, PeerCodec>,
    /// Deadline of each [`Peer::read`].
    read_timeout: Option<Duration>,
}

impl Peer {
    /// Dial the peer, exchange handshakes and try to read its bitfield.
    ///
    /// # Errors
    ///
    /// Fails if the peer can't be reached in time, doesn't answer the
    /// handshake in time, or answers with a different info hash.
    #[tracing::instrument(skip(info_hash, local_peer_id, config))]
    pub async fn connect(
        addr: SocketAddr,
        info_hash: InfoHash,
        local_peer_id: PeerId,
        pieces: usize,
        config: &Config,
    ) -> Result<Self, Error> {
        let socket = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectTimeout)??;

        let mut socket = Framed::new(socket, HandshakeCodec);
        let our_handshake = Handshake::new(info_hash, local_peer_id);

        debug!("{addr} sending handshake");
        socket.send(our_handshake.clone()).await?;

        let their_handshake =
            match timeout(config.handshake_timeout, socket.next()).await {
                Err(_) => return Err(Error::HandshakeTimeout),
                Ok(None) => return Err(Error::NoHandshake),
                Ok(Some(handshake)) => handshake?,
            };

        our_handshake.validate(&their_handshake)?;
        debug!("{addr} received their handshake");

        // the peer may have sent messages right after the handshake, they
        // are already in the read buffer, keep it.
        let old_parts = socket.into_parts();
        let mut new_parts = FramedParts::new::<Message>(
            old_parts.io,
            PeerCodec::new(config.max_message_size),
        );
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;
        let socket = Framed::from_parts(new_parts);

        let mut peer = Self {
            addr,
            id: their_handshake.peer_id,
            state: PeerState::new(pieces),
            socket,
            read_timeout: None,
        };

        // peers are not required to announce their pieces right away
        match timeout(config.bitfield_timeout, peer.socket.next()).await {
            Err(_) => debug!("{addr} did not send a bitfield"),
            Ok(None) => return Err(Error::PeerClosedSocket),
            Ok(Some(msg)) => {
                let msg = msg?;
                debug!("{addr} < {msg}");
                peer.apply_state(msg);
            }
        }

        Ok(peer)
    }

    /// Arm or clear the deadline of every following [`Peer::read`].
    pub fn set_read_timeout(&mut self, read_timeout: Option<Duration>) {
        self.read_timeout = read_timeout;
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Read the next message.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] when the read deadline is armed and expires,
    /// [`Error::PeerClosedSocket`] on EOF and any decode or IO error.
    pub async fn read(&mut self) -> Result<Message, Error> {
        let next = match self.read_timeout {
            Some(deadline) => timeout(deadline, self.socket.next())
                .await
                .map_err(|_| Error::Timeout)?,
            None => self.socket.next().await,
        };

        let msg = next.ok_or(Error::PeerClosedSocket)??;
        debug!("{} < {msg}", self.addr);

        Ok(msg)
    }

    /// Wait up to `wait` for a message that updates the state of the peer,
    /// such as `have` or `unchoke`. Running out of time is not an error.
    pub async fn idle(&mut self, wait: Duration) -> Result<(), Error> {
        match timeout(wait, self.socket.next()).await {
            Err(_) => Ok(()),
            Ok(None) => Err(Error::PeerClosedSocket),
            Ok(Some(msg)) => {
                let msg = msg?;
                debug!("{} < {msg}", self.addr);
                self.apply_state(msg);
                Ok(())
            }
        }
    }

    /// Update the choke state and the bitfield from a message received
    /// outside of a piece download.
    fn apply_state(&mut self, msg: Message) {
        match msg {
            Message::Bitfield(mut bitfield) => {
                let pieces = self.state.bitfield.len();

                if bitfield.len() != pieces.div_ceil(8) * 8 {
                    warn!(
                        "{} sent a bitfield of {} bits for {pieces} pieces, \
                         ignoring it",
                        self.addr,
                        bitfield.len()
                    );
                    return;
                }

                bitfield.truncate(pieces);
                self.state.bitfield = bitfield;
            }
            Message::Have(index) => {
                self.state.bitfield.set_piece(index as usize)
            }
            Message::Unchoke => self.state.choked = false,
            Message::Choke => self.state.choked = true,
            _ => {}
        }
    }

    pub async fn send(&mut self, msg: Message) -> Result<(), Error> {
        debug!("{} > {msg}", self.addr);
        self.socket.send(msg).await
    }

    pub async fn send_request(
        &mut self,
        index: u32,
        begin: u32,
        len: u32,
    ) -> Result<(), Error> {
        self.send(Message::request(index, begin, len)).await
    }

    pub async fn send_interested(&mut self) -> Result<(), Error> {
        self.send(Message::Interested).await
    }

    pub async fn send_not_interested(&mut self) -> Result<(), Error> {
        self.send(Message::NotInterested).await
    }

    pub async fn send_unchoke(&mut self) -> Result<(), Error> {
        self.send(Message::Unchoke).await
    }

    pub async fn send_have(&mut self, index: u32) -> Result<(), Error> {
        self.send(Message::have(index)).await
    }
}

#[cfg(test)]
pub mod tests {
    use tokio::{net::TcpListener, spawn, task::JoinHandle};

    use super::*;
    use crate::bitfield::{Bitfield, VczBitfield};

    pub(crate) const INFO_HASH: [u8; 20] = [3u8; 20];

    fn config() -> Config {
        Config {
            bitfield_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    /// Accept one connection, answer the handshake with `info_hash` and
    /// send `first` messages.
    pub(crate) async fn remote(
        info_hash: [u8; 20],
        first: Vec<Message>,
    ) -> (SocketAddr, JoinHandle<Framed<TcpStream, PeerCodec>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = Framed::new(socket, HandshakeCodec);

            let ours = socket.next().await.unwrap().unwrap();
            assert_eq!(ours.info_hash.0, INFO_HASH);
            socket.send(Handshake::new(info_hash, [9u8; 20])).await.unwrap();

            let old_parts = socket.into_parts();
            let mut new_parts =
                FramedParts::new::<Message>(old_parts.io, PeerCodec::default());
            new_parts.read_buf = old_parts.read_buf;
            new_parts.write_buf = old_parts.write_buf;
            let mut socket = Framed::from_parts(new_parts);

            for msg in first {
                socket.send(msg).await.unwrap();
            }
            socket
        });

        (addr, handle)
    }

    pub(crate) async fn connect(
        addr: SocketAddr,
        pieces: usize,
    ) -> Result<Peer, Error> {
        Peer::connect(
            addr,
            InfoHash(INFO_HASH),
            PeerId::generate(),
            pieces,
            &config(),
        )
        .await
    }

    #[tokio::test]
    async fn connect_with_bitfield() {
        let bitfield = Bitfield::from_payload(&[0b1010_0000]);
        let (addr, remote) =
            remote(INFO_HASH, vec![Message::Bitfield(bitfield)]).await;

        let peer = connect(addr, 3).await.unwrap();
        let _remote = remote.await.unwrap();

        assert_eq!(peer.id, PeerId::from([9u8; 20]));
        assert!(peer.state.choked);
        assert_eq!(peer.state.bitfield.len(), 3);
        assert!(peer.state.bitfield.has_piece(0));
        assert!(!peer.state.bitfield.has_piece(1));
        assert!(peer.state.bitfield.has_piece(2));
    }

    #[tokio::test]
    async fn connect_info_hash_mismatch() {
        let (addr, _remote) = remote([4u8; 20], vec![]).await;
        assert!(matches!(connect(addr, 3).await, Err(Error::InfoHashMismatch)));
    }

    #[tokio::test]
    async fn connect_without_bitfield() {
        let (addr, remote) = remote(INFO_HASH, vec![]).await;

        let peer = connect(addr, 3).await.unwrap();
        let _remote = remote.await.unwrap();

        assert_eq!(peer.state.bitfield.count_ones(), 0);
        assert!(peer.state.choked);
    }

    #[tokio::test]
    async fn connect_with_other_first_message() {
        let (addr, _remote) = remote(INFO_HASH, vec![Message::Unchoke]).await;
        let peer = connect(addr, 3).await.unwrap();
        assert!(!peer.state.choked);
        assert_eq!(peer.state.bitfield.count_ones(), 0);

        let (addr, _remote) = remote(INFO_HASH, vec![Message::Have(1)]).await;
        let peer = connect(addr, 3).await.unwrap();
        assert!(peer.state.bitfield.has_piece(1));
    }

    #[tokio::test]
    async fn connect_with_wrong_bitfield_len() {
        let bitfield = Bitfield::from_payload(&[0xff, 0xff]);
        let (addr, _remote) =
            remote(INFO_HASH, vec![Message::Bitfield(bitfield)]).await;

        let peer = connect(addr, 3).await.unwrap();
        assert_eq!(peer.state.bitfield.len(), 3);
        assert_eq!(peer.state.bitfield.count_ones(), 0);
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(connect(addr, 3).await, Err(Error::IO(_))));
    }

    #[tokio::test]
    async fn connect_handshake_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // accept and keep the socket open, but never answer
        let silent = spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let config = Config {
            handshake_timeout: Duration::from_millis(200),
            ..config()
        };
        let r = Peer::connect(
            addr,
            InfoHash(INFO_HASH),
            PeerId::generate(),
            3,
            &config,
        )
        .await;

        assert!(matches!(r, Err(Error::HandshakeTimeout)));
        silent.abort();
    }

    #[tokio::test]
    async fn read_and_send() {
        let (addr, remote) = remote(INFO_HASH, vec![]).await;
        let mut peer = connect(addr, 3).await.unwrap();
        let mut remote = remote.await.unwrap();

        peer.send_interested().await.unwrap();
        peer.send_request(1, 0, 16384).await.unwrap();
        assert_eq!(remote.next().await.unwrap().unwrap(), Message::Interested);
        assert_eq!(
            remote.next().await.unwrap().unwrap(),
            Message::request(1, 0, 16384)
        );

        remote.send(Message::KeepAlive).await.unwrap();
        remote.send(Message::Have(2)).await.unwrap();
        assert_eq!(peer.read().await.unwrap(), Message::KeepAlive);
        assert_eq!(peer.read().await.unwrap(), Message::Have(2));

        // idle applies state changes
        remote.send(Message::Unchoke).await.unwrap();
        peer.idle(Duration::from_secs(1)).await.unwrap();
        assert!(!peer.state.choked);

        // nothing to read
        peer.set_read_timeout(Some(Duration::from_millis(100)));
        assert!(matches!(peer.read().await, Err(Error::Timeout)));
        assert!(peer.idle(Duration::from_millis(100)).await.is_ok());

        drop(remote);
        peer.set_read_timeout(None);
        assert!(matches!(peer.read().await, Err(Error::PeerClosedSocket)));
    }
}
