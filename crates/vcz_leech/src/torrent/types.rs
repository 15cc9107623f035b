use std::{fmt::Display, net::SocketAddr, ops::Deref, str::FromStr};

use serde::{Deserialize, Serialize};
use sha1_smol::Sha1;

use crate::{error::Error, peer::PeerId};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InfoHash(pub [u8; 20]);

impl Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Deref for InfoHash {
    type Target = [u8; 20];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s[..10])
    }
}

impl From<InfoHash> for [u8; 20] {
    fn from(value: InfoHash) -> Self {
        value.0
    }
}

impl From<[u8; 20]> for InfoHash {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl FromStr for InfoHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buf = [0u8; 20];
        hex::decode_to_slice(s, &mut buf)?;
        Ok(Self(buf))
    }
}

/// Everything the engine needs to know to download one file.
///
/// It is immutable once built and shared by all workers.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub name: String,
    pub info_hash: InfoHash,
    /// Our own id, sent on every handshake.
    pub peer_id: PeerId,
    /// SHA-1 of each piece.
    pub piece_hashes: Vec<[u8; 20]>,
    pub piece_length: usize,
    /// Total length of the file.
    pub length: usize,
    pub peers: Vec<SocketAddr>,
}

impl Session {
    pub fn new(
        name: impl Into<String>,
        info_hash: impl Into<InfoHash>,
        peer_id: impl Into<PeerId>,
        piece_hashes: Vec<[u8; 20]>,
        piece_length: usize,
        length: usize,
        peers: Vec<SocketAddr>,
    ) -> Result<Self, Error> {
        let session = Self {
            name: name.into(),
            info_hash: info_hash.into(),
            peer_id: peer_id.into(),
            piece_hashes,
            piece_length,
            length,
            peers,
        };
        session.validate()?;
        Ok(session)
    }

    /// The number of hashes must match the number of pieces that `length`
    /// splits into.
    pub fn validate(&self) -> Result<(), Error> {
        let expected = if self.piece_length == 0 {
            // no piece length can describe a non-empty file
            usize::MAX
        } else {
            self.length.div_ceil(self.piece_length)
        };

        if self.piece_hashes.len() != expected {
            return Err(Error::LengthMismatch {
                hashes: self.piece_hashes.len(),
                expected,
                length: self.length,
            });
        }
        Ok(())
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Byte range of the piece in the file, the last piece is clipped to
    /// the file length.
    pub fn piece_bounds(&self, index: usize) -> (usize, usize) {
        let begin = (index * self.piece_length).min(self.length);
        let end = (begin + self.piece_length).min(self.length);
        (begin, end)
    }

    pub fn piece_len(&self, index: usize) -> usize {
        let (begin, end) = self.piece_bounds(index);
        end - begin
    }

    /// One work item per piece, in order.
    pub fn work_items(&self) -> Vec<PieceWork> {
        self.piece_hashes
            .iter()
            .enumerate()
            .map(|(index, hash)| PieceWork {
                index,
                hash: *hash,
                length: self.piece_len(index),
            })
            .collect()
    }
}

/// A piece that still has to be downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceWork {
    pub index: usize,
    pub hash: [u8; 20],
    pub length: usize,
}

impl PieceWork {
    /// Compare the SHA-1 of `buf` with the expected hash of the piece.
    pub fn verify(&self, buf: &[u8]) -> Result<(), Error> {
        let hash = Sha1::from(buf).digest().bytes();
        if hash != self.hash {
            return Err(Error::PieceInvalid(self.index));
        }
        Ok(())
    }
}

/// A downloaded and verified piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceResult {
    pub index: usize,
    pub buf: Vec<u8>,
}

/// Snapshot of the download, published after every accepted piece.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    /// Pieces accepted so far.
    pub downloaded: usize,
    pub total: usize,
    /// Workers connected to a peer right now.
    pub active_peers: usize,
    pub last_piece: Option<usize>,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.downloaded as f64 / self.total as f64 * 100.0
    }
}

/// The session as written in a TOML file.
///
/// ```toml
/// name = "debian.iso"
/// info_hash = "<40 hex chars>"
/// piece_length = 262144
/// length = 1000000
/// pieces = ["<40 hex chars>", "..."]
/// peers = ["127.0.0.1:6881"]
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionFile {
    pub name: String,
    pub info_hash: String,
    /// Generated when missing.
    pub peer_id: Option<String>,
    pub piece_length: usize,
    pub length: usize,
    pub pieces: Vec<String>,
    pub peers: Vec<String>,
}

impl SessionFile {
    pub fn from_toml(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }
}

impl TryFrom<SessionFile> for Session {
    type Error = Error;

    fn try_from(file: SessionFile) -> Result<Self, Self::Error> {
        let info_hash: InfoHash = file.info_hash.parse()?;

        let peer_id = match file.peer_id {
            Some(id) => id.parse()?,
            None => PeerId::generate(),
        };

        let piece_hashes = file
            .pieces
            .iter()
            .map(|hash| -> Result<[u8; 20], Error> {
                let mut buf = [0u8; 20];
                hex::decode_to_slice(hash, &mut buf)?;
                Ok(buf)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let peers = file
            .peers
            .into_iter()
            .map(|peer| {
                peer.parse::<SocketAddr>()
                    .map_err(|_| Error::PeerSocketAddr(peer))
            })
            .collect::<Result<Vec<SocketAddr>, Error>>()?;

        Session::new(
            file.name,
            info_hash,
            peer_id,
            piece_hashes,
            file.piece_length,
            file.length,
            peers,
        )
    }
}
