//! Download of a single piece from a single peer.
//!
//! Requests are pipelined: up to `pipeline_depth` requests are in flight
//! at the same time, a new one is sent as soon as a block arrives.
use tracing::debug;

use crate::{
    bitfield::VczBitfield,
    config::Config,
    error::Error,
    peer::{Peer, PeerState},
    tcp_wire::{BlockInfo, Message},
    torrent::PieceWork,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceState {
    /// Waiting for an unchoke, or sending requests.
    Requesting,
    /// The pipeline is full, or every block was requested.
    WaitingData,
    Complete,
    Failed,
}

/// Progress of the download of one piece.
#[derive(Debug, Clone, PartialEq)]
pub struct PieceProgress {
    pub index: u32,
    /// Holds the whole piece.
    pub buf: Vec<u8>,
    /// Bytes received.
    pub downloaded: usize,
    /// Bytes requested.
    pub requested: usize,
    /// Requests in flight.
    pub backlog: usize,
    pub state: PieceState,
}

impl PieceProgress {
    pub fn new(index: usize, length: usize) -> Self {
        Self {
            index: index as u32,
            buf: vec![0u8; length],
            downloaded: 0,
            requested: 0,
            backlog: 0,
            state: PieceState::Requesting,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.buf.len()
    }

    /// The next block to request, if the peer is not choking us, the
    /// pipeline has room and there is something left to request.
    pub fn next_request(
        &mut self,
        choked: bool,
        depth: usize,
        block_len: u32,
    ) -> Option<BlockInfo> {
        if choked || self.backlog >= depth || self.requested >= self.buf.len()
        {
            self.update_state();
            return None;
        }

        let len = (block_len as usize).min(self.buf.len() - self.requested);
        let block =
            BlockInfo::new(self.index, self.requested as u32, len as u32);

        self.requested += len;
        self.backlog += 1;
        self.update_state();

        Some(block)
    }

    /// Handle a message received while downloading the piece.
    pub fn handle(
        &mut self,
        peer: &mut PeerState,
        msg: Message,
    ) -> Result<(), Error> {
        match &msg {
            Message::Unchoke => peer.choked = false,
            Message::Choke => peer.choked = true,
            Message::Have(index) => peer.bitfield.set_piece(*index as usize),
            Message::Piece(_) => {
                let n = msg
                    .parse_piece(self.index, &mut self.buf)
                    .inspect_err(|_| self.state = PieceState::Failed)?;
                self.downloaded += n;
                self.backlog = self.backlog.saturating_sub(1);
            }
            Message::KeepAlive
            | Message::Interested
            | Message::NotInterested
            | Message::Bitfield(_)
            | Message::Request(_)
            | Message::Cancel(_) => {}
        }

        self.update_state();
        Ok(())
    }

    fn update_state(&mut self) {
        if self.state == PieceState::Failed {
            return;
        }
        self.state = if self.is_complete() {
            PieceState::Complete
        } else if self.backlog > 0 {
            PieceState::WaitingData
        } else {
            PieceState::Requesting
        };
    }
}

/// Download the whole piece of `work` from `peer`, without verifying it.
///
/// Every read must complete within `piece_timeout`, the deadline is removed
/// from the peer before returning, on success or failure.
#[tracing::instrument(
    skip_all,
    fields(remote = %peer.addr, piece = work.index)
)]
pub async fn download_piece(
    peer: &mut Peer,
    work: &PieceWork,
    config: &Config,
) -> Result<Vec<u8>, Error> {
    peer.set_read_timeout(Some(config.piece_timeout));
    let r = attempt(peer, work, config).await;
    peer.set_read_timeout(None);
    r
}

async fn attempt(
    peer: &mut Peer,
    work: &PieceWork,
    config: &Config,
) -> Result<Vec<u8>, Error> {
    let mut progress = PieceProgress::new(work.index, work.length);

    while !progress.is_complete() {
        while let Some(block) = progress.next_request(
            peer.state.choked,
            config.pipeline_depth,
            config.block_len,
        ) {
            peer.send_request(block.index, block.begin, block.len).await?;
        }

        let msg = peer.read().await?;
        progress.handle(&mut peer.state, msg)?;
    }

    debug!("{} downloaded piece {}", peer.addr, work.index);

    Ok(progress.buf)
}
