use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    bitfield::VczBitfield,
    config::Config,
    error::Error,
    peer::Peer,
    piece::download_piece,
    torrent::{
        retry::{on_failure, Failure, RetryDecision},
        PieceResult, PieceWork, Session, WorkQueue,
    },
};

/// How long a worker whose peer has none of the queued pieces waits for a
/// `have` before looking at the queue again.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Counters shared by the workers of a torrent.
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Workers connected right now.
    pub active: AtomicUsize,
    /// Workers that ever connected to their peer.
    pub connected: AtomicUsize,
}

/// Downloads pieces from a single peer until the queue is closed or the
/// connection breaks.
#[derive(Debug)]
pub struct Worker {
    addr: SocketAddr,
    session: Arc<Session>,
    config: Arc<Config>,
    queue: Arc<WorkQueue>,
    results: mpsc::Sender<PieceResult>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    pub fn new(
        addr: SocketAddr,
        session: Arc<Session>,
        config: Arc<Config>,
        queue: Arc<WorkQueue>,
        results: mpsc::Sender<PieceResult>,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self { addr, session, config, queue, results, stats }
    }

    /// A peer that can't be reached contributes nothing, the worker exits
    /// without touching the queue.
    #[tracing::instrument(skip(self), fields(remote = %self.addr))]
    pub async fn run(self) {
        let mut peer = match Peer::connect(
            self.addr,
            self.session.info_hash,
            self.session.peer_id.clone(),
            self.session.piece_count(),
            &self.config,
        )
        .await
        {
            Ok(peer) => peer,
            Err(e) => {
                warn!("{} could not connect: {e}", self.addr);
                return;
            }
        };

        info!(
            "{} connected, it has {} pieces",
            self.addr,
            peer.state.bitfield.count_ones()
        );

        self.stats.connected.fetch_add(1, Ordering::Relaxed);
        self.stats.active.fetch_add(1, Ordering::Relaxed);

        match self.work(&mut peer).await {
            Ok(()) => debug!("{} queue closed", self.addr),
            Err(e) => warn!("{} dropping peer: {e}", self.addr),
        }

        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }

    async fn work(&self, peer: &mut Peer) -> Result<(), Error> {
        // optimistic, we don't wait for the peer to unchoke us
        peer.send_unchoke().await?;
        peer.send_interested().await?;

        // pieces in a row that the peer doesn't have
        let mut misses = 0;

        while let Some(work) = self.queue.pop().await {
            if !peer.state.bitfield.has_piece(work.index) {
                self.requeue(work, Failure::PeerLacksPiece).await;
                misses += 1;

                // went through the whole queue, wait for the peer to
                // announce something new.
                if misses > self.session.piece_count() {
                    misses = 0;
                    peer.idle(IDLE_WAIT).await?;
                } else {
                    tokio::task::yield_now().await;
                }
                continue;
            }
            misses = 0;

            let buf = match download_piece(peer, &work, &self.config).await {
                Ok(buf) => buf,
                Err(e) => match self.requeue(work, Failure::from(&e)).await {
                    RetryDecision::RequeueAndContinue => continue,
                    RetryDecision::RequeueAndTerminateWorker => return Err(e),
                },
            };

            if let Err(e) = work.verify(&buf) {
                warn!("{} {e}", self.addr);
                match self.requeue(work, Failure::Integrity).await {
                    RetryDecision::RequeueAndContinue => {
                        // let another worker pick the piece up
                        tokio::task::yield_now().await;
                        continue;
                    }
                    RetryDecision::RequeueAndTerminateWorker => return Err(e),
                }
            }

            let have = peer.send_have(work.index as u32).await;

            // the collector is gone, the download is over
            if self
                .results
                .send(PieceResult { index: work.index, buf })
                .await
                .is_err()
            {
                return Ok(());
            }

            have?;
        }

        Ok(())
    }

    async fn requeue(
        &self,
        work: PieceWork,
        failure: Failure,
    ) -> RetryDecision {
        let decision = on_failure(&failure);
        if failure != Failure::PeerLacksPiece {
            debug!(
                "{} piece {} failed with {failure:?}, {decision:?}",
                self.addr, work.index
            );
        }
        self.queue.push(work).await;
        decision
    }
}
