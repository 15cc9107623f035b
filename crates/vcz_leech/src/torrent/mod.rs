//! Download of a whole torrent from many peers at the same time.
//!
//! Each peer gets its own [`Worker`] task, the workers pull pieces from a
//! shared [`WorkQueue`] and send the verified pieces to the collector, which
//! assembles the file.
pub mod retry;
mod types;
pub mod work_queue;
mod worker;

// re-exports
pub use types::*;
pub use work_queue::WorkQueue;
pub use worker::{Worker, WorkerStats};

use std::sync::{atomic::Ordering, Arc};

use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    bitfield::{Bitfield, VczBitfield},
    config::Config,
    error::Error,
};

/// A download session over a fixed list of peers.
#[derive(Debug)]
pub struct Torrent {
    pub session: Arc<Session>,
    pub config: Arc<Config>,
    progress_tx: watch::Sender<Progress>,
}

impl Torrent {
    pub fn new(session: Session, config: Config) -> Self {
        let (progress_tx, _) = watch::channel(Progress {
            total: session.piece_count(),
            ..Default::default()
        });

        Self {
            session: Arc::new(session),
            config: Arc::new(config),
            progress_tx,
        }
    }

    /// Receive a new [`Progress`] after every accepted piece.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress_tx.subscribe()
    }

    /// Download every piece and return the assembled file.
    ///
    /// # Errors
    ///
    /// [`Error::NoPeers`] if no peer could be reached, [`Error::Stalled`] if
    /// every worker exited, or no piece was accepted within the configured
    /// `stall_timeout`, while pieces were still missing.
    #[tracing::instrument(skip(self), fields(name = %self.session.name))]
    pub async fn download(&self) -> Result<Vec<u8>, Error> {
        let total = self.session.piece_count();
        let mut buf = vec![0u8; self.session.length];

        if total == 0 {
            return Ok(buf);
        }

        info!(
            "downloading {} pieces of {} bytes from {} peers",
            total,
            self.session.piece_length,
            self.session.peers.len()
        );

        let queue = Arc::new(WorkQueue::new(self.session.work_items(), total));
        let (results_tx, mut results_rx) = mpsc::channel(1);
        let stats = Arc::new(WorkerStats::default());
        let mut workers = JoinSet::new();

        for addr in &self.session.peers {
            let worker = Worker::new(
                *addr,
                self.session.clone(),
                self.config.clone(),
                queue.clone(),
                results_tx.clone(),
                stats.clone(),
            );
            workers.spawn(worker.run());
        }

        // the channel closes once every worker exited
        drop(results_tx);

        let r = self.collect(&mut results_rx, &queue, &stats, &mut buf).await;

        queue.close();
        workers.shutdown().await;

        r.map(|_| buf)
    }

    /// Copy verified pieces into `buf` until all of them arrived.
    async fn collect(
        &self,
        results: &mut mpsc::Receiver<PieceResult>,
        queue: &WorkQueue,
        stats: &WorkerStats,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let total = self.session.piece_count();
        let mut claimed = Bitfield::from_piece(total);
        let mut done = 0;

        while done < total {
            let next = match self.config.stall_timeout {
                Some(stall_timeout) => {
                    match timeout(stall_timeout, results.recv()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!("no piece in {stall_timeout:?}, giving up");
                            return Err(Error::Stalled { done, total });
                        }
                    }
                }
                None => results.recv().await,
            };

            let Some(result) = next else {
                if stats.connected.load(Ordering::Relaxed) == 0 {
                    return Err(Error::NoPeers);
                }
                warn!("every peer is gone with {done} of {total} pieces");
                return Err(Error::Stalled { done, total });
            };

            let index = result.index;
            if !claim(&self.session, &mut claimed, buf, &result) {
                continue;
            }

            queue.complete(index).await;
            done += 1;

            let progress = Progress {
                downloaded: done,
                total,
                active_peers: stats.active.load(Ordering::Relaxed),
                last_piece: Some(index),
            };

            info!(
                "({:.2}%) downloaded piece #{index} from {} peers",
                progress.percent(),
                progress.active_peers
            );

            self.progress_tx.send_replace(progress);
        }

        Ok(())
    }
}

/// Copy a verified piece to its byte range in `buf` and mark it as claimed.
/// Returns `false`, leaving `buf` untouched, when the piece was already
/// claimed or doesn't fit the session.
fn claim(
    session: &Session,
    claimed: &mut Bitfield,
    buf: &mut [u8],
    result: &PieceResult,
) -> bool {
    let index = result.index;

    if claimed.has_piece(index) {
        debug!("piece {index} was already downloaded, discarding it");
        return false;
    }

    if index >= session.piece_count() {
        warn!("piece {index} is out of range, discarding it");
        return false;
    }

    let (begin, end) = session.piece_bounds(index);
    if result.buf.len() != end - begin {
        warn!("piece {index} has {} bytes, discarding it", result.buf.len());
        return false;
    }

    buf[begin..end].copy_from_slice(&result.buf);
    claimed.set_piece(index);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            "file",
            [1u8; 20],
            [2u8; 20],
            vec![[0u8; 20]; 3],
            4,
            10,
            vec![],
        )
        .unwrap()
    }

    fn result(index: usize, byte: u8, len: usize) -> PieceResult {
        PieceResult { index, buf: vec![byte; len] }
    }

    #[test]
    fn claim_copies_to_the_piece_range() {
        let session = session();
        let mut claimed = Bitfield::from_piece(3);
        let mut buf = vec![0u8; 10];

        assert!(claim(&session, &mut claimed, &mut buf, &result(1, 7, 4)));
        assert!(claim(&session, &mut claimed, &mut buf, &result(2, 9, 2)));

        assert_eq!(buf, [0, 0, 0, 0, 7, 7, 7, 7, 9, 9]);
        assert!(!claimed.has_piece(0));
        assert!(claimed.has_piece(1));
        assert!(claimed.has_piece(2));
    }

    #[test]
    fn duplicate_piece_is_discarded() {
        let session = session();
        let mut claimed = Bitfield::from_piece(3);
        let mut buf = vec![0u8; 10];

        assert!(claim(&session, &mut claimed, &mut buf, &result(0, 1, 4)));
        let before = buf.clone();

        assert!(!claim(&session, &mut claimed, &mut buf, &result(0, 5, 4)));
        assert_eq!(buf, before);
        assert_eq!(claimed.count_ones(), 1);
    }

    #[test]
    fn misfit_piece_is_discarded() {
        let session = session();
        let mut claimed = Bitfield::from_piece(3);
        let mut buf = vec![0u8; 10];

        // the last piece is 2 bytes long
        assert!(!claim(&session, &mut claimed, &mut buf, &result(2, 1, 4)));
        assert!(!claim(&session, &mut claimed, &mut buf, &result(3, 1, 4)));
        assert!(!claim(&session, &mut claimed, &mut buf, &result(0, 1, 0)));

        assert_eq!(buf, vec![0u8; 10]);
        assert_eq!(claimed.count_ones(), 0);
    }
}
