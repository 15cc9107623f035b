//! Queue of the pieces that still have to be downloaded, shared by all the
//! workers of a torrent.
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
};

use tokio::sync::{Mutex, Notify};

use crate::{
    bitfield::{Bitfield, VczBitfield},
    torrent::PieceWork,
};

#[derive(Debug)]
struct Inner {
    items: VecDeque<PieceWork>,
    /// Pieces accepted by the collector, they are never handed out again.
    completed: Bitfield,
}

/// Each item is handed to a single worker, which either completes it or
/// pushes it back.
#[derive(Debug)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    closed: AtomicBool,
}

impl WorkQueue {
    pub fn new(items: Vec<PieceWork>, pieces: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: items.into(),
                completed: Bitfield::from_piece(pieces),
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Put an item back at the end of the queue, never waits for room.
    pub async fn push(&self, item: PieceWork) {
        if self.is_closed() {
            return;
        }

        let mut inner = self.inner.lock().await;
        if inner.completed.has_piece(item.index) {
            return;
        }
        inner.items.push_back(item);
        drop(inner);

        self.notify.notify_one();
    }

    /// Wait for the next item, `None` once the queue is closed.
    pub async fn pop(&self) -> Option<PieceWork> {
        loop {
            // register before checking, so a push or close that happens
            // between the check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return None;
            }

            {
                let mut inner = self.inner.lock().await;
                while let Some(item) = inner.items.pop_front() {
                    if !inner.completed.has_piece(item.index) {
                        return Some(item);
                    }
                }
            }

            notified.await;
        }
    }

    /// Mark the piece as done, copies of it still in the queue are dropped.
    pub async fn complete(&self, index: usize) {
        let mut inner = self.inner.lock().await;
        inner.completed.set_piece(index);
        inner.items.retain(|item| item.index != index);
    }

    /// Wake every waiting worker, all following pops return `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
