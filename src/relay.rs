//! Single-producer/single-consumer relay between a background task and a
//! lazily consumed stream.
//!
//! The producer pushes items with [`RelaySender::put`] and closes the relay
//! with [`RelaySender::finish`]. Closing is an explicit frame in the channel,
//! so no item value can ever be confused with the end of the stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_stream::stream;
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::error::RelayError;

#[derive(Debug)]
enum Frame<T> {
    Item(T),
    Close,
}

/// Creates a connected relay pair.
pub fn channel<T>() -> (RelaySender<T>, RelayReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let finished = Arc::new(AtomicBool::new(false));
    (
        RelaySender {
            tx,
            finished: finished.clone(),
        },
        RelayReceiver {
            rx,
            finished,
            closed: false,
        },
    )
}

/// Producer half. Cloning shares the same queue and finished flag.
#[derive(Debug)]
pub struct RelaySender<T> {
    tx: mpsc::UnboundedSender<Frame<T>>,
    finished: Arc<AtomicBool>,
}

impl<T> Clone for RelaySender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            finished: self.finished.clone(),
        }
    }
}

impl<T> RelaySender<T> {
    /// Enqueues an item for the consumer. Never waits.
    pub fn put(&self, item: T) -> Result<(), RelayError> {
        if self.is_finished() {
            return Err(RelayError::Closed);
        }
        self.tx
            .send(Frame::Item(item))
            .map_err(|_| RelayError::Disconnected)
    }

    /// Marks the relay finished and enqueues a close frame.
    ///
    /// Repeated calls enqueue repeated close frames; the consumer stops at the
    /// first one.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        if self.tx.send(Frame::Close).is_err() {
            tracing::debug!("relay finished after receiver was dropped");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Returns a guard that finishes the relay when dropped, including during
    /// unwinding.
    pub fn finish_on_drop(&self) -> FinishGuard<T> {
        FinishGuard {
            sender: self.clone(),
        }
    }
}

#[must_use = "the relay is finished as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FinishGuard<T> {
    sender: RelaySender<T>,
}

impl<T> Drop for FinishGuard<T> {
    fn drop(&mut self) {
        self.sender.finish();
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct RelayReceiver<T> {
    rx: mpsc::UnboundedReceiver<Frame<T>>,
    finished: Arc<AtomicBool>,
    closed: bool,
}

impl<T> RelayReceiver<T> {
    /// Waits for the next item. Returns `None` once a close frame arrives or
    /// every sender has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        if self.closed {
            return None;
        }
        match self.rx.recv().await {
            Some(Frame::Item(item)) => Some(item),
            Some(Frame::Close) => {
                debug_assert!(self.finished.load(Ordering::SeqCst));
                self.closed = true;
                self.rx.close();
                None
            }
            None => {
                self.closed = true;
                None
            }
        }
    }

    /// Turns the receiver into a finite stream of the relayed items.
    pub fn stream(self) -> impl Stream<Item = T> {
        let mut receiver = self;
        stream! {
            while let Some(item) = receiver.recv().await {
                yield item;
            }
        }
    }
}
