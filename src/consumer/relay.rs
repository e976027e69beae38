//! FIFO buffer between the fetch loop and the consumer.
//!
//! A thin layer over tokio's mpsc channels so both the bounded and the
//! unbounded flavour expose the same push/pop surface.

use tokio::sync::mpsc;

/// The receiving side was dropped or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Closed;

/// Creates a relay queue holding at most `capacity` items, or any number
/// when `capacity` is `0`.
pub(crate) fn relay<T>(capacity: usize) -> (RelaySender<T>, RelayReceiver<T>) {
    if capacity == 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        (RelaySender::Unbounded(tx), RelayReceiver::Unbounded(rx))
    } else {
        let (tx, rx) = mpsc::channel(capacity);
        (RelaySender::Bounded(tx), RelayReceiver::Bounded(rx))
    }
}

pub(crate) enum RelaySender<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

impl<T> RelaySender<T> {
    /// Slots currently free, `None` when unbounded.
    pub(crate) fn free_slots(&self) -> Option<usize> {
        match self {
            RelaySender::Bounded(tx) => Some(tx.capacity()),
            RelaySender::Unbounded(_) => None,
        }
    }

    /// Waits until at least one slot is free.
    pub(crate) async fn wait_for_capacity(&self) -> Result<(), Closed> {
        match self {
            // The permit is released on drop; we only want the wake-up.
            RelaySender::Bounded(tx) => tx.reserve().await.map(drop).map_err(|_| Closed),
            RelaySender::Unbounded(tx) if tx.is_closed() => Err(Closed),
            RelaySender::Unbounded(_) => Ok(()),
        }
    }

    /// Appends an item, waiting for space when full. Hands the item back if
    /// the receiver is gone.
    pub(crate) async fn push(&self, item: T) -> Result<(), T> {
        match self {
            RelaySender::Bounded(tx) => tx.send(item).await.map_err(|e| e.0),
            RelaySender::Unbounded(tx) => tx.send(item).map_err(|e| e.0),
        }
    }
}

pub(crate) enum RelayReceiver<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> RelayReceiver<T> {
    /// Removes the head, waiting while empty. `None` once the sender is
    /// gone and the buffer is drained.
    pub(crate) async fn pop(&mut self) -> Option<T> {
        match self {
            RelayReceiver::Bounded(rx) => rx.recv().await,
            RelayReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    pub(crate) fn try_pop(&mut self) -> Option<T> {
        match self {
            RelayReceiver::Bounded(rx) => rx.try_recv().ok(),
            RelayReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Refuses further pushes; buffered items can still be popped.
    pub(crate) fn close(&mut self) {
        match self {
            RelayReceiver::Bounded(rx) => rx.close(),
            RelayReceiver::Unbounded(rx) => rx.close(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            RelayReceiver::Bounded(rx) => rx.len(),
            RelayReceiver::Unbounded(rx) => rx.len(),
        }
    }
}
