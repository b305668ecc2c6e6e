use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel operation cancelled")]
    Cancelled,
    #[error("channel peer dropped")]
    Closed,
}

/// Fixed-capacity FIFO between exactly one producer and one consumer.
///
/// Neither handle is `Clone`, so the single-producer/single-consumer
/// contract is enforced by ownership.
pub fn bounded<T>(capacity: usize) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelSender { tx }, ChannelReceiver { rx })
}

#[derive(Debug)]
pub struct ChannelSender<T> {
    tx: mpsc::Sender<T>,
}

#[derive(Debug)]
pub struct ChannelReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> ChannelSender<T> {
    /// Enqueue `item`, waiting while the channel is full. If `cancel` fires
    /// first the item is dropped and `Cancelled` is returned.
    pub async fn push(&self, item: T, cancel: &CancellationToken) -> Result<(), ChannelError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChannelError::Cancelled),
            res = self.tx.send(item) => res.map_err(|_| ChannelError::Closed),
        }
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl<T> ChannelReceiver<T> {
    /// Dequeue the oldest item, waiting while the channel is empty.
    pub async fn pop(&mut self, cancel: &CancellationToken) -> Result<T, ChannelError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChannelError::Cancelled),
            item = self.rx.recv() => item.ok_or(ChannelError::Closed),
        }
    }

    /// Dequeue without waiting. `None` when nothing is queued.
    pub fn try_pop(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rx.max_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq, task};

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let (tx, mut rx) = bounded(4);
        let cancel = CancellationToken::new();
        for i in 0..4 {
            tx.push(i, &cancel).await.unwrap();
        }
        assert_eq!(tx.len(), 4);
        for i in 0..4 {
            assert_eq!(rx.pop(&cancel).await.unwrap(), i);
        }
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn push_beyond_capacity_waits_for_a_pop() {
        let (tx, mut rx) = bounded(2);
        let cancel = CancellationToken::new();
        tx.push(1, &cancel).await.unwrap();
        tx.push(2, &cancel).await.unwrap();

        let mut third = task::spawn(tx.push(3, &cancel));
        assert_pending!(third.poll());

        assert_eq!(rx.pop(&cancel).await.unwrap(), 1);
        assert!(third.is_woken());
        assert_ready!(third.poll()).unwrap();
        drop(third);

        assert_eq!(rx.pop(&cancel).await.unwrap(), 2);
        assert_eq!(rx.pop(&cancel).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn blocked_pop_observes_cancellation() {
        let (_tx, mut rx) = bounded::<u32>(1);
        let cancel = CancellationToken::new();
        let mut pop = task::spawn(rx.pop(&cancel));
        assert_pending!(pop.poll());
        cancel.cancel();
        assert_ready_eq!(pop.poll(), Err(ChannelError::Cancelled));
    }

    #[tokio::test]
    async fn blocked_push_observes_cancellation() {
        let (tx, rx) = bounded(1);
        let cancel = CancellationToken::new();
        tx.push(1, &cancel).await.unwrap();
        let mut push = task::spawn(tx.push(2, &cancel));
        assert_pending!(push.poll());
        cancel.cancel();
        assert_ready_eq!(push.poll(), Err(ChannelError::Cancelled));
        drop(push);
        assert_eq!(rx.len(), 1);
    }

    #[tokio::test]
    async fn dropped_peer_reports_closed() {
        let (tx, mut rx) = bounded::<u32>(1);
        let cancel = CancellationToken::new();
        drop(tx);
        assert_eq!(rx.pop(&cancel).await, Err(ChannelError::Closed));
        assert_eq!(rx.try_pop(), None);
    }
}
