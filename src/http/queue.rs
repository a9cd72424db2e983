//! Bounded hand-over queues
//!
//! The only channel between API callers, the transport thread and the
//! client's worker. Producers block for a bounded time on a full queue; the
//! worker never blocks when taking items.

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// Bounded multi-producer queue
#[derive(Debug)]
pub struct Queue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Queue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Queue { tx, rx }
    }

    /// Enqueue an item
    ///
    /// Waits up to `timeout` for space, forever with `None`. The item is
    /// handed back if the queue stayed full.
    pub fn send(&self, item: T, timeout: Option<Duration>) -> Result<(), T> {
        match timeout {
            None => self.tx.send(item).map_err(|err| err.into_inner()),
            Some(timeout) if timeout.is_zero() => self.tx.try_send(item).map_err(|err| match err {
                TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
            }),
            Some(timeout) => self.tx.send_timeout(item, timeout).map_err(|err| match err {
                SendTimeoutError::Timeout(item) | SendTimeoutError::Disconnected(item) => item,
            }),
        }
    }

    /// Take the oldest item without waiting
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Remove and drop all queued items, returning how many were dropped
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo() {
        let queue = Queue::new(4);
        queue.send(1, None).unwrap();
        queue.send(2, None).unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_recv(), Some(1));
        assert_eq!(queue.try_recv(), Some(2));
        assert_eq!(queue.try_recv(), None);
    }

    #[test]
    fn test_full_queue_returns_item() {
        let queue = Queue::new(1);
        queue.send("a", Some(Duration::ZERO)).unwrap();

        assert_eq!(queue.send("b", Some(Duration::ZERO)), Err("b"));
        assert_eq!(queue.send("c", Some(Duration::from_millis(10))), Err("c"));
    }

    #[test]
    fn test_blocked_sender_proceeds_after_recv() {
        let queue = Arc::new(Queue::new(1));
        queue.send(1, None).unwrap();

        let sender = {
            let queue = queue.clone();
            thread::spawn(move || queue.send(2, Some(Duration::from_secs(5))))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.try_recv(), Some(1));
        assert!(sender.join().unwrap().is_ok());
        assert_eq!(queue.try_recv(), Some(2));
    }

    #[test]
    fn test_clear() {
        let queue = Queue::new(10);
        for i in 0..5 {
            queue.send(i, None).unwrap();
        }

        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
    }
}
