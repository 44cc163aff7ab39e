//! Bounded inter-stage queues.
//!
//! Two overflow policies cover the pipeline's needs: the frame path prefers
//! fresh data and evicts the oldest queued item under pressure, while the
//! alert path blocks the producer so no accepted alert is ever dropped.
//! Eviction happens on the producer side so the evicted item (and its pixel
//! buffer) comes back to the thread that can recycle it.

use crossbeam_channel::{bounded as cb_bounded, Receiver, Sender, TryRecvError, TrySendError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room. Frame path.
    DropOldest,
    /// Block until the consumer makes room. Alert path.
    Block,
}

/// Outcome of a push, carrying back items the queue could not keep.
#[derive(Debug)]
pub enum Push<T> {
    Delivered,
    /// Delivered, after evicting the oldest queued item.
    Evicted(T),
    /// Consumer is gone; the item comes back to the caller.
    Closed(T),
}

/// Producer handle. Single-producer by design: eviction reads from the same
/// channel the consumer drains, which is only race-free with one pusher.
pub struct QueueSender<T> {
    tx: Sender<T>,
    /// Present only under `DropOldest`; shares the data channel for eviction.
    evict_rx: Option<Receiver<T>>,
    /// Disconnects when the `QueueReceiver` is dropped. Needed because the
    /// eviction clone keeps the data channel itself alive.
    alive_rx: Receiver<()>,
    policy: OverflowPolicy,
    dropped: u64,
}

/// Consumer handle.
pub struct QueueReceiver<T> {
    rx: Receiver<T>,
    _alive: Sender<()>,
}

/// Create a bounded queue with the given overflow policy.
pub fn bounded<T>(capacity: usize, policy: OverflowPolicy) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = cb_bounded(capacity);
    let (alive_tx, alive_rx) = cb_bounded::<()>(0);
    let evict_rx = match policy {
        OverflowPolicy::DropOldest => Some(rx.clone()),
        OverflowPolicy::Block => None,
    };
    (
        QueueSender {
            tx,
            evict_rx,
            alive_rx,
            policy,
            dropped: 0,
        },
        QueueReceiver {
            rx,
            _alive: alive_tx,
        },
    )
}

impl<T> QueueSender<T> {
    pub fn push(&mut self, item: T) -> Push<T> {
        match self.policy {
            OverflowPolicy::Block => match self.tx.send(item) {
                Ok(()) => Push::Delivered,
                Err(e) => Push::Closed(e.into_inner()),
            },
            OverflowPolicy::DropOldest => {
                let evict_rx = self.evict_rx.as_ref().expect("drop-oldest queue");
                let mut item = item;
                let mut evicted = None;
                loop {
                    if self.consumer_gone() {
                        return Push::Closed(item);
                    }
                    match self.tx.try_send(item) {
                        Ok(()) => {
                            return match evicted {
                                Some(old) => Push::Evicted(old),
                                None => Push::Delivered,
                            };
                        }
                        Err(TrySendError::Full(back)) => {
                            item = back;
                            if let Ok(old) = evict_rx.try_recv() {
                                self.dropped += 1;
                                // A consumer race can evict twice; only the
                                // last eviction is returned for recycling.
                                evicted = Some(old);
                            }
                        }
                        Err(TrySendError::Disconnected(back)) => return Push::Closed(back),
                    }
                }
            }
        }
    }

    /// Items evicted by this sender so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn consumer_gone(&self) -> bool {
        matches!(self.alive_rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl<T> QueueReceiver<T> {
    /// Blocking receive; `None` once the producer is gone and the queue is
    /// drained.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn try_iter(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.try_iter()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn drop_oldest_evicts_in_fifo_order() {
        let (mut tx, rx) = bounded::<u32>(3, OverflowPolicy::DropOldest);

        for i in 1..=3 {
            assert!(matches!(tx.push(i), Push::Delivered));
        }
        match tx.push(4) {
            Push::Evicted(old) => assert_eq!(old, 1),
            other => panic!("expected eviction, got {other:?}"),
        }
        match tx.push(5) {
            Push::Evicted(old) => assert_eq!(old, 2),
            other => panic!("expected eviction, got {other:?}"),
        }

        assert_eq!(tx.dropped(), 2);
        let drained: Vec<u32> = rx.try_iter().collect();
        assert_eq!(drained, vec![3, 4, 5]);
    }

    #[test]
    fn occupancy_never_exceeds_capacity() {
        let (mut tx, rx) = bounded::<u32>(4, OverflowPolicy::DropOldest);
        for i in 0..100 {
            tx.push(i);
            assert!(rx.len() <= 4);
        }
        assert_eq!(rx.len(), 4);
        // The survivors are the freshest items.
        let drained: Vec<u32> = rx.try_iter().collect();
        assert_eq!(drained, vec![96, 97, 98, 99]);
    }

    #[test]
    fn blocking_queue_delivers_everything() {
        let (mut tx, rx) = bounded::<u32>(2, OverflowPolicy::Block);
        let consumer = thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(v) = rx.recv() {
                seen.push(v);
            }
            seen
        });

        for i in 0..50 {
            assert!(matches!(tx.push(i), Push::Delivered));
        }
        drop(tx);
        let seen = consumer.join().unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<u32>>());
    }

    #[test]
    fn push_after_consumer_drop_returns_item() {
        let (mut tx, rx) = bounded::<u32>(2, OverflowPolicy::DropOldest);
        drop(rx);
        match tx.push(7) {
            Push::Closed(v) => assert_eq!(v, 7),
            other => panic!("expected closed, got {other:?}"),
        }
    }

    #[test]
    fn blocking_push_after_consumer_drop_returns_item() {
        let (mut tx, rx) = bounded::<u32>(2, OverflowPolicy::Block);
        drop(rx);
        match tx.push(9) {
            Push::Closed(v) => assert_eq!(v, 9),
            other => panic!("expected closed, got {other:?}"),
        }
    }
}
