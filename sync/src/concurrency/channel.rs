//! The bounded, ordered conduit between the producer and consumer lanes.
//!
//! [`BoundedChannel`] is the sole backpressure mechanism of the pipeline: a
//! consumer that falls behind causes the producer's upstream read loop to
//! suspend in [`BoundedChannel::put`], never to drop or reorder messages.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;

use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;

#[derive(Debug)]
struct Inner<T> {
    /// FIFO buffer; items are only pushed/popped while holding the lock, and
    /// the lock is never held across an await point.
    queue: Mutex<VecDeque<T>>,
    /// Counts buffered items; consumers suspend on it while the queue is empty.
    items: Semaphore,
    /// Counts free capacity; producers suspend on it while the queue is full.
    /// Closed when the channel closes, which fails suspended producers.
    space: Semaphore,
    closed: AtomicBool,
    capacity: usize,
}

/// An ordered, capacity-bounded conduit with blocking `put`/`take` and a
/// one-way `close` transition.
///
/// Ordering is strict FIFO: the sequence delivered by [`BoundedChannel::take`]
/// is identical to the sequence accepted by [`BoundedChannel::put`]. After
/// [`BoundedChannel::close`], `put` fails with [`ErrorKind::ChannelClosed`]
/// while `take` keeps draining already-buffered items before signaling
/// end-of-stream.
#[derive(Debug)]
pub struct BoundedChannel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> BoundedChannel<T> {
    /// Creates a channel buffering at most `capacity` items.
    ///
    /// A zero capacity could never make progress; it is rejected by config
    /// validation before a channel is ever built.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be greater than zero");

        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                items: Semaphore::new(0),
                space: Semaphore::new(capacity),
                closed: AtomicBool::new(false),
                capacity,
            }),
        }
    }

    /// Enqueues `item`, suspending while the channel is at capacity.
    ///
    /// Fails with [`ErrorKind::ChannelClosed`] once the channel has been
    /// closed, including when `close` happens while this call is suspended.
    pub async fn put(&self, item: T) -> SyncResult<()> {
        if self.is_closed() {
            return Err(sync_error!(
                ErrorKind::ChannelClosed,
                "Channel is closed, no further messages are accepted"
            ));
        }

        let Ok(permit) = self.inner.space.acquire().await else {
            return Err(sync_error!(
                ErrorKind::ChannelClosed,
                "Channel was closed while waiting for capacity"
            ));
        };
        // The permit represents one slot of capacity now occupied by the
        // item; it is given back by `take`, not on drop.
        permit.forget();

        self.inner
            .queue
            .lock()
            .unwrap()
            .push_back(item);
        self.inner.items.add_permits(1);

        Ok(())
    }

    /// Dequeues the next item, suspending while the channel is empty.
    ///
    /// Returns [`None`] once the channel is closed and fully drained.
    pub async fn take(&self) -> Option<T> {
        loop {
            // The items semaphore is never closed, so acquisition can only
            // fail if the channel is dropped mid-call, which clones prevent.
            let Ok(permit) = self.inner.items.acquire().await else {
                return None;
            };
            permit.forget();

            let item = self.inner.queue.lock().unwrap().pop_front();
            match item {
                Some(item) => {
                    // Freed capacity; a no-op for waiters once `space` is
                    // closed, which is fine since producers are rejected then.
                    self.inner.space.add_permits(1);
                    return Some(item);
                }
                // Woken by `close` without a buffered item: re-arm the wakeup
                // for any other waiter and signal end-of-stream.
                None if self.is_closed() => {
                    self.inner.items.add_permits(1);
                    return None;
                }
                None => continue,
            }
        }
    }

    /// Closes the channel. One-way: there is no reopening.
    ///
    /// Suspended producers are woken and fail with
    /// [`ErrorKind::ChannelClosed`]; suspended consumers are woken so they
    /// can drain the buffer and observe end-of-stream.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.space.close();
        self.inner.items.add_permits(1);
    }

    /// Returns true once the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of currently buffered items.
    pub fn len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// Returns true when no items are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let channel = BoundedChannel::new(4);

        for i in 0..4 {
            channel.put(i).await.unwrap();
        }

        for i in 0..4 {
            assert_eq!(channel.take().await, Some(i));
        }
    }

    #[tokio::test]
    async fn put_suspends_at_capacity_until_take() {
        let channel = BoundedChannel::new(1);
        channel.put(1).await.unwrap();

        // The channel is full, so the second put must suspend.
        let blocked = timeout(Duration::from_millis(50), channel.put(2)).await;
        assert!(blocked.is_err(), "put should suspend at capacity");

        let producer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.put(2).await })
        };

        assert_eq!(channel.take().await, Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(channel.take().await, Some(2));
    }

    #[tokio::test]
    async fn put_fails_once_closed() {
        let channel = BoundedChannel::new(2);
        channel.close();

        let err = channel.put(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
    }

    #[tokio::test]
    async fn close_wakes_a_suspended_producer() {
        let channel = BoundedChannel::new(1);
        channel.put(1).await.unwrap();

        let producer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.put(2).await })
        };

        // Give the producer a chance to suspend on capacity first.
        tokio::task::yield_now().await;
        channel.close();

        let err = producer.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
    }

    #[tokio::test]
    async fn take_drains_buffered_items_after_close() {
        let channel = BoundedChannel::new(4);
        channel.put("a").await.unwrap();
        channel.put("b").await.unwrap();
        channel.close();

        assert_eq!(channel.take().await, Some("a"));
        assert_eq!(channel.take().await, Some("b"));
        assert_eq!(channel.take().await, None);
        // End-of-stream is sticky.
        assert_eq!(channel.take().await, None);
    }

    #[tokio::test]
    async fn take_suspends_until_an_item_arrives() {
        let channel = BoundedChannel::new(2);

        let blocked = timeout(Duration::from_millis(50), channel.take()).await;
        assert!(blocked.is_err(), "take should suspend while empty");

        channel.put(7).await.unwrap();
        assert_eq!(channel.take().await, Some(7));
    }

    #[tokio::test]
    async fn close_wakes_a_suspended_consumer() {
        let channel = BoundedChannel::<u32>::new(2);

        let consumer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.take().await })
        };

        tokio::task::yield_now().await;
        channel.close();

        assert_eq!(consumer.await.unwrap(), None);
    }
}
