use std::hint;

use crossbeam_queue::ArrayQueue;
use tokio::sync::{Notify, Semaphore, TryAcquireError};

/// Bounded MPMC FIFO with both non-blocking and awaiting endpoints.
///
/// The lock-free queue holds the items; the semaphore counts them so a
/// consumer can await a non-empty queue without spinning. An item is
/// pushed *before* its permit is added, so a held permit always
/// corresponds to an element that is already visible to [`ArrayQueue::pop`].
/// The notify wakes producers blocked on a full queue.
pub(crate) struct ItemQueue<T> {
    items: ArrayQueue<T>,
    ready: Semaphore,
    space: Notify,
}

/// The queue was closed while a consumer was waiting.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Closed;

impl<T> ItemQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity),
            ready: Semaphore::new(0),
            space: Notify::new(),
        }
    }

    /// Non-blocking enqueue. Returns the value if the queue is full.
    pub(crate) fn offer(&self, value: T) -> Result<(), T> {
        self.items.push(value)?;
        self.ready.add_permits(1);
        Ok(())
    }

    /// Enqueue, waiting for space if the queue is full.
    pub(crate) async fn put(&self, value: T) {
        let mut value = value;
        loop {
            // Register interest before retrying so a pop between the failed
            // offer and the await cannot be missed.
            let space = self.space.notified();
            match self.offer(value) {
                Ok(()) => return,
                Err(v) => value = v,
            }
            space.await;
        }
    }

    /// Non-blocking dequeue. Returns `None` if the queue is empty or closed.
    pub(crate) fn poll(&self) -> Option<T> {
        match self.ready.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Some(self.pop_reserved())
            }
            Err(TryAcquireError::NoPermits | TryAcquireError::Closed) => None,
        }
    }

    /// Dequeue, waiting for an item if the queue is empty.
    ///
    /// Cancel-safe: dropping the future before it resolves consumes
    /// nothing.
    pub(crate) async fn take(&self) -> Result<T, Closed> {
        let permit = self.ready.acquire().await.map_err(|_| Closed)?;
        permit.forget();
        Ok(self.pop_reserved())
    }

    /// Pop an element a permit has already been acquired for.
    fn pop_reserved(&self) -> T {
        loop {
            if let Some(value) = self.items.pop() {
                self.space.notify_one();
                return value;
            }
            // Unreachable in practice: permits are only added after the
            // push completes.
            hint::spin_loop();
        }
    }

    /// Wake all blocked consumers with [`Closed`]. Elements already queued
    /// stay in place and can only be removed via [`ItemQueue::drain_pop`].
    pub(crate) fn close(&self) {
        self.ready.close();
    }

    /// Dequeue bypassing the item semaphore. Only used to empty the queue
    /// after [`ItemQueue::close`], when no consumer can race us.
    pub(crate) fn drain_pop(&self) -> Option<T> {
        self.items.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.items.capacity()
    }
}

impl<T> std::fmt::Debug for ItemQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::ItemQueue;

    #[tokio::test]
    async fn offer_and_poll() {
        let q = ItemQueue::new(2);
        assert!(q.offer(1).is_ok());
        assert!(q.offer(2).is_ok());
        assert_eq!(q.offer(3), Err(3));
        assert_eq!(q.poll(), Some(1));
        assert_eq!(q.poll(), Some(2));
        assert_eq!(q.poll(), None);
    }

    #[tokio::test]
    async fn take_waits_for_offer() {
        let q = std::sync::Arc::new(ItemQueue::new(1));
        let q2 = q.clone();
        let taker = tokio::spawn(async move { q2.take().await });
        tokio::task::yield_now().await;
        assert!(q.offer(7).is_ok());
        assert_eq!(taker.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn put_waits_for_space() {
        let q = std::sync::Arc::new(ItemQueue::new(1));
        assert!(q.offer(1).is_ok());
        let q2 = q.clone();
        let putter = tokio::spawn(async move {
            q2.put(2).await;
        });
        tokio::task::yield_now().await;
        assert_eq!(q.poll(), Some(1));
        putter.await.unwrap();
        assert_eq!(q.poll(), Some(2));
    }

    #[tokio::test]
    async fn close_wakes_takers() {
        let q = std::sync::Arc::new(ItemQueue::<u8>::new(1));
        let q2 = q.clone();
        let taker = tokio::spawn(async move { q2.take().await });
        tokio::task::yield_now().await;
        q.close();
        assert!(taker.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn drain_after_close() {
        let q = ItemQueue::new(2);
        assert!(q.offer(1).is_ok());
        assert!(q.offer(2).is_ok());
        q.close();
        assert_eq!(q.poll(), None);
        assert_eq!(q.drain_pop(), Some(1));
        assert_eq!(q.drain_pop(), Some(2));
        assert_eq!(q.drain_pop(), None);
    }
}
