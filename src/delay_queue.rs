use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::Clock;

/// An item with a deadline. A delay of zero or less means the item is due.
pub trait Delayed {
    fn delay_ms(&self) -> i64;
}

impl<T: Delayed> Delayed for Arc<T> {
    fn delay_ms(&self) -> i64 {
        (**self).delay_ms()
    }
}

/// Cooperative cancellation flag shared between a blocked consumer and the
/// thread asking it to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Heap entry keyed on the absolute due instant, captured when the item is
/// inserted. Ordering is reversed so the earliest deadline sits at the top.
struct Entry<T> {
    due_ms: i64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.due_ms.cmp(&self.due_ms)
    }
}

/// Concurrent priority queue of [`Delayed`] items.
///
/// Producers insert from any thread; a single consumer blocks in
/// [`take`](Self::take) until the head item is due or the token is
/// cancelled. Items whose delay is already zero or negative are dequeuable
/// immediately.
pub struct DelayQueue<T> {
    heap: Mutex<BinaryHeap<Entry<T>>>,
    available: Condvar,
    clock: Arc<dyn Clock>,
}

impl<T: Delayed> DelayQueue<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
            clock,
        }
    }

    /// Insert an item. Wakes the consumer when the new item becomes the
    /// earliest deadline. Always succeeds; the queue is unbounded.
    pub fn try_add(&self, item: T) -> bool {
        let due_ms = self.clock.now_ms().saturating_add(item.delay_ms());
        let mut heap = self.heap.lock();
        let new_head = heap.peek().map_or(true, |head| due_ms < head.due_ms);
        heap.push(Entry { due_ms, item });
        if new_head {
            self.available.notify_all();
        }
        true
    }

    /// Block until the head item is due, then pop it.
    ///
    /// Returns `None` once `cancel` fires; a waiter parked inside this call
    /// is released by [`wake`](Self::wake).
    pub fn take(&self, cancel: &CancelToken) -> Option<T> {
        let mut heap = self.heap.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let Some(head) = heap.peek() else {
                self.available.wait(&mut heap);
                continue;
            };
            let wait_ms = head.due_ms - self.clock.now_ms();
            if wait_ms <= 0 {
                return heap.pop().map(|entry| entry.item);
            }
            let _timed_out = self
                .available
                .wait_for(&mut heap, Duration::from_millis(wait_ms as u64));
        }
    }

    /// Pop the head item only if it is already due.
    pub fn poll(&self) -> Option<T> {
        let mut heap = self.heap.lock();
        let due = heap
            .peek()
            .is_some_and(|head| head.due_ms <= self.clock.now_ms());
        if due {
            heap.pop().map(|entry| entry.item)
        } else {
            None
        }
    }

    pub fn clear(&self) {
        self.heap.lock().clear();
    }

    /// Wake a consumer parked in [`take`](Self::take) so it can observe a
    /// cancelled token. Taking the lock first closes the window where a
    /// consumer has checked the token but not yet parked; the notify would
    /// otherwise be lost and the consumer would sleep through it.
    pub fn wake(&self) {
        let _guard = self.heap.lock();
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}
