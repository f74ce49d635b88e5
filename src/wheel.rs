use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::Clock;
use crate::delay_queue::DelayQueue;
use crate::slot::Slot;
use crate::task::{TaskState, TimerTask};

/// One layer of the hierarchical wheel: a ring of slots with a fixed tick.
///
/// The layer covers `tick_ms * slot_count` milliseconds starting at its
/// needle. Tasks that fall past that horizon are delegated to a lazily
/// created coarser layer whose tick equals this layer's whole span, so the
/// reachable horizon grows geometrically with each layer. As the driver
/// advances the needles, tasks drain back down from coarse layers into finer
/// ones until they sit in the layer whose tick is smaller than their
/// remaining time. That is the cascade.
///
/// The needle only moves forward, and only the driver moves it (under its
/// exclusive lock); insertions read it concurrently under the shared lock.
pub(crate) struct Wheel {
    tick_ms: i64,
    slot_count: usize,
    span_ms: i64,
    needle: AtomicI64,
    slots: Vec<Arc<Slot>>,
    queue: Arc<DelayQueue<Arc<Slot>>>,
    counter: Arc<AtomicUsize>,
    clock: Arc<dyn Clock>,
    next: RwLock<Option<Arc<Wheel>>>,
}

impl Wheel {
    pub(crate) fn new(
        tick_ms: i64,
        slot_count: usize,
        start_ms: i64,
        queue: Arc<DelayQueue<Arc<Slot>>>,
        counter: Arc<AtomicUsize>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let slots = (0..slot_count)
            .map(|_| Arc::new(Slot::new(counter.clone(), clock.clone())))
            .collect();
        Arc::new(Self {
            tick_ms,
            slot_count,
            span_ms: tick_ms * slot_count as i64,
            needle: AtomicI64::new(start_ms - start_ms.rem_euclid(tick_ms)),
            slots,
            queue,
            counter,
            clock,
            next: RwLock::new(None),
        })
    }

    pub(crate) fn needle(&self) -> i64 {
        self.needle.load(Ordering::Acquire)
    }

    /// Place a task into the hierarchy.
    ///
    /// Returns `false` when the task has already left the `Wait` state or
    /// its expiry falls inside the current tick; the caller decides what
    /// "due now" means (for the driver: execute immediately).
    ///
    /// A coarse layer can compute a tick-aligned slot expiry that already
    /// lies in the past. The slot is enqueued regardless: the delay queue
    /// treats it as immediately due and the next flush cascades its tasks
    /// into a finer layer.
    pub(crate) fn add(&self, task: &Arc<TimerTask>) -> bool {
        if task.state() != TaskState::Wait {
            return false;
        }
        let expiry = task.expiry_ms();
        let needle = self.needle();
        if expiry < needle + self.tick_ms {
            return false;
        }
        if expiry < needle + self.span_ms {
            let tick_index = expiry.div_euclid(self.tick_ms);
            let slot = &self.slots[tick_index.rem_euclid(self.slot_count as i64) as usize];
            slot.add(task);
            if slot.set_expiration(tick_index * self.tick_ms) {
                self.queue.try_add(slot.clone());
            }
            return true;
        }
        self.next_layer().add(task)
    }

    /// Advance the needle to the tick containing `timestamp_ms` and ripple
    /// the advance into the coarser layers. No-op for timestamps inside the
    /// current tick, which also keeps the needle monotone.
    pub(crate) fn advance(&self, timestamp_ms: i64) {
        if timestamp_ms >= self.needle() + self.tick_ms {
            self.needle.store(
                timestamp_ms - timestamp_ms.rem_euclid(self.tick_ms),
                Ordering::Release,
            );
            let next = self.next.read().clone();
            if let Some(next) = next {
                next.advance(timestamp_ms);
            }
        }
    }

    /// Coarser layer, created on first demand. Double-checked so concurrent
    /// inserters agree on a single instance.
    fn next_layer(&self) -> Arc<Wheel> {
        if let Some(next) = self.next.read().as_ref() {
            return next.clone();
        }
        let mut guard = self.next.write();
        if let Some(next) = guard.as_ref() {
            return next.clone();
        }
        tracing::debug!(
            "[Layer] creating layer with tick {}ms above {}ms",
            self.span_ms,
            self.tick_ms
        );
        let next = Wheel::new(
            self.span_ms,
            self.slot_count,
            self.needle(),
            self.queue.clone(),
            self.counter.clone(),
            self.clock.clone(),
        );
        *guard = Some(next.clone());
        next
    }

    #[cfg(test)]
    fn has_next_layer(&self) -> bool {
        self.next.read().is_some()
    }
}
