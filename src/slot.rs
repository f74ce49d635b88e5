use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::delay_queue::Delayed;
use crate::task::{TaskState, TimerTask};

/// Sentinel expiration meaning "not currently enqueued in the delay queue".
const NOT_SCHEDULED: i64 = -1;

/// One bucket of a wheel layer.
///
/// Holds the tasks whose expiries fall within a single tick of the layer,
/// in insertion order. The expiration field doubles as the slot's priority
/// in the shared delay queue and as the enqueue guard: it changes at most
/// once per epoch, so the slot is enqueued at most once per epoch.
pub(crate) struct Slot {
    tasks: Mutex<Vec<Arc<TimerTask>>>,
    expiration: AtomicI64,
    counter: Arc<AtomicUsize>,
    clock: Arc<dyn Clock>,
}

impl Slot {
    pub(crate) fn new(counter: Arc<AtomicUsize>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            expiration: AtomicI64::new(NOT_SCHEDULED),
            counter,
            clock,
        }
    }

    /// Append a task and publish this slot as its location.
    ///
    /// A cancel that fired between the caller's state check and the link
    /// below would find an empty back-link and leave the task behind, so the
    /// state is re-checked once the link is visible.
    pub(crate) fn add(self: &Arc<Self>, task: &Arc<TimerTask>) {
        {
            let mut tasks = self.tasks.lock();
            task.set_slot(Arc::downgrade(self));
            self.counter.fetch_add(1, Ordering::Relaxed);
            tasks.push(task.clone());
        }
        if task.state() != TaskState::Wait {
            task.detach();
        }
    }

    /// Unlink `task` if this slot still holds it. Returns `false` when the
    /// task has been relocated (or already removed); the caller re-reads the
    /// back-link and retries there.
    pub(crate) fn remove(&self, task: &TimerTask) -> bool {
        let mut tasks = self.tasks.lock();
        if !task.is_linked_to(self) {
            return false;
        }
        let Some(index) = tasks
            .iter()
            .position(|held| std::ptr::eq(Arc::as_ptr(held), task))
        else {
            return false;
        };
        tasks.remove(index);
        task.clear_slot();
        self.counter.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// Store a new expiration, reporting whether the value changed.
    ///
    /// The `true` result is the caller's license to enqueue the slot into
    /// the delay queue for this epoch.
    pub(crate) fn set_expiration(&self, expiration_ms: i64) -> bool {
        self.expiration.swap(expiration_ms, Ordering::AcqRel) != expiration_ms
    }

    pub(crate) fn expiration(&self) -> i64 {
        self.expiration.load(Ordering::Acquire)
    }

    /// Drain every task and hand each to `forward` in insertion order.
    ///
    /// The expiration is reset while the list lock is held, so by the time
    /// the tasks are forwarded the slot is already available for a fresh
    /// epoch. Forwarding happens outside the lock: it may re-link a task
    /// into another slot of the hierarchy.
    pub(crate) fn flush(&self, mut forward: impl FnMut(Arc<TimerTask>)) {
        let drained = {
            let mut tasks = self.tasks.lock();
            let drained = std::mem::take(&mut *tasks);
            for task in &drained {
                task.clear_slot();
                self.counter.fetch_sub(1, Ordering::Relaxed);
            }
            self.expiration.store(NOT_SCHEDULED, Ordering::Release);
            drained
        };
        for task in drained {
            forward(task);
        }
    }

    #[cfg(test)]
    pub(crate) fn task_len(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Delayed for Slot {
    fn delay_ms(&self) -> i64 {
        (self.expiration() - self.clock.now_ms()).max(0)
    }
}
