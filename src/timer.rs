use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::delay_queue::{CancelToken, DelayQueue};
use crate::error::Error;
use crate::executor::{Executor, ThreadExecutor};
use crate::slot::Slot;
use crate::task::{TaskState, TimerTask};
use crate::wheel::Wheel;

/// Handle returned for every scheduled task.
///
/// The handle stays valid after the task fires; it then merely reports the
/// terminal state.
#[derive(Clone)]
pub struct TaskHandle {
    task: Arc<TimerTask>,
}

impl TaskHandle {
    /// Absolute expiry of the task in clock milliseconds.
    pub fn expiry_ms(&self) -> i64 {
        self.task.expiry_ms()
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Cancel the task. Returns `true` iff the cancellation won against
    /// firing; `false` means the task is already running, finished or
    /// cancelled, which is a normal outcome and not an error.
    pub fn cancel(&self) -> bool {
        self.task.cancel()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("expiry_ms", &self.expiry_ms())
            .field("state", &self.state())
            .finish()
    }
}

/// Fluent construction for [`Timer`].
pub struct TimerBuilder {
    tick: Duration,
    slot_count: usize,
    start_ms: Option<i64>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn Executor>,
}

impl Default for TimerBuilder {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            slot_count: 60,
            start_ms: None,
            clock: Arc::new(SystemClock),
            executor: Arc::new(ThreadExecutor),
        }
    }
}

impl TimerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Granularity of the innermost layer. Must be at least one millisecond.
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Ring size of every layer. Must be positive; a power of two is not
    /// required.
    pub fn slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    /// Starting instant of the wheel. Defaults to the clock's current time.
    pub fn start_ms(mut self, start_ms: i64) -> Self {
        self.start_ms = Some(start_ms);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn build(self) -> Result<Timer, Error> {
        let tick_ms = self.tick.as_millis() as i64;
        if tick_ms < 1 {
            return Err(Error::InvalidTick(self.tick));
        }
        if self.slot_count == 0 {
            return Err(Error::InvalidSlotCount);
        }
        let counter = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(DelayQueue::new(self.clock.clone()));
        let start_ms = self.start_ms.unwrap_or_else(|| self.clock.now_ms());
        let root = Wheel::new(
            tick_ms,
            self.slot_count,
            start_ms,
            queue.clone(),
            counter.clone(),
            self.clock.clone(),
        );
        Ok(Timer {
            inner: Arc::new(Inner {
                root,
                queue,
                counter,
                clock: self.clock,
                executor: self.executor,
                lock: RwLock::new(()),
            }),
            worker: Mutex::new(None),
        })
    }
}

/// Hierarchical wheel timer.
///
/// Producers on any thread schedule one-shot tasks; a single driver thread
/// (started with [`start`](Self::start)) blocks on the shared delay queue,
/// advances the wheel to each due slot and flushes it. Flushed tasks either
/// cascade into a finer layer or, once no layer can hold them any longer,
/// are handed to the executor.
///
/// Insertions take the shared side of a readers-writer lock so they proceed
/// in parallel with each other; the driver holds the exclusive side while it
/// advances needles and flushes slots, so an insert can never compute a slot
/// position against a needle that is moving under it.
pub struct Timer {
    inner: Arc<Inner>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    cancel: CancelToken,
    join: JoinHandle<()>,
}

struct Inner {
    root: Arc<Wheel>,
    queue: Arc<DelayQueue<Arc<Slot>>>,
    counter: Arc<AtomicUsize>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn Executor>,
    lock: RwLock<()>,
}

impl Timer {
    pub fn builder() -> TimerBuilder {
        TimerBuilder::new()
    }

    /// Schedule `action` to run once, `delay` from now.
    pub fn add_task(
        &self,
        delay: Duration,
        action: impl FnOnce() + Send + 'static,
    ) -> TaskHandle {
        let expiry_ms = self
            .inner
            .clock
            .now_ms()
            .saturating_add(delay.as_millis() as i64);
        self.add_task_at(expiry_ms, action)
    }

    /// Schedule `action` to run once at an absolute instant. An instant in
    /// the past dispatches the action immediately.
    pub fn add_task_at(
        &self,
        expiry_ms: i64,
        action: impl FnOnce() + Send + 'static,
    ) -> TaskHandle {
        let task = Arc::new(TimerTask::new(expiry_ms, Box::new(action)));
        {
            let _shared = self.inner.lock.read();
            self.inner.place(&task);
        }
        TaskHandle { task }
    }

    /// Number of tasks currently linked somewhere in the hierarchy.
    pub fn task_count(&self) -> usize {
        self.inner.counter.load(Ordering::Relaxed)
    }

    /// Spawn the driver thread. No-op when already running.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let cancel = CancelToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        let join = std::thread::Builder::new()
            .name("wheeltimer-driver".into())
            .spawn(move || inner.drive(&token))
            .expect("failed to spawn driver thread");
        *worker = Some(Worker { cancel, join });
    }

    /// Stop the driver and drop every pending slot expiration. Tasks still
    /// linked in the wheel will not fire, even after a later
    /// [`start`](Self::start); in-flight actions are not interrupted.
    pub fn stop(&self) {
        self.halt_worker();
        self.inner.queue.clear();
    }

    /// Stop the driver but keep every queued expiration. Scheduled tasks
    /// survive and fire after [`resume`](Self::resume); a task whose expiry
    /// passes while paused fires promptly on resume rather than being
    /// dropped.
    pub fn pause(&self) {
        self.halt_worker();
    }

    /// Restart the driver after [`pause`](Self::pause).
    pub fn resume(&self) {
        self.start();
    }

    fn halt_worker(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            self.inner.queue.wake();
            if worker.join.join().is_err() {
                tracing::error!("[Driver] driver thread panicked");
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.halt_worker();
    }
}

impl Inner {
    /// Insert a task into the wheel, or dispatch it when no layer will take
    /// it: an expiry inside (or before) the current tick means due now.
    ///
    /// This same path serves fresh submissions and the driver's re-insertion
    /// of flushed tasks, which is what promotes a task from a coarse layer
    /// into a finer one as the needles advance.
    fn place(&self, task: &Arc<TimerTask>) {
        if !self.root.add(task) && task.state() == TaskState::Wait {
            tracing::trace!("[Place] task due now. expiry_ms: {}", task.expiry_ms());
            let task = task.clone();
            self.executor.spawn(Box::new(move || task.run()));
        }
    }

    fn drive(&self, cancel: &CancelToken) {
        tracing::debug!("[Driver] started");
        while !cancel.is_cancelled() {
            let Some(slot) = self.queue.take(cancel) else {
                continue;
            };
            let _exclusive = self.lock.write();
            let mut due = slot;
            loop {
                self.root.advance(due.expiration());
                due.flush(|task| self.place(&task));
                match self.queue.poll() {
                    // drain everything that is already due before letting
                    // inserts back in
                    Some(next) => due = next,
                    None => break,
                }
            }
        }
        tracing::debug!("[Driver] stopped");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::ManualClock;
    use crate::executor::InlineExecutor;

    #[test]
    fn build_rejects_sub_millisecond_tick() {
        let result = Timer::builder().tick(Duration::from_micros(500)).build();
        assert!(matches!(result, Err(Error::InvalidTick(_))));
    }

    #[test]
    fn build_rejects_zero_slots() {
        let result = Timer::builder()
            .tick(Duration::from_millis(10))
            .slot_count(0)
            .build();
        assert!(matches!(result, Err(Error::InvalidSlotCount)));
    }

    #[test]
    fn past_expiry_dispatches_inline_without_a_driver() {
        let clock = Arc::new(ManualClock::new(10_000));
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = Timer::builder()
            .tick(Duration::from_millis(100))
            .slot_count(8)
            .start_ms(10_000)
            .shared_clock(clock)
            .executor(InlineExecutor)
            .build()
            .expect("valid config");

        let handle = {
            let fired = fired.clone();
            timer.add_task_at(9_000, move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert_eq!(handle.state(), TaskState::Success);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.task_count(), 0);
    }

    #[test]
    fn start_twice_keeps_single_worker() {
        let timer = Timer::builder()
            .tick(Duration::from_millis(10))
            .build()
            .expect("valid config");
        timer.start();
        timer.start();
        timer.stop();
    }
}
