use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::slot::Slot;

pub(crate) type Action = Box<dyn FnOnce() + Send>;

/// Lifecycle of a scheduled task.
///
/// `Wait` is the only non-terminal state a task can be observed in from the
/// outside before it fires. The transitions out of `Wait` race against each
/// other; exactly one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Scheduled, sitting in a slot (or about to be).
    Wait = 0,
    /// The action is currently executing.
    Running = 1,
    /// The action returned normally.
    Success = 2,
    /// The action panicked.
    Fail = 3,
    /// Cancelled before the action started.
    Cancel = 4,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Wait,
            1 => TaskState::Running,
            2 => TaskState::Success,
            3 => TaskState::Fail,
            _ => TaskState::Cancel,
        }
    }
}

/// One scheduled unit of work: an absolute expiry, an action to invoke at
/// most once, and a back-link to whichever slot currently holds it.
pub(crate) struct TimerTask {
    expiry_ms: i64,
    action: Mutex<Option<Action>>,
    state: AtomicU8,
    /// Published location of this task. Cleared on unlink, replaced on every
    /// relocation between slots.
    slot: Mutex<Weak<Slot>>,
}

impl TimerTask {
    pub(crate) fn new(expiry_ms: i64, action: Action) -> Self {
        Self {
            expiry_ms,
            action: Mutex::new(Some(action)),
            state: AtomicU8::new(TaskState::Wait as u8),
            slot: Mutex::new(Weak::new()),
        }
    }

    pub(crate) fn expiry_ms(&self) -> i64 {
        self.expiry_ms
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Fire the task. The `Wait -> Running` transition is the linearization
    /// point against [`cancel`](Self::cancel); the loser becomes a no-op.
    /// The action itself runs outside any lock so a slow action cannot block
    /// cancellers of other tasks sharing its old slot.
    pub(crate) fn run(&self) {
        if !self.transition(TaskState::Wait, TaskState::Running) {
            return;
        }
        self.detach();
        let Some(action) = self.action.lock().take() else {
            self.state
                .store(TaskState::Fail as u8, Ordering::Release);
            return;
        };
        match catch_unwind(AssertUnwindSafe(action)) {
            Ok(()) => self
                .state
                .store(TaskState::Success as u8, Ordering::Release),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("non-string panic payload");
                tracing::warn!("[Run] timer action panicked: {}", reason);
                self.state.store(TaskState::Fail as u8, Ordering::Release);
            }
        }
    }

    /// Cancel the task. Returns `true` iff this call won the race out of
    /// `Wait`; the action will then never be invoked.
    pub(crate) fn cancel(&self) -> bool {
        if self.transition(TaskState::Wait, TaskState::Cancel) {
            self.detach();
            true
        } else {
            false
        }
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unlink from whichever slot currently holds the task.
    ///
    /// A concurrent flush may relocate the task between the back-link read
    /// and the unlink; the slot then reports failure and the loop re-reads
    /// the fresh location. The loop ends when an unlink succeeds or the
    /// back-link is gone.
    pub(crate) fn detach(&self) {
        loop {
            let Some(slot) = self.current_slot() else {
                return;
            };
            if slot.remove(self) {
                return;
            }
        }
    }

    pub(crate) fn current_slot(&self) -> Option<Arc<Slot>> {
        self.slot.lock().upgrade()
    }

    pub(crate) fn set_slot(&self, slot: Weak<Slot>) {
        *self.slot.lock() = slot;
    }

    pub(crate) fn clear_slot(&self) {
        *self.slot.lock() = Weak::new();
    }

    pub(crate) fn is_linked_to(&self, slot: &Slot) -> bool {
        std::ptr::eq(self.slot.lock().as_ptr(), slot)
    }
}

impl std::fmt::Debug for TimerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerTask")
            .field("expiry_ms", &self.expiry_ms)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(expiry_ms: i64, fired: &Arc<AtomicUsize>) -> TimerTask {
        let fired = fired.clone();
        TimerTask::new(
            expiry_ms,
            Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn run_invokes_action_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let task = counting_task(10, &fired);
        task.run();
        assert_eq!(task.state(), TaskState::Success);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        task.run();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_wins_over_later_run() {
        let fired = Arc::new(AtomicUsize::new(0));
        let task = counting_task(10, &fired);
        assert!(task.cancel());
        assert_eq!(task.state(), TaskState::Cancel);

        task.run();
        assert_eq!(task.state(), TaskState::Cancel);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_after_run_reports_false() {
        let fired = Arc::new(AtomicUsize::new(0));
        let task = counting_task(10, &fired);
        task.run();
        assert!(!task.cancel());
        assert_eq!(task.state(), TaskState::Success);
    }

    #[test]
    fn second_cancel_reports_false() {
        let fired = Arc::new(AtomicUsize::new(0));
        let task = counting_task(10, &fired);
        assert!(task.cancel());
        assert!(!task.cancel());
    }

    #[test]
    fn panicking_action_marks_failure() {
        let task = TimerTask::new(10, Box::new(|| panic!("boom")));
        task.run();
        assert_eq!(task.state(), TaskState::Fail);
    }
}
