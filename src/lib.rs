//! Hierarchical timer wheel for large numbers of one-shot delayed tasks.
//!
//! Tasks are bucketed into layered rings of slots. The innermost layer has
//! the configured tick granularity; each coarser layer's tick spans the
//! whole layer below, so delays from milliseconds to days land in O(1)
//! regardless of their distance. A single driver thread blocks on a delay
//! queue of due slots, and tasks cascade from coarse layers into finer ones
//! as the clock advances until they fire.
//!
//! Insertion and cancellation are safe from any number of threads while the
//! driver runs. Expired actions execute on an injected [`Executor`], never
//! on the driver thread, so one slow action cannot delay the rest.
//!
//! # example
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let timer = wheeltimer::Timer::builder()
//!     .tick(Duration::from_millis(5))
//!     .slot_count(64)
//!     .build()
//!     .unwrap();
//! timer.start();
//!
//! let fired = Arc::new(AtomicUsize::new(0));
//! let handle = {
//!     let fired = fired.clone();
//!     timer.add_task(Duration::from_millis(20), move || {
//!         fired.fetch_add(1, Ordering::SeqCst);
//!     })
//! };
//!
//! std::thread::sleep(Duration::from_millis(300));
//! assert_eq!(fired.load(Ordering::SeqCst), 1);
//! assert_eq!(handle.state(), wheeltimer::TaskState::Success);
//! assert_eq!(timer.task_count(), 0);
//! ```

pub mod clock;
pub mod delay_queue;
pub mod error;
pub mod executor;
mod slot;
mod task;
pub mod timer;
mod wheel;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delay_queue::{CancelToken, DelayQueue, Delayed};
pub use error::Error;
pub use executor::{Executor, InlineExecutor, ThreadExecutor, TokioExecutor};
pub use task::TaskState;
pub use timer::{TaskHandle, Timer, TimerBuilder};
