/// Execution substrate consumed by the timer driver.
///
/// The driver hands every expired action to an executor instead of running
/// it inline, so a slow action can never stall clock advancement. Submission
/// must not block.
pub trait Executor: Send + Sync {
    fn spawn(&self, action: Box<dyn FnOnce() + Send>);
}

/// Runs actions on the calling thread.
///
/// Only suitable for tests and for actions that are known to be short:
/// the driver thread is blocked for the duration of the action.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn spawn(&self, action: Box<dyn FnOnce() + Send>) {
        action();
    }
}

/// Spawns one detached OS thread per action.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn spawn(&self, action: Box<dyn FnOnce() + Send>) {
        let spawned = std::thread::Builder::new()
            .name("wheeltimer-task".into())
            .spawn(action);
        if let Err(err) = spawned {
            tracing::error!("[Spawn] failed to spawn task thread: {}", err);
        }
    }
}

/// Dispatches actions onto a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, same as
    /// [`tokio::runtime::Handle::current`].
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn spawn(&self, action: Box<dyn FnOnce() + Send>) {
        let _join = self.handle.spawn_blocking(action);
    }
}
