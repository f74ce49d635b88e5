use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use wheeltimer::{Clock, SystemClock, TaskState, Timer, TokioExecutor};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn build_timer(tick_ms: u64, slot_count: usize) -> Timer {
    Timer::builder()
        .tick(Duration::from_millis(tick_ms))
        .slot_count(slot_count)
        .build()
        .expect("valid timer config")
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn tasks_fire_in_expiry_order_across_layers() {
    init_tracing();
    let timer = build_timer(50, 10);
    let fired: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let record = |name: &'static str| {
        let fired = fired.clone();
        move || fired.lock().expect("fired list poisoned").push(name)
    };

    // a and b go in before the driver runs, c and d while it runs. d sits
    // past the innermost layer's 500ms span and has to cascade.
    let a = timer.add_task(Duration::from_millis(500), record("a"));
    let b = timer.add_task(Duration::from_millis(150), record("b"));
    timer.start();
    let c = timer.add_task(Duration::from_millis(300), record("c"));
    let d = timer.add_task(Duration::from_millis(900), record("d"));

    assert!(wait_until(Duration::from_secs(3), || fired
        .lock()
        .expect("fired list poisoned")
        .len()
        == 4));

    let order = fired.lock().expect("fired list poisoned").clone();
    let position =
        |name: &str| order.iter().position(|n| *n == name).expect("task fired");
    assert!(position("b") < position("c"));
    assert!(position("c") < position("a"));
    assert!(position("a") < position("d"));

    for handle in [&a, &b, &c, &d] {
        assert_eq!(handle.state(), TaskState::Success);
    }
    assert!(wait_until(Duration::from_secs(1), || timer.task_count() == 0));
}

#[test]
fn cancel_failure_and_slow_action_settle_independently() {
    init_tracing();
    let timer = build_timer(20, 60);
    timer.start();

    let cancelled_fired = Arc::new(AtomicUsize::new(0));
    let slow = timer.add_task(Duration::from_millis(200), || {
        std::thread::sleep(Duration::from_millis(400));
    });
    let failing = timer.add_task(Duration::from_millis(200), || panic!("task blew up"));
    let cancelled = {
        let fired = cancelled_fired.clone();
        timer.add_task(Duration::from_millis(200), move || {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    };

    assert!(cancelled.cancel());
    assert_eq!(cancelled.state(), TaskState::Cancel);
    assert!(!cancelled.cancel());

    assert!(wait_until(Duration::from_secs(2), || slow.state()
        == TaskState::Running));
    assert!(wait_until(Duration::from_secs(2), || failing.state()
        == TaskState::Fail));
    assert!(wait_until(Duration::from_secs(2), || slow.state()
        == TaskState::Success));

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(cancelled.state(), TaskState::Cancel);
    assert_eq!(cancelled_fired.load(Ordering::SeqCst), 0);
    assert!(wait_until(Duration::from_secs(1), || timer.task_count() == 0));
}

#[test]
fn expired_instant_dispatches_immediately() {
    init_tracing();
    let timer = build_timer(20, 60);
    timer.start();

    let (tx, rx) = mpsc::channel();
    let handle = timer.add_task_at(SystemClock.now_ms() - 100, move || {
        tx.send(()).expect("receiver alive");
    });

    assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    assert!(wait_until(Duration::from_secs(1), || handle.state()
        == TaskState::Success));
    assert_eq!(timer.task_count(), 0);
}

#[test]
fn concurrent_producers_fire_every_task_exactly_once() {
    init_tracing();
    const PRODUCERS: usize = 10;
    const TASKS_PER_PRODUCER: usize = 20;

    let timer = build_timer(20, 32);
    timer.start();

    let per_task: Vec<Arc<AtomicUsize>> = (0..PRODUCERS * TASKS_PER_PRODUCER)
        .map(|_| Arc::new(AtomicUsize::new(0)))
        .collect();
    let total = Arc::new(AtomicUsize::new(0));

    std::thread::scope(|scope| {
        for producer in 0..PRODUCERS {
            let timer = &timer;
            let per_task = &per_task;
            let total = total.clone();
            scope.spawn(move || {
                let mut rng = rand::thread_rng();
                for index in 0..TASKS_PER_PRODUCER {
                    let counter = per_task[producer * TASKS_PER_PRODUCER + index].clone();
                    let total = total.clone();
                    let delay = Duration::from_millis(rng.gen_range(50..2_000));
                    timer.add_task(delay, move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        total.fetch_add(1, Ordering::SeqCst);
                    });
                }
            });
        }
    });

    assert!(wait_until(Duration::from_secs(15), || {
        total.load(Ordering::SeqCst) == PRODUCERS * TASKS_PER_PRODUCER
    }));
    for counter in &per_task {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
    assert!(wait_until(Duration::from_secs(1), || timer.task_count() == 0));
}

#[test]
fn paused_timer_retains_tasks_and_fires_on_resume() {
    init_tracing();
    let timer = build_timer(20, 60);
    timer.start();

    let fired_at: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    {
        let fired_at = fired_at.clone();
        timer.add_task(Duration::from_millis(300), move || {
            *fired_at.lock().expect("fired_at poisoned") = Some(Instant::now());
        });
    }

    std::thread::sleep(Duration::from_millis(50));
    timer.pause();
    std::thread::sleep(Duration::from_millis(600));
    assert!(
        fired_at.lock().expect("fired_at poisoned").is_none(),
        "task fired while paused"
    );

    let resumed_at = Instant::now();
    timer.resume();
    assert!(wait_until(Duration::from_secs(2), || fired_at
        .lock()
        .expect("fired_at poisoned")
        .is_some()));

    let fired_at = fired_at
        .lock()
        .expect("fired_at poisoned")
        .expect("task fired");
    assert!(fired_at >= resumed_at);
    assert!(wait_until(Duration::from_secs(1), || timer.task_count() == 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn actions_run_on_the_tokio_blocking_pool() {
    init_tracing();
    let timer = Timer::builder()
        .tick(Duration::from_millis(10))
        .slot_count(60)
        .executor(TokioExecutor::current())
        .build()
        .expect("valid timer config");
    timer.start();

    let (tx, rx) = mpsc::channel();
    timer.add_task(Duration::from_millis(50), move || {
        tx.send(()).expect("receiver alive");
    });

    let received = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(2)))
        .await
        .expect("join blocking task");
    assert!(received.is_ok());
}
