//! Integration tests for the throttle queues
//!
//! Asserts dispatch spacing, sliding-window admission, FIFO ordering,
//! cancellation, and panic containment under the paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use paceline_core::retry::{retry_with_config, RetryConfig};
use paceline_core::throttle::{ThrottleError, ThrottleQueue};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_test::assert_ok;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Shared recorder of action start times.
type Starts = Arc<Mutex<Vec<Instant>>>;

fn recorder() -> Starts {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(starts: &Starts) -> impl FnOnce() -> std::future::Ready<()> + Send + 'static {
    let starts = Arc::clone(starts);
    move || {
        starts.lock().push(Instant::now());
        std::future::ready(())
    }
}

#[tokio::test(start_paused = true)]
async fn fixed_interval_spaces_simultaneous_submissions() {
    init_tracing();
    let period = Duration::from_millis(250);
    let queue = ThrottleQueue::fixed(period);
    let starts = recorder();
    let t0 = Instant::now();

    let a = queue.enqueue(record(&starts));
    let b = queue.enqueue(record(&starts));
    let c = queue.enqueue(record(&starts));

    let (a, b, c) = tokio::join!(a, b, c);
    assert_ok!(a);
    assert_ok!(b);
    assert_ok!(c);

    let starts = starts.lock();
    assert_eq!(*starts, vec![t0, t0 + period, t0 + period * 2]);
}

#[tokio::test(start_paused = true)]
async fn sliding_window_admits_a_burst_then_waits_for_the_window() {
    init_tracing();
    let period = Duration::from_millis(500);
    let queue = ThrottleQueue::sliding(3, period);
    let starts = recorder();
    let t0 = Instant::now();

    let handles: Vec<_> = (0..4).map(|_| queue.enqueue(record(&starts))).collect();
    for handle in handles {
        assert_ok!(handle.await);
    }

    // Three start immediately; the fourth waits for the first to leave the
    // trailing window.
    let starts = starts.lock();
    assert_eq!(*starts, vec![t0, t0, t0, t0 + period]);
}

#[tokio::test(start_paused = true)]
async fn sliding_window_keeps_at_most_limit_starts_per_window() {
    let period = Duration::from_millis(300);
    let queue = ThrottleQueue::sliding(2, period);
    let starts = recorder();
    let t0 = Instant::now();

    let handles: Vec<_> = (0..4).map(|_| queue.enqueue(record(&starts))).collect();
    for handle in handles {
        assert_ok!(handle.await);
    }

    let starts = starts.lock();
    assert_eq!(*starts, vec![t0, t0, t0 + period, t0 + period]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_entry_is_skipped_without_rescheduling_survivors() {
    let period = Duration::from_millis(200);
    let queue = ThrottleQueue::fixed(period);
    let starts = recorder();
    let t0 = Instant::now();

    let a = queue.enqueue(record(&starts));
    let b = queue.enqueue(record(&starts));
    let c = queue.enqueue(record(&starts));
    b.cancel();

    assert_ok!(a.await);
    assert_eq!(b.await, Err(ThrottleError::Cancelled));
    assert_ok!(c.await);

    // The slot held by the cancelled entry is skipped at dispatch time; the
    // survivor takes the wait that was already scheduled.
    let starts = starts.lock();
    assert_eq!(*starts, vec![t0, t0 + period]);
}

#[tokio::test(start_paused = true)]
async fn cancelling_after_dispatch_is_a_noop() {
    let queue = ThrottleQueue::fixed(Duration::from_millis(100));

    let mut handle = queue.enqueue(|| async { 5 });
    let outcome = (&mut handle).await;
    assert_eq!(outcome, Ok(5));

    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn panicking_action_resolves_its_handle_and_spares_the_queue() {
    init_tracing();
    let period = Duration::from_millis(150);
    let queue = ThrottleQueue::fixed(period);
    let starts = recorder();
    let t0 = Instant::now();

    let poisoned = queue.enqueue(|| async { panic!("boom") });
    let survivor = queue.enqueue(record(&starts));

    match poisoned.await {
        Err(ThrottleError::Panicked { message }) => assert_eq!(message, "boom"),
        other => panic!("expected panic outcome, got {other:?}"),
    }
    assert_ok!(survivor.await);

    // The panic consumed the first slot; the survivor still dispatched on
    // schedule.
    let starts = starts.lock();
    assert_eq!(*starts, vec![t0 + period]);
}

#[tokio::test(start_paused = true)]
async fn submission_order_is_preserved_among_survivors() {
    let queue = ThrottleQueue::fixed(Duration::from_millis(50));
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..5)
        .map(|index| {
            let order = Arc::clone(&order);
            queue.enqueue(move || {
                order.lock().push(index);
                std::future::ready(index)
            })
        })
        .collect();

    handles[1].cancel();
    handles[3].cancel();

    for (index, handle) in handles.into_iter().enumerate() {
        let outcome = handle.await;
        if index == 1 || index == 3 {
            assert_eq!(outcome, Err(ThrottleError::Cancelled));
        } else {
            assert_eq!(outcome, Ok(index));
        }
    }

    assert_eq!(*order.lock(), vec![0, 2, 4]);
}

#[tokio::test(start_paused = true)]
async fn one_queue_accepts_actions_with_different_output_types() {
    let queue = ThrottleQueue::fixed(Duration::from_millis(10));

    let text = queue.enqueue(|| async { "ready" });
    let number = queue.enqueue(|| async { 42u32 });

    assert_eq!(text.await, Ok("ready"));
    assert_eq!(number.await, Ok(42));
}

#[tokio::test(start_paused = true)]
async fn retrying_actions_compose_with_throttled_dispatch() {
    let queue = ThrottleQueue::fixed(Duration::from_millis(100));
    let config = RetryConfig::builder()
        .interval(Duration::from_millis(20))
        .jitter(0.0)
        .build()
        .expect("valid config");

    let attempts = Arc::new(Mutex::new(0u32));
    let attempts_in_action = Arc::clone(&attempts);

    let handle = queue.enqueue(move || async move {
        retry_with_config(
            config,
            move || {
                let attempts = Arc::clone(&attempts_in_action);
                async move {
                    let mut attempts = attempts.lock();
                    *attempts += 1;
                    Ok::<_, std::io::Error>(*attempts)
                }
            },
            |count| *count >= 3,
        )
        .await
    });

    let outcome = handle.await.expect("queue entry should run");
    assert_eq!(outcome.expect("retry should eventually succeed"), 3);
    assert_eq!(*attempts.lock(), 3);
}
