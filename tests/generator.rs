use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use adaptive_pacer::generator::{
    Generator, GeneratorError, GeneratorSettings, Task, TaskFn, task_fn,
};
use tokio::{
    sync::Notify,
    time::{self, Instant},
};

/// A handler that sleeps for a fixed latency and counts its calls.
#[derive(Clone)]
struct Sleeper {
    latency: Duration,
    calls: Arc<AtomicUsize>,
    milestone: usize,
    reached: Arc<Notify>,
}

impl Sleeper {
    fn new(latency: Duration) -> Self {
        Self {
            latency,
            calls: Arc::new(AtomicUsize::new(0)),
            milestone: usize::MAX,
            reached: Arc::new(Notify::new()),
        }
    }

    fn notify_at(mut self, milestone: usize) -> Self {
        self.milestone = milestone;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Task for Sleeper {
    async fn run(&self) {
        time::sleep(self.latency).await;
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.milestone {
            self.reached.notify_one();
        }
    }
}

fn assert_within(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= expected * tolerance,
        "expected {expected} ±{}%, got {actual}",
        tolerance * 100.0
    );
}

#[tokio::test(start_paused = true)]
async fn slow_handler_reaches_the_target_rate() {
    let qps = 1000.0;
    let seconds = 2.0;
    let handler = Sleeper::new(Duration::from_millis(100)).notify_at((qps * seconds) as usize);
    let reached = Arc::clone(&handler.reached);

    let started = Instant::now();
    let handle = Generator::new(GeneratorSettings::new(qps), handler)
        .start()
        .expect("valid configuration");
    reached.notified().await;
    let elapsed = started.elapsed().as_secs_f64();

    assert_within(qps * seconds / elapsed, qps, 0.1);

    // the smoothed estimate may land a rounding error either side of 100ms
    let snapshot = handle.snapshot();
    assert!((100..=101).contains(&snapshot.lanes), "{snapshot:?}");
    assert!((10..=11).contains(&snapshot.requests_per_batch), "{snapshot:?}");
    assert!(snapshot.wait < Duration::from_millis(2));

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn fast_handler_reaches_the_target_rate_on_one_lane() {
    let handler = Sleeper::new(Duration::from_millis(1));
    let handle = Generator::new(GeneratorSettings::new(1000.0), handler.clone())
        .start()
        .expect("valid configuration");

    time::sleep(Duration::from_secs(3)).await;
    let before = handler.calls();
    time::sleep(Duration::from_secs(1)).await;
    let during = handler.calls() - before;

    assert_within(during as f64, 1000.0, 0.1);

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.lanes, 1, "{snapshot:?}");
    assert!(
        (999..=1001).contains(&snapshot.requests_per_batch),
        "{snapshot:?}"
    );

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn fast_handler_is_paced_with_coalesced_waits() {
    let handler = Sleeper::new(Duration::from_millis(5));
    let handle = Generator::new(GeneratorSettings::new(100.0), handler.clone())
        .start()
        .expect("valid configuration");

    time::sleep(Duration::from_secs(2)).await;
    let before = handler.calls();
    time::sleep(Duration::from_secs(3)).await;
    let during = handler.calls() - before;

    assert_within(during as f64, 300.0, 0.1);

    let snapshot = handle.stop().await;
    assert_eq!(snapshot.lanes, 1);
    assert_eq!(snapshot.lanes_created, 1);
    assert!(snapshot.wait > Duration::from_millis(4));
    assert!(snapshot.recalibrations >= 1);
}

#[tokio::test(start_paused = true)]
async fn target_rate_can_change_mid_run() {
    let handler = Sleeper::new(Duration::from_millis(10));
    let handle = Generator::new(GeneratorSettings::new(50.0), handler.clone())
        .start()
        .expect("valid configuration");

    time::sleep(Duration::from_secs(3)).await;
    assert_eq!(handle.snapshot().lanes, 1);

    handle.set_qps(200.0).expect("valid rate");
    time::sleep(Duration::from_secs(3)).await;

    let before = handler.calls();
    time::sleep(Duration::from_secs(2)).await;
    let during = handler.calls() - before;
    assert_within(during as f64, 400.0, 0.1);

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.qps, 200.0);
    assert!((2..=3).contains(&snapshot.lanes), "{snapshot:?}");
    assert!(snapshot.latency >= Duration::from_millis(8));
    assert!(snapshot.latency <= Duration::from_millis(12));

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn latency_increase_is_absorbed() {
    let latency_ms = Arc::new(AtomicUsize::new(10));
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = task_fn({
        let latency_ms = Arc::clone(&latency_ms);
        let calls = Arc::clone(&calls);
        move || {
            let latency = Duration::from_millis(latency_ms.load(Ordering::SeqCst) as u64);
            let calls = Arc::clone(&calls);
            async move {
                time::sleep(latency).await;
                calls.fetch_add(1, Ordering::SeqCst);
            }
        }
    });
    let handle = Generator::new(GeneratorSettings::new(100.0), handler)
        .start()
        .expect("valid configuration");

    time::sleep(Duration::from_secs(3)).await;
    assert_eq!(handle.snapshot().lanes, 1);

    // backpressure from the system under test
    latency_ms.store(50, Ordering::SeqCst);
    time::sleep(Duration::from_secs(20)).await;

    let before = calls.load(Ordering::SeqCst);
    time::sleep(Duration::from_secs(3)).await;
    let during = calls.load(Ordering::SeqCst) - before;
    assert_within(during as f64, 300.0, 0.1);
    assert!(handle.snapshot().lanes >= 5);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn lanes_are_capped() {
    let handler = Sleeper::new(Duration::from_millis(100));
    let settings = GeneratorSettings::builder()
        .qps(1000.0)
        .max_lanes(10)
        .build();
    let handle = Generator::new(settings, handler.clone())
        .start()
        .expect("valid configuration");

    time::sleep(Duration::from_secs(3)).await;

    let snapshot = handle.snapshot();
    assert!(snapshot.lanes >= 100);
    assert!(snapshot.in_flight <= 10);
    assert_eq!(snapshot.lanes_created, 10);
    // ten lanes at 100ms per call cannot do better than 100 calls per second
    assert!(handler.calls() <= 1 + 10 * 30);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_keeps_the_generator_alive() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler: TaskFn<_> = task_fn({
        let calls = Arc::clone(&calls);
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                time::sleep(Duration::from_millis(10)).await;
                if call % 3 == 0 {
                    panic!("flaky handler");
                }
            }
        }
    });
    let handle = Generator::new(GeneratorSettings::new(50.0), handler)
        .start()
        .expect("valid configuration");

    time::sleep(Duration::from_secs(4)).await;

    assert!(!handle.is_finished());
    assert!(calls.load(Ordering::SeqCst) >= 150);
    let snapshot = handle.stop().await;
    assert!(snapshot.completed_requests >= 100);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_long_calls() {
    let handler = Sleeper::new(Duration::from_secs(3600));
    let handle = Generator::new(GeneratorSettings::new(10.0), handler)
        .start()
        .expect("valid configuration");
    tokio::task::yield_now().await;

    let snapshot = time::timeout(Duration::from_millis(10), handle.stop())
        .await
        .expect("stop returns promptly");

    assert!(!snapshot.calibrated);
    assert_eq!(snapshot.completed_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_the_lanes() {
    let handler = Sleeper::new(Duration::from_millis(10));
    let calls = Arc::clone(&handler.calls);
    let handle = Generator::new(GeneratorSettings::new(100.0), handler)
        .start()
        .expect("valid configuration");

    time::sleep(Duration::from_secs(1)).await;
    drop(handle);
    time::sleep(Duration::from_millis(50)).await;

    let after_drop = calls.load(Ordering::SeqCst);
    time::sleep(Duration::from_secs(2)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_drop);
}

#[tokio::test]
async fn missing_handler_is_rejected() {
    let error = Generator::<Sleeper>::builder()
        .settings(GeneratorSettings::new(10.0))
        .build()
        .start()
        .unwrap_err();

    assert!(matches!(error, GeneratorError::MissingHandler));
    assert_eq!(error.to_string(), "Generator requires a handler");
}

#[tokio::test]
async fn invalid_settings_are_rejected() {
    let handler = Sleeper::new(Duration::from_millis(1));

    let error = Generator::new(GeneratorSettings::new(0.0), handler.clone())
        .start()
        .unwrap_err();
    assert!(matches!(error, GeneratorError::InvalidQps { .. }));

    let settings = GeneratorSettings::builder()
        .qps(10.0)
        .smoothing_factor(2.0)
        .build();
    let error = Generator::new(settings, handler.clone()).start().unwrap_err();
    assert!(matches!(error, GeneratorError::InvalidSmoothingFactor { .. }));

    assert_eq!(handler.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_rate_change_is_rejected() {
    let handle = Generator::new(
        GeneratorSettings::new(10.0),
        Sleeper::new(Duration::from_millis(1)),
    )
    .start()
    .expect("valid configuration");

    let error = handle.set_qps(f64::NAN).unwrap_err();
    assert!(matches!(error, GeneratorError::InvalidQps { .. }));

    handle.stop().await;
}

#[test]
fn starting_outside_a_runtime_fails() {
    let error = Generator::new(
        GeneratorSettings::new(10.0),
        Sleeper::new(Duration::from_millis(1)),
    )
    .start()
    .unwrap_err();

    assert!(matches!(error, GeneratorError::NoRuntime { .. }));
}
