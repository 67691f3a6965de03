// demos/latency_drift.rs
//
// A synthetic handler whose latency drifts from 5ms to 80ms and back, with random
// jitter. Shows the generator re-balancing lanes and waits while holding the rate.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use adaptive_pacer::{
    Error as CrateError,
    generator::{Generator, GeneratorSettings, task_fn},
};
use rand::Rng;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const TARGET_QPS: f64 = 200.0;
const PHASES_MS: [u64; 5] = [5, 20, 80, 20, 5];
const PHASE_SECS: u64 = 8;
const JITTER: f64 = 0.2;

#[tokio::main]
async fn main() -> Result<(), CrateError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    let base_ms = Arc::new(AtomicU64::new(PHASES_MS[0]));
    let handler = task_fn({
        let base_ms = Arc::clone(&base_ms);
        move || {
            let base = base_ms.load(Ordering::Relaxed) as f64;
            let factor = rand::rng().random_range(1.0 - JITTER..=1.0 + JITTER);
            sleep(Duration::from_secs_f64(base * factor / 1000.0))
        }
    });

    let handle = Generator::new(GeneratorSettings::new(TARGET_QPS), handler).start()?;

    for latency_ms in PHASES_MS {
        base_ms.store(latency_ms, Ordering::Relaxed);
        info!(latency_ms, "Handler latency changed.");

        let before = handle.snapshot().completed_requests;
        sleep(Duration::from_secs(PHASE_SECS)).await;
        let snapshot = handle.snapshot();

        info!(
            latency_ms,
            achieved_qps = (snapshot.completed_requests - before) as f64 / PHASE_SECS as f64,
            "Phase finished."
        );
        println!("{}", serde_json::to_string(&snapshot)?);
    }

    let totals = handle.stop().await;
    println!("{}", serde_json::to_string_pretty(&totals)?);
    Ok(())
}
