// demos/steady_load.rs
//
// Sends GET requests to TARGET_URL at TARGET_QPS for RUN_SECS seconds and prints
// the generator state as JSON once per second.

use std::{
    env,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use adaptive_pacer::{
    Error as CrateError,
    generator::{Generator, GeneratorSettings, Task},
};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// --- Configuration ---
const TARGET_URL_ENV_VAR: &str = "TARGET_URL";
const TARGET_QPS_ENV_VAR: &str = "TARGET_QPS";
const RUN_SECS_ENV_VAR: &str = "RUN_SECS";
const DEFAULT_TARGET_URL: &str = "http://127.0.0.1:8080/";
const DEFAULT_TARGET_QPS: f64 = 50.0;
const DEFAULT_RUN_SECS: u64 = 30;

struct Get {
    client: reqwest::Client,
    url: String,
    ok: AtomicU64,
    failed: AtomicU64,
}

impl Task for Get {
    async fn run(&self) {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => {
                self.ok.fetch_add(1, Ordering::Relaxed);
            }
            Ok(response) => {
                debug!(status = %response.status(), "Non-success response.");
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                debug!(%error, "Request failed.");
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), CrateError> {
    let default_filter = "info,adaptive_pacer::stats=debug";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init()?;

    dotenvy::dotenv().ok();

    let url = env::var(TARGET_URL_ENV_VAR).unwrap_or_else(|_| DEFAULT_TARGET_URL.to_string());
    let qps = env_or(TARGET_QPS_ENV_VAR, DEFAULT_TARGET_QPS);
    let run_secs = env_or(RUN_SECS_ENV_VAR, DEFAULT_RUN_SECS);
    info!(%url, qps, run_secs, "Starting steady load.");

    let task = Arc::new(Get {
        client: reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?,
        url,
        ok: AtomicU64::new(0),
        failed: AtomicU64::new(0),
    });

    let settings = GeneratorSettings::builder()
        .qps(qps)
        .sleep_precision(Duration::from_millis(20))
        .build();
    let handle = Generator::new(settings, Arc::clone(&task)).start()?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    for _ in 0..run_secs {
        ticker.tick().await;
        println!("{}", serde_json::to_string(&handle.snapshot())?);
    }

    let totals = handle.stop().await;
    println!("{}", serde_json::to_string_pretty(&totals)?);
    info!(
        ok = task.ok.load(Ordering::Relaxed),
        failed = task.failed.load(Ordering::Relaxed),
        achieved_qps = totals.completed_requests as f64 / run_secs.max(1) as f64,
        "Steady load finished."
    );
    Ok(())
}
