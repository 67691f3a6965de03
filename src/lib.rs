//! Adaptive load generation: call a handler a fixed number of times per second.
//!
//! The [`generator::Generator`] discovers how long the handler takes and derives,
//! from that estimate alone, how many concurrent lanes it needs, how many calls each
//! lane performs per batch and how long a lane waits between calls. The estimate is
//! refreshed on a fixed tick, so the achieved rate follows the target even when the
//! handler slows down under load.
//!
//! # Algorithm Overview
//!
//! With `R` the smoothed handler latency, `QPS` the target rate and `S` the sampling
//! period:
//! 1. `B = ceil(QPS * R)` lanes run concurrently (one lane while `R` is unknown),
//! 2. every lane waits `W = B / QPS - R` after each call,
//! 3. every batch holds `N = ceil(S / (R + W))` calls, so a batch spans about `S`.
//!
//! Waits are coalesced: a lane only sleeps once the accumulated budget crosses the
//! configured precision.
//!
//! # Basic Usage
//! ```no_run
//! use adaptive_pacer::generator::{Generator, GeneratorSettings, task_fn};
//!
//! # async fn run() -> Result<(), adaptive_pacer::generator::GeneratorError> {
//! let settings = GeneratorSettings::builder().qps(250.0).build();
//! let handle = Generator::new(settings, task_fn(|| async {
//!     // call the system under test
//! }))
//! .start()?;
//!
//! tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//! let totals = handle.stop().await;
//! println!("{} calls", totals.completed_requests);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//! See [`generator::GeneratorSettings`] for tuning parameters.
//!
//! # Metrics
//! Emits metrics and structured logs via the [`internal_event::InternalEvent`] trait.
pub mod generator;
pub mod internal_event;

#[macro_use]
extern crate tracing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
