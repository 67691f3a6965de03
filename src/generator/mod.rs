//! Call a handler a fixed number of times per second.
//!
//! The [`Generator`] runs `B` concurrent lanes, each calling the handler `N` times in a
//! row and waiting `W` after every call. `B`, `N` and `W` come from the
//! [rate model](rate::evaluate) applied to an estimate `R` of the handler's latency, and
//! `R` is re-estimated every tick from what the lanes report. If `R` varies a lot from
//! call to call, the generator takes longer to settle.

mod controller;
mod handle;
mod lane;
pub mod rate;
mod task;

use std::time::Duration;

use bon::Builder;
use snafu::{Snafu, ensure};

pub use handle::{Generator, GeneratorHandle, GeneratorSnapshot};
pub use rate::RateParameters;
pub use task::{Task, TaskFn, task_fn};

/// Configuration of a [`Generator`].
///
/// Only the target rate is required. A field explicitly set to zero falls back to its
/// default when the generator starts.
///
/// | Parameter | Default | Description |
/// |-----------|---------|-------------|
/// | `qps` | required | Calls per second to sustain |
/// | `smoothing_factor` | 0.80 | Weight of the previous latency estimate in the moving average<br>**Range**: (0, 1] |
/// | `sleep_precision` | 50ms | Accumulated wait that triggers an actual sleep |
/// | `sampling_period` | 1s | Approximate duration of one batch |
/// | `tick` | 1s | Interval between latency re-estimations |
/// | `max_lanes` | 4096 | Upper bound on lanes ever spawned |
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use adaptive_pacer::generator::GeneratorSettings;
///
/// let settings = GeneratorSettings::builder()
///     .qps(500.0)
///     .sleep_precision(Duration::from_millis(20))
///     .max_lanes(256)
///     .build();
/// assert_eq!(settings.smoothing_factor(), 0.8);
/// ```
#[derive(Clone, Copy, Debug, Builder)]
pub struct GeneratorSettings {
    /// Calls per second. Must be finite and above zero.
    qps: f64,

    /// Weight of the previous estimate when blending in a new latency sample:
    /// `R = m * R + (1 - m) * observed`.
    ///
    /// Higher values smooth out noisy handlers but react slowly to real latency shifts.
    #[builder(default = default_smoothing_factor())]
    smoothing_factor: f64,

    /// Minimal accumulated wait worth an actual sleep.
    ///
    /// Lanes add up their per-call waits and sleep only once this much is owed, which
    /// keeps the number of timer registrations low when waits are tiny.
    #[builder(default = default_sleep_precision())]
    sleep_precision: Duration,

    /// Approximate duration covered by one batch, which bounds how long the generator
    /// keeps running on stale parameters.
    #[builder(default = default_sampling_period())]
    sampling_period: Duration,

    /// Interval between latency re-estimations.
    #[builder(default = default_tick())]
    tick: Duration,

    /// Upper bound on lanes ever spawned. When the rate model asks for more, the
    /// generator runs short of the target and says so.
    #[builder(default = default_max_lanes())]
    max_lanes: usize,
}

const fn default_smoothing_factor() -> f64 {
    0.80
}

const fn default_sleep_precision() -> Duration {
    Duration::from_millis(50)
}

const fn default_sampling_period() -> Duration {
    Duration::from_secs(1)
}

const fn default_tick() -> Duration {
    Duration::from_secs(1)
}

const fn default_max_lanes() -> usize {
    4096
}

impl GeneratorSettings {
    /// Settings for `qps` calls per second with every other parameter at its default.
    pub const fn new(qps: f64) -> Self {
        Self {
            qps,
            smoothing_factor: default_smoothing_factor(),
            sleep_precision: default_sleep_precision(),
            sampling_period: default_sampling_period(),
            tick: default_tick(),
            max_lanes: default_max_lanes(),
        }
    }

    pub const fn qps(&self) -> f64 {
        self.qps
    }

    pub const fn smoothing_factor(&self) -> f64 {
        self.smoothing_factor
    }

    pub const fn sleep_precision(&self) -> Duration {
        self.sleep_precision
    }

    pub const fn sampling_period(&self) -> Duration {
        self.sampling_period
    }

    pub const fn tick(&self) -> Duration {
        self.tick
    }

    pub const fn max_lanes(&self) -> usize {
        self.max_lanes
    }

    /// Replaces zero-valued fields with their defaults.
    pub(crate) fn resolve(mut self) -> Self {
        if self.smoothing_factor == 0.0 {
            self.smoothing_factor = default_smoothing_factor();
        }
        if self.sleep_precision.is_zero() {
            self.sleep_precision = default_sleep_precision();
        }
        if self.sampling_period.is_zero() {
            self.sampling_period = default_sampling_period();
        }
        if self.tick.is_zero() {
            self.tick = default_tick();
        }
        if self.max_lanes == 0 {
            self.max_lanes = default_max_lanes();
        }
        self
    }

    pub(crate) fn validate(&self) -> Result<(), GeneratorError> {
        validate_qps(self.qps)?;
        ensure!(
            self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0,
            InvalidSmoothingFactorSnafu {
                factor: self.smoothing_factor
            }
        );
        Ok(())
    }
}

pub(crate) fn validate_qps(qps: f64) -> Result<(), GeneratorError> {
    ensure!(qps.is_finite() && qps > 0.0, InvalidQpsSnafu { qps });
    Ok(())
}

/// Reasons a generator refuses to start.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GeneratorError {
    #[snafu(display("Generator requires a handler"))]
    MissingHandler,

    #[snafu(display("Target rate must be finite and above zero, got {qps}"))]
    InvalidQps { qps: f64 },

    #[snafu(display("Smoothing factor must be within (0, 1], got {factor}"))]
    InvalidSmoothingFactor { factor: f64 },

    #[snafu(display("Generator must be started within a tokio runtime: {source}"))]
    NoRuntime {
        source: tokio::runtime::TryCurrentError,
    },
}
