//! The rate model: from a latency estimate to lane count, batch size and pacing.
//!
//! Over a sampling period `S`, a lane issuing calls every `R + W` seconds performs
//! `N = S / (R + W)` calls. A single lane cannot exceed `1 / R` calls per second, so
//! hitting `QPS` needs `B = QPS * R` lanes, and from `QPS = B / (R + W)`:
//!
//! ```text
//! B = ceil(QPS * R)          (1 when R is unknown)
//! W = B / QPS - R
//! N = ceil(S / (R + W))
//! ```
use std::time::Duration;

/// Control parameters produced by [`evaluate`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateParameters {
    /// Number of lanes that should be running a batch at any time.
    pub lanes: usize,
    /// Calls per batch.
    pub requests: usize,
    /// Pause budget after each call, never negative.
    pub wait: Duration,
}

/// Maps a per-call latency estimate (seconds) to the parameters needed to sustain
/// `qps` calls per second, with batches spanning roughly `sampling_period`.
///
/// A negative wait is clamped to zero. `lanes` and `requests` are always at least one.
pub fn evaluate(latency: f64, qps: f64, sampling_period: Duration) -> RateParameters {
    let lanes = if latency > 0.0 {
        (qps * latency).ceil()
    } else {
        1.0
    };
    let wait = wait_from_secs(lanes / qps - latency);

    let cycle = latency.max(0.0) + wait.as_secs_f64();
    let requests = if cycle.is_finite() && cycle > 0.0 {
        (sampling_period.as_secs_f64() / cycle).ceil()
    } else {
        1.0
    };

    RateParameters {
        lanes: at_least_one(lanes),
        requests: at_least_one(requests),
        wait,
    }
}

/// Blends a new latency sample into the running estimate.
///
/// `weight` is the share kept from the previous estimate.
pub fn smooth(estimate: f64, observed: f64, weight: f64) -> f64 {
    weight * estimate + (1.0 - weight) * observed
}

/// Negative and NaN waits become zero, waits too large for a `Duration` saturate.
pub(crate) fn wait_from_secs(secs: f64) -> Duration {
    match Duration::try_from_secs_f64(secs) {
        Ok(wait) => wait,
        Err(_) if secs > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

// Float to integer casts saturate and map NaN to zero.
fn at_least_one(count: f64) -> usize {
    (count as usize).max(1)
}
