use std::time::Duration;

use metrics::{counter, gauge, histogram};

use super::InternalEvent;

#[derive(Clone, Copy, Debug)]
pub struct GeneratorRecalibrated {
    pub qps: f64,
    /// Per-call latency measured over the last period, in seconds.
    pub observed: f64,
    /// Smoothed per-call latency, in seconds.
    pub latency: f64,
    pub lanes: usize,
    pub requests: usize,
    pub wait: Duration,
}

impl InternalEvent for GeneratorRecalibrated {
    fn emit(self) {
        // Histograms, as several recalibrations may fall within one reporting interval.
        histogram!("generator_observed_latency_seconds").record(self.observed);
        histogram!("generator_latency_estimate_seconds").record(self.latency);
        gauge!("generator_lanes").set(self.lanes as f64);
        gauge!("generator_requests_per_batch").set(self.requests as f64);
        gauge!("generator_wait_seconds").set(self.wait);
        counter!("generator_recalibrations_total").increment(1);

        debug!(
            target: "adaptive_pacer::stats",
            qps = self.qps,
            observed_latency_us = (self.observed * 1e6) as u64,
            latency_us = (self.latency * 1e6) as u64,
            lanes = self.lanes,
            requests = self.requests,
            wait_us = self.wait.as_micros() as u64,
            "Generator recalibrated."
        );
    }

    fn name(&self) -> Option<&'static str> {
        Some("GeneratorRecalibrated")
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BatchCompleted {
    pub requests: usize,
    pub duration: Duration,
}

impl InternalEvent for BatchCompleted {
    fn emit(self) {
        counter!("generator_requests_total").increment(self.requests as u64);
        histogram!("generator_batch_duration_seconds").record(self.duration);

        trace!(
            target: "adaptive_pacer::stats",
            requests = self.requests,
            duration_ms = self.duration.as_millis() as u64,
            "Batch completed."
        );
    }

    fn name(&self) -> Option<&'static str> {
        Some("BatchCompleted")
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LaneSpawned {
    pub lane: usize,
    /// Lanes in existence after this one.
    pub lanes: usize,
}

impl InternalEvent for LaneSpawned {
    fn emit(self) {
        counter!("generator_lanes_spawned_total").increment(1);
        gauge!("generator_lanes_created").set(self.lanes as f64);

        debug!(message = "Lane spawned.", lane = self.lane, lanes = self.lanes);
    }

    fn name(&self) -> Option<&'static str> {
        Some("LaneSpawned")
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LaneLimitReached {
    pub max_lanes: usize,
    pub wanted: usize,
}

impl InternalEvent for LaneLimitReached {
    fn emit(self) {
        counter!("generator_lane_limit_reached_total").increment(1);

        warn!(
            message = "Lane limit reached; target rate may not be sustained.",
            max_lanes = self.max_lanes,
            wanted = self.wanted,
        );
    }

    fn name(&self) -> Option<&'static str> {
        Some("LaneLimitReached")
    }
}

#[derive(Clone, Copy, Debug)]
pub struct HandlerPanicked;

impl InternalEvent for HandlerPanicked {
    fn emit(self) {
        counter!("generator_handler_panics_total").increment(1);

        warn!(message = "Handler panicked; continuing with the next call.");
    }

    fn name(&self) -> Option<&'static str> {
        Some("HandlerPanicked")
    }
}
