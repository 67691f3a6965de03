//! The pacing loop.
//!
//! 1. Bootstrap: one single-call batch measures a first latency sample.
//! 2. Steady state: keep `B` lanes busy with batches of `N` calls waiting `W`, collect
//!    their reports, and on every tick blend the observed latency into the estimate and
//!    re-run the rate model.
//! 3. Shutdown: leave the loop on the shutdown signal, stop every lane, return totals.
use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior, interval_at},
};

use super::{
    GeneratorSettings,
    handle::GeneratorSnapshot,
    lane::{Batch, LanePool},
    rate::{RateParameters, evaluate, smooth},
    task::Task,
};
use crate::internal_event::{
    InternalEvent,
    generator::{BatchCompleted, GeneratorRecalibrated, LaneLimitReached},
};

/// Totals accumulated between two ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct PeriodTotals {
    pub(crate) batches: usize,
    pub(crate) requests: usize,
    pub(crate) duration: Duration,
}

/// Latency estimate and everything derived from it. Owned by the controller task alone.
#[derive(Debug)]
pub(crate) struct Calibration {
    smoothing_factor: f64,
    sampling_period: Duration,
    qps: f64,
    latency: f64,
    params: RateParameters,
    period: PeriodTotals,
    recalibrations: u64,
    completed_batches: u64,
    completed_requests: u64,
}

impl Calibration {
    /// Starts from a bootstrap sample, in seconds.
    pub(crate) fn new(settings: &GeneratorSettings, latency: f64) -> Self {
        let latency = latency.max(0.0);
        Self {
            smoothing_factor: settings.smoothing_factor(),
            sampling_period: settings.sampling_period(),
            qps: settings.qps(),
            latency,
            params: evaluate(latency, settings.qps(), settings.sampling_period()),
            period: PeriodTotals::default(),
            recalibrations: 0,
            completed_batches: 0,
            completed_requests: 0,
        }
    }

    pub(crate) const fn params(&self) -> RateParameters {
        self.params
    }

    pub(crate) const fn latency(&self) -> f64 {
        self.latency
    }

    #[cfg(test)]
    pub(crate) const fn period(&self) -> PeriodTotals {
        self.period
    }

    pub(crate) fn record(&mut self, requests: usize, duration: Duration) {
        self.period.batches += 1;
        self.period.requests += requests;
        self.period.duration = self.period.duration.saturating_add(duration);
        self.completed_batches += 1;
        self.completed_requests += requests as u64;
    }

    /// Blends the period's latency into the estimate and re-evaluates for `qps`.
    ///
    /// Returns the observed latency, or `None` when no batch completed this period, in
    /// which case nothing changes, including the target rate.
    pub(crate) fn recalibrate(&mut self, qps: f64) -> Option<f64> {
        if self.period.batches == 0 || self.period.requests == 0 {
            return None;
        }

        let per_call = self.period.duration.as_secs_f64() / self.period.requests as f64;
        let observed = (per_call - self.params.wait.as_secs_f64()).max(0.0);

        self.latency = smooth(self.latency, observed, self.smoothing_factor);
        self.qps = qps;
        self.params = evaluate(self.latency, qps, self.sampling_period);
        self.period = PeriodTotals::default();
        self.recalibrations += 1;

        Some(observed)
    }

    pub(crate) fn snapshot(&self, in_flight: usize, lanes_created: usize) -> GeneratorSnapshot {
        GeneratorSnapshot {
            qps: self.qps,
            calibrated: true,
            latency: Duration::try_from_secs_f64(self.latency).unwrap_or(Duration::MAX),
            lanes: self.params.lanes,
            requests_per_batch: self.params.requests,
            wait: self.params.wait,
            in_flight,
            lanes_created,
            completed_batches: self.completed_batches,
            completed_requests: self.completed_requests,
            recalibrations: self.recalibrations,
        }
    }
}

pub(crate) struct Controller<H> {
    pub(crate) settings: GeneratorSettings,
    pub(crate) handler: Arc<H>,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) target: watch::Receiver<f64>,
    pub(crate) snapshots: watch::Sender<GeneratorSnapshot>,
}

impl<H: Task> Controller<H> {
    pub(crate) async fn run(self) -> GeneratorSnapshot {
        let Self {
            settings,
            handler,
            mut shutdown,
            mut target,
            snapshots,
        } = self;

        let (reports_tx, mut reports) = mpsc::unbounded_channel();
        let mut pool = LanePool::new(
            handler,
            settings.sleep_precision(),
            settings.max_lanes(),
            reports_tx,
            shutdown.clone(),
        );

        let Some(first) = bootstrap(&mut pool, &mut reports, &mut shutdown).await else {
            debug!(message = "Generator stopped before the first latency sample.");
            pool.shutdown().await;
            return snapshots.borrow().clone();
        };

        let mut calibration = Calibration::new(&settings, first.duration.as_secs_f64());
        pool.release(first.lane);
        debug!(
            message = "Bootstrap sample taken.",
            latency_us = first.duration.as_micros() as u64,
            lanes = calibration.params().lanes,
            requests = calibration.params().requests,
        );
        snapshots.send_replace(calibration.snapshot(0, pool.created()));

        let mut in_flight = 0;
        let mut at_limit = false;
        let mut ticks = interval_at(Instant::now() + settings.tick(), settings.tick());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let params = calibration.params();
            if params.lanes <= settings.max_lanes() {
                at_limit = false;
            }
            while in_flight < params.lanes {
                let Some(lane) = pool.acquire() else {
                    if !at_limit {
                        at_limit = true;
                        LaneLimitReached {
                            max_lanes: settings.max_lanes(),
                            wanted: params.lanes,
                        }
                        .emit();
                    }
                    break;
                };
                match lane.dispatch(params.requests, params.wait) {
                    Ok(()) => in_flight += 1,
                    Err(lane) => pool.discard(lane),
                }
            }

            tokio::select! {
                report = reports.recv() => {
                    let Some(batch) = report else {
                        break;
                    };
                    in_flight -= 1;
                    calibration.record(batch.requests, batch.duration);
                    BatchCompleted {
                        requests: batch.requests,
                        duration: batch.duration,
                    }
                    .emit();
                    pool.release(batch.lane);
                    snapshots.send_replace(calibration.snapshot(in_flight, pool.created()));
                }
                _ = ticks.tick() => {
                    let qps = *target.borrow_and_update();
                    if let Some(observed) = calibration.recalibrate(qps) {
                        let params = calibration.params();
                        GeneratorRecalibrated {
                            qps,
                            observed,
                            latency: calibration.latency(),
                            lanes: params.lanes,
                            requests: params.requests,
                            wait: params.wait,
                        }
                        .emit();
                        snapshots.send_replace(calibration.snapshot(in_flight, pool.created()));
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => {
                    break;
                }
            }
        }

        drop(reports);
        let lanes_created = pool.created();
        pool.shutdown().await;

        let last = calibration.snapshot(0, lanes_created);
        snapshots.send_replace(last.clone());
        last
    }
}

/// Sends a single-call, zero-wait batch and waits for its report.
async fn bootstrap<H: Task>(
    pool: &mut LanePool<H>,
    reports: &mut mpsc::UnboundedReceiver<Batch>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Batch> {
    let lane = pool.acquire()?;
    if let Err(lane) = lane.dispatch(1, Duration::ZERO) {
        error!(message = "Bootstrap lane is gone.", lane = lane.id());
        return None;
    }

    tokio::select! {
        report = reports.recv() => report,
        _ = shutdown.wait_for(|stop| *stop) => None,
    }
}
