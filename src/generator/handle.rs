use std::{sync::Arc, time::Duration};

use bon::Builder;
use serde::Serialize;
use snafu::{OptionExt, ResultExt};
use tokio::{sync::watch, task::JoinHandle};

use super::{
    GeneratorError, GeneratorSettings, MissingHandlerSnafu, NoRuntimeSnafu,
    controller::Controller, task::Task, validate_qps,
};

/// Calls a handler at a target rate, adapting to the handler's latency.
///
/// Nothing happens until [`Generator::start`] is called.
///
/// ```rust
/// use adaptive_pacer::generator::{Generator, GeneratorSettings, task_fn};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let handle = Generator::builder()
///     .settings(GeneratorSettings::new(20.0))
///     .handler(task_fn(|| async {}))
///     .build()
///     .start()
///     .expect("valid configuration");
///
/// let totals = handle.stop().await;
/// assert!(totals.completed_requests <= 1);
/// # }
/// ```
#[derive(Debug, Builder)]
pub struct Generator<H> {
    settings: GeneratorSettings,
    handler: Option<H>,
}

impl<H: Task> Generator<H> {
    pub fn new(settings: GeneratorSettings, handler: H) -> Self {
        Self {
            settings,
            handler: Some(handler),
        }
    }

    /// Validates the configuration and starts calling the handler in the background.
    ///
    /// Returns immediately. Nothing is spawned when the configuration is rejected.
    pub fn start(self) -> Result<GeneratorHandle, GeneratorError> {
        let handler = self.handler.context(MissingHandlerSnafu)?;
        let settings = self.settings.resolve();
        settings.validate()?;
        let runtime = tokio::runtime::Handle::try_current().context(NoRuntimeSnafu)?;

        let (shutdown_tx, shutdown) = watch::channel(false);
        let (target_tx, target) = watch::channel(settings.qps());
        let (snapshots_tx, snapshots) = watch::channel(GeneratorSnapshot::pending(&settings));

        let controller = runtime.spawn(
            Controller {
                settings,
                handler: Arc::new(handler),
                shutdown,
                target,
                snapshots: snapshots_tx,
            }
            .run(),
        );

        info!(
            message = "Generator started.",
            qps = settings.qps(),
            smoothing_factor = settings.smoothing_factor(),
            sleep_precision_ms = settings.sleep_precision().as_millis() as u64,
            sampling_period_ms = settings.sampling_period().as_millis() as u64,
            max_lanes = settings.max_lanes(),
        );

        Ok(GeneratorHandle {
            shutdown: shutdown_tx,
            target: target_tx,
            snapshots,
            controller,
        })
    }
}

/// Controls a running generator.
///
/// Dropping the handle stops the generator without waiting for its lanes; use
/// [`GeneratorHandle::stop`] to wait for them and collect the final totals.
#[derive(Debug)]
pub struct GeneratorHandle {
    shutdown: watch::Sender<bool>,
    target: watch::Sender<f64>,
    snapshots: watch::Receiver<GeneratorSnapshot>,
    controller: JoinHandle<GeneratorSnapshot>,
}

impl GeneratorHandle {
    /// The latest state published by the controller.
    pub fn snapshot(&self) -> GeneratorSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Changes the target rate. Takes effect at the next tick that has completed batches
    /// to learn from.
    pub fn set_qps(&self, qps: f64) -> Result<(), GeneratorError> {
        validate_qps(qps)?;
        let previous = self.target.send_replace(qps);
        debug!(message = "Target rate changed.", previous, qps);
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.controller.is_finished()
    }

    /// Stops the controller and every lane, interrupting calls in progress, and returns
    /// the final state.
    pub async fn stop(self) -> GeneratorSnapshot {
        let Self {
            shutdown,
            snapshots,
            controller,
            ..
        } = self;
        shutdown.send_replace(true);

        let last = match controller.await {
            Ok(last) => last,
            Err(error) => {
                error!(message = "Generator controller failed.", %error);
                snapshots.borrow().clone()
            }
        };

        info!(
            message = "Generator stopped.",
            completed_requests = last.completed_requests,
            completed_batches = last.completed_batches,
            lanes_created = last.lanes_created,
        );
        last
    }
}

/// Read-only view of a generator's state, refreshed on every batch completion and
/// every recalibration.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GeneratorSnapshot {
    /// Target rate the current parameters were computed for.
    pub qps: f64,
    /// False until the bootstrap sample has been taken.
    pub calibrated: bool,
    /// Smoothed per-call latency of the handler.
    pub latency: Duration,
    pub lanes: usize,
    pub requests_per_batch: usize,
    pub wait: Duration,
    /// Lanes currently running a batch.
    pub in_flight: usize,
    pub lanes_created: usize,
    pub completed_batches: u64,
    pub completed_requests: u64,
    pub recalibrations: u64,
}

impl GeneratorSnapshot {
    fn pending(settings: &GeneratorSettings) -> Self {
        Self {
            qps: settings.qps(),
            ..Self::default()
        }
    }
}
