//! Execution lanes: reusable tasks that run batches of handler calls.
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::{FutureExt, future::join_all};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, sleep},
};

use super::task::Task;
use crate::internal_event::{
    InternalEvent,
    generator::{HandlerPanicked, LaneSpawned},
};

pub(crate) type LaneId = usize;

/// A batch of calls travelling from the controller to a lane and back.
///
/// On dispatch `duration` is the wait budget per call; the lane overwrites it with the
/// time the whole batch actually took before handing the batch back.
#[derive(Debug)]
pub(crate) struct Batch {
    pub(crate) requests: usize,
    pub(crate) duration: Duration,
    pub(crate) lane: Lane,
}

/// Handle to an idle lane. Dispatching consumes it and the batch carries it back, so a
/// lane can never hold two batches.
#[derive(Debug)]
pub(crate) struct Lane {
    id: LaneId,
    inbox: mpsc::Sender<Batch>,
}

impl Lane {
    pub(crate) const fn id(&self) -> LaneId {
        self.id
    }

    /// Hands a batch to the lane. Gives the lane back if its task is gone.
    pub(crate) fn dispatch(self, requests: usize, wait: Duration) -> Result<(), Lane> {
        let inbox = self.inbox.clone();
        inbox
            .try_send(Batch {
                requests,
                duration: wait,
                lane: self,
            })
            .map_err(|error| error.into_inner().lane)
    }
}

/// Idle lanes plus the ability to spawn more, up to `max_lanes` live ones.
pub(crate) struct LanePool<H> {
    handler: Arc<H>,
    precision: Duration,
    max_lanes: usize,
    idle: Vec<Lane>,
    reports: mpsc::UnboundedSender<Batch>,
    shutdown: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
    dead: usize,
}

impl<H: Task> LanePool<H> {
    pub(crate) fn new(
        handler: Arc<H>,
        precision: Duration,
        max_lanes: usize,
        reports: mpsc::UnboundedSender<Batch>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handler,
            precision,
            max_lanes,
            idle: Vec::new(),
            reports,
            shutdown,
            tasks: Vec::new(),
            dead: 0,
        }
    }

    /// Reuses an idle lane, or spawns one if the cap allows it.
    pub(crate) fn acquire(&mut self) -> Option<Lane> {
        if let Some(lane) = self.idle.pop() {
            return Some(lane);
        }
        if self.tasks.len() - self.dead >= self.max_lanes {
            return None;
        }
        Some(self.spawn())
    }

    pub(crate) fn release(&mut self, lane: Lane) {
        self.idle.push(lane);
    }

    /// Drops a lane whose task has exited so a new one can take its place.
    pub(crate) fn discard(&mut self, lane: Lane) {
        warn!(message = "Lane is gone; dropping it.", lane = lane.id());
        self.dead += 1;
    }

    /// Lanes spawned so far, idle, busy or discarded.
    pub(crate) fn created(&self) -> usize {
        self.tasks.len()
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.idle.len()
    }

    fn spawn(&mut self) -> Lane {
        let id = self.tasks.len();
        let (inbox, batches) = mpsc::channel(1);

        self.tasks.push(tokio::spawn(lane_task(
            id,
            batches,
            self.reports.clone(),
            Arc::clone(&self.handler),
            self.precision,
            self.shutdown.clone(),
        )));
        LaneSpawned {
            lane: id,
            lanes: self.tasks.len(),
        }
        .emit();

        Lane { id, inbox }
    }

    /// Closes every idle inbox and waits for all lane tasks to exit.
    ///
    /// Busy lanes only exit once the shutdown signal fires or their report can no longer
    /// be delivered, so callers signal shutdown first.
    pub(crate) async fn shutdown(self) {
        let Self { idle, tasks, .. } = self;
        drop(idle);

        for result in join_all(tasks).await {
            if let Err(error) = result {
                error!(message = "Lane task failed.", %error);
            }
        }
    }
}

async fn lane_task<H: Task>(
    id: LaneId,
    mut batches: mpsc::Receiver<Batch>,
    reports: mpsc::UnboundedSender<Batch>,
    handler: Arc<H>,
    precision: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    trace!(message = "Lane started.", lane = id);

    let main_task = async {
        while let Some(mut batch) = batches.recv().await {
            batch.duration =
                run_batch(handler.as_ref(), batch.requests, batch.duration, precision).await;
            if reports.send(batch).is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = main_task => {}
        _ = shutdown.wait_for(|stop| *stop) => {}
    }

    trace!(message = "Lane stopped.", lane = id);
}

/// Calls `handler` `requests` times, pausing `wait` after each call.
///
/// Pauses are accumulated and only slept once they reach `precision`; whatever is left
/// is slept after the last call. Returns the time the batch took.
pub(crate) async fn run_batch<H: Task>(
    handler: &H,
    requests: usize,
    wait: Duration,
    precision: Duration,
) -> Duration {
    let started = Instant::now();
    let mut owed = Duration::ZERO;

    for _ in 0..requests {
        if AssertUnwindSafe(async { handler.run().await })
            .catch_unwind()
            .await
            .is_err()
        {
            HandlerPanicked.emit();
        }

        owed = owed.saturating_add(wait);
        if owed >= precision {
            sleep(owed).await;
            owed = Duration::ZERO;
        }
    }

    if !owed.is_zero() {
        sleep(owed).await;
    }

    started.elapsed()
}
