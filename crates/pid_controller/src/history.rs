use std::collections::VecDeque;

use serde::Serialize;

use crate::PidSnapshot;

/// A field of [`PidSnapshot`] that can be averaged over a [`PidHistory`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PidMetric {
    Setpoint,
    Output,
    Error,
    Integral,
}

impl PidMetric {
    pub const ALL: [Self; 4] = [Self::Setpoint, Self::Output, Self::Error, Self::Integral];

    pub fn accessor(self) -> fn(&PidSnapshot) -> f64 {
        match self {
            Self::Setpoint => |snapshot: &PidSnapshot| snapshot.setpoint,
            Self::Output => |snapshot: &PidSnapshot| snapshot.output,
            Self::Error => |snapshot: &PidSnapshot| snapshot.error,
            Self::Integral => |snapshot: &PidSnapshot| snapshot.integral,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Setpoint => "setpoint",
            Self::Output => "output",
            Self::Error => "error",
            Self::Integral => "integral",
        }
    }
}

/// The last `capacity` snapshots of a controller, oldest first.
#[derive(Clone, Debug)]
pub struct PidHistory {
    capacity: usize,
    entries: VecDeque<PidSnapshot>,
}

impl PidHistory {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a snapshot, evicting the oldest one when full.
    pub fn push(&mut self, snapshot: PidSnapshot) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&PidSnapshot> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PidSnapshot> {
        self.entries.iter()
    }

    /// Mean of `metric` over the retained snapshots, `None` while empty.
    pub fn moving_average(&self, metric: PidMetric) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let value = metric.accessor();
        let sum: f64 = self.entries.iter().map(value).sum();
        Some(sum / self.entries.len() as f64)
    }
}
