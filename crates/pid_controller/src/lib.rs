//! A PID feedback controller.
//!
//! The controller drives a measured value toward a setpoint. Each iteration computes
//! `error = setpoint - measured` and outputs
//! `kp * error + ki * integral(error) + kd * d(error)/dt`, clamped to
//! `[output_min, output_max]`.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use pid_controller::Pid;
//!
//! let mut pid = Pid::builder()
//!     .kp(0.5)
//!     .ki(0.1)
//!     .setpoint(100.0)
//!     .output_min(0.0)
//!     .output_max(10.0)
//!     .build()
//!     .expect("valid limits");
//!
//! let output = pid.step(90.0, Duration::from_secs(1));
//! assert_eq!(output, 6.0);
//! ```
mod history;

use std::time::{Duration, Instant};

use bon::bon;
use serde::Serialize;
use snafu::{Snafu, ensure};

pub use history::{PidHistory, PidMetric};

#[macro_use]
extern crate tracing;

#[derive(Debug, Snafu)]
pub enum PidError {
    #[snafu(display("Output limits are inverted: min {min} exceeds max {max}"))]
    InvalidClamp { min: f64, max: f64 },
}

/// State of a [`Pid`] after its latest iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PidSnapshot {
    pub setpoint: f64,
    pub output: f64,
    /// `setpoint - measured` at the latest iteration, zero before the first one.
    pub error: f64,
    pub integral: f64,
}

#[derive(Clone, Debug)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    output_min: f64,
    output_max: f64,
    output: f64,
    integral: f64,
    previous_error: Option<f64>,
    last_update: Option<Instant>,
}

#[bon]
impl Pid {
    /// Gains default to zero and the output is unbounded unless limits are given.
    /// `output` sets the value returned before the first real iteration.
    #[builder]
    pub fn new(
        #[builder(default)] kp: f64,
        #[builder(default)] ki: f64,
        #[builder(default)] kd: f64,
        #[builder(default)] setpoint: f64,
        #[builder(default = f64::NEG_INFINITY)] output_min: f64,
        #[builder(default = f64::INFINITY)] output_max: f64,
        #[builder(default)] output: f64,
    ) -> Result<Self, PidError> {
        check_limits(output_min, output_max)?;
        Ok(Self {
            kp,
            ki,
            kd,
            setpoint,
            output_min,
            output_max,
            output: output.clamp(output_min, output_max),
            integral: 0.0,
            previous_error: None,
            last_update: None,
        })
    }
}

impl Pid {
    /// Runs one iteration with the wall-clock time elapsed since the previous call.
    ///
    /// The first call only starts the clock and returns the current output.
    pub fn update(&mut self, measured: f64) -> f64 {
        let now = Instant::now();
        let output = match self.last_update {
            Some(previous) => self.step(measured, now.duration_since(previous)),
            None => self.output,
        };
        self.last_update = Some(now);
        output
    }

    /// Runs one iteration covering `dt`. A zero `dt` changes nothing.
    pub fn step(&mut self, measured: f64, dt: Duration) -> f64 {
        if dt.is_zero() {
            return self.output;
        }

        let dt = dt.as_secs_f64();
        let error = self.setpoint - measured;
        // no derivative term until there are two errors to compare
        let derivative = self
            .previous_error
            .map_or(0.0, |previous| (error - previous) / dt);
        self.previous_error = Some(error);

        // stop integrating while the output sits on a limit the error pushes against
        let winding_up = (self.output >= self.output_max && self.ki * error > 0.0)
            || (self.output <= self.output_min && self.ki * error < 0.0);
        if !winding_up {
            self.integral += error * dt;
        }

        let raw = self.kp * error + self.ki * self.integral + self.kd * derivative;
        self.output = raw.clamp(self.output_min, self.output_max);
        trace!(
            message = "PID step.",
            measured,
            error,
            integral = self.integral,
            derivative,
            output = self.output,
            winding_up,
        );
        self.output
    }

    /// Moves the setpoint. Any actual change drops the accumulated error.
    pub fn set_setpoint(&mut self, setpoint: f64) {
        if setpoint != self.setpoint {
            self.integral = 0.0;
            self.previous_error = None;
        }
        self.setpoint = setpoint;
    }

    pub fn set_output_limits(&mut self, min: f64, max: f64) -> Result<(), PidError> {
        check_limits(min, max)?;
        self.output_min = min;
        self.output_max = max;
        self.output = self.output.clamp(min, max);
        Ok(())
    }

    /// Forgets accumulated error, the previous error and the update clock. Keeps the output.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = None;
        self.last_update = None;
    }

    pub const fn output(&self) -> f64 {
        self.output
    }

    pub const fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub const fn integral(&self) -> f64 {
        self.integral
    }

    pub fn snapshot(&self) -> PidSnapshot {
        PidSnapshot {
            setpoint: self.setpoint,
            output: self.output,
            error: self.previous_error.unwrap_or_default(),
            integral: self.integral,
        }
    }
}

fn check_limits(min: f64, max: f64) -> Result<(), PidError> {
    // also rejects NaN limits
    ensure!(min <= max, InvalidClampSnafu { min, max });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn proportional_only() {
        let mut pid = Pid::builder().kp(2.0).setpoint(10.0).build().unwrap();

        assert_close(pid.step(4.0, SECOND), 12.0);
        assert_close(pid.step(12.0, SECOND), -4.0);
    }

    #[test]
    fn integral_accumulates_error_over_time() {
        let mut pid = Pid::builder().ki(1.0).setpoint(1.0).build().unwrap();

        assert_close(pid.step(0.0, Duration::from_millis(500)), 0.5);
        assert_close(pid.step(0.0, Duration::from_millis(500)), 1.0);
        assert_close(pid.integral(), 1.0);
    }

    #[test]
    fn derivative_starts_on_the_second_step() {
        let mut pid = Pid::builder().kd(1.0).setpoint(10.0).build().unwrap();

        assert_close(pid.step(0.0, SECOND), 0.0);
        // error went from 10 to 4 over two seconds
        assert_close(pid.step(6.0, 2 * SECOND), -3.0);
    }

    #[test]
    fn zero_dt_returns_the_current_output() {
        let mut pid = Pid::builder()
            .kp(1.0)
            .ki(1.0)
            .setpoint(5.0)
            .output(3.0)
            .build()
            .unwrap();

        assert_eq!(pid.step(0.0, Duration::ZERO), 3.0);
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.snapshot().error, 0.0);
    }

    #[test]
    fn first_update_only_starts_the_clock() {
        let mut pid = Pid::builder()
            .kp(1.0)
            .setpoint(5.0)
            .output(7.0)
            .build()
            .unwrap();

        assert_eq!(pid.update(0.0), 7.0);
        std::thread::sleep(Duration::from_millis(2));
        assert_close(pid.update(0.0), 5.0);
    }

    #[test]
    fn output_is_clamped() {
        let mut pid = Pid::builder()
            .kp(10.0)
            .setpoint(100.0)
            .output_min(-1.0)
            .output_max(1.0)
            .build()
            .unwrap();

        assert_eq!(pid.step(0.0, SECOND), 1.0);
        assert_eq!(pid.step(200.0, SECOND), -1.0);
    }

    #[test]
    fn integral_freezes_while_saturated() {
        let mut pid = Pid::builder()
            .ki(1.0)
            .setpoint(10.0)
            .output_max(5.0)
            .build()
            .unwrap();

        assert_eq!(pid.step(0.0, SECOND), 5.0);
        let saturated_at = pid.integral();
        for _ in 0..20 {
            assert_eq!(pid.step(0.0, SECOND), 5.0);
        }
        assert_eq!(pid.integral(), saturated_at);

        // overshoot: the output must come off the clamp right away
        let output = pid.step(20.0, SECOND);
        assert!(output < 5.0);
    }

    #[test]
    fn integral_unwinds_while_saturated() {
        let mut pid = Pid::builder()
            .kp(1.0)
            .ki(1.0)
            .setpoint(0.0)
            .output_max(1.0)
            .build()
            .unwrap();

        pid.step(-10.0, SECOND);
        let before = pid.integral();
        // still saturated, but the error now pulls the integral down
        pid.step(10.0, Duration::from_millis(100));
        assert!(pid.integral() < before);
    }

    #[test]
    fn setpoint_change_resets_the_integral() {
        let mut pid = Pid::builder().ki(1.0).setpoint(1.0).build().unwrap();
        pid.step(0.0, SECOND);
        assert_close(pid.integral(), 1.0);

        pid.set_setpoint(1.0);
        assert_close(pid.integral(), 1.0);

        pid.set_setpoint(2.0);
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.setpoint(), 2.0);
    }

    #[test]
    fn inverted_limits_are_rejected() {
        let error = Pid::builder()
            .output_min(1.0)
            .output_max(-1.0)
            .build()
            .unwrap_err();
        assert!(matches!(error, PidError::InvalidClamp { .. }));

        let mut pid = Pid::builder().output(4.0).build().unwrap();
        assert!(pid.set_output_limits(f64::NAN, 1.0).is_err());
        pid.set_output_limits(0.0, 2.0).unwrap();
        assert_eq!(pid.output(), 2.0);
    }

    #[test]
    fn reset_keeps_the_output() {
        let mut pid = Pid::builder().kp(1.0).ki(1.0).setpoint(3.0).build().unwrap();
        let output = pid.step(1.0, SECOND);

        pid.reset();

        assert_eq!(pid.output(), output);
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.snapshot().error, 0.0);
    }

    #[test]
    fn snapshot_serializes() {
        let mut pid = Pid::builder().kp(1.0).setpoint(2.0).build().unwrap();
        pid.step(1.5, SECOND);

        let json = serde_json::to_value(pid.snapshot()).unwrap();
        assert_eq!(json["setpoint"], 2.0);
        assert_eq!(json["error"], 0.5);
        assert_eq!(json["output"], 0.5);
    }
}
