//! Instrumentation points of the generator.
//!
//! Every event records through the `metrics` facade and mirrors a `tracing` line under
//! the `adaptive_pacer::stats` target. Nothing is recorded unless the application
//! installs a metrics recorder or a tracing subscriber.

pub mod generator;

/// Something worth reporting about the generator's inner workings.
pub trait InternalEvent: Sized {
    fn emit(self);

    fn name(&self) -> Option<&'static str> {
        None
    }
}
