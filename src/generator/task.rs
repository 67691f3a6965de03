use std::{future::Future, sync::Arc};

/// A unit of work the generator calls repeatedly.
///
/// A task takes no argument and produces no result. Failures of the underlying work
/// are the task's own business: the generator only measures how long `run` takes.
///
/// # Example
/// ```rust
/// use adaptive_pacer::generator::Task;
///
/// struct Ping;
///
/// impl Task for Ping {
///     async fn run(&self) {
///         // talk to the system under test
///     }
/// }
/// ```
pub trait Task: Send + Sync + 'static {
    /// Performs one call.
    fn run(&self) -> impl Future<Output = ()> + Send;
}

impl<T: Task> Task for Arc<T> {
    fn run(&self) -> impl Future<Output = ()> + Send {
        (**self).run()
    }
}

/// A [`Task`] backed by a closure returning a future. Built with [`task_fn`].
#[derive(Clone, Copy, Debug)]
pub struct TaskFn<F> {
    f: F,
}

/// Wraps a closure so it can be used as a [`Task`].
///
/// ```rust
/// use adaptive_pacer::generator::task_fn;
///
/// let task = task_fn(|| async {
///     tokio::time::sleep(std::time::Duration::from_millis(5)).await;
/// });
/// ```
pub fn task_fn<F, Fut>(f: F) -> TaskFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    TaskFn { f }
}

impl<F, Fut> Task for TaskFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    fn run(&self) -> impl Future<Output = ()> + Send {
        (self.f)()
    }
}
