//! Units of work.

use std::future::Future;

use futures::future::BoxFuture;

/// Error produced by a failing task.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a single task run.
pub type TaskResult = Result<(), TaskError>;

/// A unit of build work.
///
/// Tasks hold no per-run state: every call to [`Task::run`] is independent
/// and must be safe to repeat.
pub trait Task: Send + Sync {
    /// Execute the task once.
    fn run(&self) -> BoxFuture<'_, TaskResult>;
}

/// A [`Task`] backed by a closure returning a future.
pub struct FnTask<F> {
    f: F,
}

impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    fn run(&self) -> BoxFuture<'_, TaskResult> {
        Box::pin((self.f)())
    }
}

/// Wrap an async closure as a task.
///
/// ```
/// use assetflow_graph::{TaskGraph, task_fn};
///
/// let mut graph = TaskGraph::new();
/// graph
///     .register("noop", task_fn(|| async { Ok(()) }))
///     .unwrap();
/// ```
pub fn task_fn<F, Fut>(f: F) -> FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    FnTask { f }
}
