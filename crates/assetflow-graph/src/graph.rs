//! Task registration, composition and execution.
//!
//! Ordering is expressed only through composition: a [`TaskGroup::Series`]
//! runs its members one after another and stops at the first failure, a
//! [`TaskGroup::Parallel`] starts every member at once and joins them all.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Instant};

use futures::future::{BoxFuture, join_all};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::task::{Task, TaskError};

/// Graph construction errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A task with this name is already registered.
    #[error("task `{0}` is already registered")]
    DuplicateName(String),

    /// No task with this name is registered.
    #[error("task `{0}` is not registered")]
    UnknownTask(String),
}

/// Result type for graph construction.
pub type Result<T> = std::result::Result<T, GraphError>;

/// A single failed task and its cause.
#[derive(Debug, Error)]
#[error("task `{task}` failed: {error}")]
pub struct TaskFailure {
    /// Name of the failing task.
    pub task: String,

    /// Underlying cause.
    #[source]
    pub error: TaskError,
}

/// Failure of a group run.
///
/// A series contributes only its first failure, a parallel group contributes
/// the failures of every member.
#[derive(Debug, Default)]
pub struct RunFailure {
    failures: Vec<TaskFailure>,
}

impl RunFailure {
    fn single(task: &str, error: TaskError) -> Self {
        Self {
            failures: vec![TaskFailure {
                task: task.to_string(),
                error,
            }],
        }
    }

    /// All collected failures, in member order.
    #[must_use]
    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    /// Names of the failing tasks.
    #[must_use]
    pub fn failed_tasks(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.task.as_str()).collect()
    }

    /// Consume into the individual failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<TaskFailure> {
        self.failures
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.as_slice() {
            [] => write!(f, "run failed"),
            [only] => write!(f, "{only}"),
            many => {
                write!(f, "{} tasks failed: ", many.len())?;
                for (i, failure) in many.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{failure}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for RunFailure {}

/// How the members of a group are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Strictly sequential, halts on the first failure.
    Series,
    /// Concurrent, always runs every member.
    Parallel,
}

/// A named leaf of a group.
#[derive(Clone)]
pub struct TaskRef {
    name: Arc<str>,
    task: Arc<dyn Task>,
}

impl TaskRef {
    /// The registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A composition of tasks.
#[derive(Clone)]
pub enum TaskGroup {
    /// A single registered task.
    Task(TaskRef),
    /// Ordered members.
    Series(Vec<TaskGroup>),
    /// Concurrent members.
    Parallel(Vec<TaskGroup>),
}

impl TaskGroup {
    /// Compose members into a group of the given kind.
    #[must_use]
    pub fn compose(kind: GroupKind, members: impl IntoIterator<Item = TaskGroup>) -> Self {
        let members = members.into_iter().collect();
        match kind {
            GroupKind::Series => Self::Series(members),
            GroupKind::Parallel => Self::Parallel(members),
        }
    }

    /// Shorthand for a series group.
    #[must_use]
    pub fn series(members: impl IntoIterator<Item = TaskGroup>) -> Self {
        Self::compose(GroupKind::Series, members)
    }

    /// Shorthand for a parallel group.
    #[must_use]
    pub fn parallel(members: impl IntoIterator<Item = TaskGroup>) -> Self {
        Self::compose(GroupKind::Parallel, members)
    }

    /// Names of every leaf task, depth first.
    #[must_use]
    pub fn task_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Task(task) => names.push(task.name()),
            Self::Series(members) | Self::Parallel(members) => {
                for member in members {
                    member.collect_names(names);
                }
            }
        }
    }

    fn execute(&self) -> BoxFuture<'_, std::result::Result<(), RunFailure>> {
        Box::pin(async move {
            match self {
                Self::Task(task) => {
                    let start = Instant::now();
                    info!(task = task.name(), "starting");
                    match task.task.run().await {
                        Ok(()) => {
                            info!(
                                task = task.name(),
                                elapsed_ms = start.elapsed().as_millis() as u64,
                                "finished"
                            );
                            Ok(())
                        }
                        Err(error) => {
                            warn!(task = task.name(), %error, "failed");
                            Err(RunFailure::single(task.name(), error))
                        }
                    }
                }
                Self::Series(members) => {
                    for member in members {
                        member.execute().await?;
                    }
                    Ok(())
                }
                Self::Parallel(members) => {
                    let results = join_all(members.iter().map(TaskGroup::execute)).await;
                    let mut failure = RunFailure::default();
                    for result in results {
                        if let Err(member_failure) = result {
                            failure.failures.extend(member_failure.failures);
                        }
                    }
                    if failure.failures.is_empty() {
                        Ok(())
                    } else {
                        Err(failure)
                    }
                }
            }
        })
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(task) => write!(f, "{}", task.name()),
            Self::Series(members) => f.debug_tuple("Series").field(members).finish(),
            Self::Parallel(members) => f.debug_tuple("Parallel").field(members).finish(),
        }
    }
}

/// Registry of named tasks and the entry point for running groups.
#[derive(Default)]
pub struct TaskGraph {
    tasks: BTreeMap<String, Arc<dyn Task>>,
}

impl TaskGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named leaf task.
    pub fn register(&mut self, name: impl Into<String>, task: impl Task + 'static) -> Result<()> {
        let name = name.into();
        if self.tasks.contains_key(&name) {
            return Err(GraphError::DuplicateName(name));
        }
        debug!(task = %name, "registered task");
        self.tasks.insert(name, Arc::new(task));
        Ok(())
    }

    /// A group consisting of the single task `name`.
    pub fn leaf(&self, name: &str) -> Result<TaskGroup> {
        let task = self
            .tasks
            .get(name)
            .ok_or_else(|| GraphError::UnknownTask(name.to_string()))?;
        Ok(TaskGroup::Task(TaskRef {
            name: Arc::from(name),
            task: Arc::clone(task),
        }))
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Run a group to completion or first failure.
    pub async fn run(&self, group: &TaskGroup) -> std::result::Result<(), RunFailure> {
        let start = Instant::now();
        let result = group.execute().await;
        match &result {
            Ok(()) => debug!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                "group finished"
            ),
            Err(failure) => debug!(
                failed = ?failure.failed_tasks(),
                "group failed"
            ),
        }
        result
    }
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::task_fn;

    fn ok_graph(names: &[&str]) -> TaskGraph {
        let mut graph = TaskGraph::new();
        for name in names {
            graph.register(*name, task_fn(|| async { Ok(()) })).unwrap();
        }
        graph
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut graph = ok_graph(&["styles"]);
        let err = graph
            .register("styles", task_fn(|| async { Ok(()) }))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName(ref n) if n == "styles"));
    }

    #[test]
    fn test_unknown_leaf() {
        let graph = ok_graph(&[]);
        let err = graph.leaf("scripts").unwrap_err();
        assert!(err.to_string().contains("scripts"));
    }

    #[test]
    fn test_task_names_depth_first() {
        let graph = ok_graph(&["a", "b", "c"]);
        let group = TaskGroup::series([
            graph.leaf("a").unwrap(),
            TaskGroup::parallel([graph.leaf("b").unwrap(), graph.leaf("c").unwrap()]),
        ]);
        assert_eq!(group.task_names(), vec!["a", "b", "c"]);
        assert_eq!(format!("{group:?}"), "Series([a, Parallel([b, c])])");
    }

    #[test]
    fn test_names_sorted() {
        let graph = ok_graph(&["views", "styles", "images"]);
        assert_eq!(graph.names().collect::<Vec<_>>(), vec!["images", "styles", "views"]);
    }

    #[tokio::test]
    async fn test_empty_groups_succeed() {
        let graph = TaskGraph::new();
        assert!(graph.run(&TaskGroup::series([])).await.is_ok());
        assert!(graph.run(&TaskGroup::parallel([])).await.is_ok());
    }

    #[test]
    fn test_run_failure_display_lists_every_task() {
        let mut failure = RunFailure::single("styles", "bad scss".into());
        failure
            .failures
            .extend(RunFailure::single("scripts", "bad js".into()).failures);

        let message = failure.to_string();
        assert!(message.starts_with("2 tasks failed"));
        assert!(message.contains("task `styles` failed: bad scss"));
        assert!(message.contains("task `scripts` failed: bad js"));
    }
}
