//! assetflow task graph
//!
//! Named tasks composed into series and parallel groups.
//!
//! # Example
//!
//! ```
//! use assetflow_graph::{TaskGraph, TaskGroup, task_fn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut graph = TaskGraph::new();
//! graph.register("styles", task_fn(|| async { Ok(()) })).unwrap();
//! graph.register("scripts", task_fn(|| async { Ok(()) })).unwrap();
//!
//! let build = TaskGroup::parallel([
//!     graph.leaf("styles").unwrap(),
//!     graph.leaf("scripts").unwrap(),
//! ]);
//! graph.run(&build).await.unwrap();
//! # }
//! ```

pub mod graph;
pub mod task;

pub use graph::{GraphError, GroupKind, RunFailure, TaskFailure, TaskGraph, TaskGroup, TaskRef};
pub use task::{FnTask, Task, TaskError, TaskResult, task_fn};
