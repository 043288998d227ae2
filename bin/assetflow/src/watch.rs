//! Debounced rebuilds driven by filesystem events.
//!
//! Each [`WatchRule`] gets its own state machine:
//!
//! ```text
//! Idle --event--> Pending --quiet for debounce--> Running --done--> Idle
//!                  ^   |                             |
//!                  +---+ event resets the timer      +--event seen while running--> Pending
//! ```
//!
//! A run that fails is reported and the rule goes back to waiting; the
//! watcher itself never stops because of a task failure.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use assetflow_graph::TaskGraph;
use assetflow_pipeline::WatchRule;
use globset::{Glob, GlobMatcher};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info, trace};

/// Where a rule currently is in its rebuild cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Waiting for a matching change.
    Idle,
    /// A change was seen, waiting for the debounce window to pass quietly.
    Pending,
    /// The rule's group is running.
    Running,
}

struct CompiledRule {
    rule: WatchRule,
    matcher: GlobMatcher,
}

/// Collects watch rules before starting.
pub struct Watcher {
    root: PathBuf,
    rules: Vec<CompiledRule>,
}

impl Watcher {
    /// Create a watcher matching paths relative to `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            rules: Vec::new(),
        }
    }

    /// Add a rule. Fails if its pattern is not a valid glob.
    pub fn watch(&mut self, rule: WatchRule) -> Result<(), globset::Error> {
        let matcher = Glob::new(&rule.pattern)?.compile_matcher();
        debug!(rule = %rule.name, pattern = %rule.pattern, "watch rule added");
        self.rules.push(CompiledRule { rule, matcher });
        Ok(())
    }

    /// Spawn one state machine per rule plus the event router.
    ///
    /// `on_complete` is called after every successful run of a rule.
    pub fn start<F>(self, graph: Arc<TaskGraph>, on_complete: F) -> WatcherHandle
    where
        F: Fn(&WatchRule) + Send + Sync + 'static,
    {
        let on_complete = Arc::new(on_complete);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let canonical_root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());

        let mut tasks = Vec::with_capacity(self.rules.len() + 1);
        let mut routes = Vec::with_capacity(self.rules.len());
        for CompiledRule { rule, matcher } in self.rules {
            let (tx, rx) = mpsc::unbounded_channel();
            routes.push((matcher, rule.name.clone(), tx));
            tasks.push(tokio::spawn(run_rule(
                rule,
                Arc::clone(&graph),
                rx,
                Arc::clone(&on_complete),
            )));
        }

        let roots = [canonical_root, self.root];
        tasks.push(tokio::spawn(route_events(events_rx, roots, routes)));

        WatcherHandle {
            events: events_tx,
            watchers: Vec::new(),
            tasks,
        }
    }
}

/// A running watcher. Dropping it stops every rule.
pub struct WatcherHandle {
    events: UnboundedSender<PathBuf>,
    watchers: Vec<RecommendedWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Inject a change of `path` as if the filesystem reported it.
    pub fn notify(&self, path: impl Into<PathBuf>) {
        let _ = self.events.send(path.into());
    }

    /// Feed create, modify and remove events under `dirs` into the watcher.
    /// Directories that do not exist are skipped and logged.
    ///
    /// Returns the skipped directories.
    pub fn watch_dirs<P: AsRef<Path>>(&mut self, dirs: &[P]) -> notify::Result<Vec<PathBuf>> {
        let mut skipped = Vec::new();
        let events = self.events.clone();
        let mut watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        for path in event.paths {
                            let _ = events.send(path);
                        }
                    }
                }
                Err(e) => error!(error = %e, "filesystem watch error"),
            },
        )?;

        for dir in dirs {
            let dir = dir.as_ref();
            let Ok(dir) = dir.canonicalize() else {
                info!(
                    dir = %dir.display(),
                    "directory does not exist, restart to watch it once created"
                );
                skipped.push(dir.to_path_buf());
                continue;
            };
            watcher.watch(&dir, RecursiveMode::Recursive)?;
            debug!(dir = %dir.display(), "watching");
        }

        self.watchers.push(watcher);
        Ok(skipped)
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

type Route = (GlobMatcher, String, UnboundedSender<()>);

async fn route_events(
    mut events: UnboundedReceiver<PathBuf>,
    roots: [PathBuf; 2],
    routes: Vec<Route>,
) {
    while let Some(path) = events.recv().await {
        let relative = roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .unwrap_or(path.as_path());
        let relative = relative.strip_prefix(".").unwrap_or(relative);

        for (matcher, name, tx) in &routes {
            if matcher.is_match(relative) {
                trace!(rule = %name, path = %relative.display(), "change matched");
                let _ = tx.send(());
            }
        }
    }
}

async fn run_rule<F>(
    rule: WatchRule,
    graph: Arc<TaskGraph>,
    mut changes: UnboundedReceiver<()>,
    on_complete: Arc<F>,
) where
    F: Fn(&WatchRule) + Send + Sync + 'static,
{
    let mut state = WatchState::Idle;
    loop {
        state = match state {
            WatchState::Idle => {
                if changes.recv().await.is_none() {
                    break;
                }
                debug!(rule = %rule.name, "idle -> pending");
                WatchState::Pending
            }
            WatchState::Pending => match timeout(rule.debounce, changes.recv()).await {
                Ok(Some(())) => {
                    trace!(rule = %rule.name, "debounce reset");
                    WatchState::Pending
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(rule = %rule.name, "pending -> running");
                    WatchState::Running
                }
            },
            WatchState::Running => {
                let start = Instant::now();
                info!(rule = %rule.name, group = ?rule.group, "change detected, rebuilding");
                match graph.run(&rule.group).await {
                    Ok(()) => {
                        let elapsed = start.elapsed().as_millis();
                        println!("  ✓ {} rebuilt in {elapsed}ms", rule.name);
                        (*on_complete)(&rule);
                    }
                    Err(failure) => {
                        error!(rule = %rule.name, error = %failure, "rebuild failed");
                        eprintln!("  ✗ {} failed: {failure}", rule.name);
                    }
                }

                let mut changed_while_running = false;
                while changes.try_recv().is_ok() {
                    changed_while_running = true;
                }
                if changed_while_running {
                    debug!(rule = %rule.name, "running -> pending");
                    WatchState::Pending
                } else {
                    debug!(rule = %rule.name, "running -> idle");
                    WatchState::Idle
                }
            }
        };
    }
    debug!(rule = %rule.name, "watch rule stopped");
}

/// The directory part of a glob before its first wildcard.
///
/// `resources/views/**/*.php` is based at `resources/views`.
pub fn glob_base(pattern: &str) -> PathBuf {
    pattern
        .split('/')
        .take_while(|part| !part.contains(['*', '?', '[', '{']))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_base() {
        assert_eq!(glob_base("resources/views/**/*.php"), PathBuf::from("resources/views"));
        assert_eq!(glob_base("templates/*.html"), PathBuf::from("templates"));
        assert_eq!(glob_base("**/*.twig"), PathBuf::new());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut watcher = Watcher::new(".");
        let rule = WatchRule {
            name: "broken".to_string(),
            pattern: "assets/[scss".to_string(),
            group: assetflow_graph::TaskGroup::series([]),
            debounce: std::time::Duration::from_millis(10),
            reload: assetflow_pipeline::ReloadKind::Full,
        };
        assert!(watcher.watch(rule).is_err());
    }
}
