//! Timing behavior of the watcher state machine.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use assetflow::watch::{Watcher, WatcherHandle};
use assetflow_graph::{TaskError, TaskGraph, TaskGroup, task_fn};
use assetflow_pipeline::{ReloadKind, WatchRule};
use tokio::time::sleep;

/// Start times of every run of the `styles` task.
type Runs = Arc<Mutex<Vec<Instant>>>;

struct Fixture {
    handle: WatcherHandle,
    runs: Runs,
    completed: Arc<AtomicUsize>,
}

/// A watcher with one `assets/scss/**/*` rule whose task takes `work` and
/// fails on the runs listed in `fail_on` (zero-based).
fn start(debounce: Duration, work: Duration, fail_on: &'static [usize]) -> Fixture {
    let runs: Runs = Arc::default();
    let recorded = Arc::clone(&runs);

    let mut graph = TaskGraph::new();
    graph
        .register(
            "styles",
            task_fn(move || {
                let recorded = Arc::clone(&recorded);
                async move {
                    let run = {
                        let mut runs = recorded.lock().unwrap();
                        runs.push(Instant::now());
                        runs.len() - 1
                    };
                    sleep(work).await;
                    if fail_on.contains(&run) {
                        return Err(TaskError::from(format!("run {run} failed")));
                    }
                    Ok(())
                }
            }),
        )
        .unwrap();

    let rule = WatchRule {
        name: "styles".to_string(),
        pattern: "assets/scss/**/*".to_string(),
        group: graph.leaf("styles").unwrap(),
        debounce,
        reload: ReloadKind::Css,
    };

    let mut watcher = Watcher::new(".");
    watcher.watch(rule).unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&completed);
    let handle = watcher.start(Arc::new(graph), move |rule: &WatchRule| {
        assert_eq!(rule.reload, ReloadKind::Css);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    Fixture {
        handle,
        runs,
        completed,
    }
}

fn run_count(runs: &Runs) -> usize {
    runs.lock().unwrap().len()
}

#[tokio::test]
async fn test_burst_collapses_into_one_run_after_quiet_period() {
    let fixture = start(Duration::from_millis(300), Duration::ZERO, &[]);

    let mut last_event = Instant::now();
    for _ in 0..3 {
        last_event = Instant::now();
        fixture.handle.notify("assets/scss/main.scss");
        sleep(Duration::from_millis(50)).await;
    }
    sleep(Duration::from_millis(700)).await;

    let runs = fixture.runs.lock().unwrap().clone();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].duration_since(last_event) >= Duration::from_millis(300));
    assert_eq!(fixture.completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_changes_during_run_cause_exactly_one_more_run() {
    let fixture = start(Duration::from_millis(50), Duration::from_millis(300), &[]);

    fixture.handle.notify("assets/scss/main.scss");
    sleep(Duration::from_millis(150)).await;
    assert_eq!(run_count(&fixture.runs), 1);

    // Still inside the first run.
    fixture.handle.notify("assets/scss/_vars.scss");
    fixture.handle.notify("assets/scss/main.scss");
    sleep(Duration::from_millis(1000)).await;

    assert_eq!(run_count(&fixture.runs), 2);
    assert_eq!(fixture.completed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_run_keeps_watching() {
    let fixture = start(Duration::from_millis(30), Duration::ZERO, &[0]);

    fixture.handle.notify("assets/scss/main.scss");
    sleep(Duration::from_millis(300)).await;
    assert_eq!(run_count(&fixture.runs), 1);
    assert_eq!(fixture.completed.load(Ordering::SeqCst), 0);

    fixture.handle.notify("assets/scss/main.scss");
    sleep(Duration::from_millis(300)).await;
    assert_eq!(run_count(&fixture.runs), 2);
    assert_eq!(fixture.completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unmatched_paths_are_ignored() {
    let fixture = start(Duration::from_millis(30), Duration::ZERO, &[]);

    fixture.handle.notify("assets/js/main.js");
    fixture.handle.notify("public/css/main.css");
    sleep(Duration::from_millis(300)).await;

    assert_eq!(run_count(&fixture.runs), 0);
}

#[tokio::test]
async fn test_absolute_paths_match_relative_to_root() {
    let fixture = start(Duration::from_millis(30), Duration::ZERO, &[]);
    let cwd = std::env::current_dir().unwrap();

    fixture.handle.notify(cwd.join("assets/scss/pages/home.scss"));
    sleep(Duration::from_millis(300)).await;

    assert_eq!(run_count(&fixture.runs), 1);
}

#[tokio::test]
async fn test_empty_group_only_reports_completion() {
    let mut watcher = Watcher::new(".");
    watcher
        .watch(WatchRule {
            name: "reload-0".to_string(),
            pattern: "templates/**/*.html".to_string(),
            group: TaskGroup::series([]),
            debounce: Duration::from_millis(20),
            reload: ReloadKind::Full,
        })
        .unwrap();

    let reloads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reloads);
    let handle = watcher.start(Arc::new(TaskGraph::new()), move |_: &WatchRule| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    handle.notify("templates/home.html");
    sleep(Duration::from_millis(200)).await;

    assert_eq!(reloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_directories_are_reported_as_skipped() {
    let root = tempfile::TempDir::new().unwrap();
    let styles = root.path().join("assets/scss");
    std::fs::create_dir_all(&styles).unwrap();
    let images = root.path().join("assets/img");

    let mut handle = Watcher::new(root.path()).start(Arc::new(TaskGraph::new()), |_: &WatchRule| {});
    let skipped = handle.watch_dirs(&[&styles, &images]).unwrap();

    assert_eq!(skipped, vec![images]);
}
