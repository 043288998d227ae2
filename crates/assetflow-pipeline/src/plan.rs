//! Per-command composition of the registered tasks.

use std::{fmt, path::Path, time::Duration};

use assetflow_core::Config;
use assetflow_graph::{GraphError, TaskGraph, TaskGroup};

use crate::tasks::{
    IMAGES, SCRIPTS, SCRIPTS_PRODUCTION, STYLES, VIEWS_NORMALIZE, VIEWS_RENDER, WORKSPACE_CLEAN,
    WORKSPACE_ENSURE,
};

/// Top-level commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Single-page app with live reload.
    Dev,
    /// Single-page app behind a backend proxy.
    DevProxy,
    /// Production single-page app build.
    Build,
    /// Static site with live reload.
    StaticDev,
    /// Production static site build.
    StaticBuild,
}

impl Command {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::DevProxy => "dev-proxy",
            Self::Build => "build",
            Self::StaticDev => "static-dev",
            Self::StaticBuild => "static-build",
        }
    }

    /// Whether the command keeps running after the initial build.
    #[must_use]
    pub fn is_watching(self) -> bool {
        matches!(self, Self::Dev | Self::DevProxy | Self::StaticDev)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the browser reaches the built output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServingMode {
    /// Local static server over the output tree.
    Standalone,
    /// Forwarding to an external backend.
    Proxy { target: String },
}

/// Browser notification sent after a successful rule run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadKind {
    /// Reload the page.
    Full,
    /// Swap stylesheets in place.
    Css,
    /// Do nothing.
    None,
}

/// A path pattern bound to the group it reruns.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub name: String,
    /// Glob relative to the project root.
    pub pattern: String,
    pub group: TaskGroup,
    pub debounce: Duration,
    pub reload: ReloadKind,
}

/// Everything a command runs.
#[derive(Debug, Clone)]
pub struct Plan {
    pub command: Command,
    pub initial: TaskGroup,
    pub watch: Vec<WatchRule>,
    pub serving: Option<ServingMode>,
}

impl Plan {
    /// Compose the plan for `command` from tasks registered in `graph`.
    pub fn for_command(
        command: Command,
        graph: &TaskGraph,
        config: &Config,
    ) -> Result<Self, GraphError> {
        let images = config.images.enabled;
        let assets = |scripts: &str| -> Result<TaskGroup, GraphError> {
            let mut members = vec![graph.leaf(STYLES)?, graph.leaf(scripts)?];
            if images {
                members.push(graph.leaf(IMAGES)?);
            }
            Ok(TaskGroup::parallel(members))
        };
        let views = TaskGroup::series([
            graph.leaf(WORKSPACE_CLEAN)?,
            graph.leaf(WORKSPACE_ENSURE)?,
            graph.leaf(VIEWS_RENDER)?,
            graph.leaf(VIEWS_NORMALIZE)?,
            graph.leaf(WORKSPACE_CLEAN)?,
        ]);

        let initial = match command {
            Command::Build => assets(SCRIPTS_PRODUCTION)?,
            Command::StaticBuild => TaskGroup::series([views.clone(), assets(SCRIPTS_PRODUCTION)?]),
            Command::Dev | Command::DevProxy => assets(SCRIPTS)?,
            Command::StaticDev => {
                let mut members = vec![views.clone(), graph.leaf(SCRIPTS)?, graph.leaf(STYLES)?];
                if images {
                    members.push(graph.leaf(IMAGES)?);
                }
                TaskGroup::series(members)
            }
        };

        let serving = match command {
            Command::Build | Command::StaticBuild => None,
            Command::Dev | Command::StaticDev => Some(ServingMode::Standalone),
            Command::DevProxy => Some(ServingMode::Proxy {
                target: config.proxy.target.clone(),
            }),
        };

        let mut watch = Vec::new();
        if command.is_watching() {
            let debounce = Duration::from_millis(config.watch.debounce_ms);
            let rule = |name: &str, pattern: String, group: TaskGroup, reload: ReloadKind| WatchRule {
                name: name.to_string(),
                pattern,
                group,
                debounce,
                reload,
            };
            let paths = &config.paths;

            if command == Command::StaticDev {
                watch.push(rule("views", under(&paths.views), views, ReloadKind::Full));
            }
            watch.push(rule(STYLES, under(&paths.styles), graph.leaf(STYLES)?, ReloadKind::Css));
            watch.push(rule(SCRIPTS, under(&paths.scripts), graph.leaf(SCRIPTS)?, ReloadKind::Full));
            if images {
                watch.push(rule(IMAGES, under(&paths.images), graph.leaf(IMAGES)?, ReloadKind::Full));
            }
            for (i, pattern) in config.watch.reload_only.iter().enumerate() {
                watch.push(rule(
                    &format!("reload-{i}"),
                    pattern.clone(),
                    TaskGroup::series([]),
                    ReloadKind::Full,
                ));
            }
        }

        Ok(Self {
            command,
            initial,
            watch,
            serving,
        })
    }
}

/// `dir/**/*` with any leading `./` dropped.
fn under(dir: &Path) -> String {
    let dir = dir.strip_prefix(".").unwrap_or(dir);
    let dir = dir.to_string_lossy();
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        "**/*".to_string()
    } else {
        format!("{dir}/**/*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::register_tasks;

    fn plan(command: Command, config: &Config) -> Plan {
        let mut graph = TaskGraph::new();
        register_tasks(&mut graph, config).unwrap();
        Plan::for_command(command, &graph, config).unwrap()
    }

    #[test]
    fn test_build_is_parallel_production_assets() {
        let plan = plan(Command::Build, &Config::default());

        assert_eq!(
            format!("{:?}", plan.initial),
            "Parallel([styles, scripts:production, images])"
        );
        assert!(plan.watch.is_empty());
        assert!(plan.serving.is_none());
    }

    #[test]
    fn test_static_build_renders_views_first() {
        let plan = plan(Command::StaticBuild, &Config::default());

        assert_eq!(
            format!("{:?}", plan.initial),
            "Series([Series([workspace:clean, workspace:ensure, views:render, views:normalize, workspace:clean]), Parallel([styles, scripts:production, images])])"
        );
    }

    #[test]
    fn test_dev_watch_rules() {
        let plan = plan(Command::Dev, &Config::default());

        assert_eq!(plan.serving, Some(ServingMode::Standalone));
        let rules: Vec<_> = plan
            .watch
            .iter()
            .map(|r| (r.name.as_str(), r.pattern.as_str(), r.reload))
            .collect();
        assert_eq!(
            rules,
            vec![
                ("styles", "assets/scss/**/*", ReloadKind::Css),
                ("scripts", "assets/js/**/*", ReloadKind::Full),
                ("images", "assets/img/**/*", ReloadKind::Full),
            ]
        );
        assert!(plan.watch.iter().all(|r| r.debounce == Duration::from_millis(300)));
    }

    #[test]
    fn test_dev_proxy_targets_upstream_and_reloads_backend_templates() {
        let mut config = Config::default();
        config.proxy.target = "http://localhost:8080/".to_string();
        config.watch.reload_only = vec!["resources/views/**/*.php".to_string()];
        let plan = plan(Command::DevProxy, &config);

        assert_eq!(
            plan.serving,
            Some(ServingMode::Proxy {
                target: "http://localhost:8080/".to_string()
            })
        );
        let backend = plan.watch.last().unwrap();
        assert_eq!(backend.pattern, "resources/views/**/*.php");
        assert!(backend.group.task_names().is_empty());
    }

    #[test]
    fn test_static_dev_initial_series_and_views_rule() {
        let mut config = Config::default();
        config.images.enabled = false;
        let plan = plan(Command::StaticDev, &config);

        assert_eq!(
            plan.initial.task_names(),
            vec![
                "workspace:clean",
                "workspace:ensure",
                "views:render",
                "views:normalize",
                "workspace:clean",
                "scripts",
                "styles",
            ]
        );
        assert_eq!(plan.watch[0].name, "views");
        assert_eq!(plan.watch[0].pattern, "assets/views/**/*");
        assert!(plan.watch.iter().all(|r| r.name != "images"));
    }

    #[test]
    fn test_under_strips_current_dir() {
        assert_eq!(under(Path::new("./assets/scss")), "assets/scss/**/*");
        assert_eq!(under(Path::new("assets/js/")), "assets/js/**/*");
        assert_eq!(under(Path::new(".")), "**/*");
    }
}
