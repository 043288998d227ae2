//! Command implementations

pub mod build;
pub mod dev;

use std::path::Path;

use assetflow_core::Config;
use assetflow_graph::{RunFailure, TaskGraph};
use assetflow_pipeline::{Command, Plan, register_tasks};
use color_eyre::eyre::{Result, WrapErr};

/// Load the layered configuration.
pub fn load_config(config_path: &Path) -> Result<Config> {
    let config = Config::load_with_env(config_path).wrap_err("Failed to load configuration")?;
    tracing::debug!(?config, "Loaded configuration");
    Ok(config)
}

/// Run `command` to completion.
pub async fn run(config: &Config, command: Command) -> Result<()> {
    if command.is_watching() {
        dev::run(config, command).await
    } else {
        build::run(config, command).await
    }
}

/// Register every task and compose the plan for `command`.
pub fn prepare(config: &Config, command: Command) -> Result<(TaskGraph, Plan)> {
    let mut graph = TaskGraph::new();
    register_tasks(&mut graph, config).wrap_err("Failed to register tasks")?;
    let plan = Plan::for_command(command, &graph, config)
        .wrap_err_with(|| format!("Failed to plan `{command}`"))?;
    tracing::debug!(command = %command, initial = ?plan.initial, rules = plan.watch.len(), "Planned");
    Ok((graph, plan))
}

/// Print every failed task of a run.
pub(crate) fn print_failure(failure: &RunFailure) {
    for task in failure.failures() {
        eprintln!("  ✗ {}: {}", task.task, task.error);
    }
}
