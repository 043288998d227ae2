//! Build commands - one-shot production output

use std::time::Instant;

use assetflow_core::Config;
use assetflow_pipeline::Command;
use color_eyre::eyre::{Result, eyre};

use super::{prepare, print_failure};

/// Run a one-shot build (`build` or `static-build`).
pub async fn run(config: &Config, command: Command) -> Result<()> {
    let start = Instant::now();
    tracing::info!(command = %command, "Starting build");

    let (graph, plan) = prepare(config, command)?;
    let tasks = plan.initial.task_names().len();

    if let Err(failure) = graph.run(&plan.initial).await {
        println!();
        print_failure(&failure);
        println!();
        return Err(eyre!("{command} failed: {failure}"));
    }

    let duration = start.elapsed();
    let output = config.layout().output;

    println!();
    println!("  ✓ {command} completed successfully!");
    println!();
    println!("  Tasks:      {tasks}");
    println!("  Duration:   {:.2}s", duration.as_secs_f64());
    println!("  Output:     {}", output.display());
    println!();

    tracing::info!(?duration, "Build completed successfully");

    Ok(())
}
