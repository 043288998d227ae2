//! Dev commands - initial build, then watch and serve with live reload

use std::{path::PathBuf, sync::Arc, time::Duration};

use assetflow_core::Config;
use assetflow_pipeline::{Command, ServingMode, WatchRule};
use axum::Router;
use color_eyre::eyre::{Result, WrapErr};
use tokio::net::TcpListener;

use super::{prepare, print_failure};
use crate::{
    proxy::{ProxyState, Upstream, check_upstream, create_proxy_router},
    server::{ServerState, create_router},
    watch::{Watcher, glob_base},
};

/// Run a watching command (`dev`, `dev-proxy` or `static-dev`).
///
/// In proxy mode the upstream must be reachable before anything is built.
pub async fn run(config: &Config, command: Command) -> Result<()> {
    tracing::info!(command = %command, "Starting dev mode");

    let (graph, plan) = prepare(config, command)?;
    let layout = config.layout();

    let upstream = match &plan.serving {
        Some(ServingMode::Proxy { target }) => {
            let upstream = Upstream::parse(target)?;
            let timeout = Duration::from_millis(config.proxy.connect_timeout_ms);
            check_upstream(&upstream, timeout).await?;
            Some(upstream)
        }
        _ => None,
    };

    // Initial build; a failure is reported but the session keeps going so
    // the next save can fix it.
    tracing::info!("Running initial build...");
    let graph = Arc::new(graph);
    match graph.run(&plan.initial).await {
        Ok(()) => println!("  ✓ Initial build complete"),
        Err(failure) => {
            print_failure(&failure);
            tracing::warn!(error = %failure, "Initial build failed, watching anyway");
        }
    }

    let state = Arc::new(ServerState::new());

    let mut dirs: Vec<PathBuf> = layout.source_dirs().into_iter().map(PathBuf::from).collect();
    let mut watcher = Watcher::new(&layout.root);
    for rule in plan.watch {
        if rule.group.task_names().is_empty() {
            dirs.push(layout.root.join(glob_base(&rule.pattern)));
        }
        watcher.watch(rule).wrap_err("Invalid watch pattern")?;
    }
    let reload = Arc::clone(&state);
    let mut handle = watcher.start(Arc::clone(&graph), move |rule: &WatchRule| {
        reload.notify(rule.reload);
    });
    handle
        .watch_dirs(&dirs[..])
        .wrap_err("Failed to create file watcher")?;

    let app: Router = match upstream {
        Some(upstream) => {
            let proxy = ProxyState::new(state, upstream, config.proxy.ws)?;
            let static_dir = config.proxy.serve_static.then_some(layout.output.as_path());
            create_proxy_router(proxy, static_dir)
        }
        None => create_router(&layout.output, state),
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind to {addr}"))?;

    println!();
    match &plan.serving {
        Some(ServingMode::Proxy { target }) => {
            println!("  Proxying {target} at http://{addr}");
        }
        _ => println!("  Dev server running at http://{addr}"),
    }
    println!("  Press Ctrl+C to stop");
    println!();

    if config.server.open {
        let _ = open::that(format!("http://{addr}"));
    }

    // Keep watcher alive
    let _handle = handle;

    axum::serve(listener, app).await.wrap_err("Server error")?;

    Ok(())
}
