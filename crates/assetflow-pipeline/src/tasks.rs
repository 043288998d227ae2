//! Leaf tasks of the pipeline and their registration.

use std::{path::PathBuf, sync::Arc};

use assetflow_core::Config;
use assetflow_graph::{Task, TaskGraph, TaskResult};
use futures::future::BoxFuture;
use tokio::task::spawn_blocking;

use crate::{
    compile::{BundleMode, ImageOptimizer, ScriptBundler, StyleCompiler},
    error::Result,
    normalize::UrlNormalizer,
    render::{EngineRegistry, TemplateRenderer},
    workspace::Workspace,
};

pub const STYLES: &str = "styles";
pub const SCRIPTS: &str = "scripts";
pub const SCRIPTS_PRODUCTION: &str = "scripts:production";
pub const IMAGES: &str = "images";
pub const WORKSPACE_ENSURE: &str = "workspace:ensure";
pub const WORKSPACE_CLEAN: &str = "workspace:clean";
pub const VIEWS_RENDER: &str = "views:render";
pub const VIEWS_NORMALIZE: &str = "views:normalize";

impl Task for StyleCompiler {
    fn run(&self) -> BoxFuture<'_, TaskResult> {
        Box::pin(async move {
            self.compile().await?;
            Ok(())
        })
    }
}

impl Task for ScriptBundler {
    fn run(&self) -> BoxFuture<'_, TaskResult> {
        Box::pin(async move {
            self.bundle().await?;
            Ok(())
        })
    }
}

impl Task for ImageOptimizer {
    fn run(&self) -> BoxFuture<'_, TaskResult> {
        Box::pin(async move {
            self.optimize().await?;
            Ok(())
        })
    }
}

/// Creates the workspace directory.
#[derive(Debug, Clone)]
pub struct EnsureWorkspace(pub Workspace);

impl Task for EnsureWorkspace {
    fn run(&self) -> BoxFuture<'_, TaskResult> {
        let workspace = self.0.clone();
        Box::pin(async move {
            spawn_blocking(move || workspace.ensure()).await??;
            Ok(())
        })
    }
}

/// Removes the workspace directory.
#[derive(Debug, Clone)]
pub struct CleanWorkspace(pub Workspace);

impl Task for CleanWorkspace {
    fn run(&self) -> BoxFuture<'_, TaskResult> {
        let workspace = self.0.clone();
        Box::pin(async move {
            spawn_blocking(move || workspace.clean()).await??;
            Ok(())
        })
    }
}

/// Renders every page into the workspace.
#[derive(Debug, Clone)]
pub struct RenderViews {
    pub renderer: Arc<TemplateRenderer>,
    pub engine: String,
    pub views: PathBuf,
    pub exclude: Vec<String>,
    pub workspace: PathBuf,
}

impl Task for RenderViews {
    fn run(&self) -> BoxFuture<'_, TaskResult> {
        let this = self.clone();
        Box::pin(async move {
            spawn_blocking(move || {
                this.renderer
                    .render(&this.engine, &this.views, &this.exclude, &this.workspace)
            })
            .await??;
            Ok(())
        })
    }
}

/// Moves rendered pages into the served output.
#[derive(Debug, Clone)]
pub struct NormalizeViews(pub UrlNormalizer);

impl Task for NormalizeViews {
    fn run(&self) -> BoxFuture<'_, TaskResult> {
        let normalizer = self.0.clone();
        Box::pin(async move {
            spawn_blocking(move || normalizer.normalize()).await??;
            Ok(())
        })
    }
}

/// Register every pipeline task in `graph`.
///
/// The configured template engine is resolved here, so an unknown engine
/// fails before anything runs.
pub fn register_tasks(graph: &mut TaskGraph, config: &Config) -> Result<()> {
    let layout = config.layout();
    let renderer = TemplateRenderer::new(EngineRegistry::with_defaults(&config.views.pug_program));
    renderer.registry().get(&config.views.engine)?;

    graph.register(STYLES, StyleCompiler::from_config(config))?;
    graph.register(
        SCRIPTS,
        ScriptBundler::from_config(config, BundleMode::Development),
    )?;
    graph.register(
        SCRIPTS_PRODUCTION,
        ScriptBundler::from_config(config, BundleMode::Production),
    )?;
    graph.register(IMAGES, ImageOptimizer::from_config(config))?;

    let workspace = Workspace::new(&layout.workspace);
    graph.register(WORKSPACE_ENSURE, EnsureWorkspace(workspace.clone()))?;
    graph.register(WORKSPACE_CLEAN, CleanWorkspace(workspace))?;
    graph.register(
        VIEWS_RENDER,
        RenderViews {
            renderer: Arc::new(renderer),
            engine: config.views.engine.clone(),
            views: layout.views,
            exclude: config.views.exclude.clone(),
            workspace: layout.workspace.clone(),
        },
    )?;
    graph.register(
        VIEWS_NORMALIZE,
        NormalizeViews(UrlNormalizer::new(layout.workspace, layout.output)),
    )?;

    Ok(())
}
