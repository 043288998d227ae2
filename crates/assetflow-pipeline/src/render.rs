//! Template rendering into the workspace.
//!
//! An engine is selected by id from an [`EngineRegistry`]; every matching
//! source under the views root becomes one HTML artifact in the workspace.
//! Layout and include directories are never rendered as standalone pages.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{
    normalize::pretty_url,
    template::{self, TemplateContext, TemplateError},
};

/// Rendering errors.
#[derive(Debug, Error)]
pub enum RenderError {
    /// No engine registered under this id.
    #[error("unsupported template engine `{id}` (available: {available})")]
    UnsupportedEngine { id: String, available: String },

    /// Built-in template error.
    #[error("template error in {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },

    /// External engine failure.
    #[error("{engine} failed on {path}: {message}")]
    Engine {
        engine: String,
        path: PathBuf,
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal error.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Result type for rendering.
pub type Result<T> = std::result::Result<T, RenderError>;

/// An output file addressed by destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Source file that produced it.
    pub source: PathBuf,
    /// Destination path.
    pub path: PathBuf,
}

/// A template syntax able to turn one source file into HTML.
///
/// Includes and layouts referenced from a page are resolved by the engine
/// itself, relative to `views_root`.
pub trait TemplateEngine: Send + Sync {
    /// Registry id, e.g. `pug`.
    fn id(&self) -> &str;

    /// Source file extension without the dot.
    fn extension(&self) -> &str;

    /// Render a single page.
    fn render(&self, source: &Path, views_root: &Path) -> Result<String>;
}

/// Renders through the `pug` command line tool.
#[derive(Debug, Clone)]
pub struct PugEngine {
    program: String,
}

impl PugEngine {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl TemplateEngine for PugEngine {
    fn id(&self) -> &str {
        "pug"
    }

    fn extension(&self) -> &str {
        "pug"
    }

    fn render(&self, source: &Path, views_root: &Path) -> Result<String> {
        let input = fs::File::open(source)?;
        let output = Command::new(&self.program)
            .arg("--pretty")
            .arg("--basedir")
            .arg(views_root)
            .arg("--path")
            .arg(source)
            .stdin(Stdio::from(input))
            .output()
            .map_err(|e| RenderError::Engine {
                engine: self.program.clone(),
                path: source.to_path_buf(),
                message: format!("failed to launch: {e}"),
            })?;

        if !output.status.success() {
            return Err(RenderError::Engine {
                engine: self.program.clone(),
                path: source.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Renders the built-in `{{ }}` / `{% %}` syntax in process.
#[derive(Debug, Clone, Default)]
pub struct HtmlEngine;

impl TemplateEngine for HtmlEngine {
    fn id(&self) -> &str {
        "html"
    }

    fn extension(&self) -> &str {
        "html"
    }

    fn render(&self, source: &Path, views_root: &Path) -> Result<String> {
        let relative = source.strip_prefix(views_root).unwrap_or(source);
        let name = relative.to_string_lossy().replace('\\', "/");
        let page = relative.with_extension("");

        let context = TemplateContext::new()
            .with_var("page", page.to_string_lossy().replace('\\', "/"))
            .with_var("url", pretty_url(&relative.with_extension("html")));

        let content = fs::read_to_string(source)?;
        template::render_page(&name, &content, views_root, context).map_err(|source_err| {
            RenderError::Template {
                path: source.to_path_buf(),
                source: source_err,
            }
        })
    }
}

/// Engines available by id. The first registered engine is the default.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: Vec<Arc<dyn TemplateEngine>>,
}

impl EngineRegistry {
    /// Registry with the `pug` and `html` engines.
    #[must_use]
    pub fn with_defaults(pug_program: impl Into<String>) -> Self {
        let mut registry = Self::default();
        registry.register(PugEngine::new(pug_program));
        registry.register(HtmlEngine);
        registry
    }

    /// Register an engine, replacing any engine with the same id.
    pub fn register(&mut self, engine: impl TemplateEngine + 'static) {
        self.engines.retain(|e| e.id() != engine.id());
        self.engines.push(Arc::new(engine));
    }

    /// Look up an engine by id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn TemplateEngine>> {
        self.engines
            .iter()
            .find(|e| e.id() == id)
            .cloned()
            .ok_or_else(|| RenderError::UnsupportedEngine {
                id: id.to_string(),
                available: self.ids().join(", "),
            })
    }

    /// Id of the default engine.
    #[must_use]
    pub fn default_id(&self) -> Option<&str> {
        self.engines.first().map(|e| e.id())
    }

    /// Registered ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.engines.iter().map(|e| e.id()).collect()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.ids())
            .finish()
    }
}

/// Renders template sources into the workspace.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    registry: EngineRegistry,
}

impl TemplateRenderer {
    #[must_use]
    pub fn new(registry: EngineRegistry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// Render every page under `views` with engine `engine_id` into `workspace`.
    ///
    /// Top-level directories named in `exclude` are skipped. The first failing
    /// page fails the whole call; whatever was already written is left for the
    /// next workspace clean.
    pub fn render(
        &self,
        engine_id: &str,
        views: &Path,
        exclude: &[String],
        workspace: &Path,
    ) -> Result<Vec<Artifact>> {
        let engine = self.registry.get(engine_id)?;
        let sources = collect_sources(views, exclude, engine.extension())?;

        info!(
            engine = engine_id,
            count = sources.len(),
            views = %views.display(),
            "rendering templates"
        );

        let artifacts = sources
            .par_iter()
            .map(|source| {
                let html = tidy(&engine.render(source, views)?);
                let relative = source.strip_prefix(views).unwrap_or(source);
                let dest = workspace.join(relative).with_extension("html");

                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&dest, html)?;

                debug!(source = %source.display(), dest = %dest.display(), "rendered page");
                Ok(Artifact {
                    source: source.clone(),
                    path: dest,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(artifacts)
    }
}

/// Page sources under `views` with the given extension, sorted.
fn collect_sources(views: &Path, exclude: &[String], extension: &str) -> Result<Vec<PathBuf>> {
    if !views.exists() {
        debug!(views = %views.display(), "views directory missing");
        return Ok(Vec::new());
    }

    let mut sources = Vec::new();
    let walker = WalkDir::new(views)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let Ok(relative) = entry.path().strip_prefix(views) else {
                return true;
            };
            let hidden = entry.depth() > 0
                && entry.file_name().to_string_lossy().starts_with('.');
            let excluded = entry.depth() == 1
                && entry.file_type().is_dir()
                && exclude.iter().any(|dir| relative == Path::new(dir));
            !hidden && !excluded
        });

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == extension)
        {
            sources.push(entry.into_path());
        }
    }

    Ok(sources)
}

/// Strip trailing whitespace and collapse runs of blank lines.
fn tidy(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut blank_run = 0;
    for line in html.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}
