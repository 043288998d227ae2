//! assetflow Pipeline Library
//!
//! The concrete build steps of assetflow and the plans that compose them.
//!
//! # Modules
//!
//! - [`compile`] - style, script and image collaborators
//! - [`template`] - built-in `{{ var }}` / `{% include %}` template syntax
//! - [`render`] - template engines and workspace rendering
//! - [`normalize`] - pretty URL relocation into the served output
//! - [`workspace`] - the intermediate render directory
//! - [`tasks`] - leaf task registration
//! - [`plan`] - per-command task groups and watch rules

pub mod compile;
pub mod error;
pub mod normalize;
pub mod plan;
pub mod render;
pub mod tasks;
pub mod template;
pub mod workspace;

pub use compile::{
    BundleMode, CompileError, ImageOptimizer, ImageReport, ScriptBundler, StyleCompiler,
    StyleReport,
};
pub use error::{PipelineError, Result};
pub use normalize::{NormalizeError, UrlNormalizer, pretty_path, pretty_url};
pub use plan::{Command, Plan, ReloadKind, ServingMode, WatchRule};
pub use render::{
    Artifact, EngineRegistry, HtmlEngine, PugEngine, RenderError, TemplateEngine, TemplateRenderer,
};
pub use tasks::register_tasks;
pub use workspace::Workspace;
