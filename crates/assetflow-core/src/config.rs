//! Pipeline configuration management.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{CoreError, Result},
    layout::Layout,
};

/// Environment variable that selects the template engine, kept for
/// compatibility with existing project setups.
pub const TEMPLATE_ENGINE_ENV: &str = "TEMPLATE_ENGINE";

/// Main configuration structure for assetflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source, workspace and output locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Style compiler settings.
    #[serde(default)]
    pub styles: StylesConfig,

    /// Script bundler settings.
    #[serde(default)]
    pub scripts: ScriptsConfig,

    /// Image optimizer settings.
    #[serde(default)]
    pub images: ImagesConfig,

    /// Template rendering settings.
    #[serde(default)]
    pub views: ViewsConfig,

    /// Local development server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Reverse proxy settings for `dev-proxy`.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// File watcher settings.
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Filesystem layout. Every path is relative to `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Project root.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// SCSS sources.
    #[serde(default = "default_styles")]
    pub styles: PathBuf,

    /// Script sources.
    #[serde(default = "default_scripts")]
    pub scripts: PathBuf,

    /// Template sources.
    #[serde(default = "default_views")]
    pub views: PathBuf,

    /// Image sources.
    #[serde(default = "default_images")]
    pub images: PathBuf,

    /// Ephemeral directory for rendered-but-not-normalized HTML.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Served output tree.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Stylesheet destination inside the output tree.
    #[serde(default = "default_css_dir")]
    pub css_dir: PathBuf,

    /// Bundle destination inside the output tree.
    #[serde(default = "default_js_dir")]
    pub js_dir: PathBuf,

    /// Image destination inside the output tree.
    #[serde(default = "default_img_dir")]
    pub img_dir: PathBuf,
}

/// Style compiler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylesConfig {
    /// Sass executable.
    #[serde(default = "default_sass")]
    pub program: String,

    /// Emit compressed CSS.
    #[serde(default = "default_true")]
    pub compressed: bool,

    /// Run autoprefixer over the compiled CSS.
    #[serde(default = "default_true")]
    pub autoprefix: bool,

    /// Browserslist queries handed to autoprefixer.
    #[serde(default = "default_autoprefix_targets")]
    pub autoprefix_targets: Vec<String>,

    /// Command used to run postcss (program followed by leading args).
    #[serde(default = "default_postcss")]
    pub postcss: Vec<String>,
}

/// A named bundler entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptEntry {
    /// Bundle name, becomes `<name>.js`.
    pub name: String,

    /// Entry module, relative to the project root.
    pub path: String,
}

/// Script bundler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Bundler executable.
    #[serde(default = "default_npx")]
    pub program: String,

    /// Leading arguments passed before the mode and output flags.
    #[serde(default = "default_bundler_args")]
    pub args: Vec<String>,

    /// Entry points.
    #[serde(default = "default_entries")]
    pub entries: Vec<ScriptEntry>,
}

/// Image optimizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Whether images are optimized as part of the pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Template rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewsConfig {
    /// Template engine id.
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Directories under the views root that are never rendered as pages.
    #[serde(default = "default_view_excludes")]
    pub exclude: Vec<String>,

    /// Pug executable.
    #[serde(default = "default_pug")]
    pub pug_program: String,
}

/// Development server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Open the browser once the server is up.
    #[serde(default)]
    pub open: bool,
}

/// Reverse proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Upstream origin.
    #[serde(default = "default_proxy_target")]
    pub target: String,

    /// Tunnel upgrade (WebSocket) requests.
    #[serde(default = "default_true")]
    pub ws: bool,

    /// Serve files present in the output tree locally.
    #[serde(default)]
    pub serve_static: bool,

    /// Startup reachability check timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// File watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce window in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Extra patterns that only trigger a browser reload.
    #[serde(default)]
    pub reload_only: Vec<String>,
}

// Default value functions
fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_styles() -> PathBuf {
    PathBuf::from("assets/scss")
}

fn default_scripts() -> PathBuf {
    PathBuf::from("assets/js")
}

fn default_views() -> PathBuf {
    PathBuf::from("assets/views")
}

fn default_images() -> PathBuf {
    PathBuf::from("assets/img")
}

fn default_workspace() -> PathBuf {
    PathBuf::from("temp")
}

fn default_output() -> PathBuf {
    PathBuf::from("public")
}

fn default_css_dir() -> PathBuf {
    PathBuf::from("css")
}

fn default_js_dir() -> PathBuf {
    PathBuf::from("js/dist")
}

fn default_img_dir() -> PathBuf {
    PathBuf::from("img")
}

fn default_sass() -> String {
    "sass".to_string()
}

fn default_true() -> bool {
    true
}

fn default_autoprefix_targets() -> Vec<String> {
    vec!["last 2 versions".to_string()]
}

fn default_postcss() -> Vec<String> {
    vec!["npx".to_string(), "postcss".to_string()]
}

fn default_npx() -> String {
    "npx".to_string()
}

fn default_bundler_args() -> Vec<String> {
    vec!["webpack".to_string()]
}

fn default_entries() -> Vec<ScriptEntry> {
    vec![ScriptEntry {
        name: "main".to_string(),
        path: "./assets/js/main.js".to_string(),
    }]
}

fn default_engine() -> String {
    "pug".to_string()
}

fn default_view_excludes() -> Vec<String> {
    vec!["layouts".to_string(), "includes".to_string()]
}

fn default_pug() -> String {
    "pug".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_proxy_target() -> String {
    "http://localhost:3333/".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_debounce_ms() -> u64 {
    300
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            styles: default_styles(),
            scripts: default_scripts(),
            views: default_views(),
            images: default_images(),
            workspace: default_workspace(),
            output: default_output(),
            css_dir: default_css_dir(),
            js_dir: default_js_dir(),
            img_dir: default_img_dir(),
        }
    }
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            program: default_sass(),
            compressed: true,
            autoprefix: true,
            autoprefix_targets: default_autoprefix_targets(),
            postcss: default_postcss(),
        }
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            program: default_npx(),
            args: default_bundler_args(),
            entries: default_entries(),
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for ViewsConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            exclude: default_view_excludes(),
            pug_program: default_pug(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            open: false,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            target: default_proxy_target(),
            ws: true,
            serve_static: false,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            reload_only: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            CoreError::config_with_source(
                format!("Failed to parse config file: {}", path.display()),
                e,
            )
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration layered from an optional file and the environment.
    ///
    /// `ASSETFLOW__SECTION__KEY` variables override file values, and
    /// `TEMPLATE_ENGINE` overrides `views.engine`.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("ASSETFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("views.engine", std::env::var(TEMPLATE_ENGINE_ENV).ok())?
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let paths = &self.paths;
        for (key, value) in [
            ("paths.styles", &paths.styles),
            ("paths.scripts", &paths.scripts),
            ("paths.views", &paths.views),
            ("paths.images", &paths.images),
            ("paths.workspace", &paths.workspace),
            ("paths.output", &paths.output),
        ] {
            if value.as_os_str().is_empty() {
                return Err(CoreError::config(format!("{key} cannot be empty")));
            }
        }

        // Workspace contents must never be visible to clients.
        if self.layout().workspace_in_output() {
            return Err(CoreError::config(
                "paths.workspace cannot be inside paths.output",
            ));
        }

        if self.views.engine.is_empty() {
            return Err(CoreError::config("views.engine cannot be empty"));
        }

        if self.watch.debounce_ms == 0 {
            return Err(CoreError::config("watch.debounce_ms must be positive"));
        }

        let target = url::Url::parse(&self.proxy.target).map_err(|e| {
            CoreError::config_with_source(format!("invalid proxy.target: {}", self.proxy.target), e)
        })?;
        if target.scheme() != "http" {
            tracing::warn!(
                target = %target,
                "proxy.target is not plain http, upgrade tunnelling will be unavailable"
            );
        }

        let mut names: Vec<_> = self.scripts.entries.iter().map(|e| &e.name).collect();
        names.sort();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(CoreError::config("scripts.entries names must be unique"));
        }

        Ok(())
    }

    /// Resolve the configured paths against the project root.
    pub fn layout(&self) -> Layout {
        Layout::from_paths(&self.paths)
    }
}
