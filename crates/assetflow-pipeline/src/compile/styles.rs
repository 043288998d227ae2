//! SCSS compilation through `sass`, optionally followed by autoprefixer.

use std::path::{Path, PathBuf};

use assetflow_core::Config;
use futures::{StreamExt, stream};
use tokio::process::Command;
use tracing::{debug, error, info};

use super::{CompileError, MAX_CONCURRENT_TOOLS, Result, collect_files, run_tool};

/// Outcome of a style compilation pass.
#[derive(Debug, Clone, Default)]
pub struct StyleReport {
    /// Stylesheets written.
    pub compiled: Vec<PathBuf>,
    /// Sources that failed and were skipped.
    pub failed: Vec<PathBuf>,
}

/// Compiles every non-partial `*.scss` file into the CSS output directory.
#[derive(Debug, Clone)]
pub struct StyleCompiler {
    program: String,
    compressed: bool,
    autoprefix: Option<Autoprefix>,
    source_dir: PathBuf,
    out_dir: PathBuf,
}

#[derive(Debug, Clone)]
struct Autoprefix {
    command: Vec<String>,
    targets: Vec<String>,
}

impl StyleCompiler {
    /// Create a compiler without autoprefixing.
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            compressed: true,
            autoprefix: None,
            source_dir: source_dir.into(),
            out_dir: out_dir.into(),
        }
    }

    /// Build from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let layout = config.layout();
        let styles = &config.styles;
        let mut compiler = Self::new(&styles.program, layout.styles, layout.css_out)
            .with_compressed(styles.compressed);
        if styles.autoprefix && !styles.postcss.is_empty() {
            compiler = compiler.with_autoprefix(styles.postcss.clone(), styles.autoprefix_targets.clone());
        }
        compiler
    }

    /// Toggle compressed output.
    #[must_use]
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Run `command <css> --use autoprefixer` after each compilation.
    #[must_use]
    pub fn with_autoprefix(mut self, command: Vec<String>, targets: Vec<String>) -> Self {
        self.autoprefix = Some(Autoprefix { command, targets });
        self
    }

    /// Compile all stylesheets.
    ///
    /// Individual failures are logged and reported in the returned
    /// [`StyleReport`]; they do not abort sibling files.
    pub async fn compile(&self) -> Result<StyleReport> {
        let sources = collect_files(&self.source_dir, is_entry_stylesheet)?;
        info!(count = sources.len(), source = %self.source_dir.display(), "compiling styles");

        let results: Vec<_> = stream::iter(sources)
            .map(|source| async move {
                let result = self.compile_one(&source).await;
                (source, result)
            })
            .buffer_unordered(MAX_CONCURRENT_TOOLS)
            .collect()
            .await;

        let mut report = StyleReport::default();
        for (source, result) in results {
            match result {
                Ok(dest) => report.compiled.push(dest),
                Err(e) => {
                    error!(source = %source.display(), error = %e, "style compilation failed");
                    report.failed.push(source);
                }
            }
        }
        report.compiled.sort();
        report.failed.sort();

        info!(
            compiled = report.compiled.len(),
            failed = report.failed.len(),
            "styles done"
        );
        Ok(report)
    }

    async fn compile_one(&self, source: &Path) -> Result<PathBuf> {
        let relative = source
            .strip_prefix(&self.source_dir)
            .map_err(|_| CompileError::Tool {
                program: self.program.clone(),
                path: source.to_path_buf(),
                message: "source outside the styles directory".to_string(),
            })?;
        let dest = self.out_dir.join(relative).with_extension("css");
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let style = if self.compressed { "compressed" } else { "expanded" };
        let mut sass = Command::new(&self.program);
        sass.arg("--no-source-map")
            .arg(format!("--style={style}"))
            .arg("--load-path")
            .arg(&self.source_dir)
            .arg(source)
            .arg(&dest);
        run_tool(sass, &self.program, source).await?;

        if let Some(autoprefix) = &self.autoprefix {
            let Some((program, args)) = autoprefix.command.split_first() else {
                return Err(CompileError::Tool {
                    program: "autoprefixer".to_string(),
                    path: dest,
                    message: "empty postcss command".to_string(),
                });
            };
            let mut postcss = Command::new(program);
            postcss
                .args(args)
                .arg(&dest)
                .args(["--use", "autoprefixer", "--replace", "--no-map"])
                .env("BROWSERSLIST", autoprefix.targets.join(", "));
            run_tool(postcss, program, &dest).await?;
        }

        debug!(source = %source.display(), dest = %dest.display(), "compiled stylesheet");
        Ok(dest)
    }
}

/// Partials (`_name.scss`) are only ever imported.
fn is_entry_stylesheet(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "scss")
        && !path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('_'))
}
