//! Script bundling through an external bundler (webpack by default).
//!
//! The bundler receives the mode via `--mode`, the output directory via
//! `--output-path`, and both the mode and the entry map through webpack-cli
//! `--env` pairs (`NODE_ENV=<mode>`, `entries=<json>`), which a
//! `module.exports = env => ...` config reads as `env.NODE_ENV` and
//! `env.entries`. The same values are exported as `NODE_ENV` and
//! `ASSETFLOW_ENTRIES` for configs that read the process environment.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
};

use assetflow_core::{Config, ScriptEntry, layout::lexical};
use tokio::process::Command;
use tracing::{debug, info};

use super::{Result, run_tool};

/// Environment variable carrying the entry map.
pub const ENTRIES_ENV: &str = "ASSETFLOW_ENTRIES";

/// `--env` key carrying the entry map.
pub const ENTRIES_KEY: &str = "entries";

/// Bundler optimization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleMode {
    Development,
    Production,
}

impl BundleMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for BundleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces one JS artifact per configured entry.
#[derive(Debug, Clone)]
pub struct ScriptBundler {
    program: String,
    args: Vec<String>,
    entries: Vec<ScriptEntry>,
    root: PathBuf,
    out_dir: PathBuf,
    mode: BundleMode,
}

impl ScriptBundler {
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        entries: Vec<ScriptEntry>,
        out_dir: impl Into<PathBuf>,
        mode: BundleMode,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            entries,
            root: PathBuf::from("."),
            out_dir: out_dir.into(),
            mode,
        }
    }

    /// Build from configuration for the given mode.
    #[must_use]
    pub fn from_config(config: &Config, mode: BundleMode) -> Self {
        let layout = config.layout();
        let scripts = &config.scripts;
        let mut bundler = Self::new(
            &scripts.program,
            scripts.args.clone(),
            scripts.entries.clone(),
            layout.js_out,
            mode,
        );
        bundler.root = layout.root;
        bundler
    }

    #[must_use]
    pub fn mode(&self) -> BundleMode {
        self.mode
    }

    /// Entry name to entry path, resolved against the project root.
    #[must_use]
    pub fn entry_map(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|e| {
                let path = lexical(&self.root.join(&e.path));
                // Bare relative entries would be resolved as packages.
                let path = if path.is_relative() {
                    Path::new(".").join(path)
                } else {
                    path
                };
                (e.name.clone(), path.to_string_lossy().into_owned())
            })
            .collect()
    }

    /// Arguments appended after the configured ones.
    fn bundle_args(&self, entries: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--mode".into(),
            self.mode.as_str().into(),
            "--output-path".into(),
            self.out_dir.clone().into_os_string(),
            "--env".into(),
            format!("NODE_ENV={}", self.mode).into(),
        ];
        if !self.entries.is_empty() {
            args.push("--env".into());
            args.push(format!("{ENTRIES_KEY}={entries}").into());
        }
        args
    }

    /// Run the bundler. A non-zero exit fails the call.
    pub async fn bundle(&self) -> Result<()> {
        let entries = serde_json::to_string(&self.entry_map())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        info!(
            program = %self.program,
            mode = %self.mode,
            entries = self.entries.len(),
            out = %self.out_dir.display(),
            "bundling scripts"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(self.bundle_args(&entries))
            .env("NODE_ENV", self.mode.as_str())
            .env(ENTRIES_ENV, entries);

        let output = run_tool(command, &self.program, &self.out_dir).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(output = %stdout.trim(), "bundler output");
        }
        Ok(())
    }
}
