//! External compiler collaborators.
//!
//! Each collaborator shells out to a well-known tool and only reports
//! whether the artifacts were produced. Styles and images are best effort:
//! a broken file is logged and its siblings still compile. Script bundling
//! fails the enclosing task.

pub mod images;
pub mod scripts;
pub mod styles;

use std::{
    path::{Path, PathBuf},
    process::Output,
};

use thiserror::Error;
use tokio::process::Command;
use walkdir::WalkDir;

pub use images::{ImageOptimizer, ImageReport};
pub use scripts::{BundleMode, ScriptBundler};
pub use styles::{StyleCompiler, StyleReport};

/// Upper bound on concurrently running tool processes per collaborator.
pub(crate) const MAX_CONCURRENT_TOOLS: usize = 8;

/// Compilation errors.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The tool could not be started.
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and reported a failure.
    #[error("{program} failed on {path}: {message}")]
    Tool {
        program: String,
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

/// Result type for compilation.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Run a prepared command, mapping launch failures and non-zero exits.
pub(crate) async fn run_tool(mut command: Command, program: &str, path: &Path) -> Result<Output> {
    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| CompileError::Launch {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.trim().is_empty() {
            format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stdout).trim()
            )
        } else {
            stderr.trim().to_string()
        };
        return Err(CompileError::Tool {
            program: program.to_string(),
            path: path.to_path_buf(),
            message,
        });
    }

    Ok(output)
}

/// Files under `dir` accepted by `keep`, skipping hidden entries. A missing
/// directory yields nothing.
pub(crate) fn collect_files(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() && keep(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_collect_files_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join(".cache/x.scss"), "").unwrap();
        fs::write(dir.path().join(".#main.scss"), "").unwrap();
        fs::write(dir.path().join("main.scss"), "").unwrap();

        let files = collect_files(dir.path(), |_| true).unwrap();
        assert_eq!(files, vec![dir.path().join("main.scss")]);
    }

    #[test]
    fn test_collect_files_missing_dir() {
        let files = collect_files(Path::new("/nonexistent/assetflow"), |_| true).unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_run_tool_launch_failure() {
        let command = Command::new("assetflow-test-no-such-tool");
        let err = run_tool(command, "assetflow-test-no-such-tool", Path::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::Launch { .. }));
    }
}
