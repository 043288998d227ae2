//! Lossless image optimization.
//!
//! Each file is piped through the optimizer matching its extension. Files
//! with no matching optimizer, or whose optimizer fails, are copied as-is so
//! the output tree always mirrors the source tree.

use std::path::{Path, PathBuf};

use assetflow_core::Config;
use futures::{StreamExt, stream};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CompileError, MAX_CONCURRENT_TOOLS, Result, collect_files, run_tool};

/// Outcome of an optimization pass.
#[derive(Debug, Clone, Default)]
pub struct ImageReport {
    /// Files rewritten by an optimizer.
    pub optimized: Vec<PathBuf>,
    /// Files copied unchanged.
    pub copied: Vec<PathBuf>,
    /// Sources that could not be written at all.
    pub failed: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Optimized,
    Copied,
}

/// Mirrors the image source tree into the output tree.
#[derive(Debug, Clone)]
pub struct ImageOptimizer {
    source_dir: PathBuf,
    out_dir: PathBuf,
}

impl ImageOptimizer {
    #[must_use]
    pub fn new(source_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            out_dir: out_dir.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let layout = config.layout();
        Self::new(layout.images, layout.img_out)
    }

    /// Optimize every image. Per-file failures are logged, never fatal.
    pub async fn optimize(&self) -> Result<ImageReport> {
        let sources = collect_files(&self.source_dir, |_| true)?;
        info!(count = sources.len(), source = %self.source_dir.display(), "optimizing images");

        let results: Vec<_> = stream::iter(sources)
            .map(|source| async move {
                let result = self.process(&source).await;
                (source, result)
            })
            .buffer_unordered(MAX_CONCURRENT_TOOLS)
            .collect()
            .await;

        let mut report = ImageReport::default();
        for (source, result) in results {
            match result {
                Ok((dest, Outcome::Optimized)) => report.optimized.push(dest),
                Ok((dest, Outcome::Copied)) => report.copied.push(dest),
                Err(e) => {
                    warn!(source = %source.display(), error = %e, "image skipped");
                    report.failed.push(source);
                }
            }
        }
        report.optimized.sort();
        report.copied.sort();
        report.failed.sort();

        info!(
            optimized = report.optimized.len(),
            copied = report.copied.len(),
            failed = report.failed.len(),
            "images done"
        );
        Ok(report)
    }

    async fn process(&self, source: &Path) -> Result<(PathBuf, Outcome)> {
        let relative = source
            .strip_prefix(&self.source_dir)
            .map_err(|_| CompileError::Tool {
                program: "images".to_string(),
                path: source.to_path_buf(),
                message: "source outside the images directory".to_string(),
            })?;
        let dest = self.out_dir.join(relative);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let Some((program, command)) = optimizer_for(source, &dest) else {
            tokio::fs::copy(source, &dest).await?;
            debug!(source = %source.display(), "copied image");
            return Ok((dest, Outcome::Copied));
        };

        match run_tool(command, program, source).await {
            Ok(_) => {
                debug!(source = %source.display(), program, "optimized image");
                Ok((dest, Outcome::Optimized))
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "optimizer failed, copying original");
                tokio::fs::copy(source, &dest).await?;
                Ok((dest, Outcome::Copied))
            }
        }
    }
}

/// The optimizer command for `source`, writing to `dest`.
fn optimizer_for(source: &Path, dest: &Path) -> Option<(&'static str, Command)> {
    let ext = source.extension()?.to_string_lossy().to_ascii_lowercase();
    let (program, mut command) = match ext.as_str() {
        "gif" => {
            let mut cmd = Command::new("gifsicle");
            cmd.arg("--interlace").arg(source).arg("-o").arg(dest);
            ("gifsicle", cmd)
        }
        "jpg" | "jpeg" => {
            let mut cmd = Command::new("jpegtran");
            cmd.args(["-progressive", "-optimize", "-copy", "none", "-outfile"])
                .arg(dest)
                .arg(source);
            ("jpegtran", cmd)
        }
        "png" => {
            let mut cmd = Command::new("optipng");
            cmd.args(["-o5", "-clobber", "-quiet", "-out"])
                .arg(dest)
                .arg(source);
            ("optipng", cmd)
        }
        "svg" => {
            let mut cmd = Command::new("svgo");
            cmd.arg(source).arg("-o").arg(dest);
            ("svgo", cmd)
        }
        _ => return None,
    };
    command.stdin(std::process::Stdio::null());
    Some((program, command))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_optimizer_selection() {
        let dest = Path::new("out/x");
        assert_eq!(optimizer_for(Path::new("a.PNG"), dest).map(|(p, _)| p), Some("optipng"));
        assert_eq!(optimizer_for(Path::new("a.jpeg"), dest).map(|(p, _)| p), Some("jpegtran"));
        assert_eq!(optimizer_for(Path::new("a.gif"), dest).map(|(p, _)| p), Some("gifsicle"));
        assert_eq!(optimizer_for(Path::new("a.svg"), dest).map(|(p, _)| p), Some("svgo"));
        assert!(optimizer_for(Path::new("a.webp"), dest).is_none());
        assert!(optimizer_for(Path::new("README"), dest).is_none());
    }

    #[tokio::test]
    async fn test_unknown_formats_are_copied() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("img");
        fs::create_dir_all(src.join("icons")).unwrap();
        fs::write(src.join("hero.webp"), b"RIFF").unwrap();
        fs::write(src.join("icons/favicon.ico"), b"\0\0\x01\0").unwrap();

        let out = root.path().join("public/img");
        let report = ImageOptimizer::new(&src, &out).optimize().await.unwrap();

        assert_eq!(report.copied, vec![out.join("hero.webp"), out.join("icons/favicon.ico")]);
        assert!(report.optimized.is_empty());
        assert_eq!(fs::read(out.join("hero.webp")).unwrap(), b"RIFF");
    }

    #[tokio::test]
    async fn test_missing_source_dir_is_empty() {
        let root = TempDir::new().unwrap();
        let report = ImageOptimizer::new(root.path().join("img"), root.path().join("out"))
            .optimize()
            .await
            .unwrap();

        assert!(report.optimized.is_empty() && report.copied.is_empty());
    }
}
