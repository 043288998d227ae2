//! Pretty URL normalization.
//!
//! Moves rendered pages from the workspace into the served output so that
//! `about.html` is reachable as `/about/`.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Normalization errors.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal error.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Path outside the workspace.
    #[error("invalid workspace path: {0}")]
    InvalidPath(PathBuf),
}

/// Result type for normalization.
pub type Result<T> = std::result::Result<T, NormalizeError>;

/// Destination of a rendered page relative to the output root.
///
/// `index.html` files keep their location, any other `name.html` becomes
/// `name/index.html`. Non-HTML paths are returned unchanged.
#[must_use]
pub fn pretty_path(relative: &Path) -> PathBuf {
    let is_html = relative.extension().is_some_and(|ext| ext == "html");
    let is_index = relative.file_name().is_some_and(|name| name == "index.html");
    if !is_html || is_index {
        return relative.to_path_buf();
    }

    let stem = relative.file_stem().unwrap_or_default();
    relative
        .parent()
        .unwrap_or(Path::new(""))
        .join(stem)
        .join("index.html")
}

/// Public URL of a rendered page, always with a trailing slash.
#[must_use]
pub fn pretty_url(relative: &Path) -> String {
    let pretty = pretty_path(relative);
    let dir = pretty.parent().unwrap_or(Path::new(""));
    let segments: Vec<_> = dir
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", segments.join("/"))
    }
}

/// Copies workspace HTML into the served output under pretty paths.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    workspace: PathBuf,
    output: PathBuf,
}

impl UrlNormalizer {
    /// Create a normalizer from `workspace` into `output`.
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            output: output.into(),
        }
    }

    /// Normalize every `*.html` file in the workspace.
    ///
    /// Destinations are overwritten, so running twice over the same workspace
    /// yields the same output. Returns the written destinations, sorted.
    pub fn normalize(&self) -> Result<Vec<PathBuf>> {
        if !self.workspace.exists() {
            debug!(workspace = %self.workspace.display(), "workspace missing, nothing to normalize");
            return Ok(Vec::new());
        }

        let mut written: HashMap<PathBuf, PathBuf> = HashMap::new();

        for entry in WalkDir::new(&self.workspace).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "html") {
                continue;
            }

            let relative = path
                .strip_prefix(&self.workspace)
                .map_err(|_| NormalizeError::InvalidPath(path.to_path_buf()))?;
            let dest = self.output.join(pretty_path(relative));

            if let Some(previous) = written.get(&dest) {
                warn!(
                    first = %previous.display(),
                    second = %path.display(),
                    dest = %dest.display(),
                    "two pages map to the same URL, keeping the last one"
                );
            }

            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            replace_file(path, &dest)?;
            debug!(from = %path.display(), to = %dest.display(), "normalized page");
            written.insert(dest, path.to_path_buf());
        }

        let mut destinations: Vec<_> = written.into_keys().collect();
        destinations.sort();

        info!(count = destinations.len(), output = %self.output.display(), "normalized pages");
        Ok(destinations)
    }
}

/// Copy `source` over `dest` through a sibling temp file and a rename, so
/// readers of the served tree never see a partially written page.
fn replace_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    let mut staged = tempfile::Builder::new()
        .prefix(".assetflow-")
        .tempfile_in(parent)?;
    let mut page = fs::File::open(source)?;
    std::io::copy(&mut page, staged.as_file_mut())?;
    fs::set_permissions(staged.path(), page.metadata()?.permissions())?;
    staged.persist(dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_pretty_path_rules() {
        assert_eq!(pretty_path(Path::new("about.html")), PathBuf::from("about/index.html"));
        assert_eq!(
            pretty_path(Path::new("foo/bar.html")),
            PathBuf::from("foo/bar/index.html")
        );
        assert_eq!(pretty_path(Path::new("index.html")), PathBuf::from("index.html"));
        assert_eq!(
            pretty_path(Path::new("foo/index.html")),
            PathBuf::from("foo/index.html")
        );
        assert_eq!(pretty_path(Path::new("feed.xml")), PathBuf::from("feed.xml"));
    }

    #[test]
    fn test_pretty_url() {
        assert_eq!(pretty_url(Path::new("index.html")), "/");
        assert_eq!(pretty_url(Path::new("about.html")), "/about/");
        assert_eq!(pretty_url(Path::new("blog/index.html")), "/blog/");
        assert_eq!(pretty_url(Path::new("blog/first.html")), "/blog/first/");
    }

    #[test]
    fn test_normalize_missing_workspace() {
        let root = TempDir::new().unwrap();
        let normalizer = UrlNormalizer::new(root.path().join("temp"), root.path().join("public"));

        assert!(normalizer.normalize().unwrap().is_empty());
    }

    #[test]
    fn test_normalize_skips_non_html() {
        let root = TempDir::new().unwrap();
        let workspace = root.path().join("temp");
        fs::create_dir_all(&workspace).unwrap();
        fs::write(workspace.join("notes.txt"), "x").unwrap();
        fs::write(workspace.join("index.html"), "<p>home</p>").unwrap();

        let output = root.path().join("public");
        let written = UrlNormalizer::new(&workspace, &output).normalize().unwrap();

        assert_eq!(written, vec![output.join("index.html")]);
        assert!(!output.join("notes.txt").exists());
    }

    #[test]
    fn test_normalize_overwrites_existing_destination() {
        let root = TempDir::new().unwrap();
        let workspace = root.path().join("temp");
        let output = root.path().join("public");
        fs::create_dir_all(&workspace).unwrap();
        fs::create_dir_all(output.join("about")).unwrap();
        fs::write(output.join("about/index.html"), "stale").unwrap();
        fs::write(workspace.join("about.html"), "fresh").unwrap();

        UrlNormalizer::new(&workspace, &output).normalize().unwrap();

        assert_eq!(fs::read_to_string(output.join("about/index.html")).unwrap(), "fresh");
    }

    #[cfg(unix)]
    #[test]
    fn test_normalize_replaces_pages_without_rewriting_in_place() {
        use std::io::Read;

        let root = TempDir::new().unwrap();
        let workspace = root.path().join("temp");
        let output = root.path().join("public");
        fs::create_dir_all(&workspace).unwrap();
        fs::create_dir_all(output.join("about")).unwrap();
        fs::write(output.join("about/index.html"), "stale page").unwrap();
        fs::write(workspace.join("about.html"), "fresh").unwrap();

        // A reader that opened the page before the rebuild.
        let mut open_reader = fs::File::open(output.join("about/index.html")).unwrap();

        UrlNormalizer::new(&workspace, &output).normalize().unwrap();

        let mut seen = String::new();
        open_reader.read_to_string(&mut seen).unwrap();
        assert_eq!(seen, "stale page");
        assert_eq!(fs::read_to_string(output.join("about/index.html")).unwrap(), "fresh");

        let names: Vec<_> = fs::read_dir(output.join("about"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["index.html"]);
    }
}
