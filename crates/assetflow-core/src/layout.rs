//! Resolved filesystem layout.

use std::path::{Component, Path, PathBuf};

use crate::config::PathsConfig;

/// Absolute-or-root-relative locations every pipeline stage reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub styles: PathBuf,
    pub scripts: PathBuf,
    pub views: PathBuf,
    pub images: PathBuf,
    pub workspace: PathBuf,
    pub output: PathBuf,
    pub css_out: PathBuf,
    pub js_out: PathBuf,
    pub img_out: PathBuf,
}

impl Layout {
    /// Resolve a [`PathsConfig`] against its root.
    pub fn from_paths(paths: &PathsConfig) -> Self {
        let root = paths.root.clone();
        let output = root.join(&paths.output);
        Self {
            styles: root.join(&paths.styles),
            scripts: root.join(&paths.scripts),
            views: root.join(&paths.views),
            images: root.join(&paths.images),
            workspace: root.join(&paths.workspace),
            css_out: output.join(&paths.css_dir),
            js_out: output.join(&paths.js_dir),
            img_out: output.join(&paths.img_dir),
            output,
            root,
        }
    }

    /// Whether the workspace resolves to the output tree or somewhere in it.
    pub fn workspace_in_output(&self) -> bool {
        lexical(&self.workspace).starts_with(lexical(&self.output))
    }

    /// Source directories the watcher observes.
    pub fn source_dirs(&self) -> Vec<&Path> {
        vec![&self.styles, &self.scripts, &self.views, &self.images]
    }
}

/// Normalize a path without touching the filesystem.
///
/// `.` components are dropped and `..` pops the previous normal component
/// when there is one.
pub fn lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
