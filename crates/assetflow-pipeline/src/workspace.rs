//! Ephemeral workspace between template rendering and URL normalization.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

/// The intermediate directory holding rendered-but-not-normalized HTML.
///
/// Nothing in here is ever served; [`crate::normalize::UrlNormalizer`] copies
/// finished pages out before [`Workspace::clean`] drops the tree.
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if absent.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        debug!(dir = %self.dir.display(), "workspace ready");
        Ok(())
    }

    /// Remove the directory tree. A missing directory is not an error.
    pub fn clean(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                debug!(dir = %self.dir.display(), "workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
