use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// A scratch artifact path owned for the duration of one case. The file is removed when
/// the guard drops, on every exit path.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Claims `path`, removing a stale file left by an interrupted run so that a later
    /// stage never picks up an artifact it did not produce.
    pub fn claim(path: &Path) -> Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale scratch artifact"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("remove stale scratch file: {}", path.display()))
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed scratch artifact"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                debug!(error = %err, path = %self.path.display(), "failed to remove scratch artifact")
            }
        }
    }
}
