//! Maps TFTP filenames onto the boot root.

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use crate::error::TransferError;

/// The directory boot files are served from.
#[derive(Debug, Clone)]
pub struct BootRoot {
    root: PathBuf,
}

impl BootRoot {
    /// # Errors
    /// `io::Error` if `path` does not exist or is not a directory.
    pub fn open(path: &Path) -> io::Result<Self> {
        let root = path.canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(BootRoot { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolves a requested filename to a regular file inside the root.
    ///
    /// Leading separators are dropped and backslashes are read as separators, PXE ROMs send both.
    ///
    /// # Errors
    /// `AccessViolation` if the name or a symlink leads outside of the root,
    /// `NotFound` if there is no such regular file.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, TransferError> {
        let normalized = filename.replace('\\', "/");
        let relative = Path::new(normalized.trim_start_matches('/'));
        let is_contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !is_contained {
            return Err(TransferError::AccessViolation(filename.to_owned()));
        }

        let path = self
            .root
            .join(relative)
            .canonicalize()
            .map_err(|_| TransferError::NotFound(filename.to_owned()))?;
        if !path.starts_with(&self.root) {
            return Err(TransferError::AccessViolation(filename.to_owned()));
        }
        if !path.is_file() {
            return Err(TransferError::NotFound(filename.to_owned()));
        }
        Ok(path)
    }
}
