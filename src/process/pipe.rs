//! Named pipe (FIFO) shared between the transcoder and the demodulator.

use crate::defaults;
use crate::error::{DtmfError, Result};
use crate::sys;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

/// One FIFO on disk, deleted exactly once.
///
/// Dropping a resource that still exists removes it best-effort; callers that
/// care about removal errors call [`PipeResource::destroy`].
#[derive(Debug)]
pub struct PipeResource {
    path: PathBuf,
    exists: bool,
}

impl PipeResource {
    /// Create the FIFO at `path`, or at a fresh generated name under `dir`.
    ///
    /// An existing FIFO at an explicit `path` is adopted; anything else at
    /// that path is an error.
    pub fn create(path: Option<&Path>, dir: &Path) -> Result<Self> {
        match path {
            Some(path) => Self::create_at(path),
            None => Self::create_unique(dir),
        }
    }

    fn create_at(path: &Path) -> Result<Self> {
        match sys::make_fifo(path, defaults::PIPE_MODE) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !is_fifo(path) {
                    return Err(creation_error(path, "path exists and is not a FIFO"));
                }
                tracing::debug!(path = %path.display(), "reusing existing FIFO");
            }
            Err(e) => return Err(creation_error(path, &e.to_string())),
        }
        Ok(Self {
            path: path.to_path_buf(),
            exists: true,
        })
    }

    fn create_unique(dir: &Path) -> Result<Self> {
        let (_, path) = tempfile::Builder::new()
            .prefix(defaults::PIPE_PREFIX)
            .rand_bytes(8)
            .make_in(dir, |path| sys::make_fifo(path, defaults::PIPE_MODE))
            .and_then(|named| named.keep().map_err(|e| e.error))
            .map_err(|e| creation_error(dir, &e.to_string()))?;
        tracing::debug!(path = %path.display(), "created FIFO");
        Ok(Self { path, exists: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Delete the FIFO. Calling it again after success is a no-op.
    pub fn destroy(&mut self) -> Result<()> {
        if !self.exists {
            return Ok(());
        }
        self.exists = false;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DtmfError::PipeRemoval {
                path: self.path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Delete the FIFO, logging instead of returning a failure.
    pub fn destroy_reported(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::warn!("{}", e);
        }
    }
}

impl Drop for PipeResource {
    fn drop(&mut self) {
        self.destroy_reported();
    }
}

/// Whether a FIFO (and not something that replaced it) lives at `path`.
pub fn is_fifo(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_fifo())
        .unwrap_or(false)
}

/// Removes a regular file at a pipe path.
///
/// A transcoder that opens the path after the FIFO was deleted creates a
/// plain file there. Returns whether one was removed.
pub fn remove_stray_file(path: &Path) -> bool {
    let is_file = std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_file())
        .unwrap_or(false);
    if !is_file {
        return false;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed stray transcoder output");
            true
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to remove stray output: {}", e);
            false
        }
    }
}

fn creation_error(path: &Path, message: &str) -> DtmfError {
    DtmfError::PipeCreation {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generated_pipe_lives_in_dir_with_prefix() {
        let dir = TempDir::new().unwrap();
        let pipe = PipeResource::create(None, dir.path()).unwrap();

        assert!(pipe.exists());
        assert!(is_fifo(pipe.path()));
        assert_eq!(pipe.path().parent(), Some(dir.path()));
        let name = pipe.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("dtmf_pipe_"), "unexpected name {}", name);
    }

    #[test]
    fn generated_names_are_unique() {
        let dir = TempDir::new().unwrap();
        let a = PipeResource::create(None, dir.path()).unwrap();
        let b = PipeResource::create(None, dir.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn explicit_path_is_used() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixed.pipe");
        let pipe = PipeResource::create(Some(&path), dir.path()).unwrap();
        assert_eq!(pipe.path(), path.as_path());
        assert!(is_fifo(&path));
    }

    #[test]
    fn existing_fifo_is_adopted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixed.pipe");
        sys::make_fifo(&path, 0o600).unwrap();
        let pipe = PipeResource::create(Some(&path), dir.path()).unwrap();
        assert!(pipe.exists());
    }

    #[test]
    fn existing_regular_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-pipe");
        std::fs::write(&path, b"data").unwrap();

        match PipeResource::create(Some(&path), dir.path()) {
            Err(DtmfError::PipeCreation { message, .. }) => {
                assert!(message.contains("not a FIFO"), "message: {}", message)
            }
            other => panic!("expected PipeCreation, got {:?}", other),
        }
        // The regular file must be left alone
        assert!(path.exists());
    }

    #[test]
    fn stray_files_are_removed_but_fifos_are_not() {
        let dir = TempDir::new().unwrap();
        let pipe = PipeResource::create(None, dir.path()).unwrap();
        assert!(!remove_stray_file(pipe.path()));
        assert!(is_fifo(pipe.path()));

        let stray = dir.path().join("dtmf_pipe_gone");
        std::fs::write(&stray, b"pcm").unwrap();
        assert!(!is_fifo(&stray));
        assert!(remove_stray_file(&stray));
        assert!(!stray.exists());
        assert!(!remove_stray_file(&stray));
    }

    #[test]
    fn missing_dir_is_creation_error() {
        let result = PipeResource::create(None, Path::new("/nonexistent_dtmfpipe_dir"));
        assert!(matches!(result, Err(DtmfError::PipeCreation { .. })));
    }

    #[test]
    fn destroy_removes_once() {
        let dir = TempDir::new().unwrap();
        let mut pipe = PipeResource::create(None, dir.path()).unwrap();
        let path = pipe.path().to_path_buf();

        pipe.destroy().unwrap();
        assert!(!pipe.exists());
        assert!(!path.exists());

        // Second destroy is a no-op, even if something else reused the name
        std::fs::write(&path, b"other owner").unwrap();
        pipe.destroy().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn destroy_surfaces_removal_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub");
        std::fs::create_dir(&path).unwrap();
        // A directory at the pipe path makes remove_file fail with something other than NotFound
        let mut pipe = PipeResource {
            path: path.clone(),
            exists: true,
        };
        assert!(matches!(
            pipe.destroy(),
            Err(DtmfError::PipeRemoval { .. })
        ));
        assert!(!pipe.exists());
    }

    #[test]
    fn drop_removes_pipe() {
        let dir = TempDir::new().unwrap();
        let path = {
            let pipe = PipeResource::create(None, dir.path()).unwrap();
            pipe.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
