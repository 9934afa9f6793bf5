//! Runs the server from a private copy so the original stays unlocked and can
//! be rebuilt while a session is up.

use std::path::{Path, PathBuf};

use crate::launcher::resolver::ServerBinaryLocation;
use crate::utils::error::{ClientError, ClientResult};

const STAGED_PREFIX: &str = "versece_lsp-";

/// Owns the staging path for the lifetime of the host.
///
/// The path is generated on the first [`stage`](Self::stage) and reused by
/// every later one; the contents are overwritten each time so a newer build
/// is always picked up.
pub struct BinaryStager {
    dir: PathBuf,
    staging_path: Option<PathBuf>,
}

impl BinaryStager {
    pub fn new() -> Self {
        Self::in_dir(std::env::temp_dir())
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), staging_path: None }
    }

    pub fn staging_path(&self) -> Option<&Path> {
        self.staging_path.as_deref()
    }

    fn reserve_path(&mut self, source: &Path) -> ClientResult<PathBuf> {
        if let Some(path) = &self.staging_path {
            return Ok(path.clone());
        }

        let reserved = tempfile::Builder::new()
            .prefix(STAGED_PREFIX)
            .suffix(std::env::consts::EXE_SUFFIX)
            .tempfile_in(&self.dir)
            .and_then(|file| file.into_temp_path().keep().map_err(|e| e.error))
            .map_err(|source_err| ClientError::StageCopyFailed {
                from: source.to_path_buf(),
                to: self.dir.clone(),
                source: source_err,
            })?;

        tracing::debug!("Reserved staging path {}", reserved.display());
        self.staging_path = Some(reserved.clone());
        Ok(reserved)
    }

    pub async fn stage(&mut self, location: &ServerBinaryLocation) -> ClientResult<StagedBinary> {
        let source = location.path();
        let staged = self.reserve_path(source)?;

        if same_file(source, &staged) {
            return Err(ClientError::StageCopyFailed {
                from: source.to_path_buf(),
                to: staged,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "staging path is the original binary",
                ),
            });
        }

        // Permission bits travel with the copy, so the staged file stays executable.
        if let Err(source_err) = tokio::fs::copy(source, &staged).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(ClientError::StageCopyFailed {
                from: source.to_path_buf(),
                to: staged,
                source: source_err,
            });
        }

        tracing::debug!("Staged {} to {}", source.display(), staged.display());
        Ok(StagedBinary { path: staged, released: false })
    }
}

impl Default for BinaryStager {
    fn default() -> Self {
        Self::new()
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// The staged copy of the server. Deleted exactly once: through
/// [`release`](Self::release) on every orderly path, or on drop otherwise.
#[derive(Debug)]
pub struct StagedBinary {
    path: PathBuf,
    released: bool,
}

impl StagedBinary {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the staged file. Returns `false` when it was already gone.
    pub async fn release(mut self) -> ClientResult<bool> {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!("Removed staged binary {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for StagedBinary {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
