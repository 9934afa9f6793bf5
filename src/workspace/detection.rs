use std::path::{Path, PathBuf};

pub struct WorkspaceDetector;

impl WorkspaceDetector {
    /// Nearest ancestor (inclusive) holding a `.vproject` file, falling back
    /// to the nearest one with a `.git` directory.
    pub fn find_workspace_root(start_path: &Path) -> Option<PathBuf> {
        let ancestors = || start_path.ancestors();
        ancestors()
            .find(|dir| Self::has_vproject(dir))
            .or_else(|| ancestors().find(|dir| dir.join(".git").is_dir()))
            .map(Path::to_path_buf)
    }

    fn has_vproject(path: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(path) else {
            return false;
        };
        entries.flatten().any(|entry| {
            entry.path().extension().is_some_and(|ext| ext == "vproject")
                && entry.file_type().is_ok_and(|t| t.is_file())
        })
    }
}
