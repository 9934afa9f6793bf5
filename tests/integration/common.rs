// Shared by several test binaries; not every helper is used by each.
#![allow(dead_code)]

use std::path::PathBuf;
use std::process::Command;

const FAKE_SERVER: &str = include_str!("../fixtures/fake_server.sh");

/// A throwaway Verse project plus a private TMPDIR, so staged copies made
/// by the binary under test can be counted.
pub struct Sandbox {
    _root: tempfile::TempDir,
    pub workspace: PathBuf,
    pub tmp: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().canonicalize().unwrap();
        let workspace = base.join("MyIsland");
        let tmp = base.join("tmp");
        std::fs::create_dir_all(workspace.join("Content")).unwrap();
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::write(workspace.join("MyIsland.vproject"), "{}").unwrap();
        Self { _root: root, workspace, tmp }
    }

    /// Write the scripted server in `mode` and return its path.
    #[cfg(unix)]
    pub fn fake_server(&self, mode: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.workspace.join("VerseLspCE-Linux-Shipping");
        std::fs::write(&path, format!("#!/bin/sh\nMODE={mode}\n{FAKE_SERVER}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub fn write_source(&self, name: &str, text: &str) -> PathBuf {
        let path = self.workspace.join("Content").join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    pub fn leftover_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.tmp).unwrap().map(|e| e.unwrap().path()).collect()
    }

    /// The CLI, pointed at this sandbox and isolated from the caller's
    /// environment.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("verse-lsp-client"));
        cmd.current_dir(&self.workspace)
            .env("TMPDIR", &self.tmp)
            .env_remove("VERSE_LSP_CE_BIN")
            .env_remove("VERSE_LSP_CE_DEV_SHOW_OUTPUT")
            .arg("--workspace")
            .arg(&self.workspace);
        cmd
    }
}
