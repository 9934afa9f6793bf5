use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::cli::output::LogSink;
use crate::utils::error::{ClientError, ClientResult};

const SPAWN_BUSY_RETRIES: u32 = 5;

#[cfg(unix)]
fn is_text_busy(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(not(unix))]
fn is_text_busy(_err: &std::io::Error) -> bool {
    false
}

/// A running language server child process.
///
/// stdin/stdout carry the protocol; stderr is forwarded line by line to the
/// log sink. The child is killed if this handle is dropped without a
/// graceful stop.
pub struct LspServerProcess {
    process: Child,
    binary: PathBuf,
    stderr_task: Option<JoinHandle<()>>,
}

impl LspServerProcess {
    pub async fn spawn(binary: &Path, workspace_root: &Path, sink: &LogSink) -> ClientResult<Self> {
        tracing::debug!(
            "Starting LSP server {} in workspace: {}",
            binary.display(),
            workspace_root.display()
        );

        let mut attempt = 0;
        let mut process = loop {
            let spawned = Command::new(binary)
                .current_dir(workspace_root)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();
            match spawned {
                Ok(process) => break process,
                // A freshly staged file can still be open for writing in a
                // concurrently forked child for a moment.
                Err(e) if is_text_busy(&e) && attempt < SPAWN_BUSY_RETRIES => {
                    attempt += 1;
                    tracing::debug!("{} is busy, retrying spawn ({attempt})", binary.display());
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(source) => {
                    return Err(ClientError::SpawnFailed { path: binary.to_path_buf(), source })
                }
            }
        };

        tracing::debug!("LSP server process started (pid: {:?})", process.id());

        let stderr_task = process.stderr.take().map(|stderr| {
            let sink = sink.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => sink.server(line),
                        Ok(None) => break,
                        Err(e) => {
                            tracing::debug!("LSP server stderr read error: {e}");
                            break;
                        }
                    }
                }
            })
        });

        Ok(Self { process, binary: binary.to_path_buf(), stderr_task })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn id(&self) -> Option<u32> {
        self.process.id()
    }

    pub fn take_stdin(&mut self) -> ClientResult<ChildStdin> {
        self.process
            .stdin
            .take()
            .ok_or_else(|| ClientError::transport("LSP server stdin not available (already taken)"))
    }

    pub fn take_stdout(&mut self) -> ClientResult<ChildStdout> {
        self.process
            .stdout
            .take()
            .ok_or_else(|| ClientError::transport("LSP server stdout not available (already taken)"))
    }

    /// Wait for the process to exit on its own.
    pub async fn wait(&mut self) -> ClientResult<ExitStatus> {
        let status = self.process.wait().await?;
        self.finish_stderr().await;
        Ok(status)
    }

    /// Force-close the transport by killing the process and reaping it.
    pub async fn kill(&mut self) {
        if let Err(e) = self.process.kill().await {
            tracing::debug!("Killing LSP server {} failed: {e}", self.binary.display());
        }
        self.finish_stderr().await;
    }

    /// Let the stderr forwarder drain what the process wrote before it exited.
    async fn finish_stderr(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_millis(500), task).await.is_err() {
                tracing::debug!("LSP server stderr did not close after exit");
                abort.abort();
            }
        }
    }
}

impl Drop for LspServerProcess {
    fn drop(&mut self) {
        let _ = self.process.start_kill();
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}
