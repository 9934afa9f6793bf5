use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("could not find LSP server binary {}", path.display())]
    MissingBinary { path: PathBuf },

    #[error("failed to stage {} to {}: {source}", from.display(), to.display())]
    StageCopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn LSP server {}: {source}", path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("LSP server did not answer initialize within {}s", .0.as_secs_f32())]
    HandshakeTimeout(Duration),

    #[error("LSP handshake failed: {message}")]
    HandshakeFailed { message: String },

    #[error("LSP server did not acknowledge shutdown within {}s", .0.as_secs_f32())]
    ShutdownTimeout(Duration),

    #[error("a language client session is already {state}")]
    AlreadyActive { state: &'static str },

    #[error("activation cancelled after {stage}")]
    ActivationCancelled { stage: &'static str },

    #[error("file watcher error: {0}")]
    Watch(String),

    #[error("LSP transport error: {message}")]
    Transport { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Failures that leave the host without a running server.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ShutdownTimeout(_) | Self::AlreadyActive { .. })
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
