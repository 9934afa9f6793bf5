//! The single language client session and its lifecycle.
//!
//! `Inactive -> Starting -> Active -> Stopping -> Inactive`. The manager is
//! owned by the host, which calls [`SessionManager::activate`] and
//! [`SessionManager::deactivate`]; `&mut self` on both keeps a second
//! activation from racing the first.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::cli::output::LogSink;
use crate::config::{ClientSettings, CHANNEL_NAME, CLIENT_ID};
use crate::launcher::{BinaryResolver, BinaryStager, StagedBinary};
use crate::lsp::client::{LspClient, Notifier};
use crate::lsp::protocol::{
    did_change_params, did_open_params, initialize_params, path_to_file_uri, ClientInfo,
    DidChangeWatchedFilesParams, FileChangeType, FileEvent, InitializeResult,
};
use crate::lsp::server::LspServerProcess;
use crate::session::filter::{DocumentFilter, WatchPattern};
use crate::session::watcher::{FileWatcher, WatchedChange};
use crate::utils::error::{ClientError, ClientResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    Starting,
    Active,
    Stopping,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

/// Asks the manager to stop from outside the task driving it.
///
/// An activation in flight notices the request after its current stage
/// completes and winds down to `Inactive`.
#[derive(Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopSignal>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }

    fn reset(&self) {
        self.inner.requested.store(false, Ordering::SeqCst);
    }
}

/// URI -> version of every document opened through the session.
type OpenDocuments = Arc<Mutex<HashMap<String, i32>>>;

fn lock_documents(documents: &OpenDocuments) -> MutexGuard<'_, HashMap<String, i32>> {
    documents.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running, initialized server with its staged binary and document wiring.
pub struct Session {
    client: LspClient,
    staged: StagedBinary,
    filter: DocumentFilter,
    server_info: InitializeResult,
    documents: OpenDocuments,
    watcher: Option<FileWatcher>,
    forwarder: JoinHandle<()>,
    sink: LogSink,
}

impl Session {
    pub fn server_info(&self) -> &InitializeResult {
        &self.server_info
    }

    pub fn staged_path(&self) -> &Path {
        self.staged.path()
    }

    pub fn server_pid(&self) -> Option<u32> {
        self.client.server_pid()
    }

    pub fn filter(&self) -> &DocumentFilter {
        &self.filter
    }

    /// Root of the file watcher, if one could be started.
    pub fn watch_root(&self) -> Option<&Path> {
        self.watcher.as_ref().map(FileWatcher::root)
    }

    /// Resolves when the server closes its end of the transport.
    pub async fn closed(&self) {
        self.client.closed().await;
    }

    /// Send `textDocument/didOpen` for a file the document filter selects.
    /// Returns `false` for files outside the filter and for documents that
    /// are already open.
    pub async fn open_document(&self, path: &Path) -> ClientResult<bool> {
        let absolute = tokio::fs::canonicalize(path).await?;
        let Some(uri) = self.filter.select(&absolute) else {
            self.sink.info(format!(
                "Skipping {}: not a {} document",
                path.display(),
                self.filter.language()
            ));
            return Ok(false);
        };

        if lock_documents(&self.documents).contains_key(uri.as_str()) {
            tracing::debug!("open_document: already open, skipping didOpen for {uri}");
            return Ok(false);
        }

        let text = tokio::fs::read_to_string(&absolute).await?;
        lock_documents(&self.documents).insert(uri.to_string(), 1);
        self.client
            .notifier()
            .notify(
                "textDocument/didOpen",
                did_open_params(uri.as_str(), self.filter.language(), 1, &text),
            )
            .await?;
        Ok(true)
    }

    /// Stop the server (bounded) and then delete the staged binary,
    /// whatever the shutdown outcome.
    async fn close(self, limit: std::time::Duration) -> ClientResult<()> {
        let Self { client, staged, watcher, forwarder, sink, .. } = self;

        forwarder.abort();
        drop(watcher);

        let stopped = client.shutdown(limit).await;
        release_staged(staged, &sink).await;
        stopped
    }
}

async fn release_staged(staged: StagedBinary, sink: &LogSink) {
    let path = staged.path().to_path_buf();
    match staged.release().await {
        Ok(true) => tracing::debug!("Staged binary {} removed", path.display()),
        Ok(false) => tracing::debug!("Staged binary {} was already gone", path.display()),
        Err(e) => sink.warn(format!("Failed to remove staged binary {}: {e}", path.display())),
    }
}

/// Forward watcher events as `workspace/didChangeWatchedFiles`, plus a full
/// `textDocument/didChange` for documents the session has open.
fn spawn_forwarder(
    notifier: Notifier,
    documents: OpenDocuments,
    mut changes: mpsc::UnboundedReceiver<WatchedChange>,
    sink: LogSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            let Some(uri) = path_to_file_uri(&change.path) else { continue };

            let params = DidChangeWatchedFilesParams {
                changes: vec![FileEvent { uri: uri.to_string(), kind: change.kind }],
            };
            let sent = match serde_json::to_value(params) {
                Ok(params) => notifier.notify("workspace/didChangeWatchedFiles", params).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = sent {
                sink.warn(format!("Could not forward file change for {uri}: {e}"));
                break;
            }

            if change.kind != FileChangeType::Changed {
                continue;
            }
            let version = {
                let mut docs = lock_documents(&documents);
                docs.get_mut(uri.as_str()).map(|v| {
                    *v += 1;
                    *v
                })
            };
            let Some(version) = version else { continue };
            match tokio::fs::read_to_string(&change.path).await {
                Ok(text) => {
                    let params = did_change_params(uri.as_str(), version, &text);
                    if let Err(e) = notifier.notify("textDocument/didChange", params).await {
                        sink.warn(format!("Could not sync {uri}: {e}"));
                        break;
                    }
                }
                Err(e) => tracing::debug!("Cannot read changed document {uri}: {e}"),
            }
        }
    })
}

pub struct SessionManager {
    settings: ClientSettings,
    sink: LogSink,
    resolver: BinaryResolver,
    stager: BinaryStager,
    state: SessionState,
    session: Option<Session>,
    stop: StopHandle,
}

impl SessionManager {
    pub fn new(settings: ClientSettings, sink: LogSink) -> Self {
        Self::with_parts(settings, sink, BinaryResolver::host(), BinaryStager::new())
    }

    pub fn with_parts(
        settings: ClientSettings,
        sink: LogSink,
        resolver: BinaryResolver,
        stager: BinaryStager,
    ) -> Self {
        Self {
            settings,
            sink,
            resolver,
            stager,
            state: SessionState::Inactive,
            session: None,
            stop: StopHandle::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Where staged copies go; fixed after the first activation.
    pub fn staging_path(&self) -> Option<&Path> {
        self.stager.staging_path()
    }

    /// Resolve, stage, launch and initialize the server.
    ///
    /// Only valid from `Inactive`; otherwise nothing is spawned and
    /// [`ClientError::AlreadyActive`] is returned. On any failure the state
    /// goes back to `Inactive` and a staged copy, if one was made, is
    /// deleted.
    pub async fn activate(&mut self) -> ClientResult<()> {
        if self.state != SessionState::Inactive {
            let err = ClientError::AlreadyActive { state: self.state.as_str() };
            self.sink.warn(format!("Ignoring activation request: {err}"));
            return Err(err);
        }

        self.state = SessionState::Starting;
        tracing::debug!("Session state: {} (client {CLIENT_ID})", self.state);

        match self.start_session().await {
            Ok(session) => {
                let name = session
                    .server_info()
                    .server_info
                    .as_ref()
                    .map_or(CHANNEL_NAME, |info| info.name.as_str());
                self.sink.info(format!(
                    "{name} started (pid: {})",
                    session.server_pid().map_or_else(|| "?".to_string(), |p| p.to_string())
                ));
                self.session = Some(session);
                self.state = SessionState::Active;
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Inactive;
                if let ClientError::ActivationCancelled { .. } = err {
                    self.stop.reset();
                    self.sink.info(format!("Verse language server not started: {err}"));
                } else {
                    self.sink.error(err.to_string());
                }
                Err(err)
            }
        }
    }

    async fn start_session(&mut self) -> ClientResult<Session> {
        let sources = self.settings.binary_sources(&self.resolver);
        let location = self.resolver.resolve(&sources)?;
        self.checkpoint("resolve")?;

        let staged = self.stager.stage(&location).await?;
        self.sink.info(format!(
            "Using LSP server binary {} (copied to {}).",
            location.path().display(),
            staged.path().display()
        ));

        let filter = DocumentFilter::verse();
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let watcher = self.attach_watcher(changes_tx);

        let launched = match self.checkpoint("stage") {
            Ok(()) => self.launch(&staged).await,
            Err(err) => Err(err),
        };
        let (client, server_info) = match launched {
            Ok(parts) => parts,
            Err(err) => {
                drop(watcher);
                release_staged(staged, &self.sink).await;
                return Err(err);
            }
        };

        let documents = OpenDocuments::default();
        let forwarder =
            spawn_forwarder(client.notifier(), Arc::clone(&documents), changes_rx, self.sink.clone());

        Ok(Session {
            client,
            staged,
            filter,
            server_info,
            documents,
            watcher,
            forwarder,
            sink: self.sink.clone(),
        })
    }

    /// Watcher events queue up in the channel until the session is
    /// initialized and the forwarder starts draining them.
    fn attach_watcher(
        &self,
        changes: mpsc::UnboundedSender<WatchedChange>,
    ) -> Option<FileWatcher> {
        let root = &self.settings.workspace_root;
        let started = WatchPattern::verse()
            .and_then(|pattern| FileWatcher::start(root, pattern, changes));
        match started {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                self.sink.warn(format!("File changes will not be forwarded: {e}"));
                None
            }
        }
    }

    async fn launch(&self, staged: &StagedBinary) -> ClientResult<(LspClient, InitializeResult)> {
        let root = &self.settings.workspace_root;
        let root_uri = path_to_file_uri(root).ok_or_else(|| ClientError::HandshakeFailed {
            message: format!("workspace root {} is not an absolute path", root.display()),
        })?;

        let process = LspServerProcess::spawn(staged.path(), root, &self.sink).await?;
        let client = LspClient::connect(process, self.sink.clone())?;

        if let Err(err) = self.checkpoint("launch") {
            client.terminate().await;
            return Err(err);
        }

        let client_info = ClientInfo { name: CHANNEL_NAME, version: env!("CARGO_PKG_VERSION") };
        let params = initialize_params(&root_uri, &client_info);
        let server_info = match client.initialize(params, self.settings.handshake_timeout).await {
            Ok(info) => info,
            Err(err) => {
                client.terminate().await;
                return Err(err);
            }
        };

        if let Err(err) = self.checkpoint("handshake") {
            if let Err(e) = client.shutdown(self.settings.shutdown_timeout).await {
                tracing::debug!("Shutdown after cancelled activation: {e}");
            }
            return Err(err);
        }

        Ok((client, server_info))
    }

    fn checkpoint(&self, stage: &'static str) -> ClientResult<()> {
        if self.stop.is_requested() {
            return Err(ClientError::ActivationCancelled { stage });
        }
        Ok(())
    }

    /// Stop the session and delete the staged binary. A no-op when inactive.
    ///
    /// A server that does not stop within the shutdown timeout is killed,
    /// cleanup still runs, and [`ClientError::ShutdownTimeout`] is returned.
    pub async fn deactivate(&mut self) -> ClientResult<()> {
        match self.state {
            SessionState::Inactive => return Ok(()),
            SessionState::Starting => {
                // Only reachable when an activate() future was dropped part
                // way; whatever it staged may still be on disk.
                self.state = SessionState::Inactive;
                self.remove_stale_staged_file().await;
                self.stop.reset();
                return Ok(());
            }
            SessionState::Active | SessionState::Stopping => {}
        }

        self.state = SessionState::Stopping;
        tracing::debug!("Session state: {}", self.state);

        let result = match self.session.take() {
            Some(session) => session.close(self.settings.shutdown_timeout).await,
            None => Ok(()),
        };

        match &result {
            Ok(()) => self.sink.info("Verse language server stopped."),
            Err(e @ ClientError::ShutdownTimeout(_)) => {
                self.sink.warn(format!("{e}; the server was terminated."));
            }
            Err(e) => self.sink.warn(format!("Verse language server stopped uncleanly: {e}")),
        }

        self.state = SessionState::Inactive;
        self.stop.reset();
        result
    }

    async fn remove_stale_staged_file(&self) {
        let Some(path) = self.stager.staging_path() else { return };
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!("Removed stale staged binary {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => self.sink.warn(format!("Failed to remove {}: {e}", path.display())),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cli::args::RevealOutput;
    use crate::cli::output::LogLevel;
    use crate::launcher::PlatformTag;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Duration;

    const FAKE_SERVER: &str = include_str!("../../tests/fixtures/fake_server.sh");

    struct Harness {
        _dirs: (tempfile::TempDir, tempfile::TempDir),
        workspace: PathBuf,
        stage_dir: PathBuf,
        binary: PathBuf,
    }

    impl Harness {
        fn new(mode: &str) -> Self {
            let workspace_dir = tempfile::tempdir().unwrap();
            let stage_dir = tempfile::tempdir().unwrap();
            let workspace = workspace_dir.path().canonicalize().unwrap();
            let binary = workspace.join("VerseLspCE-Linux-Shipping");
            let harness = Self {
                stage_dir: stage_dir.path().to_path_buf(),
                _dirs: (workspace_dir, stage_dir),
                workspace,
                binary,
            };
            harness.write_server(mode);
            harness
        }

        fn write_server(&self, mode: &str) {
            std::fs::write(&self.binary, format!("#!/bin/sh\nMODE={mode}\n{FAKE_SERVER}")).unwrap();
            std::fs::set_permissions(&self.binary, std::fs::Permissions::from_mode(0o755))
                .unwrap();
        }

        fn manager(&self) -> SessionManager {
            self.manager_with(|_| {})
        }

        fn manager_with(&self, tweak: impl FnOnce(&mut ClientSettings)) -> SessionManager {
            let mut settings = ClientSettings::for_binary(&self.binary, &self.workspace);
            settings.handshake_timeout = Duration::from_secs(10);
            tweak(&mut settings);
            SessionManager::with_parts(
                settings,
                LogSink::detached(CHANNEL_NAME, RevealOutput::Never),
                BinaryResolver::new(PlatformTag::Linux),
                BinaryStager::in_dir(&self.stage_dir),
            )
        }

        fn staged_files(&self) -> usize {
            std::fs::read_dir(&self.stage_dir).unwrap().count()
        }
    }

    #[tokio::test]
    async fn test_deactivate_when_inactive_is_noop() {
        let harness = Harness::new("happy");
        let mut manager = harness.manager();
        manager.deactivate().await.unwrap();
        manager.deactivate().await.unwrap();
        assert_eq!(manager.state(), SessionState::Inactive);
        assert!(manager.sink().entries().is_empty());
    }

    #[tokio::test]
    async fn test_missing_override_logs_once_and_stages_nothing() {
        let harness = Harness::new("happy");
        let mut manager = harness.manager_with(|s| {
            s.env_override = Some(PathBuf::from("/custom/server"));
        });

        let err = manager.activate().await.unwrap_err();
        assert!(matches!(err, ClientError::MissingBinary { .. }));
        assert_eq!(manager.state(), SessionState::Inactive);
        assert_eq!(manager.sink().count(LogLevel::Error), 1);
        assert!(manager.sink().entries()[0].message.contains("/custom/server"));
        assert_eq!(harness.staged_files(), 0);
        assert!(manager.staging_path().is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_cleans_staged_copy() {
        let harness = Harness::new("happy");
        std::fs::set_permissions(&harness.binary, std::fs::Permissions::from_mode(0o644))
            .unwrap();
        let mut manager = harness.manager();

        let err = manager.activate().await.unwrap_err();
        assert!(matches!(err, ClientError::SpawnFailed { .. }), "got {err:?}");
        assert_eq!(manager.state(), SessionState::Inactive);
        assert!(manager.session().is_none());
        assert_eq!(harness.staged_files(), 0);
        assert!(harness.binary.exists());
    }

    #[tokio::test]
    async fn test_happy_path_and_second_activate_rejected() {
        let harness = Harness::new("happy");
        let mut manager = harness.manager();

        manager.activate().await.unwrap();
        assert_eq!(manager.state(), SessionState::Active);
        let session = manager.session().unwrap();
        let info = session.server_info().server_info.clone().unwrap();
        assert_eq!(info.name, "FakeVerse");
        assert!(session.server_info().capability_names().contains(&"definitionProvider".into()));
        let staged = session.staged_path().to_path_buf();
        let pid = session.server_pid();
        assert!(staged.exists());
        assert_ne!(staged, harness.binary);

        let err = manager.activate().await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyActive { state: "active" }));
        assert_eq!(manager.session().unwrap().server_pid(), pid);
        assert_eq!(harness.staged_files(), 1);

        manager.deactivate().await.unwrap();
        assert_eq!(manager.state(), SessionState::Inactive);
        assert!(!staged.exists());
        assert!(harness.binary.exists());
        assert_eq!(manager.sink().count(LogLevel::Error), 0);
    }

    #[tokio::test]
    async fn test_reactivation_reuses_path_with_fresh_contents() {
        let harness = Harness::new("happy");
        let mut manager = harness.manager();

        manager.activate().await.unwrap();
        let first = manager.session().unwrap().staged_path().to_path_buf();
        assert!(std::fs::read_to_string(&first).unwrap().contains("MODE=happy"));
        manager.deactivate().await.unwrap();

        harness.write_server("hang");
        manager.activate().await.unwrap();
        let second = manager.session().unwrap().staged_path().to_path_buf();
        assert_eq!(first, second);
        assert!(std::fs::read_to_string(&second).unwrap().contains("MODE=hang"));

        let _ = manager.deactivate().await;
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_unresponsive_shutdown_is_force_closed() {
        let harness = Harness::new("hang");
        let mut manager = harness.manager_with(|s| {
            s.shutdown_timeout = Duration::from_millis(300);
        });

        manager.activate().await.unwrap();
        let err = manager.deactivate().await.unwrap_err();
        assert!(matches!(err, ClientError::ShutdownTimeout(_)));
        assert_eq!(manager.state(), SessionState::Inactive);
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_handshake_timeout_tears_down() {
        let harness = Harness::new("silent");
        let mut manager = harness.manager_with(|s| {
            s.handshake_timeout = Duration::from_millis(200);
        });

        let err = manager.activate().await.unwrap_err();
        assert!(matches!(err, ClientError::HandshakeTimeout(_)), "got {err:?}");
        assert_eq!(manager.state(), SessionState::Inactive);
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_crashing_server_fails_handshake() {
        let harness = Harness::new("crash");
        let mut manager = harness.manager();

        let err = manager.activate().await.unwrap_err();
        assert!(matches!(err, ClientError::HandshakeFailed { .. }), "got {err:?}");
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_rejected_initialize_fails_handshake() {
        let harness = Harness::new("reject");
        let mut manager = harness.manager();

        let err = manager.activate().await.unwrap_err();
        match err {
            ClientError::HandshakeFailed { message } => assert!(message.contains("no vproject")),
            other => panic!("expected HandshakeFailed, got {other:?}"),
        }
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_stop_during_activation_is_honoured_after_stage() {
        let harness = Harness::new("slow");
        let mut manager = harness.manager();
        let stop = manager.stop_handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stop.request_stop();
        });

        let err = manager.activate().await.unwrap_err();
        assert!(matches!(err, ClientError::ActivationCancelled { stage: "handshake" }));
        assert_eq!(manager.state(), SessionState::Inactive);
        assert_eq!(harness.staged_files(), 0);
        assert!(!manager.stop_handle().is_requested());
    }

    #[tokio::test]
    async fn test_stop_before_activation_spawns_nothing() {
        let harness = Harness::new("happy");
        let mut manager = harness.manager();
        manager.stop_handle().request_stop();

        let err = manager.activate().await.unwrap_err();
        assert!(matches!(err, ClientError::ActivationCancelled { stage: "resolve" }));
        assert_eq!(harness.staged_files(), 0);

        manager.activate().await.unwrap();
        manager.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_document_respects_filter() {
        let harness = Harness::new("happy");
        let source = harness.workspace.join("player.verse");
        let notes = harness.workspace.join("notes.txt");
        std::fs::write(&source, "player := class {}").unwrap();
        std::fs::write(&notes, "todo").unwrap();

        let mut manager = harness.manager();
        manager.activate().await.unwrap();
        let session = manager.session().unwrap();

        assert!(session.open_document(&source).await.unwrap());
        assert!(!session.open_document(&source).await.unwrap());
        assert!(!session.open_document(&notes).await.unwrap());

        manager.deactivate().await.unwrap();
        assert_eq!(harness.staged_files(), 0);
    }

    /// Server stderr lines of the form `got <method> <version>`.
    fn received(sink: &LogSink) -> Vec<(String, Option<i32>)> {
        sink.entries()
            .into_iter()
            .filter(|e| e.level == LogLevel::Server)
            .filter_map(|e| {
                let mut parts = e.message.strip_prefix("got ")?.split_whitespace();
                let method = parts.next()?.to_string();
                Some((method, parts.next().and_then(|v| v.parse().ok())))
            })
            .collect()
    }

    async fn wait_until(sink: &LogSink, done: impl Fn(&[(String, Option<i32>)]) -> bool) -> bool {
        for _ in 0..100 {
            if done(&received(sink)) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_watched_changes_reach_the_server() {
        let harness = Harness::new("happy");
        let source = harness.workspace.join("player.verse");
        std::fs::write(&source, "player := class {}").unwrap();

        let mut manager = harness.manager();
        manager.activate().await.unwrap();
        let sink = manager.sink().clone();
        let session = manager.session().unwrap();
        assert!(session.watch_root().is_some());
        assert!(session.open_document(&source).await.unwrap());
        assert!(
            wait_until(&sink, |got| got.iter().any(|(m, v)| m == "textDocument/didOpen"
                && *v == Some(1)))
            .await
        );

        std::fs::write(&source, "player := class { Health : int = 100 }").unwrap();

        let synced = wait_until(&sink, |got| {
            got.iter().any(|(m, _)| m == "workspace/didChangeWatchedFiles")
                && got.iter().any(|(m, v)| m == "textDocument/didChange" && v.unwrap_or(0) >= 2)
        })
        .await;
        assert!(synced, "server saw {:?}", received(&sink));

        let versions: Vec<i32> = received(&sink)
            .into_iter()
            .filter(|(m, _)| m == "textDocument/didChange")
            .filter_map(|(_, v)| v)
            .collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]), "{versions:?}");

        manager.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_changes_to_unopened_files_skip_did_change() {
        let harness = Harness::new("happy");
        let mut manager = harness.manager();
        manager.activate().await.unwrap();
        let sink = manager.sink().clone();

        std::fs::write(harness.workspace.join("game.verse"), "game := module {}").unwrap();

        assert!(
            wait_until(&sink, |got| got.iter().any(|(m, _)| m == "workspace/didChangeWatchedFiles"))
                .await
        );
        assert!(!received(&sink).iter().any(|(m, _)| m == "textDocument/didChange"));

        manager.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_server_message_keeps_session_open() {
        let harness = Harness::new("garbage");
        let mut manager = harness.manager();
        manager.activate().await.unwrap();

        let session = manager.session().unwrap();
        let closed = tokio::time::timeout(Duration::from_millis(500), session.closed()).await;
        assert!(closed.is_err(), "transport closed after a malformed frame");
        assert!(manager
            .sink()
            .entries()
            .iter()
            .any(|e| e.level == LogLevel::Warn && e.message.contains("malformed message")));

        manager.deactivate().await.unwrap();
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_dropping_manager_removes_staged_copy() {
        let harness = Harness::new("happy");
        let mut manager = harness.manager();
        manager.activate().await.unwrap();
        assert_eq!(harness.staged_files(), 1);

        drop(manager);
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_stop_handle_wakes_waiters() {
        let stop = StopHandle::default();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.stopped().await })
        };
        stop.request_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        // Already requested: returns immediately.
        stop.stopped().await;
    }
}
