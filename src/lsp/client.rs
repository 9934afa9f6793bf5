use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::cli::output::LogSink;
use crate::lsp::codec::{FrameReader, FrameWriter};
use crate::lsp::protocol::{
    InitializeResult, LSPError, LSPNotification, LSPRequest, LSPResponse, MessageParams,
    MessageType, PublishDiagnosticsParams, METHOD_NOT_FOUND,
};
use crate::lsp::server::LspServerProcess;
use crate::utils::error::{ClientError, ClientResult};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<LSPResponse>>>>;
type SharedWriter = Arc<tokio::sync::Mutex<FrameWriter<ChildStdin>>>;

/// Server-to-client requests answered with a `null` result.
const ACKNOWLEDGED_SERVER_REQUESTS: &[&str] =
    &["client/registerCapability", "client/unregisterCapability", "window/workDoneProgress/create"];

/// Cloneable handle for sending notifications to the server from other tasks.
#[derive(Clone)]
pub struct Notifier {
    writer: SharedWriter,
}

impl Notifier {
    pub async fn notify(&self, method: &str, params: Value) -> ClientResult<()> {
        let notification = LSPNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };
        tracing::debug!("Sending LSP notification: {method}");
        self.writer.lock().await.write_frame(&notification).await
    }
}

/// JSON-RPC endpoint over a running server's stdio.
pub struct LspClient {
    server: LspServerProcess,
    writer: SharedWriter,
    request_id: AtomicU64,
    pending_requests: PendingMap,
    closed: watch::Receiver<bool>,
    reader: JoinHandle<()>,
}

impl LspClient {
    /// Take over the server's stdio and start routing incoming messages.
    ///
    /// The reader must run before anything is sent, otherwise the response
    /// to `initialize` is never consumed.
    pub fn connect(mut server: LspServerProcess, sink: LogSink) -> ClientResult<Self> {
        let stdin = server.take_stdin()?;
        let stdout = server.take_stdout()?;

        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(FrameWriter::new(stdin)));
        let pending_requests: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (closed_tx, closed) = watch::channel(false);

        let reader = tokio::spawn(read_loop(
            stdout,
            Arc::clone(&pending_requests),
            Arc::clone(&writer),
            sink,
            closed_tx,
        ));

        Ok(Self {
            server,
            writer,
            request_id: AtomicU64::new(1),
            pending_requests,
            closed,
            reader,
        })
    }

    pub fn notifier(&self) -> Notifier {
        Notifier { writer: Arc::clone(&self.writer) }
    }

    pub fn server_pid(&self) -> Option<u32> {
        self.server.id()
    }

    /// `initialize` + `initialized`, bounded by `limit`.
    pub async fn initialize(
        &self,
        params: Value,
        limit: Duration,
    ) -> ClientResult<InitializeResult> {
        tracing::debug!("Sending LSP initialize request...");
        let response = match self.request_with_timeout("initialize", params, limit).await {
            Ok(response) => response,
            Err(err @ ClientError::HandshakeTimeout(_)) => return Err(err),
            Err(err) => return Err(ClientError::HandshakeFailed { message: err.to_string() }),
        };

        if let Some(error) = response.error {
            return Err(ClientError::HandshakeFailed {
                message: format!("{} (code {})", error.message, error.code),
            });
        }

        let result: InitializeResult = match response.result {
            Some(value) if !value.is_null() => serde_json::from_value(value).map_err(|e| {
                ClientError::HandshakeFailed { message: format!("malformed initialize result: {e}") }
            })?,
            _ => InitializeResult::default(),
        };

        self.notifier().notify("initialized", serde_json::json!({})).await?;
        tracing::debug!("LSP client initialized successfully");
        Ok(result)
    }

    pub async fn send_request(&self, method: &str, params: Value) -> ClientResult<LSPResponse> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        self.exchange(id, method, params).await
    }

    async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        limit: Duration,
    ) -> ClientResult<LSPResponse> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        match tokio::time::timeout(limit, self.exchange(id, method, params)).await {
            Ok(response) => response,
            Err(_) => {
                self.forget(id);
                Err(ClientError::HandshakeTimeout(limit))
            }
        }
    }

    async fn exchange(&self, id: u64, method: &str, params: Value) -> ClientResult<LSPResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending_requests.lock().unwrap_or_else(PoisonError::into_inner).insert(id, tx);

        let request = LSPRequest {
            jsonrpc: "2.0".to_string(),
            id: Value::Number(id.into()),
            method: method.to_string(),
            params,
        };

        tracing::debug!("Sending LSP request: {method} (id: {id})");
        if let Err(err) = self.writer.lock().await.write_frame(&request).await {
            self.forget(id);
            return Err(err);
        }

        let response = rx.await.map_err(|_| {
            ClientError::transport(format!("server closed the connection before answering {method}"))
        })?;

        if let Some(ref error) = response.error {
            tracing::debug!("LSP error response for {method} (id: {id}): {error:?}");
        } else {
            tracing::debug!("LSP response received for {method} (id: {id})");
        }

        Ok(response)
    }

    fn forget(&self, id: u64) {
        self.pending_requests.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the server's stdout has closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // An Err means the reader is gone, which also means closed.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// `shutdown` request, `exit` notification, then wait for the process to
    /// exit, all within `limit`. On expiry the process is killed and
    /// [`ClientError::ShutdownTimeout`] is returned; the transport is closed
    /// either way.
    pub async fn shutdown(mut self, limit: Duration) -> ClientResult<()> {
        let outcome = tokio::time::timeout(limit, self.graceful_stop()).await;
        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                tracing::debug!("Graceful LSP shutdown failed: {err}");
                self.server.kill().await;
                Err(err)
            }
            Err(_) => {
                tracing::debug!(
                    "LSP server {} didn't exit in time, killing",
                    self.server.binary().display()
                );
                self.server.kill().await;
                Err(ClientError::ShutdownTimeout(limit))
            }
        };
        self.reader.abort();
        result
    }

    /// Kill the server without the protocol exchange.
    pub async fn terminate(mut self) {
        self.server.kill().await;
        self.reader.abort();
    }

    async fn graceful_stop(&mut self) -> ClientResult<()> {
        if !self.is_closed() {
            match self.send_request("shutdown", Value::Null).await {
                Ok(response) if response.error.is_none() => {
                    if let Err(e) = self.notifier().notify("exit", Value::Null).await {
                        tracing::debug!("Failed to send exit notification: {e}");
                    }
                }
                Ok(response) => {
                    tracing::debug!("Server rejected shutdown: {:?}", response.error);
                }
                Err(e) => tracing::debug!("Shutdown request failed: {e}"),
            }
        }
        let status = self.server.wait().await?;
        tracing::debug!("LSP server exited with {status}");
        Ok(())
    }
}

async fn read_loop(
    stdout: ChildStdout,
    pending_requests: PendingMap,
    writer: SharedWriter,
    sink: LogSink,
    closed: watch::Sender<bool>,
) {
    let mut reader = FrameReader::new(stdout);
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => dispatch_frame(frame, &pending_requests, &writer, &sink).await,
            Ok(None) => {
                tracing::debug!("LSP server stdout closed (EOF)");
                break;
            }
            Err(ClientError::Json(e)) => {
                sink.warn(format!("Ignoring malformed message from server: {e}"));
            }
            Err(e) => {
                sink.warn(format!("Connection to server is erroring: {e}"));
                break;
            }
        }
    }
    // Dropping the senders wakes every waiter with a closed-channel error.
    pending_requests.lock().unwrap_or_else(PoisonError::into_inner).clear();
    let _ = closed.send(true);
}

async fn dispatch_frame(
    frame: Value,
    pending_requests: &PendingMap,
    writer: &SharedWriter,
    sink: &LogSink,
) {
    let method = frame.get("method").and_then(Value::as_str).map(str::to_string);
    let id = frame.get("id").filter(|id| !id.is_null()).cloned();

    match (id, method) {
        (Some(id), None) => {
            let Ok(response) = serde_json::from_value::<LSPResponse>(frame) else {
                tracing::debug!("Ignoring malformed LSP response (id: {id})");
                return;
            };
            let Some(id) = id.as_u64() else {
                tracing::debug!("Ignoring LSP response with non-numeric id {id}");
                return;
            };
            let sender =
                pending_requests.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
            if let Some(sender) = sender {
                let _ = sender.send(response);
            }
        }
        (Some(id), Some(method)) => {
            let response = answer_server_request(id, &method, frame.get("params"));
            if let Err(e) = writer.lock().await.write_frame(&response).await {
                tracing::debug!("Failed to answer server request {method}: {e}");
            }
        }
        (None, Some(method)) => handle_notification(&method, frame.get("params").cloned(), sink),
        (None, None) => tracing::trace!("Ignoring frame without id or method"),
    }
}

/// The server must never be left waiting on us, so every request gets a reply.
fn answer_server_request(id: Value, method: &str, params: Option<&Value>) -> LSPResponse {
    let mut response =
        LSPResponse { jsonrpc: "2.0".to_string(), id, result: Some(Value::Null), error: None };

    if method == "workspace/configuration" {
        let items = params
            .and_then(|p| p.get("items"))
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        response.result = Some(Value::Array(vec![Value::Null; items]));
    } else if !ACKNOWLEDGED_SERVER_REQUESTS.contains(&method) {
        tracing::debug!("Server sent request {method}; replying method not found");
        response.result = None;
        response.error =
            Some(LSPError { code: METHOD_NOT_FOUND, message: format!("Method not found: {method}") });
    }

    response
}

fn handle_notification(method: &str, params: Option<Value>, sink: &LogSink) {
    match method {
        "window/logMessage" | "window/showMessage" => {
            let Some(params) = params.and_then(|p| serde_json::from_value::<MessageParams>(p).ok())
            else {
                tracing::debug!("Malformed {method} notification");
                return;
            };
            match params.kind {
                MessageType::Error => sink.error(params.message),
                MessageType::Warning => sink.warn(params.message),
                MessageType::Info => sink.info(params.message),
                MessageType::Log | MessageType::Debug => sink.server(params.message),
            }
        }
        "textDocument/publishDiagnostics" => {
            let Some(params) =
                params.and_then(|p| serde_json::from_value::<PublishDiagnosticsParams>(p).ok())
            else {
                tracing::debug!("Malformed publishDiagnostics notification");
                return;
            };
            sink.info(format!("{} diagnostic(s) for {}", params.diagnostics.len(), params.uri));
        }
        _ => tracing::trace!("Ignoring notification from server: {method}"),
    }
}
