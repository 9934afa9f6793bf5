use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::path::Path;
use url::Url;

#[derive(Serialize, Deserialize, Debug)]
pub struct LSPRequest {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    pub params: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LSPNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LSPResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LSPError>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LSPError {
    pub code: i32,
    pub message: String,
}

pub const METHOD_NOT_FOUND: i32 = -32601;

/// What the server reported back from `initialize`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(rename = "serverInfo", skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}

impl InitializeResult {
    /// Top-level capability keys the server advertised, sorted.
    pub fn capability_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .capabilities
            .as_object()
            .map(|caps| {
                caps.iter().filter(|(_, v)| !v.is_null()).map(|(k, _)| k.clone()).collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Error = 1,
    Warning = 2,
    Info = 3,
    Log = 4,
    Debug = 5,
}

/// Params of both `window/logMessage` and `window/showMessage`.
#[derive(Serialize, Deserialize, Debug)]
pub struct MessageParams {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub diagnostics: Vec<serde_json::Value>,
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileChangeType {
    Created = 1,
    Changed = 2,
    Deleted = 3,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: FileChangeType,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DidChangeWatchedFilesParams {
    pub changes: Vec<FileEvent>,
}

pub fn path_to_file_uri(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok()
}

/// Client identity sent with `initialize`.
pub struct ClientInfo<'a> {
    pub name: &'a str,
    pub version: &'a str,
}

pub fn initialize_params(workspace_root: &Url, client: &ClientInfo<'_>) -> serde_json::Value {
    let folder_name = workspace_root
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("workspace")
        .to_string();

    serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": client.name,
            "version": client.version
        },
        "rootUri": workspace_root.as_str(),
        "workspaceFolders": [{
            "uri": workspace_root.as_str(),
            "name": folder_name
        }],
        "capabilities": {
            "workspace": {
                "workspaceFolders": true,
                "didChangeWatchedFiles": {
                    "dynamicRegistration": false
                }
            },
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "didSave": false,
                    "willSave": false,
                    "willSaveWaitUntil": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                },
                "definition": {
                    "dynamicRegistration": false,
                    "linkSupport": false
                }
            },
            "window": {
                "workDoneProgress": false
            }
        }
    })
}

pub fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub fn did_change_params(uri: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{ "text": text }]
    })
}
