//! Internal LSP message serde types for JSON-RPC communication.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use cryptodetect_types::{ContentChange, Diagnostic, PositionEncoding, Range};

use crate::types::Publication;

pub(crate) const METHOD_NOT_FOUND: i64 = -32601;
pub(crate) const INVALID_REQUEST: i64 = -32600;
pub(crate) const INVALID_PARAMS: i64 = -32602;
pub(crate) const SERVER_NOT_INITIALIZED: i64 = -32002;

/// `TextDocumentSyncKind.Incremental`.
const SYNC_INCREMENTAL: u8 = 2;

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub(crate) fn response_ok(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub(crate) fn response_error(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitializeParams {
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    #[serde(default)]
    pub initialization_options: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ClientCapabilities {
    #[serde(default)]
    pub general: Option<GeneralCapabilities>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeneralCapabilities {
    #[serde(default)]
    pub position_encodings: Option<Vec<String>>,
}

impl InitializeParams {
    /// Pick the position encoding from what the client offers.
    pub fn position_encoding(&self) -> PositionEncoding {
        let offered = self
            .capabilities
            .general
            .as_ref()
            .and_then(|g| g.position_encodings.as_deref())
            .unwrap_or_default();
        PositionEncoding::negotiate(offered.iter().map(String::as_str))
    }
}

pub(crate) fn initialize_result(encoding: PositionEncoding) -> Value {
    json!({
        "capabilities": {
            "positionEncoding": encoding.as_str(),
            "textDocumentSync": {
                "openClose": true,
                "change": SYNC_INCREMENTAL
            }
        },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TextDocumentItem {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VersionedTextDocumentIdentifier {
    pub uri: String,
    pub version: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidOpenParams {
    pub text_document: TextDocumentItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidChangeParams {
    pub text_document: VersionedTextDocumentIdentifier,
    pub content_changes: Vec<ContentChangeEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidCloseParams {
    pub text_document: TextDocumentIdentifier,
}

/// One entry of `contentChanges`. Without a range it replaces the document.
#[derive(Debug, Deserialize)]
pub(crate) struct ContentChangeEvent {
    #[serde(default)]
    pub range: Option<Range>,
    pub text: String,
}

impl From<ContentChangeEvent> for ContentChange {
    fn from(event: ContentChangeEvent) -> Self {
        match event.range {
            Some(range) => ContentChange::incremental(range, event.text),
            None => ContentChange::full(event.text),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct LspDiagnostic<'a> {
    pub range: Range,
    pub severity: u8,
    pub source: &'a str,
    pub message: &'a str,
}

impl<'a> From<&'a Diagnostic> for LspDiagnostic<'a> {
    fn from(diag: &'a Diagnostic) -> Self {
        Self {
            range: diag.range(),
            severity: diag.severity().as_lsp(),
            source: diag.source(),
            message: diag.message(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct PublishDiagnosticsParams<'a> {
    pub uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    pub diagnostics: Vec<LspDiagnostic<'a>>,
}

impl<'a> From<&'a Publication> for PublishDiagnosticsParams<'a> {
    fn from(publication: &'a Publication) -> Self {
        Self {
            uri: &publication.uri,
            version: publication.version,
            diagnostics: publication
                .diagnostics
                .iter()
                .map(LspDiagnostic::from)
                .collect(),
        }
    }
}
