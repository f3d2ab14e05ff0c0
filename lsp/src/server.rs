//! Stdio language server: JSON-RPC dispatch around the [`Orchestrator`].
//!
//! A reader task decodes frames from the client and a writer task encodes
//! responses and diagnostics. The main loop is the only owner of document
//! state; it multiplexes inbound frames with finished analysis passes.

use std::ops::ControlFlow;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::analyzer::{Analyzer, EngineAnalyzer};
use crate::codec::{CodecError, FrameReader, FrameWriter};
use crate::orchestrator::{Completion, Orchestrator};
use crate::protocol::{
    self, DidChangeParams, DidCloseParams, DidOpenParams, InitializeParams, Notification,
    PublishDiagnosticsParams,
};
use crate::types::{DiagnosticsSink, Publication, ServerConfig};

const READER_CHANNEL_CAPACITY: usize = 64;

const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

enum WriterCommand {
    Send(Value),
    Shutdown,
}

enum IncomingFrame {
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response,
}

enum Event {
    Frame(Option<Value>),
    Completed(Completion),
}

fn parse_incoming(frame: &Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(_), None, true) => Some(IncomingFrame::Response),
        (Some(id), Some(method), _) => Some(IncomingFrame::Request {
            id: id.clone(),
            method,
            params: frame.get("params").cloned(),
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, serde_json::Error> {
    serde_json::from_value(params.unwrap_or(Value::Null))
}

/// Turns publications into `publishDiagnostics` frames for the writer task.
struct FrameSink {
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
}

impl DiagnosticsSink for FrameSink {
    fn publish(&self, publication: Publication) {
        let params = PublishDiagnosticsParams::from(&publication);
        let frame = serde_json::to_value(&params).and_then(|params| {
            serde_json::to_value(Notification::new(PUBLISH_DIAGNOSTICS, Some(params)))
        });
        match frame {
            Ok(frame) => {
                if self.writer_tx.send(WriterCommand::Send(frame)).is_err() {
                    tracing::trace!("Writer gone; dropping diagnostics for {}", publication.uri);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize diagnostics: {e}"),
        }
    }
}

/// Per-connection protocol state.
struct Session<A, F> {
    config: ServerConfig,
    make_analyzer: Option<F>,
    orchestrator: Option<Orchestrator<A, FrameSink>>,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    shutdown_requested: bool,
}

impl<A, F> Session<A, F>
where
    A: Analyzer,
    F: FnOnce(&ServerConfig) -> A,
{
    fn new(
        config: ServerConfig,
        make_analyzer: F,
        writer_tx: mpsc::UnboundedSender<WriterCommand>,
    ) -> Self {
        Self {
            config,
            make_analyzer: Some(make_analyzer),
            orchestrator: None,
            writer_tx,
            shutdown_requested: false,
        }
    }

    async fn next_completion(&mut self) -> Option<Completion> {
        match self.orchestrator.as_mut() {
            Some(orchestrator) => orchestrator.next_completion().await,
            None => None,
        }
    }

    fn complete(&mut self, completion: Completion) {
        if let Some(orchestrator) = self.orchestrator.as_mut() {
            orchestrator.complete(completion);
        }
    }

    fn send(&self, frame: Value) {
        if self.writer_tx.send(WriterCommand::Send(frame)).is_err() {
            tracing::trace!("Writer gone; dropping frame");
        }
    }

    fn handle_frame(&mut self, frame: &Value) -> ControlFlow<()> {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame");
            return ControlFlow::Continue(());
        };

        match incoming {
            IncomingFrame::Request { id, method, params } => {
                let response = self.handle_request(&id, &method, params);
                self.send(response);
                ControlFlow::Continue(())
            }
            IncomingFrame::Notification { method, params } => {
                self.handle_notification(&method, params)
            }
            IncomingFrame::Response => {
                tracing::trace!("Ignoring response from client");
                ControlFlow::Continue(())
            }
        }
    }

    fn handle_request(&mut self, id: &Value, method: &str, params: Option<Value>) -> Value {
        if self.shutdown_requested {
            return protocol::response_error(
                id,
                protocol::INVALID_REQUEST,
                "Server is shutting down",
            );
        }

        match method {
            "initialize" => self.initialize(id, params),
            _ if self.orchestrator.is_none() => protocol::response_error(
                id,
                protocol::SERVER_NOT_INITIALIZED,
                "Server not initialized",
            ),
            "shutdown" => {
                tracing::info!("Shutdown requested");
                if let Some(orchestrator) = self.orchestrator.as_mut() {
                    orchestrator.cancel_all();
                }
                self.shutdown_requested = true;
                protocol::response_ok(id, Value::Null)
            }
            _ => {
                tracing::debug!("Client sent request: {method}; replying method not found");
                protocol::response_error(
                    id,
                    protocol::METHOD_NOT_FOUND,
                    &format!("Method not found: {method}"),
                )
            }
        }
    }

    fn initialize(&mut self, id: &Value, params: Option<Value>) -> Value {
        let Some(make_analyzer) = self.make_analyzer.take() else {
            return protocol::response_error(
                id,
                protocol::INVALID_REQUEST,
                "Server already initialized",
            );
        };

        let params: InitializeParams = match parse_params(params) {
            Ok(params) => params,
            Err(e) => {
                self.make_analyzer = Some(make_analyzer);
                return protocol::response_error(
                    id,
                    protocol::INVALID_PARAMS,
                    &format!("Invalid initialize params: {e}"),
                );
            }
        };

        if let Some(options) = params.initialization_options.clone().filter(|o| !o.is_null()) {
            match serde_json::from_value::<ServerConfig>(options) {
                Ok(config) => self.config = config,
                Err(e) => {
                    tracing::warn!("Ignoring invalid initializationOptions: {e}");
                }
            }
        }

        let encoding = params.position_encoding();
        let analyzer = make_analyzer(&self.config);
        let sink = FrameSink {
            writer_tx: self.writer_tx.clone(),
        };
        self.orchestrator = Some(Orchestrator::new(analyzer, sink, &self.config, encoding));
        tracing::info!(
            "Initialized: encoding {}, tracking {:?}",
            encoding.as_str(),
            self.config.languages
        );

        protocol::response_ok(id, protocol::initialize_result(encoding))
    }

    fn handle_notification(&mut self, method: &str, params: Option<Value>) -> ControlFlow<()> {
        if method == "exit" {
            if !self.shutdown_requested {
                tracing::warn!("Exit received without shutdown");
            }
            return ControlFlow::Break(());
        }

        let Some(orchestrator) = self.orchestrator.as_mut() else {
            tracing::trace!("Ignoring {method} before initialize");
            return ControlFlow::Continue(());
        };

        let outcome = match method {
            "textDocument/didOpen" => parse_params::<DidOpenParams>(params)
                .map_err(anyhow::Error::from)
                .and_then(|p| {
                    let doc = p.text_document;
                    orchestrator
                        .did_open(&doc.uri, &doc.language_id, doc.version, doc.text)
                        .map_err(anyhow::Error::from)
                }),
            "textDocument/didChange" => parse_params::<DidChangeParams>(params)
                .map_err(anyhow::Error::from)
                .and_then(|p| {
                    let changes = p.content_changes.into_iter().map(Into::into).collect();
                    orchestrator
                        .did_change(&p.text_document.uri, p.text_document.version, changes)
                        .map_err(anyhow::Error::from)
                }),
            "textDocument/didClose" => parse_params::<DidCloseParams>(params)
                .map_err(anyhow::Error::from)
                .and_then(|p| {
                    orchestrator
                        .did_close(&p.text_document.uri)
                        .map_err(anyhow::Error::from)
                }),
            "initialized" => Ok(()),
            _ => {
                tracing::trace!("Ignoring notification: {method}");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            tracing::warn!("Ignoring {method}: {e}");
        }
        ControlFlow::Continue(())
    }

    fn finish(&mut self) {
        if let Some(orchestrator) = self.orchestrator.as_mut() {
            orchestrator.cancel_all();
        }
    }
}

/// Serve one client over stdin/stdout with the external engine.
pub async fn serve_stdio(config: ServerConfig) -> Result<()> {
    serve(io::stdin(), io::stdout(), config, |config| {
        EngineAnalyzer::new(config.analyzer.clone())
    })
    .await
}

/// Serve one client over the given streams until `exit` or end of input.
///
/// `make_analyzer` runs once, during `initialize`, with the effective config.
pub async fn serve<R, W, A, F>(
    input: R,
    output: W,
    config: ServerConfig,
    make_analyzer: F,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    A: Analyzer,
    F: FnOnce(&ServerConfig) -> A,
{
    let (frame_tx, mut frame_rx) = mpsc::channel::<Value>(READER_CHANNEL_CAPACITY);
    let reader_handle = tokio::spawn(async move {
        let mut reader = FrameReader::new(input);
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => {
                    if frame_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!("Client closed input");
                    break;
                }
                // The body was consumed; the stream is still in sync.
                Err(CodecError::Json(e)) => {
                    tracing::warn!("Skipping unparseable frame: {e}");
                }
                Err(e) => {
                    tracing::warn!("LSP read error: {e}");
                    break;
                }
            }
        }
    });

    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
    let writer_handle = tokio::spawn(async move {
        let mut writer = FrameWriter::new(output);
        while let Some(cmd) = writer_rx.recv().await {
            match cmd {
                WriterCommand::Send(frame) => {
                    if let Err(e) = writer.write_frame(&frame).await {
                        tracing::warn!("LSP write error: {e}");
                        break;
                    }
                }
                WriterCommand::Shutdown => break,
            }
        }
    });

    let mut session = Session::new(config, make_analyzer, writer_tx.clone());
    loop {
        let event = tokio::select! {
            frame = frame_rx.recv() => Event::Frame(frame),
            Some(completion) = session.next_completion() => Event::Completed(completion),
        };
        match event {
            Event::Frame(None) => break,
            Event::Frame(Some(frame)) => {
                if session.handle_frame(&frame).is_break() {
                    break;
                }
            }
            Event::Completed(completion) => session.complete(completion),
        }
    }

    session.finish();
    drop(session);
    // Queued frames are written before the writer sees this.
    let _ = writer_tx.send(WriterCommand::Shutdown);
    writer_handle.await.context("writer task failed")?;
    reader_handle.abort();
    tracing::info!("Server stopped");
    Ok(())
}
