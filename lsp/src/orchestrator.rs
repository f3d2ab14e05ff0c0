//! Update orchestrator.
//!
//! Applies lifecycle events to the [`DocumentRegistry`] synchronously and
//! schedules one analysis pass per accepted open or change. Passes run on a
//! [`JoinSet`]; the owner drives completions through
//! [`Orchestrator::next_completion`] and [`Orchestrator::complete`].
//!
//! Ordering: a pass result is published only if it is still the newest pass
//! for its document and the document is still at the version it analyzed.
//! A newer edit aborts the superseded pass (killing its engine process), and
//! close aborts and clears. Nothing computed for an old version, or for a
//! closed document, ever reaches the sink.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::task::{AbortHandle, JoinSet};

use cryptodetect_types::{
    ContentChange, Document, DocumentRegistry, PositionEncoding, RawFinding, RegistryError,
    translate,
};

use crate::analyzer::{AnalysisError, AnalysisRequest, Analyzer};
use crate::types::{DiagnosticsSink, Publication, ServerConfig};

/// Result of one analysis pass, tagged with what it was computed for.
#[derive(Debug)]
pub struct Completion {
    ticket: u64,
    uri: String,
    version: i32,
    result: Result<Vec<RawFinding>, AnalysisError>,
}

impl Completion {
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }
}

struct InFlight {
    ticket: u64,
    abort: AbortHandle,
}

pub struct Orchestrator<A, S> {
    registry: DocumentRegistry,
    analyzer: Arc<A>,
    sink: S,
    config: ServerConfig,
    tasks: JoinSet<Completion>,
    in_flight: HashMap<String, InFlight>,
    /// Open documents in languages we do not analyze.
    untracked: HashSet<String>,
    next_ticket: u64,
}

impl<A: Analyzer, S: DiagnosticsSink> Orchestrator<A, S> {
    pub fn new(analyzer: A, sink: S, config: &ServerConfig, encoding: PositionEncoding) -> Self {
        Self {
            registry: DocumentRegistry::new(encoding),
            analyzer: Arc::new(analyzer),
            sink,
            config: config.clone(),
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
            untracked: HashSet::new(),
            next_ticket: 0,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    /// Number of documents with an analysis pass running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn did_open(
        &mut self,
        uri: &str,
        language_id: &str,
        version: i32,
        text: impl Into<String>,
    ) -> Result<(), RegistryError> {
        if self.registry.contains(uri) || self.untracked.contains(uri) {
            return Err(RegistryError::AlreadyOpen(uri.to_owned()));
        }
        if !self.config.tracks_language(language_id) {
            tracing::debug!("Not analyzing {uri}: language {language_id} is not tracked");
            self.untracked.insert(uri.to_owned());
            return Ok(());
        }
        self.registry.open(uri, language_id, version, text)?;
        self.schedule(uri);
        Ok(())
    }

    pub fn did_change(
        &mut self,
        uri: &str,
        version: i32,
        changes: Vec<ContentChange>,
    ) -> Result<(), RegistryError> {
        if self.untracked.contains(uri) {
            return Ok(());
        }
        self.registry.update(uri, version, changes)?;
        self.schedule(uri);
        Ok(())
    }

    /// Remove the document and clear its diagnostics. Any running pass is
    /// aborted and its result, should one still arrive, is dropped.
    pub fn did_close(&mut self, uri: &str) -> Result<(), RegistryError> {
        if self.untracked.remove(uri) {
            return Ok(());
        }
        self.registry.close(uri)?;
        if let Some(previous) = self.in_flight.remove(uri) {
            previous.abort.abort();
        }
        self.sink.publish(Publication {
            uri: uri.to_owned(),
            version: None,
            diagnostics: Vec::new(),
        });
        Ok(())
    }

    fn schedule(&mut self, uri: &str) {
        let Some(document) = self.registry.get(uri) else {
            return;
        };
        let request = AnalysisRequest {
            uri: uri.to_owned(),
            version: document.version(),
            text: document.snapshot(),
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let analyzer = Arc::clone(&self.analyzer);
        let abort = self.tasks.spawn(async move {
            let uri = request.uri.clone();
            let version = request.version;
            let result = analyzer.analyze(request).await;
            Completion {
                ticket,
                uri,
                version,
                result,
            }
        });

        if let Some(previous) = self
            .in_flight
            .insert(uri.to_owned(), InFlight { ticket, abort })
        {
            previous.abort.abort();
        }
    }

    /// Wait for the next finished pass. Returns `None` when nothing is
    /// running. Cancel-safe.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        loop {
            match self.tasks.join_next().await? {
                Ok(completion) => return Some(completion),
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tracing::warn!("Analysis task failed: {e}");
                    let id = e.id();
                    self.in_flight.retain(|_, pass| pass.abort.id() != id);
                }
            }
        }
    }

    /// Publish a finished pass if it is still current. Returns whether
    /// anything was published.
    pub fn complete(&mut self, completion: Completion) -> bool {
        let Completion {
            ticket,
            uri,
            version,
            result,
        } = completion;

        match self.in_flight.get(&uri) {
            Some(pass) if pass.ticket == ticket => {
                self.in_flight.remove(&uri);
            }
            _ => {
                tracing::trace!("Dropping superseded analysis of {uri} v{version}");
                return false;
            }
        }

        let current = self.registry.get(&uri).map(Document::version);
        if current != Some(version) {
            tracing::trace!("Dropping analysis of {uri} v{version}; document is at {current:?}");
            return false;
        }

        match result {
            Ok(findings) => {
                let diagnostics = translate(&findings, &self.config.source);
                tracing::debug!(
                    "Publishing {} diagnostics for {uri} v{version}",
                    diagnostics.len()
                );
                self.sink.publish(Publication {
                    uri,
                    version: Some(version),
                    diagnostics,
                });
                true
            }
            Err(e) => {
                tracing::warn!("Analysis of {uri} v{version} failed: {e}");
                false
            }
        }
    }

    /// Run every scheduled pass to completion, publishing as they finish.
    pub async fn settle(&mut self) {
        while let Some(completion) = self.next_completion().await {
            self.complete(completion);
        }
    }

    /// Abort every running pass. Documents stay open.
    pub fn cancel_all(&mut self) {
        self.tasks.abort_all();
        self.in_flight.clear();
    }
}
