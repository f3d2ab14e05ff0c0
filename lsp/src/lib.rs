//! Language server core for cryptodetect.
//!
//! Tracks open documents, runs the external crypto-detector engine after
//! every edit and publishes its findings as diagnostics.

pub mod analyzer;
pub mod codec;
pub mod orchestrator;
pub mod types;

pub(crate) mod protocol;
pub(crate) mod server;

pub use analyzer::{AnalysisError, AnalysisRequest, Analyzer, EngineAnalyzer, parse_report};
pub use orchestrator::{Completion, Orchestrator};
pub use server::{serve, serve_stdio};
pub use types::{AnalyzerConfig, DiagnosticsSink, Publication, ServerConfig};
