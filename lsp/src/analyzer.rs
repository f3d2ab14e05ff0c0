//! Analysis invoker.
//!
//! Runs the external crypto-detector engine over a document snapshot. The
//! snapshot is written to a scratch file, the engine writes its JSON report
//! next to it, and both files are removed when the pass ends, whatever the
//! outcome.

use std::collections::BTreeMap;
use std::env;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tempfile::TempPath;
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tokio::time;
use url::Url;

use cryptodetect_types::RawFinding;

use crate::types::AnalyzerConfig;

/// Extension the engine appends to the scanned file's name for its report.
const REPORT_EXTENSION: &str = "crypto";

/// Hex digits of the URI hash kept in scratch file names.
const URI_HASH_CHARS: usize = 16;

/// Fallback base name when the URI has no usable last segment.
const FALLBACK_BASE_NAME: &str = "document";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis engine {program} unavailable: {reason}")]
    EngineUnavailable { program: String, reason: String },
    #[error("analysis engine exited with {status}: {stderr}")]
    EngineFailed { status: ExitStatus, stderr: String },
    #[error("analysis engine did not finish within {0:?}")]
    EngineTimedOut(Duration),
    #[error("malformed engine report at {}: {reason}", path.display())]
    MalformedOutput { path: PathBuf, reason: String },
    #[error("scratch file error: {0}")]
    Artifact(#[source] io::Error),
}

/// One pass's input: the exact text to analyze and the version it belongs to.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub uri: String,
    pub version: i32,
    pub text: Arc<str>,
}

/// Produces raw findings for a document snapshot.
///
/// Implementations must only look at `request.text`; the document may have
/// moved on by the time the future runs.
pub trait Analyzer: Send + Sync + 'static {
    fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> impl Future<Output = Result<Vec<RawFinding>, AnalysisError>> + Send;
}

/// Shape of the engine's JSON report. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct EngineReport {
    #[serde(default)]
    crypto_evidence: BTreeMap<String, Evidence>,
}

#[derive(Debug, Default, Deserialize)]
struct Evidence {
    #[serde(default)]
    hits: Vec<RawFinding>,
}

/// Parse an engine report into findings, flattened across matched files.
pub fn parse_report(bytes: &[u8]) -> Result<Vec<RawFinding>, serde_json::Error> {
    let report: EngineReport = serde_json::from_slice(bytes)?;
    Ok(report
        .crypto_evidence
        .into_values()
        .flat_map(|evidence| evidence.hits)
        .collect())
}

/// [`Analyzer`] backed by a child process.
#[derive(Debug, Clone)]
pub struct EngineAnalyzer {
    config: AnalyzerConfig,
    working_dir: PathBuf,
    output_dir: PathBuf,
}

impl EngineAnalyzer {
    #[must_use]
    pub fn new(config: AnalyzerConfig) -> Self {
        let working_dir = config
            .working_dir
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        let output_dir = config
            .output_dir
            .clone()
            .unwrap_or_else(env::temp_dir);
        Self {
            config,
            working_dir,
            output_dir,
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the snapshot where the engine can read it.
    ///
    /// The name carries a hash of the URI, a random component so overlapping
    /// passes never share a file, and the document's own base name so the
    /// engine can pick language-specific rules from the extension.
    async fn write_snapshot(&self, request: &AnalysisRequest) -> Result<TempPath, AnalysisError> {
        let digest = Sha256::digest(request.uri.as_bytes());
        let hash: String = digest
            .iter()
            .take(URI_HASH_CHARS / 2)
            .map(|b| format!("{b:02x}"))
            .collect();
        let prefix = format!("{hash}-");
        let suffix = format!("-{}", base_name(&request.uri));

        let path = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(&self.output_dir)
            .map_err(AnalysisError::Artifact)?
            .into_temp_path();
        fs::write(&path, request.text.as_bytes())
            .await
            .map_err(AnalysisError::Artifact)?;
        Ok(path)
    }

    fn command(&self, program: &Path, snapshot: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg(&self.config.script)
            .arg(snapshot)
            .arg("-c")
            .arg(&self.config.config)
            .args(&self.config.extra_args)
            .arg("-o")
            .arg(&self.output_dir)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, request: AnalysisRequest) -> Result<Vec<RawFinding>, AnalysisError> {
        let program =
            which::which(&self.config.program).map_err(|e| AnalysisError::EngineUnavailable {
                program: self.config.program.clone(),
                reason: e.to_string(),
            })?;

        let snapshot = self.write_snapshot(&request).await?;
        let report_path = report_path_for(&snapshot);
        // Owned so the report is removed on every exit path.
        let report = TempPath::from_path(&report_path);

        let child = self
            .command(&program, &snapshot)
            .spawn()
            .map_err(|e| AnalysisError::EngineUnavailable {
                program: self.config.program.clone(),
                reason: e.to_string(),
            })?;

        let timeout = self.config.timeout();
        let output = time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| AnalysisError::EngineTimedOut(timeout))?
            .map_err(AnalysisError::Artifact)?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        if !stderr.is_empty() {
            tracing::debug!("Engine stderr for {}: {stderr}", request.uri);
        }

        let parsed = match fs::read(&report).await {
            Ok(bytes) => parse_report(&bytes).map_err(|e| AnalysisError::MalformedOutput {
                path: report_path.clone(),
                reason: e.to_string(),
            }),
            Err(e) => Err(AnalysisError::MalformedOutput {
                path: report_path.clone(),
                reason: e.to_string(),
            }),
        };

        if output.status.success() {
            return parsed;
        }
        match parsed {
            Ok(findings) => {
                tracing::warn!(
                    "Engine exited with {} for {}; using the report it wrote",
                    output.status,
                    request.uri
                );
                Ok(findings)
            }
            Err(e) => {
                tracing::debug!("No usable report for {}: {e}", request.uri);
                Err(AnalysisError::EngineFailed {
                    status: output.status,
                    stderr,
                })
            }
        }
    }
}

impl Analyzer for EngineAnalyzer {
    fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> impl Future<Output = Result<Vec<RawFinding>, AnalysisError>> + Send {
        self.run(request)
    }
}

/// Last path segment of the URI, reduced to characters safe in a file name.
fn base_name(uri: &str) -> String {
    let segment = Url::parse(uri)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_owned))
        })
        .unwrap_or_default();
    let sanitized: String = segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    if sanitized.trim_matches('.').is_empty() {
        FALLBACK_BASE_NAME.to_owned()
    } else {
        sanitized
    }
}

fn report_path_for(snapshot: &Path) -> PathBuf {
    let mut name = snapshot.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(REPORT_EXTENSION);
    snapshot.with_file_name(name)
}
