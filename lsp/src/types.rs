//! Public configuration and event types.
//!
//! The binary loads a [`ServerConfig`] from disk; the client may replace it
//! through `initializationOptions`. The orchestrator emits [`Publication`]s
//! through a [`DiagnosticsSink`].

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;

use cryptodetect_types::{DIAGNOSTIC_SOURCE, Diagnostic};

/// Languages tracked when the config does not say otherwise.
const DEFAULT_LANGUAGES: &[&str] = &["javascript", "typescript", "c", "cpp"];

const DEFAULT_TIMEOUT_SECS: u64 = 60;

fn default_languages() -> Vec<String> {
    DEFAULT_LANGUAGES.iter().map(|s| (*s).to_owned()).collect()
}

fn default_source() -> String {
    DIAGNOSTIC_SOURCE.to_owned()
}

fn default_program() -> String {
    String::from("python3")
}

fn default_script() -> PathBuf {
    PathBuf::from("crypto-detector/scan-for-crypto.py")
}

fn default_engine_config() -> PathBuf {
    PathBuf::from("crypto-detector/cryptodetector.conf")
}

fn default_extra_args() -> Vec<String> {
    vec![String::from("--output-existing=overwrite")]
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Configuration for the language server.
///
/// ```toml
/// languages = ["c", "cpp"]
///
/// [analyzer]
/// program = "python3"
/// script = "/opt/crypto-detector/scan-for-crypto.py"
/// timeout_secs = 30
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Language identifiers whose documents are tracked. Empty tracks all.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    /// Source tag on published diagnostics.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            source: default_source(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn tracks_language(&self, language_id: &str) -> bool {
        self.languages.is_empty() || self.languages.iter().any(|l| l == language_id)
    }
}

/// How to invoke the external analysis engine.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    /// Interpreter or executable, resolved through `PATH`.
    #[serde(default = "default_program")]
    pub program: String,
    /// Engine entry point, passed as the first argument.
    #[serde(default = "default_script")]
    pub script: PathBuf,
    /// Engine configuration file, passed with `-c`.
    #[serde(default = "default_engine_config")]
    pub config: PathBuf,
    /// Passed through to the engine unchanged, after the config file.
    #[serde(default = "default_extra_args")]
    pub extra_args: Vec<String>,
    /// Engine working directory. Default: the user's home directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Where document snapshots and engine reports are written. Default: the
    /// system temp directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            script: default_script(),
            config: default_engine_config(),
            extra_args: default_extra_args(),
            working_dir: None,
            output_dir: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl AnalyzerConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A full replacement diagnostic set for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub uri: String,
    /// Version the diagnostics were computed for; `None` when clearing.
    pub version: Option<i32>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Outbound side of the notification bus.
pub trait DiagnosticsSink {
    fn publish(&self, publication: Publication);
}

impl DiagnosticsSink for mpsc::UnboundedSender<Publication> {
    fn publish(&self, publication: Publication) {
        if self.send(publication).is_err() {
            tracing::trace!("Diagnostics receiver dropped; publication discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.languages, vec!["javascript", "typescript", "c", "cpp"]);
        assert_eq!(config.source, "crypto-detector");
        assert_eq!(config.analyzer.program, "python3");
        assert_eq!(
            config.analyzer.script,
            PathBuf::from("crypto-detector/scan-for-crypto.py")
        );
        assert_eq!(config.analyzer.extra_args, vec!["--output-existing=overwrite"]);
        assert_eq!(config.analyzer.timeout(), Duration::from_secs(60));
        assert!(config.analyzer.working_dir.is_none());
    }

    #[test]
    fn analyzer_overrides_keep_other_defaults() {
        let config: ServerConfig = serde_json::from_value(serde_json::json!({
            "languages": ["c"],
            "analyzer": { "program": "/usr/bin/python3.12", "timeout_secs": 5 }
        }))
        .unwrap();
        assert_eq!(config.languages, vec!["c"]);
        assert_eq!(config.analyzer.program, "/usr/bin/python3.12");
        assert_eq!(config.analyzer.timeout_secs, 5);
        assert_eq!(
            config.analyzer.config,
            PathBuf::from("crypto-detector/cryptodetector.conf")
        );
    }

    #[test]
    fn tracks_language() {
        let config = ServerConfig::default();
        assert!(config.tracks_language("cpp"));
        assert!(!config.tracks_language("python"));

        let all = ServerConfig {
            languages: Vec::new(),
            ..ServerConfig::default()
        };
        assert!(all.tracks_language("python"));
    }

    #[test]
    fn channel_sink_forwards_publications() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.publish(Publication {
            uri: "file:///a.c".into(),
            version: Some(3),
            diagnostics: Vec::new(),
        });
        let publication = rx.try_recv().unwrap();
        assert_eq!(publication.uri, "file:///a.c");
        assert_eq!(publication.version, Some(3));
    }

    #[test]
    fn channel_sink_tolerates_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel::<Publication>();
        drop(rx);
        tx.publish(Publication {
            uri: "file:///a.c".into(),
            version: None,
            diagnostics: Vec::new(),
        });
    }
}
