//! Engine findings and the diagnostics derived from them.

use serde::Deserialize;

use crate::position::Range;

/// Default source tag attached to every diagnostic.
pub const DIAGNOSTIC_SOURCE: &str = "crypto-detector";

/// Label the engine uses for weak, non-algorithm-specific evidence.
const GENERIC_LABEL: &str = "generic";

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
}

impl DiagnosticSeverity {
    /// Numeric severity on the wire (1=Error, 2=Warning, 3=Information).
    #[must_use]
    pub fn as_lsp(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
        }
    }
}

/// Severity for an engine classification label.
///
/// Only `generic` evidence is downgraded; every other label, including ones
/// we have never seen, is an error.
#[must_use]
pub fn severity_for_label(label: &str) -> DiagnosticSeverity {
    if label == GENERIC_LABEL {
        DiagnosticSeverity::Warning
    } else {
        DiagnosticSeverity::Error
    }
}

/// One hit reported by the analysis engine, in the engine's coordinates:
/// 1-based line, 0-based begin/end columns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawFinding {
    #[serde(rename = "evidence_type")]
    pub label: String,
    pub line_number: u32,
    #[serde(rename = "line_index_begin")]
    pub column_begin: u32,
    #[serde(rename = "line_index_end")]
    pub column_end: u32,
}

/// A positioned, severity-tagged message ready for publication.
///
/// Fields are private; external consumers read via accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    range: Range,
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(severity: DiagnosticSeverity, message: String, range: Range, source: String) -> Self {
        Self {
            severity,
            message,
            range,
            source,
        }
    }

    /// Normalize one engine finding.
    #[must_use]
    pub fn from_finding(finding: &RawFinding, source: &str) -> Self {
        let line = finding.line_number.saturating_sub(1);
        Self {
            severity: severity_for_label(&finding.label),
            message: format!(
                "potential cryptography match found with evidence type: {}",
                finding.label
            )
            .to_lowercase(),
            range: Range::on_line(line, finding.column_begin, finding.column_end),
            source: source.to_owned(),
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Convert a pass's findings into the full replacement diagnostic set,
/// ordered by start position. No deduplication.
#[must_use]
pub fn translate(findings: &[RawFinding], source: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = findings
        .iter()
        .map(|finding| Diagnostic::from_finding(finding, source))
        .collect();
    diagnostics.sort_by_key(|d| d.range.start);
    diagnostics
}
