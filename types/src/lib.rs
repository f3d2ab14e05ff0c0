//! Core domain types for cryptodetect.
//!
//! This crate contains the document model and diagnostic types with no IO and
//! no async. The language server in `cryptodetect-lsp` drives these types from
//! editor notifications and engine output.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod diagnostic;
mod document;
mod position;
mod registry;

pub use diagnostic::{
    DIAGNOSTIC_SOURCE, Diagnostic, DiagnosticSeverity, RawFinding, severity_for_label, translate,
};
pub use document::{ContentChange, Document, RangeError};
pub use position::{Position, PositionEncoding, Range};
pub use registry::{DocumentRegistry, RegistryError};
