//! Editor coordinates.
//!
//! Positions are zero-based `(line, character)` pairs. `character` counts code
//! units of the negotiated [`PositionEncoding`], not bytes or grapheme
//! clusters, so the same text can yield different columns depending on what
//! the editor asked for during initialization.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A zero-based position in a document.
///
/// Ordering is lexicographic: line first, then character.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.character)
    }
}

/// A half-open range `[start, end)` between two positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Range covering `[start_character, end_character)` on a single line.
    #[must_use]
    pub const fn on_line(line: u32, start_character: u32, end_character: u32) -> Self {
        Self {
            start: Position::new(line, start_character),
            end: Position::new(line, end_character),
        }
    }

    /// Whether `end` precedes `start`.
    #[must_use]
    pub fn is_inverted(&self) -> bool {
        self.end < self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Unit in which columns and offsets are measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionEncoding {
    #[serde(rename = "utf-8")]
    Utf8,
    /// The protocol default when the client does not negotiate.
    #[default]
    #[serde(rename = "utf-16")]
    Utf16,
    #[serde(rename = "utf-32")]
    Utf32,
}

impl PositionEncoding {
    /// Wire name used in `positionEncoding` capabilities.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16 => "utf-16",
            Self::Utf32 => "utf-32",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "utf-8" => Some(Self::Utf8),
            "utf-16" => Some(Self::Utf16),
            "utf-32" => Some(Self::Utf32),
            _ => None,
        }
    }

    /// Pick the first offered encoding we understand, in client preference
    /// order. Falls back to UTF-16 when nothing matches.
    #[must_use]
    pub fn negotiate<'a>(offered: impl IntoIterator<Item = &'a str>) -> Self {
        offered
            .into_iter()
            .find_map(Self::parse)
            .unwrap_or_default()
    }

    /// Number of code units `ch` occupies in this encoding.
    #[must_use]
    pub fn units(self, ch: char) -> usize {
        match self {
            Self::Utf8 => ch.len_utf8(),
            Self::Utf16 => ch.len_utf16(),
            Self::Utf32 => 1,
        }
    }
}
