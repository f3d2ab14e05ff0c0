//! In-memory model of one open text document.
//!
//! The text is an immutable snapshot (`Arc<str>`) swapped out on every edit,
//! so an analysis pass can keep reading the content it was started with while
//! newer edits land. Offsets and columns are measured in the document's
//! [`PositionEncoding`].
//!
//! `\n`, `\r\n` and a lone `\r` all terminate a line. The line index is
//! rebuilt with one linear scan after each edit; there is no incremental
//! patching.

use std::sync::Arc;

use thiserror::Error;

use crate::position::{Position, PositionEncoding, Range};

/// A range whose end precedes its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid range: end {end} precedes start {start}")]
pub struct RangeError {
    pub start: Position,
    pub end: Position,
}

impl RangeError {
    fn from_range(range: Range) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

/// One unit of change reported by the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentChange {
    /// Replace the whole document.
    Full { text: String },
    /// Replace the text covered by `range`.
    Incremental { range: Range, text: String },
}

impl ContentChange {
    pub fn full(text: impl Into<String>) -> Self {
        Self::Full { text: text.into() }
    }

    pub fn incremental(range: Range, text: impl Into<String>) -> Self {
        Self::Incremental {
            range,
            text: text.into(),
        }
    }
}

/// Start of every line, in bytes (for slicing) and in encoding units (for
/// positions). Both vectors always have one entry per line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LineIndex {
    bytes: Vec<usize>,
    units: Vec<usize>,
    total_units: usize,
}

impl LineIndex {
    fn build(text: &str, encoding: PositionEncoding) -> Self {
        let mut bytes = vec![0];
        let mut units = vec![0];
        let mut unit = 0;

        let mut chars = text.char_indices().peekable();
        while let Some((idx, ch)) = chars.next() {
            unit += encoding.units(ch);
            let ends_line = match ch {
                '\n' => true,
                '\r' => !matches!(chars.peek(), Some((_, '\n'))),
                _ => false,
            };
            if ends_line {
                bytes.push(idx + ch.len_utf8());
                units.push(unit);
            }
        }

        Self {
            bytes,
            units,
            total_units: unit,
        }
    }

    fn line_count(&self) -> usize {
        self.units.len()
    }

    /// Line containing an already-clamped unit offset.
    fn line_of(&self, offset: usize) -> usize {
        self.units
            .partition_point(|&start| start <= offset)
            .saturating_sub(1)
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    uri: String,
    language_id: String,
    version: i32,
    encoding: PositionEncoding,
    text: Arc<str>,
    lines: LineIndex,
}

impl Document {
    /// Create a document measured in UTF-16 code units.
    pub fn new(
        uri: impl Into<String>,
        language_id: impl Into<String>,
        version: i32,
        text: impl Into<String>,
    ) -> Self {
        Self::with_encoding(uri, language_id, version, text, PositionEncoding::default())
    }

    pub fn with_encoding(
        uri: impl Into<String>,
        language_id: impl Into<String>,
        version: i32,
        text: impl Into<String>,
        encoding: PositionEncoding,
    ) -> Self {
        let text: String = text.into();
        let lines = LineIndex::build(&text, encoding);
        Self {
            uri: uri.into(),
            language_id: language_id.into(),
            version,
            encoding,
            text: Arc::from(text),
            lines,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Version is owned by the editor; edits never bump it on their own.
    pub fn set_version(&mut self, version: i32) {
        self.version = version;
    }

    #[must_use]
    pub fn encoding(&self) -> PositionEncoding {
        self.encoding
    }

    /// Full current content.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Shared handle to the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<str> {
        Arc::clone(&self.text)
    }

    /// Text covered by `range`, after clamping both ends into the document.
    pub fn text_range(&self, range: Range) -> Result<&str, RangeError> {
        if range.is_inverted() {
            return Err(RangeError::from_range(range));
        }
        let start = self.byte_offset(self.offset_at(range.start));
        let end = self.byte_offset(self.offset_at(range.end)).max(start);
        Ok(&self.text[start..end])
    }

    /// Length of the text in encoding units.
    #[must_use]
    pub fn unit_len(&self) -> usize {
        self.lines.total_units
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines.line_count()
    }

    /// Offsets past the end clamp to the end position.
    #[must_use]
    pub fn position_at(&self, offset: usize) -> Position {
        let offset = offset.min(self.lines.total_units);
        let line = self.lines.line_of(offset);
        Position::new(line as u32, (offset - self.lines.units[line]) as u32)
    }

    /// Lines past the last clamp to the end of the text; characters past the
    /// end of a line clamp to that line's end.
    #[must_use]
    pub fn offset_at(&self, position: Position) -> usize {
        let line = position.line as usize;
        let Some(&start) = self.lines.units.get(line) else {
            return self.lines.total_units;
        };
        let offset = start + position.character as usize;
        match self.lines.units.get(line + 1) {
            // Up to the last terminator unit, so the middle of `\r\n` round-trips.
            Some(&next) if offset < next => offset,
            Some(&next) => next - self.terminator_len(line),
            None => offset.min(self.lines.total_units),
        }
    }

    /// Text of `line` without its terminator. Empty past the last line.
    #[must_use]
    pub fn line(&self, line: u32) -> &str {
        match self.line_content(line as usize) {
            Some((start, end)) => &self.text[start..end],
            None => "",
        }
    }

    /// Range of `line` without its terminator. Past the last line this is an
    /// empty range at the end of the text.
    #[must_use]
    pub fn line_range(&self, line: u32) -> Range {
        let Some((start, end)) = self.line_content(line as usize) else {
            let end = self.position_at(self.lines.total_units);
            return Range::new(end, end);
        };
        let width: usize = self.text[start..end]
            .chars()
            .map(|ch| self.encoding.units(ch))
            .sum();
        Range::on_line(line, 0, width as u32)
    }

    /// Apply a batch of changes in order, each against the result of the
    /// previous one.
    ///
    /// The batch is rejected as a whole if any range is inverted, leaving the
    /// document untouched.
    pub fn apply_changes(&mut self, changes: Vec<ContentChange>) -> Result<(), RangeError> {
        let inverted = changes.iter().find_map(|change| match change {
            ContentChange::Incremental { range, .. } if range.is_inverted() => Some(*range),
            _ => None,
        });
        if let Some(range) = inverted {
            return Err(RangeError::from_range(range));
        }

        for change in changes {
            self.apply_change(change);
        }
        Ok(())
    }

    fn apply_change(&mut self, change: ContentChange) {
        let next = match change {
            ContentChange::Full { text } => text,
            ContentChange::Incremental { range, text } => {
                let start = self.byte_offset(self.offset_at(range.start));
                let end = self.byte_offset(self.offset_at(range.end)).max(start);
                let mut next = String::with_capacity(self.text.len() - (end - start) + text.len());
                next.push_str(&self.text[..start]);
                next.push_str(&text);
                next.push_str(&self.text[end..]);
                next
            }
        };
        self.lines = LineIndex::build(&next, self.encoding);
        self.text = Arc::from(next);
    }

    /// Width of the terminator ending `line`; zero for the last line.
    /// Terminators are ASCII, so bytes and units agree.
    fn terminator_len(&self, line: usize) -> usize {
        match self.lines.bytes.get(line + 1) {
            Some(&next) if self.text[..next].ends_with("\r\n") => 2,
            Some(_) => 1,
            None => 0,
        }
    }

    /// Byte span of `line` excluding its terminator.
    fn line_content(&self, line: usize) -> Option<(usize, usize)> {
        let start = *self.lines.bytes.get(line)?;
        let end = match self.lines.bytes.get(line + 1) {
            Some(&next) => next - self.terminator_len(line),
            None => self.text.len(),
        };
        Some((start, end))
    }

    /// Byte offset for a unit offset, rounded down to a char boundary when it
    /// falls inside a multi-unit character.
    fn byte_offset(&self, offset: usize) -> usize {
        let offset = offset.min(self.lines.total_units);
        let line = self.lines.line_of(offset);
        let mut unit = self.lines.units[line];
        let mut byte = self.lines.bytes[line];
        for ch in self.text[byte..].chars() {
            let width = self.encoding.units(ch);
            if unit + width > offset {
                break;
            }
            unit += width;
            byte += ch.len_utf8();
        }
        byte
    }
}
