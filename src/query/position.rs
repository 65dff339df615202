//! Mapping positions between text versions.
//!
//! A stale artifact was computed against an older version of a file. Given
//! the edits made since, positions can be carried between the two
//! versions. A position inside an edited range has no exact counterpart
//! and maps to `None`.

use serde::{Deserialize, Serialize};

use crate::types::{Position, Range};

/// One edit: `range` in the old text replaced by `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
    /// Replaced range, in the text the edit was applied to.
    pub range: Range,
    /// Replacement text.
    pub text: String,
}

impl TextChange {
    /// Create a change.
    pub fn new(range: Range, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    /// Lines added minus lines removed.
    fn line_delta(&self) -> i64 {
        self.new_lines() - (self.range.end.line as i64 - self.range.start.line as i64)
    }

    fn new_lines(&self) -> i64 {
        self.text.matches('\n').count() as i64
    }

    /// Column just past the inserted text.
    fn new_end_column(&self) -> i64 {
        match self.text.rfind('\n') {
            None => self.range.start.character as i64 + self.text.chars().count() as i64,
            Some(newline) => self.text[newline + 1..].chars().count() as i64,
        }
    }

    /// Map a position in the text before this change to the text after it.
    fn forward(&self, position: Position) -> Option<Position> {
        let Range { start, end } = self.range;
        if position < start {
            return Some(position);
        }
        if position >= end {
            let line = position.line as i64 + self.line_delta();
            let character = if position.line == end.line {
                position.character as i64 + self.new_end_column() - end.character as i64
            } else {
                position.character as i64
            };
            return to_position(line, character);
        }
        None
    }

    /// Map a position in the text after this change to the text before it.
    fn backward(&self, position: Position) -> Option<Position> {
        let Range { start, end } = self.range;
        if position < start {
            return Some(position);
        }
        let new_end_line = start.line as i64 + self.new_lines();
        let new_end_column = self.new_end_column();
        let (line, character) = (position.line as i64, position.character as i64);

        if line > new_end_line || (line == new_end_line && character >= new_end_column) {
            let old_character = if line == new_end_line {
                character - new_end_column + end.character as i64
            } else {
                character
            };
            return to_position(line - self.line_delta(), old_character);
        }
        None
    }
}

fn to_position(line: i64, character: i64) -> Option<Position> {
    Some(Position::new(u32::try_from(line).ok()?, u32::try_from(character).ok()?))
}

/// Edits between the version a result was computed against and the
/// current text, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionMapping {
    changes: Vec<TextChange>,
}

impl PositionMapping {
    /// Mapping over `changes`, oldest first.
    pub fn new(changes: Vec<TextChange>) -> Self {
        Self { changes }
    }

    /// The identity mapping.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Whether no edits separate the two versions.
    pub fn is_identity(&self) -> bool {
        self.changes.is_empty()
    }

    /// Old position to current position.
    pub fn to_current(&self, position: Position) -> Option<Position> {
        self.changes
            .iter()
            .try_fold(position, |position, change| change.forward(position))
    }

    /// Current position to old position.
    pub fn to_old(&self, position: Position) -> Option<Position> {
        self.changes
            .iter()
            .rev()
            .try_fold(position, |position, change| change.backward(position))
    }

    /// Old range to current range.
    pub fn range_to_current(&self, range: Range) -> Option<Range> {
        Some(Range::new(self.to_current(range.start)?, self.to_current(range.end)?))
    }

    /// Current range to old range.
    pub fn range_to_old(&self, range: Range) -> Option<Range> {
        Some(Range::new(self.to_old(range.start)?, self.to_old(range.end)?))
    }
}
