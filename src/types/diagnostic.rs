//! Diagnostics attached to artifact records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::key::NormalizedPath;

/// Zero-based line and character offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    /// Zero-based line.
    pub line: u32,
    /// Zero-based character offset within the line.
    pub character: u32,
}

impl Position {
    /// Create a position.
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.character + 1)
    }
}

/// Half-open source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    /// Inclusive start.
    pub start: Position,
    /// Exclusive end.
    pub end: Position,
}

impl Range {
    /// Create a range.
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Empty range at a single position.
    pub const fn point(position: Position) -> Self {
        Self { start: position, end: position }
    }

    /// Whether `position` falls inside the range.
    pub fn contains(&self, position: Position) -> bool {
        if self.start == self.end {
            return position == self.start;
        }
        self.start <= position && position < self.end
    }
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The artifact could not be produced correctly.
    Error,
    /// Suspicious but usable.
    Warning,
    /// Informational.
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A located message produced by a computation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    /// File the diagnostic points into, if any.
    pub path: Option<NormalizedPath>,
    /// Location within the file.
    pub range: Range,
    /// Severity.
    pub severity: Severity,
    /// Producer tag, e.g. `parser` or `dependency-graph`.
    pub source: String,
    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    /// Create an unlocated diagnostic.
    pub fn new(severity: Severity, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: None,
            range: Range::default(),
            severity,
            source: source.into(),
            message: message.into(),
        }
    }

    /// Create an error diagnostic.
    pub fn error(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, source, message)
    }

    /// Create a warning diagnostic.
    pub fn warning(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, source, message)
    }

    /// Create an informational diagnostic.
    pub fn info(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, source, message)
    }

    /// Attach a location.
    pub fn at(mut self, path: impl Into<NormalizedPath>, range: Range) -> Self {
        self.path = Some(path.into());
        self.range = range;
        self
    }

    /// Whether this is an error.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}:{}: ", path, self.range.start)?;
        }
        write!(f, "{} [{}] {}", self.severity, self.source, self.message)
    }
}

/// Shared, immutable diagnostics list.
pub type Diagnostics = Arc<[Diagnostic]>;

/// An empty diagnostics list.
pub fn no_diagnostics() -> Diagnostics {
    Arc::from(Vec::new())
}
