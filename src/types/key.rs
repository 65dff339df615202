//! Artifact keys: rule kind plus subject.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque tag naming a rule.
///
/// The set of kinds is closed at build time (each is a `&'static str`
/// constant), and new kinds are registered with the
/// [`RuleRegistry`](crate::rules::RuleRegistry) at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RuleKind(&'static str);

impl RuleKind {
    /// Create a rule kind from its static name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Get the kind name.
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A file path in normalized form.
///
/// Normalization turns backslashes into `/`, collapses repeated separators,
/// drops `.` segments and any trailing separator. It does not touch the
/// file system, so `..` segments are kept as written.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct NormalizedPath(String);

impl NormalizedPath {
    /// Normalize a raw path.
    pub fn new(raw: &str) -> Self {
        let absolute = raw.starts_with('/') || raw.starts_with('\\');
        let segments: Vec<&str> = raw
            .split(|c| c == '/' || c == '\\')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();

        let mut normalized = String::with_capacity(raw.len());
        if absolute {
            normalized.push('/');
        }
        normalized.push_str(&segments.join("/"));
        Self(normalized)
    }

    /// Get the path as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Last path segment without its extension.
    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(dot) => &name[..dot],
        }
    }

    /// Whether the path ends with `suffix`.
    pub fn ends_with(&self, suffix: &str) -> bool {
        !suffix.is_empty() && self.0.ends_with(suffix)
    }

    /// The path with `suffix` removed, if it ends with it.
    pub fn strip_suffix(&self, suffix: &str) -> Option<NormalizedPath> {
        if suffix.is_empty() {
            return None;
        }
        self.0
            .strip_suffix(suffix)
            .filter(|rest| !rest.is_empty())
            .map(|rest| Self(rest.to_string()))
    }

    /// The path with `suffix` appended.
    pub fn with_suffix(&self, suffix: &str) -> NormalizedPath {
        Self(format!("{}{}", self.0, suffix))
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NormalizedPath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for NormalizedPath {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<NormalizedPath> for String {
    fn from(path: NormalizedPath) -> Self {
        path.0
    }
}

impl From<&NormalizedPath> for NormalizedPath {
    fn from(path: &NormalizedPath) -> Self {
        path.clone()
    }
}

/// What an artifact is computed for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Subject {
    /// Whole-session artifacts (configuration, workspace graph).
    NoFile,
    /// Per-file artifacts.
    File(NormalizedPath),
}

impl Subject {
    /// Create a per-file subject.
    pub fn file(path: impl Into<NormalizedPath>) -> Self {
        Self::File(path.into())
    }

    /// The subject path, if any.
    pub fn path(&self) -> Option<&NormalizedPath> {
        match self {
            Self::NoFile => None,
            Self::File(path) => Some(path),
        }
    }

    /// Whether this subject names a file.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFile => f.write_str("<no file>"),
            Self::File(path) => write!(f, "{}", path),
        }
    }
}

/// Key of a cached artifact.
///
/// Ordered by kind, then subject, for deterministic iteration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ArtifactKey {
    /// Rule computing the artifact.
    pub kind: RuleKind,
    /// What the artifact is computed for.
    pub subject: Subject,
}

impl ArtifactKey {
    /// Create a key.
    pub fn new(kind: RuleKind, subject: Subject) -> Self {
        Self { kind, subject }
    }

    /// Create a per-file key.
    pub fn file(kind: RuleKind, path: impl Into<NormalizedPath>) -> Self {
        Self::new(kind, Subject::file(path))
    }

    /// Create a whole-session key.
    pub fn no_file(kind: RuleKind) -> Self {
        Self::new(kind, Subject::NoFile)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.subject)
    }
}
