//! Core shared types for Lumen.
//!
//! This crate is intentionally small: source positions, diagnostics, compile-unit identity and
//! a couple of filesystem helpers shared by the cache and project loaders.

mod fs;
mod sanitize;

pub use fs::{files_with_extension, modified_time};
pub use sanitize::{cache_file_stem, sanitize_file_stem};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A position in a source text expressed as zero-based (line, column in chars).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[inline]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }

    /// Position of byte `offset` within `text`.
    ///
    /// Offsets past the end of `text` clamp to the end.
    pub fn at_offset(text: &str, offset: usize) -> Self {
        let offset = offset.min(text.len());
        let mut line = 0u32;
        let mut character = 0u32;
        for (idx, ch) in text.char_indices() {
            if idx >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                character = 0;
            } else {
                character += 1;
            }
        }
        Self { line, character }
    }
}

/// A half-open range in a source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    #[inline]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Span covering the byte range `start..end` of `text`.
    pub fn from_offsets(text: &str, start: usize, end: usize) -> Self {
        Self {
            start: Position::at_offset(text, start),
            end: Position::at_offset(text, end.max(start)),
        }
    }
}

/// Identity of a single input handed to the compiler.
///
/// Snippets are synthetic units that only exist in memory; files come from a project's source
/// tree. Only file units contribute to the "real source" view of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnitId {
    Snippet(String),
    File(PathBuf),
}

impl UnitId {
    pub fn snippet(id: impl Into<String>) -> Self {
        UnitId::Snippet(id.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        UnitId::File(path.into())
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, UnitId::Snippet(_))
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            UnitId::File(path) => Some(path),
            UnitId::Snippet(_) => None,
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::Snippet(id) => write!(f, "snippet:{id}"),
            UnitId::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One named input to the compiler: identity plus full source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileUnit {
    pub id: UnitId,
    pub text: String,
}

impl CompileUnit {
    pub fn new(id: UnitId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Information => "info",
            DiagnosticSeverity::Hint => "hint",
        })
    }
}

/// A structured diagnostic attributed (when possible) to a specific compile unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub code: String,
    pub message: String,
    pub unit: Option<UnitId>,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Error, code, message)
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Warning, code, message)
    }

    pub fn new(
        severity: DiagnosticSeverity,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            unit: None,
            span: None,
        }
    }

    #[must_use]
    pub fn in_unit(mut self, unit: UnitId) -> Self {
        self.unit = Some(unit);
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(unit) = &self.unit {
            write!(f, "{unit}")?;
            if let Some(span) = &self.span {
                write!(f, ":{}:{}", span.start.line + 1, span.start.character + 1)?;
            }
            f.write_str(": ")?;
        }
        write!(f, "{} {}: {}", self.severity, self.code, self.message)
    }
}

/// Returns `true` when any diagnostic in `diagnostics` has error severity.
pub fn has_errors<'a>(diagnostics: impl IntoIterator<Item = &'a Diagnostic>) -> bool {
    diagnostics.into_iter().any(Diagnostic::is_error)
}

/// Diagnostic codes emitted by the orchestration layer itself (as opposed to the guest compiler).
pub mod codes {
    pub const COMPILER_FAULT: &str = "LMN0001";
    pub const MISSING_PROJECT_REFERENCE: &str = "LMN0100";
    pub const CYCLIC_PROJECT_REFERENCE: &str = "LMN0101";
    pub const INVALID_PROJECT_DESCRIPTOR: &str = "LMN0102";
    pub const SOURCE_NOT_READABLE: &str = "LMN0103";
    pub const ARTIFACT_NOT_PERSISTED: &str = "LMN0200";
    pub const LIBRARY_NOT_LOADED: &str = "LMN0300";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_at_offset_counts_lines_and_chars() {
        let text = "ab\ncdé\nf";
        assert_eq!(Position::at_offset(text, 0), Position::new(0, 0));
        assert_eq!(Position::at_offset(text, 3), Position::new(1, 0));
        // `é` is two bytes but one char.
        assert_eq!(Position::at_offset(text, 8), Position::new(1, 3));
        assert_eq!(Position::at_offset(text, 1_000), Position::new(2, 1));
    }

    #[test]
    fn diagnostic_display_includes_unit_and_one_based_position() {
        let diag = Diagnostic::error("LMN1001", "unbalanced `{`")
            .in_unit(UnitId::snippet("cell-1"))
            .with_span(Span::new(Position::new(2, 4), Position::new(2, 5)));
        assert_eq!(
            diag.to_string(),
            "snippet:cell-1:3:5: error LMN1001: unbalanced `{`"
        );
    }

    #[test]
    fn snippets_are_synthetic_files_are_not() {
        assert!(UnitId::snippet("x").is_synthetic());
        assert!(!UnitId::file("/a/b.lm").is_synthetic());
        assert_eq!(UnitId::file("/a/b.lm").as_path(), Some(Path::new("/a/b.lm")));
    }
}
