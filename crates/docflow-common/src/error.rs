//! Low-level error type shared by the value model and the parser.
//!
//! Mirrors the teacher's `ExcelError`: a small `Display`/`std::error::Error`
//! impl with no external error-handling crate, since this sits at the
//! bottom of the dependency stack. Structural errors that must propagate to
//! callers (cycles, fatal misuse — §7 kinds 4/7) are surfaced as
//! `docflow_workbook::DocflowError` one layer up; this type only ever
//! backs the local, never-propagated failures of §7 kinds 1-3.
use std::error::Error;
use std::fmt;

/// The `#ERR` sentinel's underlying cause, kept around for display/debug
/// even though the engine always converts it to the literal string `"#ERR"`
/// at the cell boundary (§4.1, §GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreErrorKind {
    /// Tokenizer/parser/type-check failure (§7 kind 1).
    Compile,
    /// Missing table/column/row/variable at evaluation time (§7 kind 2).
    Resolve,
    /// `FormulaValue` kind incompatible with the target column kind (§7 kind 3).
    TypeMismatch,
    /// Variable re-entered while already evaluating (§7 kind 4, runtime half).
    Cycle,
}

impl fmt::Display for CoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Compile => "compile error",
            Self::Resolve => "resolve error",
            Self::TypeMismatch => "type mismatch",
            Self::Cycle => "cycle",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreError {
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Compile, message)
    }

    pub fn resolve(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Resolve, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::TypeMismatch, message)
    }

    pub fn cycle(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Cycle, message)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for CoreError {}
