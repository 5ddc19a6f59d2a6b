//! Value model (§4.1, C1): the literal values an expression can spell out,
//! the runtime values evaluation produces, and the values a cell stores.
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

use crate::ids::{DocumentId, RowId, TableId};

/// What a token in source text can spell out directly: `true`/`false`,
/// numbers, strings, and the implicit `null` produced by an empty/invalid
/// expression root (§4.2: "Failures ... yield `CompiledFormula::Invalid`
/// (root = null literal)").
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LiteralValue {
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Null => write!(f, ""),
            LiteralValue::Number(n) => write!(f, "{n}"),
            LiteralValue::Text(s) => write!(f, "{s}"),
            LiteralValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// What evaluating an expression produces (§3, §4.1, §4.7). A strict
/// superset of `LiteralValue` plus the project-model references and
/// collections the evaluator can hand back.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
    Vec2(f64, f64),
    Vec3(f64, f64, f64),
    Vec4(f64, f64, f64, f64),
    Color(f64, f64, f64, f64),
    DateTime(NaiveDateTime),
    Row(RowId),
    Table(TableId),
    Document(DocumentId),
    /// A row collection, e.g. the result of `Filter(...)` or `tables.X` used
    /// as a candidate set (§3: "row collections").
    Rows(Vec<RowId>),
    /// The `#ERR` sentinel (§GLOSSARY). Carries no payload: the originating
    /// expression text is tracked separately on the `Cell`, not here.
    Error,
}

impl FormulaValue {
    pub fn from_literal(lit: &LiteralValue) -> Self {
        match lit {
            LiteralValue::Null => FormulaValue::Null,
            LiteralValue::Number(n) => FormulaValue::Number(*n),
            LiteralValue::Text(s) => FormulaValue::Text(s.clone()),
            LiteralValue::Bool(b) => FormulaValue::Bool(*b),
        }
    }

    /// Truthiness used by `&&`/`||`/`!`/`If` (§4.7). Bool as-is; Number
    /// truthy iff non-zero; String truthy iff non-blank; Null/Error falsy;
    /// anything else (vectors, references, collections) truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            FormulaValue::Null | FormulaValue::Error => false,
            FormulaValue::Bool(b) => *b,
            FormulaValue::Number(n) => *n != 0.0,
            FormulaValue::Text(s) => !s.trim().is_empty(),
            _ => true,
        }
    }

    /// Invariant-culture stringification used by the fallback branch of
    /// `==`/`!=`/ordering comparisons (§4.7) and by text/formula-kind cell
    /// conversion (§4.1).
    pub fn display_value(&self) -> String {
        match self {
            FormulaValue::Null => String::new(),
            FormulaValue::Number(n) => format_invariant_number(*n),
            FormulaValue::Text(s) => s.clone(),
            FormulaValue::Bool(b) => b.to_string(),
            FormulaValue::Vec2(x, y) => format!("({x}, {y})"),
            FormulaValue::Vec3(x, y, z) => format!("({x}, {y}, {z})"),
            FormulaValue::Vec4(x, y, z, w) => format!("({x}, {y}, {z}, {w})"),
            FormulaValue::Color(r, g, b, a) => format!("rgba({r}, {g}, {b}, {a})"),
            FormulaValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            FormulaValue::Row(id) => id.to_string(),
            FormulaValue::Table(id) => id.to_string(),
            FormulaValue::Document(id) => id.to_string(),
            FormulaValue::Rows(rows) => format!("[{} rows]", rows.len()),
            FormulaValue::Error => "#ERR".to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FormulaValue::Error)
    }
}

/// Formats a number the way an invariant culture would: no thousands
/// separators, `.` as the decimal point, integral values printed without a
/// trailing `.0`.
pub fn format_invariant_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// What a row stores for one column (§3: "CellValue: tagged record carrying
/// number, string, bool, x/y/z/w components, an optional per-cell formula
/// expression, and an optional formula-error marker").
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    Vec2 { x: f64, y: f64 },
    Vec3 { x: f64, y: f64, z: f64 },
    Vec4 { x: f64, y: f64, z: f64, w: f64 },
    Color { r: f64, g: f64, b: f64, a: f64 },
    Date(NaiveDate),
    Row(RowId),
    Table(TableId),
}

impl CellValue {
    pub fn text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_empty_like(&self) -> bool {
        matches!(self, CellValue::Empty) || matches!(self, CellValue::Text(s) if s.is_empty())
    }
}

pub const ERR_SENTINEL: &str = "#ERR";

/// A cell as stored in a row: the typed value plus the out-of-band formula
/// metadata §3 describes as carried "alongside" rather than folded into the
/// value enum, so column-kind conversion only ever pattern-matches on
/// `CellValue`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cell {
    pub value: CellValue,
    /// Original source text of a `=...` formula, kept for display/debug
    /// even when evaluation failed (§7: "preserving the original expression
    /// string for display/debug").
    pub formula: Option<String>,
    /// Set when evaluation produced `#ERR` for this cell.
    pub error: bool,
}

impl Cell {
    pub fn empty() -> Self {
        Self {
            value: CellValue::Empty,
            formula: None,
            error: false,
        }
    }

    pub fn value(value: CellValue) -> Self {
        Self {
            value,
            formula: None,
            error: false,
        }
    }

    pub fn err(formula_text: Option<String>) -> Self {
        Self {
            value: CellValue::Text(ERR_SENTINEL.to_string()),
            formula: formula_text,
            error: true,
        }
    }
}
