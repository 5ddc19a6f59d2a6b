//! The project data model (§3): tables, rows, columns, documents, and the
//! declarative pipeline a derived table is built from. Pure data — the
//! engine only ever reads these structures (§3 Lifecycle); mutation is an
//! external editor's job.
use std::collections::HashMap;

use crate::column_kind::ColumnKind;
use crate::ids::{ColumnId, DocumentId, RowId, TableId, VariantId};
use crate::value::Cell;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub kind: ColumnKind,
    /// Present on Formula-kind and per-cell-formula columns.
    pub formula: Option<String>,
    pub is_projected: bool,
    pub is_hidden: bool,
}

impl Column {
    pub fn new(id: ColumnId, name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            formula: None,
            is_projected: false,
            is_hidden: false,
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Row {
    pub id: RowId,
    pub cells: HashMap<ColumnId, Cell>,
}

impl Row {
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            cells: HashMap::new(),
        }
    }

    /// Missing key => column default (§3 invariant 1: "Missing key ⇒ column
    /// default"). Columns with no stored cell read as `Cell::empty()`.
    pub fn cell(&self, column: ColumnId) -> Cell {
        self.cells.get(&column).cloned().unwrap_or_else(Cell::empty)
    }

    pub fn set_cell(&mut self, column: ColumnId, cell: Cell) {
        self.cells.insert(column, cell);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JoinKind {
    Inner,
    Left,
}

/// One `(SourceTableId, SourceColumnId) -> left-key column` pair of a join
/// step (§4.4, up to 3 per step).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyMapping {
    pub left_column: ColumnId,
    pub source_column: ColumnId,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DerivedStep {
    Append {
        source_table: TableId,
        /// Overrides the origin id used for seeding `OutRowKey` (§4.4 step
        /// 2: "originId = step.Id ?? step.SourceTableId").
        origin_override: Option<TableId>,
    },
    Join {
        source_table: TableId,
        keys: Vec<KeyMapping>,
        kind: JoinKind,
    },
}

/// `(SourceTableId, SourceColumnId) -> OutputColumnId [, RenameAlias]`
/// (§GLOSSARY: Projection).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Projection {
    pub source_table: TableId,
    pub source_column: ColumnId,
    pub output_column: ColumnId,
    pub rename_alias: Option<String>,
}

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DerivedConfig {
    pub base_table: Option<TableId>,
    pub steps: Vec<DerivedStep>,
    pub projections: Vec<Projection>,
    pub suppressed_projections: Vec<ColumnId>,
    pub filter_expression: Option<String>,
}

/// A materialized variant: clone the base table's rows, drop
/// `deleted_base_row_ids`, append `added_rows`, apply `cell_overrides`
/// (§4.7 Variant materialization).
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Variant {
    pub id: VariantId,
    pub name: String,
    pub deleted_base_row_ids: Vec<RowId>,
    pub added_rows: Vec<Row>,
    pub cell_overrides: HashMap<(RowId, ColumnId), Cell>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TableVariable {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub derived: Option<DerivedConfig>,
    /// `(ParentTableId, ParentRowColumnId)` for a subtable bound to a parent
    /// row (§3).
    pub parent: Option<(TableId, ColumnId)>,
    pub variables: Vec<TableVariable>,
    pub variants: Vec<Variant>,
}

impl Table {
    pub fn new(id: TableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            derived: None,
            parent: None,
            variables: Vec::new(),
            variants: Vec::new(),
        }
    }

    pub fn column_by_id(&self, id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn row_by_id(&self, id: RowId) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == id)
    }

    /// 1-based row index within the table (§4.5), or `None` if not present.
    pub fn row_index(&self, id: RowId) -> Option<usize> {
        self.rows.iter().position(|r| r.id == id).map(|i| i + 1)
    }

    pub fn variable(&self, name: &str) -> Option<&TableVariable> {
        self.variables
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(name))
    }

    pub fn variant_by_id_or_name(&self, id_or_name: &str) -> Option<&Variant> {
        if let Ok(raw) = id_or_name.parse::<u64>() {
            if let Some(v) = self.variants.iter().find(|v| v.id.raw() == raw) {
                return Some(v);
            }
        }
        self.variants
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(id_or_name))
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Block {
    Text(String),
    /// `@name = expression` (§3, §6).
    Variable { name: String, expression: String },
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub file_name: String,
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.blocks.iter().find_map(|b| match b {
            Block::Variable { name: n, expression } if n.eq_ignore_ascii_case(name) => {
                Some(expression.as_str())
            }
            _ => None,
        })
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Variable { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Project {
    pub tables: Vec<Table>,
    pub documents: Vec<Document>,
}

impl Project {
    pub fn table_by_id(&self, id: TableId) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn table_by_id_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.id == id)
    }

    /// Case-insensitive, first match wins (§4.5).
    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn document_by_id(&self, id: DocumentId) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }
}
