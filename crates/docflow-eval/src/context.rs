//! Formula context (§4.5, C5): the `IFormulaContext` external interface
//! (§6) that the compiler, planner, and evaluator consult to resolve
//! tables/columns/rows/variables/documents by id, name, or alias.
//!
//! The trait lives here — "consumed by compiler/planner/evaluator" per §6
//! — while its concrete implementation over an owned `Project` lives one
//! layer up in `docflow-workbook`, mirroring the teacher's own resolver
//! seam (`formualizer_eval::traits::EvaluationContext`, implemented
//! downstream by `formualizer_workbook::workbook::WBResolver`).
use chrono::NaiveDate;

use docflow_common::{Column, ColumnKind, Document, DocumentId, Row, RowId, Table, TableId};

/// External interface (§6) consumed by the compiler, planner, and
/// evaluator. Implementors own fast by-id/by-name indexes; this trait only
/// describes the read surface.
pub trait FormulaContext {
    fn table_by_id(&self, id: TableId) -> Option<&Table>;

    /// Case-insensitive, first match wins (§4.5).
    fn table_by_name(&self, name: &str) -> Option<&Table>;

    /// All tables in project order. Needed by subtable-binding lookups
    /// (`graph.in`, variant materialization) that can't be phrased as a
    /// single by-id/by-name query.
    fn tables(&self) -> &[Table];

    fn documents(&self) -> &[Document];

    /// The table, if any, bound as a subtable of `(parent, column)` (§3:
    /// "`(ParentTableId, ParentRowColumnId)` for a subtable bound to a
    /// parent row").
    fn subtable_of(&self, parent: TableId, column: docflow_common::ColumnId) -> Option<&Table> {
        self.tables()
            .iter()
            .find(|t| t.parent == Some((parent, column)))
    }

    fn column_by_name<'a>(&self, table: &'a Table, name: &str) -> Option<&'a Column> {
        table.column_by_name(name)
    }

    fn row_by_id<'a>(&self, table: &'a Table, id: RowId) -> Option<&'a Row> {
        table.row_by_id(id)
    }

    /// 1-based row index within the table (§4.5).
    fn row_index(&self, table: &Table, id: RowId) -> Option<usize> {
        table.row_index(id)
    }

    /// First non-empty cell among columns of kind
    /// Id/Text/Select/TableRef/asset/Formula, else the row id (§4.5).
    fn row_label(&self, table: &Table, row: &Row) -> String {
        default_row_label(table, row)
    }

    fn table_variable_expr<'a>(&self, table: &'a Table, name: &str) -> Option<&'a str> {
        table.variable(name).map(|v| v.expression.as_str())
    }

    /// Primary alias = normalized `FileName`; secondary = normalized
    /// `Title` (§4.5).
    fn document_by_alias(&self, alias: &str) -> Option<&Document>;

    fn document_by_id(&self, id: DocumentId) -> Option<&Document>;

    fn document_variable_expr<'a>(&self, document: &'a Document, name: &str) -> Option<&'a str> {
        document.variable(name)
    }

    fn row_exists(&self, table: TableId, row: RowId) -> bool {
        self.table_by_id(table)
            .is_some_and(|t| t.row_by_id(row).is_some())
    }

    fn parse_row_id(&self, table: TableId, text: &str) -> Option<RowId> {
        let raw: u64 = text.trim().parse().ok()?;
        let candidate = RowId::new(raw);
        if self.row_exists(table, candidate) {
            Some(candidate)
        } else {
            None
        }
    }

    /// The date `Today()` resolves to (§4.7). Defaults to the system clock;
    /// callers that need reproducible evaluation (tests, replay) override
    /// this with a fixed date.
    fn clock_today(&self) -> NaiveDate {
        chrono::Utc::now().date_naive()
    }

    /// Materializes `table.Variant(idOrName)` (§4.7 Variant materialization:
    /// clone the base table's rows, drop `deleted_base_row_ids`, append
    /// `added_rows`, apply `cell_overrides`) and returns the id of the
    /// synthetic table standing in for it, or `None` if the variant doesn't
    /// exist. The default implementation has nowhere to cache a synthetic
    /// table (this trait only borrows `&self`), so it always reports no
    /// variant; `docflow-workbook`'s `ProjectContext` overrides this with an
    /// interior-mutable materialization cache.
    fn resolve_variant(&self, _table: TableId, _id_or_name: &str) -> Option<TableId> {
        None
    }
}

fn label_eligible(kind: ColumnKind) -> bool {
    matches!(
        kind,
        ColumnKind::Id
            | ColumnKind::Text
            | ColumnKind::Select
            | ColumnKind::TableRef
            | ColumnKind::Formula
            | ColumnKind::TextureAsset
            | ColumnKind::MeshAsset
            | ColumnKind::AudioAsset
            | ColumnKind::UiAsset
    )
}

pub fn default_row_label(table: &Table, row: &Row) -> String {
    for column in &table.columns {
        if !label_eligible(column.kind) {
            continue;
        }
        let cell = row.cell(column.id);
        if let Some(text) = cell.value.text() {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }
    row.id.to_string()
}

/// Normalizes a raw alias candidate (`FileName`/`Title`) into a lookup key
/// (§4.5): keep `[A-Za-z0-9_]`, collapse other runs to a single `_`, trim
/// leading/trailing `_`, ensure the result starts with a letter or
/// underscore (prefixing `_` otherwise); `"doc"` if the result is empty.
pub fn normalize_alias(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('_').to_string();
    if trimmed.is_empty() {
        return "doc".to_string();
    }
    let first = trimmed.chars().next().expect("non-empty");
    if first.is_ascii_alphabetic() || first == '_' {
        trimmed
    } else {
        format!("_{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_collapses_and_trims() {
        assert_eq!(normalize_alias("My Doc!!Name.md"), "My_Doc_Name_md");
        assert_eq!(normalize_alias("  "), "doc");
        assert_eq!(normalize_alias("1file"), "_1file");
        assert_eq!(normalize_alias("___"), "doc");
        assert_eq!(normalize_alias("ok_name"), "ok_name");
    }
}
