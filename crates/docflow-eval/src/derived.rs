//! Derived resolver (§4.4, C4): executes a table's declarative Append/Join
//! pipeline, producing materialized output rows plus per-row match
//! diagnostics. Hash-join grounded on the teacher's lookup-family style
//! (`builtins/lookup/lookup_utils.rs`: build an index once over the source,
//! probe it per working row) generalized from a single key to the 1-3 key
//! atoms of a `KeyMapping` list.
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher, FxHashSet};

use docflow_common::{
    Cell, ColumnId, ColumnKind, DerivedStep, FormulaValue, JoinKind, KeyMapping, Projection, Row,
    RowId, Table, TableId, cell_to_formula_value,
};

use crate::context::FormulaContext;
use docflow_parse::filter::{compile_filter, eval_filter_matches};

/// Monotonic severity order (§4.4): `TypeMismatch > MultiMatch > NoMatch >
/// Matched`. Declared ascending so derived `Ord` and `max()` pick the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RowState {
    Matched,
    NoMatch,
    MultiMatch,
    TypeMismatch,
}

/// A typed key fragment (§GLOSSARY): the join key's value, tagged by the
/// column-kind class it was read under, so a numeric `1` and the string
/// `"1"` never collide in the hash index.
#[derive(Debug, Clone)]
pub enum KeyAtom {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl PartialEq for KeyAtom {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeyAtom::Str(a), KeyAtom::Str(b)) => a == b,
            (KeyAtom::Num(a), KeyAtom::Num(b)) => a.to_bits() == b.to_bits(),
            (KeyAtom::Bool(a), KeyAtom::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for KeyAtom {}

impl Hash for KeyAtom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            KeyAtom::Str(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            KeyAtom::Num(n) => {
                1u8.hash(state);
                n.to_bits().hash(state);
            }
            KeyAtom::Bool(b) => {
                2u8.hash(state);
                b.hash(state);
            }
        }
    }
}

/// Which atom class a column's key values are read as (§4.4: "Number/Formula
/// → (1, f64); Checkbox → (2, 0/1); otherwise → (0, string)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomClass {
    Num,
    Bool,
    Str,
}

fn atom_class(kind: ColumnKind) -> AtomClass {
    match kind {
        ColumnKind::Number | ColumnKind::Formula => AtomClass::Num,
        ColumnKind::Checkbox => AtomClass::Bool,
        _ => AtomClass::Str,
    }
}

fn key_atom(class: AtomClass, cell: &Cell) -> Option<KeyAtom> {
    let value = cell_to_formula_value(cell);
    match class {
        AtomClass::Num => match value {
            FormulaValue::Number(n) => Some(KeyAtom::Num(n)),
            _ => None,
        },
        AtomClass::Bool => match value {
            FormulaValue::Bool(b) => Some(KeyAtom::Bool(b)),
            _ => None,
        },
        AtomClass::Str => Some(KeyAtom::Str(value.display_value())),
    }
}

#[derive(Debug, Clone)]
pub struct RowDiagnostic {
    pub row_id: RowId,
    pub origin_table: TableId,
    pub source_row: RowId,
    pub state: RowState,
}

#[derive(Debug, Clone, Default)]
pub struct DerivedResult {
    pub rows: Vec<Row>,
    pub diagnostics: Vec<RowDiagnostic>,
}

/// `OutRowKey` (§4.4): `(originId, sourceRowId)`, encoded into a stable
/// synthetic `RowId` so derived rows remain globally unique alongside
/// authored ones (§3: row ids are unique across the whole project).
fn encode_row_id(origin: TableId, source_row: RowId) -> RowId {
    let mut hasher = FxHasher::default();
    origin.raw().hash(&mut hasher);
    source_row.raw().hash(&mut hasher);
    // Fold the hash into the high bits so synthetic ids can't collide with
    // the small sequential ids an authored project is likely to use.
    RowId::new(hasher.finish() | (1u64 << 63))
}

struct WorkingRow {
    origin_table: TableId,
    source_row: RowId,
    state: RowState,
    cells: HashMap<ColumnId, Cell>,
}

fn apply_projections(
    cells: &mut HashMap<ColumnId, Cell>,
    projections: &[Projection],
    suppressed: &FxHashSet<ColumnId>,
    source_table: TableId,
    source_row: &Row,
) {
    for proj in projections {
        if proj.source_table != source_table || suppressed.contains(&proj.output_column) {
            continue;
        }
        cells.insert(proj.output_column, source_row.cell(proj.source_column));
    }
}

fn resolve_key_class(table: &Table, column: ColumnId) -> Option<AtomClass> {
    table.column_by_id(column).map(|c| atom_class(c.kind))
}

/// Builds a hash index of `source` over `keys`' source-side columns (§4.4
/// step 2 Join: "build a hash index of the source table over the join key
/// columns"). A key mapping to more than one source row is marked `MULTI` by
/// storing more than one entry under it.
fn build_join_index(
    source: &Table,
    keys: &[KeyMapping],
) -> FxHashMap<Vec<KeyAtom>, Vec<usize>> {
    let mut index: FxHashMap<Vec<KeyAtom>, Vec<usize>> = FxHashMap::default();
    for (i, row) in source.rows.iter().enumerate() {
        let mut atoms = Vec::with_capacity(keys.len());
        let mut ok = true;
        for mapping in keys {
            let Some(class) = resolve_key_class(source, mapping.source_column) else {
                ok = false;
                break;
            };
            let cell = row.cell(mapping.source_column);
            match key_atom(class, &cell) {
                Some(atom) => atoms.push(atom),
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            index.entry(atoms).or_default().push(i);
        }
    }
    index
}

/// Executes one `Join` step (§4.4 step 2) against every current working row,
/// mutating each row's state and, on a unique hit, copying the matched
/// source row's projected cells.
#[allow(clippy::too_many_arguments)]
fn run_join(
    working: &mut [WorkingRow],
    derived_table: &Table,
    source_table: &Table,
    keys: &[KeyMapping],
    kind: JoinKind,
    projections: &[Projection],
    suppressed: &FxHashSet<ColumnId>,
) -> Vec<bool> {
    let mut keep = vec![true; working.len()];
    if keys.is_empty() || keys.len() > 3 || keys.iter().any(|k| derived_table.column_by_id(k.left_column).is_none() || source_table.column_by_id(k.source_column).is_none()) {
        for row in working.iter_mut() {
            row.state = row.state.max(RowState::TypeMismatch);
        }
        return keep;
    }

    let index = build_join_index(source_table, keys);

    for (slot, row) in working.iter_mut().enumerate() {
        let mut left_atoms = Vec::with_capacity(keys.len());
        let mut mismatch = false;
        for mapping in keys {
            let left_class = resolve_key_class(derived_table, mapping.left_column);
            let source_class = resolve_key_class(source_table, mapping.source_column);
            match (left_class, source_class) {
                (Some(lc), Some(sc)) if lc == sc => {
                    let cell = row.cells.get(&mapping.left_column).cloned().unwrap_or_else(Cell::empty);
                    match key_atom(lc, &cell) {
                        Some(atom) => left_atoms.push(atom),
                        None => {
                            mismatch = true;
                            break;
                        }
                    }
                }
                _ => {
                    mismatch = true;
                    break;
                }
            }
        }

        if mismatch {
            row.state = row.state.max(RowState::TypeMismatch);
            continue;
        }

        match index.get(&left_atoms) {
            None => {
                row.state = row.state.max(RowState::NoMatch);
                if kind == JoinKind::Inner {
                    keep[slot] = false;
                }
            }
            Some(hits) if hits.len() > 1 => {
                row.state = row.state.max(RowState::MultiMatch);
            }
            Some(hits) => {
                let source_row = &source_table.rows[hits[0]];
                apply_projections(&mut row.cells, projections, suppressed, source_table.id, source_row);
            }
        }
    }
    keep
}

/// Resolves a derived table's materialized rows and diagnostics (§4.4).
pub fn resolve(table: &Table, ctx: &dyn FormulaContext) -> DerivedResult {
    let Some(config) = &table.derived else {
        return DerivedResult::default();
    };
    let suppressed: FxHashSet<ColumnId> = config.suppressed_projections.iter().copied().collect();

    let mut working: Vec<WorkingRow> = Vec::new();

    if let Some(base_id) = config.base_table {
        if let Some(base) = ctx.table_by_id(base_id) {
            for row in &base.rows {
                let mut cells = HashMap::new();
                apply_projections(&mut cells, &config.projections, &suppressed, base_id, row);
                working.push(WorkingRow {
                    origin_table: base_id,
                    source_row: row.id,
                    state: RowState::Matched,
                    cells,
                });
            }
        }
    }

    for step in &config.steps {
        match step {
            DerivedStep::Append { source_table, origin_override } => {
                let Some(source) = ctx.table_by_id(*source_table) else {
                    continue;
                };
                let origin = origin_override.unwrap_or(*source_table);
                for row in &source.rows {
                    let mut cells = HashMap::new();
                    apply_projections(&mut cells, &config.projections, &suppressed, *source_table, row);
                    working.push(WorkingRow {
                        origin_table: origin,
                        source_row: row.id,
                            state: RowState::Matched,
                        cells,
                    });
                }
            }
            DerivedStep::Join { source_table, keys, kind } => {
                let Some(source) = ctx.table_by_id(*source_table) else {
                    for row in working.iter_mut() {
                        row.state = row.state.max(RowState::TypeMismatch);
                    }
                    continue;
                };
                let keep = run_join(&mut working, table, source, keys, *kind, &config.projections, &suppressed);
                let mut kept = Vec::with_capacity(working.len());
                for (row, k) in working.into_iter().zip(keep) {
                    if k {
                        kept.push(row);
                    }
                }
                working = kept;
            }
        }
    }

    let filter_ast = match config.filter_expression.as_deref() {
        Some(expr) if !expr.trim().is_empty() => Some(compile_filter(expr)),
        _ => None,
    };

    let mut rows = Vec::with_capacity(working.len());
    let mut diagnostics = Vec::with_capacity(working.len());
    for wr in working {
        let keep = match &filter_ast {
            None => true,
            Some(Err(_)) => false,
            Some(Ok(ast)) => {
                let column = |name: &str| -> FormulaValue {
                    table
                        .column_by_name(name)
                        .and_then(|c| wr.cells.get(&c.id))
                        .map(cell_to_formula_value)
                        .unwrap_or(FormulaValue::Null)
                };
                eval_filter_matches(ast, &column, 1e-6)
            }
        };
        if !keep {
            continue;
        }
        let row_id = encode_row_id(wr.origin_table, wr.source_row);
        diagnostics.push(RowDiagnostic {
            row_id,
            origin_table: wr.origin_table,
            source_row: wr.source_row,
            state: wr.state,
        });
        rows.push(Row { id: row_id, cells: wr.cells });
    }

    DerivedResult { rows, diagnostics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_common::{CellValue, Column, DerivedConfig, Document, DocumentId, Project};

    struct TestCtx {
        project: Project,
    }

    impl FormulaContext for TestCtx {
        fn table_by_id(&self, id: TableId) -> Option<&Table> {
            self.project.table_by_id(id)
        }
        fn table_by_name(&self, name: &str) -> Option<&Table> {
            self.project.table_by_name(name)
        }
        fn tables(&self) -> &[Table] {
            &self.project.tables
        }
        fn documents(&self) -> &[Document] {
            &self.project.documents
        }
        fn document_by_alias(&self, _alias: &str) -> Option<&Document> {
            None
        }
        fn document_by_id(&self, id: DocumentId) -> Option<&Document> {
            self.project.document_by_id(id)
        }
    }

    fn number_row(id: u64, col: ColumnId, n: f64) -> Row {
        let mut row = Row::new(RowId::new(id));
        row.set_cell(col, Cell::value(CellValue::Number(n)));
        row
    }

    #[test]
    fn inner_join_drops_unmatched_rows_and_copies_projections() {
        let key_col = ColumnId::new(1);
        let price_col = ColumnId::new(2);
        let out_key_col = ColumnId::new(10);
        let out_price_col = ColumnId::new(11);

        let mut prices = Table::new(TableId::new(100), "Prices");
        prices.columns.push(Column::new(key_col, "Key", ColumnKind::Number));
        prices.columns.push(Column::new(price_col, "Price", ColumnKind::Number));
        prices.rows.push(number_row(1, key_col, 1.0));
        {
            let mut r = number_row(2, key_col, 2.0);
            r.set_cell(price_col, Cell::value(CellValue::Number(50.0)));
            prices.rows.push(r);
        }
        prices.rows[0].set_cell(price_col, Cell::value(CellValue::Number(10.0)));

        let mut items = Table::new(TableId::new(200), "Items");
        items.columns.push(Column::new(out_key_col, "Key", ColumnKind::Number));
        items.rows.push(number_row(1, out_key_col, 1.0));
        items.rows.push(number_row(2, out_key_col, 99.0));

        let mut derived = Table::new(TableId::new(300), "Joined");
        derived.columns.push(Column::new(out_key_col, "Key", ColumnKind::Number));
        derived.columns.push(Column::new(out_price_col, "Price", ColumnKind::Number));
        derived.derived = Some(DerivedConfig {
            base_table: Some(items.id),
            steps: vec![DerivedStep::Join {
                source_table: prices.id,
                keys: vec![KeyMapping { left_column: out_key_col, source_column: key_col }],
                kind: JoinKind::Inner,
            }],
            projections: vec![
                Projection { source_table: items.id, source_column: out_key_col, output_column: out_key_col, rename_alias: None },
                Projection { source_table: prices.id, source_column: price_col, output_column: out_price_col, rename_alias: None },
            ],
            suppressed_projections: vec![],
            filter_expression: None,
        });

        let project = Project { tables: vec![prices, items, derived.clone()], documents: vec![] };
        let ctx = TestCtx { project };

        let result = resolve(&derived, &ctx);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.diagnostics[0].state, RowState::Matched);
        let price = result.rows[0].cell(out_price_col);
        assert_eq!(price.value, CellValue::Number(10.0));
    }

    /// §8 scenario 3: a multi-key join where one key pair has incompatible
    /// kinds (`Text` vs `Number`) marks every working row `TypeMismatch`, the
    /// output row count stays equal to the working row count (nothing gets
    /// dropped), and no cell gets overwritten by the failed join.
    #[test]
    fn multi_key_join_with_kind_mismatch_marks_every_row_type_mismatch() {
        let left_ok_col = ColumnId::new(1);
        let left_bad_col = ColumnId::new(2);
        let source_ok_col = ColumnId::new(3);
        let source_bad_col = ColumnId::new(4);
        let out_ok_col = ColumnId::new(10);
        let out_price_col = ColumnId::new(11);
        let source_price_col = ColumnId::new(12);

        let mut source = Table::new(TableId::new(100), "Catalog");
        source.columns.push(Column::new(source_ok_col, "Sku", ColumnKind::Number));
        source.columns.push(Column::new(source_bad_col, "Region", ColumnKind::Text));
        source.columns.push(Column::new(source_price_col, "Price", ColumnKind::Number));
        {
            let mut r = number_row(1, source_ok_col, 1.0);
            r.set_cell(source_bad_col, Cell::value(CellValue::Text("East".to_string())));
            r.set_cell(source_price_col, Cell::value(CellValue::Number(99.0)));
            source.rows.push(r);
        }

        let mut base = Table::new(TableId::new(200), "Orders");
        base.columns.push(Column::new(out_ok_col, "Sku", ColumnKind::Number));
        // Mismatched kind on purpose: a Number column joined against the
        // source's Text `Region` column.
        base.columns.push(Column::new(out_price_col, "Region", ColumnKind::Number));
        base.rows.push({
            let mut r = number_row(1, out_ok_col, 1.0);
            r.set_cell(out_price_col, Cell::value(CellValue::Number(1.0)));
            r
        });
        base.rows.push({
            let mut r = number_row(2, out_ok_col, 2.0);
            r.set_cell(out_price_col, Cell::value(CellValue::Number(2.0)));
            r
        });

        let mut derived = Table::new(TableId::new(300), "Joined");
        derived.columns.push(Column::new(out_ok_col, "Sku", ColumnKind::Number));
        derived.columns.push(Column::new(out_price_col, "Region", ColumnKind::Number));
        derived.derived = Some(DerivedConfig {
            base_table: Some(base.id),
            steps: vec![DerivedStep::Join {
                source_table: source.id,
                keys: vec![
                    KeyMapping { left_column: out_ok_col, source_column: source_ok_col },
                    KeyMapping { left_column: out_price_col, source_column: source_bad_col },
                ],
                kind: JoinKind::Inner,
            }],
            projections: vec![Projection {
                source_table: source.id,
                source_column: source_price_col,
                output_column: out_price_col,
                rename_alias: None,
            }],
            suppressed_projections: vec![],
            filter_expression: None,
        });

        let project = Project { tables: vec![source, base, derived.clone()], documents: vec![] };
        let ctx = TestCtx { project };

        let result = resolve(&derived, &ctx);
        assert_eq!(result.rows.len(), 2, "a TypeMismatch never drops rows, even under Inner");
        assert!(result.diagnostics.iter().all(|d| d.state == RowState::TypeMismatch));
        // The failed join must not have overwritten `Region` with the
        // source's projected price.
        assert_eq!(result.rows[0].cell(out_price_col).value, CellValue::Number(1.0));
        assert_eq!(result.rows[1].cell(out_price_col).value, CellValue::Number(2.0));
    }

    #[test]
    fn key_atom_num_and_str_never_collide() {
        let a = KeyAtom::Num(1.0);
        let b = KeyAtom::Str("1".to_string());
        assert_ne!(a, b);
    }

    #[test]
    fn row_state_severity_orders_type_mismatch_worst() {
        assert!(RowState::TypeMismatch > RowState::MultiMatch);
        assert!(RowState::MultiMatch > RowState::NoMatch);
        assert!(RowState::NoMatch > RowState::Matched);
    }
}
