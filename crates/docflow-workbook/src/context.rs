//! `ProjectContext` (C5 implementation): the concrete `FormulaContext` over
//! a caller-owned, borrowed `Project` (§3 Lifecycle: "the engine only reads
//! them"). Grounded on `formualizer-workbook/src/workbook.rs`'s
//! `WBResolver`, a thin read-only adapter from the workbook's owned data to
//! `formualizer_eval`'s context trait.
use std::cell::{Cell as StdCell, RefCell};

use chrono::NaiveDate;
use rustc_hash::FxHashMap;

use docflow_common::{Document, DocumentId, Project, RowId, RowLookup, Table, TableId};
use docflow_eval::FormulaContext;

/// Overlays two kinds of engine-materialized tables on top of the
/// caller's immutable project data: derived-table row sets (recomputed on
/// every rematerialization) and variant tables (materialized once per
/// `Engine::evaluate` call and cached by `(base table, variant)`).
///
/// Entries are only ever inserted, never removed or replaced in place —
/// each overlay write allocates a fresh `Box<Table>` and reassigns the
/// map slot — so a `*const Table` taken from an existing entry stays
/// valid for the context's whole lifetime even as the surrounding
/// `FxHashMap` reallocates its bucket array. The same "stable heap
/// address behind interior mutability" pattern backs the teacher's own
/// `thread_local! { static ACTIVE_WORKBOOK: Cell<*const Workbook> }` /
/// `unsafe { &*ptr }` resolver in `workbook.rs`.
pub struct ProjectContext<'p> {
    project: &'p Project,
    overlays: RefCell<FxHashMap<TableId, Box<Table>>>,
    variant_index: RefCell<FxHashMap<(TableId, docflow_common::VariantId), TableId>>,
    next_synthetic_id: StdCell<u64>,
    fixed_clock: Option<NaiveDate>,
}

impl<'p> ProjectContext<'p> {
    pub fn new(project: &'p Project) -> Self {
        Self {
            project,
            overlays: RefCell::new(FxHashMap::default()),
            variant_index: RefCell::new(FxHashMap::default()),
            next_synthetic_id: StdCell::new(u64::MAX),
            fixed_clock: None,
        }
    }

    /// Pins `Today()` to a fixed date instead of the system clock, for
    /// reproducible tests (§4.7).
    pub fn with_fixed_clock(mut self, date: NaiveDate) -> Self {
        self.fixed_clock = Some(date);
        self
    }

    pub fn project(&self) -> &'p Project {
        self.project
    }

    /// Installs the materialized row set for a derived table (§4.4), so
    /// later lookups of this table id (from other formulas, or from this
    /// same evaluation pass) observe the fresh rows instead of whatever
    /// the caller's `Project` happens to store for it.
    pub fn set_derived_overlay(&self, table_id: TableId, definition: &Table, rows: Vec<docflow_common::Row>) {
        let overlay = Table {
            id: table_id,
            name: definition.name.clone(),
            columns: definition.columns.clone(),
            rows,
            derived: definition.derived.clone(),
            parent: definition.parent,
            variables: definition.variables.clone(),
            variants: definition.variants.clone(),
        };
        self.overlays.borrow_mut().insert(table_id, Box::new(overlay));
    }

    fn overlay_table(&self, id: TableId) -> Option<&'p Table> {
        let overlays = self.overlays.borrow();
        let boxed = overlays.get(&id)?;
        let ptr: *const Table = boxed.as_ref();
        drop(overlays);
        // SAFETY: `overlays` entries are never removed, and each slot's
        // `Box<Table>` has a stable heap address independent of the
        // surrounding `FxHashMap`'s own storage moving on rehash. `'p`
        // outlives every borrow this context hands out.
        Some(unsafe { &*ptr })
    }

    fn allocate_synthetic_id(&self) -> TableId {
        let next = self.next_synthetic_id.get();
        self.next_synthetic_id.set(next - 1);
        TableId::new(next)
    }
}

impl<'p> FormulaContext for ProjectContext<'p> {
    fn table_by_id(&self, id: TableId) -> Option<&Table> {
        self.overlay_table(id).or_else(|| self.project.table_by_id(id))
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

    fn document_by_alias(&self, alias: &str) -> Option<&Document> {
        let normalized = docflow_eval::normalize_alias(alias);
        self.project.documents.iter().find(|d| {
            docflow_eval::normalize_alias(&d.file_name) == normalized
                || docflow_eval::normalize_alias(&d.title) == normalized
        })
    }

    fn document_by_id(&self, id: DocumentId) -> Option<&Document> {
        self.project.document_by_id(id)
    }

    fn clock_today(&self) -> NaiveDate {
        self.fixed_clock.unwrap_or_else(|| chrono::Utc::now().date_naive())
    }

    /// Materializes `table.Variant(idOrName)` (§4.7): clone the base
    /// table's rows minus `deleted_base_row_ids`, append `added_rows`,
    /// apply `cell_overrides`; cached per `(base table, variant id)` for
    /// the lifetime of this context (one `Engine::evaluate` call).
    fn resolve_variant(&self, table: TableId, id_or_name: &str) -> Option<TableId> {
        let base = self.table_by_id(table)?;
        let variant = base.variant_by_id_or_name(id_or_name)?;
        let cache_key = (table, variant.id);
        if let Some(existing) = self.variant_index.borrow().get(&cache_key) {
            return Some(*existing);
        }
        let synthetic_id = self.allocate_synthetic_id();
        let mut rows: Vec<docflow_common::Row> = base
            .rows
            .iter()
            .filter(|r| !variant.deleted_base_row_ids.contains(&r.id))
            .cloned()
            .chain(variant.added_rows.iter().cloned())
            .collect();
        for ((row_id, col_id), cell) in &variant.cell_overrides {
            if let Some(row) = rows.iter_mut().find(|r| r.id == *row_id) {
                row.set_cell(*col_id, cell.clone());
            }
        }
        let materialized = Table {
            id: synthetic_id,
            name: format!("{}:{}", base.name, variant.name),
            columns: base.columns.clone(),
            rows,
            derived: None,
            parent: base.parent,
            variables: base.variables.clone(),
            variants: Vec::new(),
        };
        self.overlays.borrow_mut().insert(synthetic_id, Box::new(materialized));
        self.variant_index.borrow_mut().insert(cache_key, synthetic_id);
        Some(synthetic_id)
    }
}

/// §4.1: "a String interpreted as a RowId validated against the target
/// table" — backed by the same table lookup `FormulaContext` itself uses.
impl<'p> RowLookup for ProjectContext<'p> {
    fn row_exists(&self, table: TableId, row: RowId) -> bool {
        self.table_by_id(table).is_some_and(|t| t.row_by_id(row).is_some())
    }

    fn parse_row_id(&self, table: TableId, text: &str) -> Option<RowId> {
        let raw: u64 = text.trim().parse().ok()?;
        let candidate = RowId::new(raw);
        if self.row_exists(table, candidate) { Some(candidate) } else { None }
    }
}
