//! Engine façade (§4.8, C8): compile/plan caches keyed by project-reference
//! identity, incremental dirty-set evaluation, and the evaluation loop that
//! drives the compiler/planner/resolver/evaluator over one `Project`.
//!
//! Grounded on `formualizer-workbook/src/recalculate.rs`'s plain-struct
//! `RecalculateSummary`/`RecalculateStatus` pattern and
//! `recalculate_file_with_limit` as the single orchestration entry point,
//! and on `formualizer-eval/src/engine/metrics.rs`'s `Instant`-based timing
//! (simplified to plain `u64` nanosecond fields here since §5 mandates
//! single-threaded, synchronous evaluation — no atomics needed).
mod affected;

pub use affected::targeted_columns_for_table;

use std::time::Instant;

use rustc_hash::FxHashMap;

use docflow_common::{Cell, ColumnId, DocumentId, FormulaValue, Project, RowId, Table, TableId, convert_to_cell};
use docflow_eval::{
    DerivedResult, EngineConfig, EvaluationFrame, FormulaContext, FunctionRegistry, Interpreter, NodeId, Plan,
    PrecomputedEntry, PrecomputedVars, build_plan, resolve_derived_table,
};
use docflow_parse::CompiledFormula;

use crate::context::ProjectContext;
use crate::error::DocflowError;

/// Opaque caller-supplied identity tag for cache invalidation (§4.8, §9
/// Open Question decision 3): the core has no way to observe whether the
/// `Project` behind a `&Project` reference mutated since the last call, so
/// identity is asserted by the caller (pointer address, content hash,
/// monotonic version counter) rather than inferred.
pub type ProjectRef = u64;

/// §4.8: "request variants are `Full`, `Incremental(dirtyTableIds)`,
/// `IncrementalDocuments(dirtyDocIds)`, `IncrementalTargeted(...)`,
/// `StructuralIncremental(...)`".
#[derive(Debug, Clone)]
pub enum EvaluationRequest {
    Full,
    Incremental(Vec<TableId>),
    IncrementalDocuments(Vec<DocumentId>),
    IncrementalTargeted {
        dirty_tables: Vec<TableId>,
        targeted_columns: FxHashMap<TableId, Vec<ColumnId>>,
    },
    /// Forces a full compile/plan rebuild (§4.8: "asking for structural
    /// refresh rebuilds everything") while still scoping evaluation to the
    /// union of the pre- and post-rebuild affected sets for the given
    /// dirty tables/documents.
    StructuralIncremental {
        dirty_tables: Vec<TableId>,
        dirty_documents: Vec<DocumentId>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationMetrics {
    pub total: u64,
    pub compile: u64,
    pub plan: u64,
    pub derived: u64,
    pub evaluate: u64,
    pub evaluated_table_count: usize,
    pub used_incremental_plan: bool,
}

struct CompiledProject {
    project_ref: ProjectRef,
    compiled_columns: FxHashMap<(TableId, ColumnId), CompiledFormula>,
    compiled_cells: FxHashMap<(TableId, RowId, ColumnId), CompiledFormula>,
    compiled_table_vars: FxHashMap<(TableId, String), CompiledFormula>,
    compiled_doc_vars: FxHashMap<(DocumentId, String), CompiledFormula>,
    plan: Plan,
}

#[derive(Default)]
struct EvaluationState {
    computed_cells: FxHashMap<(TableId, RowId, ColumnId), Cell>,
    derived_rows: FxHashMap<TableId, DerivedResult>,
    precomputed_doc_vars: PrecomputedVars,
}

/// The engine façade. Owns compile/plan caches and the results of the last
/// `evaluate` call; never owns the `Project` itself (§3 Lifecycle: "the
/// engine only reads them").
pub struct Engine {
    config: EngineConfig,
    registry: FunctionRegistry,
    cached: Option<CompiledProject>,
    state: EvaluationState,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: FunctionRegistry::with_builtins(),
            cached: None,
            state: EvaluationState::default(),
        }
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            registry: FunctionRegistry::with_builtins(),
            cached: None,
            state: EvaluationState::default(),
        }
    }

    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// The computed value of a formula column/cell after the last
    /// `evaluate` call, or `None` if that cell carries no formula (read it
    /// straight off the caller's own `Project` instead) or wasn't within
    /// the last call's affected set.
    pub fn cell(&self, table: TableId, row: RowId, column: ColumnId) -> Option<&Cell> {
        self.state.computed_cells.get(&(table, row, column))
    }

    pub fn derived_rows(&self, table: TableId) -> Option<&DerivedResult> {
        self.state.derived_rows.get(&table)
    }

    pub fn document_variable(&self, document: DocumentId, name: &str) -> Option<FormulaValue> {
        match self.state.precomputed_doc_vars.get(&(document, name.to_ascii_lowercase()))? {
            PrecomputedEntry::Value(v) => Some(v.clone()),
            PrecomputedEntry::Errored => None,
        }
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.cached.as_ref().map(|c| &c.plan)
    }

    /// `EvaluateProject(project, request)` (§4.8).
    pub fn evaluate(
        &mut self,
        project: &Project,
        project_ref: ProjectRef,
        request: EvaluationRequest,
    ) -> Result<EvaluationMetrics, DocflowError> {
        let total_start = Instant::now();
        let ctx = ProjectContext::new(project);

        let force_rebuild = matches!(request, EvaluationRequest::StructuralIncremental { .. })
            || self.cached.as_ref().map(|c| c.project_ref) != Some(project_ref);

        let old_plan = if force_rebuild { self.cached.as_ref().map(|c| c.plan.clone()) } else { None };

        let compile_start = Instant::now();
        if force_rebuild {
            #[cfg(feature = "tracing")]
            tracing::debug!(project_ref, "rebuilding compile/plan cache");
            self.rebuild_cache(project, &ctx, project_ref)?;
        }
        let compile_ns = compile_start.elapsed().as_nanos() as u64;

        let plan_ns = if force_rebuild { compile_ns } else { 0 };
        let cached = self.cached.as_ref().expect("rebuilt or already cached above");

        let affected = self.compute_affected_set(&request, cached, old_plan.as_ref());

        let derived_start = Instant::now();
        let evaluate_start = Instant::now();
        let mut evaluated_table_count = 0usize;

        let full_eval = matches!(request, EvaluationRequest::Full);
        let targeted_by_table = match &request {
            EvaluationRequest::IncrementalTargeted { targeted_columns, .. } => Some(targeted_columns),
            _ => None,
        };

        let order = cached.plan.order.clone();
        for node in &order {
            if !full_eval && !affected.contains(node) {
                continue;
            }
            match node {
                NodeId::DocVar(doc_id, name) => {
                    self.evaluate_doc_var(&ctx, *doc_id, name);
                }
                NodeId::Table(table_id) => {
                    let Some(table) = project.table_by_id(*table_id) else { continue };
                    self.evaluate_table(&ctx, table, targeted_by_table);
                    evaluated_table_count += 1;
                }
            }
        }
        let derived_ns = derived_start.elapsed().as_nanos() as u64;
        let evaluate_ns = evaluate_start.elapsed().as_nanos() as u64;

        Ok(EvaluationMetrics {
            total: total_start.elapsed().as_nanos() as u64,
            compile: compile_ns,
            plan: plan_ns,
            derived: derived_ns,
            evaluate: evaluate_ns,
            evaluated_table_count,
            used_incremental_plan: !force_rebuild,
        })
    }

    fn rebuild_cache(
        &mut self,
        project: &Project,
        ctx: &ProjectContext,
        project_ref: ProjectRef,
    ) -> Result<(), DocflowError> {
        let mut compiled_columns = FxHashMap::default();
        let mut compiled_cells = FxHashMap::default();
        let mut compiled_table_vars = FxHashMap::default();
        let mut compiled_doc_vars = FxHashMap::default();

        for table in &project.tables {
            for column in &table.columns {
                if let Some(expr) = &column.formula {
                    compiled_columns.insert((table.id, column.id), docflow_parse::compile(expr, &self.registry));
                }
            }
            for row in &table.rows {
                for (col_id, cell) in &row.cells {
                    if let Some(expr) = &cell.formula {
                        compiled_cells.insert((table.id, row.id, *col_id), docflow_parse::compile(expr, &self.registry));
                    }
                }
            }
            for variable in &table.variables {
                compiled_table_vars.insert(
                    (table.id, variable.name.to_ascii_lowercase()),
                    docflow_parse::compile(&variable.expression, &self.registry),
                );
            }
        }
        for document in &project.documents {
            for name in document.variable_names() {
                if let Some(expr) = document.variable(name) {
                    compiled_doc_vars.insert(
                        (document.id, name.to_ascii_lowercase()),
                        docflow_parse::compile(expr, &self.registry),
                    );
                }
            }
        }

        let plan = build_plan(project, ctx, &self.registry).inspect_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %err, "dependency planning failed");
            #[cfg(not(feature = "tracing"))]
            let _ = err;
        })?;

        self.cached = Some(CompiledProject {
            project_ref,
            compiled_columns,
            compiled_cells,
            compiled_table_vars,
            compiled_doc_vars,
            plan,
        });
        Ok(())
    }

    fn compute_affected_set(
        &self,
        request: &EvaluationRequest,
        cached: &CompiledProject,
        old_plan: Option<&Plan>,
    ) -> rustc_hash::FxHashSet<NodeId> {
        match request {
            EvaluationRequest::Full => cached.plan.order.iter().cloned().collect(),
            EvaluationRequest::Incremental(tables) | EvaluationRequest::IncrementalTargeted { dirty_tables: tables, .. } => {
                let seeds = tables
                    .iter()
                    .map(|id| NodeId::Table(*id))
                    .filter(|n| cached.plan.table_nodes.contains(n));
                affected::transitive_affected(&cached.plan.dependents, seeds)
            }
            EvaluationRequest::IncrementalDocuments(doc_ids) => {
                let seeds = doc_ids
                    .iter()
                    .flat_map(|id| cached.plan.doc_var_nodes_by_document.get(id).cloned().unwrap_or_default());
                affected::transitive_affected(&cached.plan.dependents, seeds)
            }
            EvaluationRequest::StructuralIncremental { dirty_tables, dirty_documents } => {
                let new_seeds: Vec<NodeId> = dirty_tables
                    .iter()
                    .map(|id| NodeId::Table(*id))
                    .filter(|n| cached.plan.table_nodes.contains(n))
                    .chain(
                        dirty_documents
                            .iter()
                            .flat_map(|id| cached.plan.doc_var_nodes_by_document.get(id).cloned().unwrap_or_default()),
                    )
                    .collect();
                let new_affected = affected::transitive_affected(&cached.plan.dependents, new_seeds.clone());
                let Some(old_plan) = old_plan else { return new_affected };
                let old_seeds: Vec<NodeId> = dirty_tables
                    .iter()
                    .map(|id| NodeId::Table(*id))
                    .filter(|n| old_plan.table_nodes.contains(n))
                    .chain(
                        dirty_documents
                            .iter()
                            .flat_map(|id| old_plan.doc_var_nodes_by_document.get(id).cloned().unwrap_or_default()),
                    )
                    .collect();
                let old_affected = affected::transitive_affected(&old_plan.dependents, old_seeds);
                affected::merge_affected(old_affected, new_affected)
            }
        }
    }

    fn evaluate_doc_var(&mut self, ctx: &ProjectContext, doc_id: DocumentId, name: &str) {
        let cached = self.cached.as_ref().expect("cache populated before evaluation loop");
        let key = (doc_id, name.to_ascii_lowercase());
        let Some(CompiledFormula::Valid { ast, .. }) = cached.compiled_doc_vars.get(&key) else {
            self.state.precomputed_doc_vars.insert(key, PrecomputedEntry::Errored);
            return;
        };
        let mut interp = Interpreter::new(ctx, &self.registry, self.config).with_precomputed(&self.state.precomputed_doc_vars);
        interp.push_frame(EvaluationFrame::for_document(doc_id));
        let result = interp.eval(ast);
        let entry = match result {
            Ok(v) => PrecomputedEntry::Value(v),
            Err(_) => PrecomputedEntry::Errored,
        };
        self.state.precomputed_doc_vars.insert(key, entry);
    }

    fn evaluate_table(
        &mut self,
        ctx: &ProjectContext,
        table: &Table,
        targeted_by_table: Option<&FxHashMap<TableId, Vec<ColumnId>>>,
    ) {
        let cached = self.cached.as_ref().expect("cache populated before evaluation loop");

        if table.derived.is_some() {
            let result = resolve_derived_table(table, ctx);
            ctx.set_derived_overlay(table.id, table, result.rows.clone());
            self.state.derived_rows.insert(table.id, result);
        }

        let Some(working_table) = ctx.table_by_id(table.id) else { return };
        let working_table: Table = working_table.clone();

        let targeted_ids = targeted_by_table.and_then(|m| m.get(&table.id));
        let allowed_columns = targeted_ids.map(|ids| {
            let this_table_columns: FxHashMap<ColumnId, CompiledFormula> = cached
                .compiled_columns
                .iter()
                .filter(|((owner, _), _)| *owner == table.id)
                .map(|((_, column), compiled)| (*column, compiled.clone()))
                .collect();
            affected::targeted_columns_for_table(&working_table, ids, &this_table_columns)
        });

        for column in &working_table.columns {
            if let Some(allowed) = &allowed_columns {
                if !allowed.contains(&column.id) {
                    continue;
                }
            }
            let Some(compiled) = cached.compiled_columns.get(&(table.id, column.id)) else { continue };
            let CompiledFormula::Valid { ast, .. } = compiled else { continue };
            for (idx, row) in working_table.rows.iter().enumerate() {
                if row.cells.get(&column.id).and_then(|c| c.formula.as_ref()).is_some() {
                    // A per-cell formula overrides the column-level one for
                    // this row; it is handled by the `compiled_cells` pass
                    // below instead.
                    continue;
                }
                let mut interp = Interpreter::new(ctx, &self.registry, self.config);
                let value = interp
                    .eval_cell_formula(table.id, row.id, idx + 1, ast)
                    .unwrap_or(FormulaValue::Error);
                let cell = convert_to_cell(column.kind, &value, column.formula.as_deref(), ctx);
                self.state.computed_cells.insert((table.id, row.id, column.id), cell);
            }
        }

        for (idx, row) in working_table.rows.iter().enumerate() {
            for (col_id, cell_in) in &row.cells {
                let Some(compiled) = cached.compiled_cells.get(&(table.id, row.id, *col_id)) else { continue };
                let CompiledFormula::Valid { ast, .. } = compiled else { continue };
                let Some(column) = working_table.column_by_id(*col_id) else { continue };
                let mut interp = Interpreter::new(ctx, &self.registry, self.config);
                let value = interp
                    .eval_cell_formula(table.id, row.id, idx + 1, ast)
                    .unwrap_or(FormulaValue::Error);
                let cell = convert_to_cell(column.kind, &value, cell_in.formula.as_deref(), ctx);
                self.state.computed_cells.insert((table.id, row.id, *col_id), cell);
            }
        }
    }
}
