//! Dependency planner (§4.6, C6): builds a DAG of table nodes and compiled
//! document-variable nodes, topologically sorts it with Kahn's algorithm,
//! and recovers a cycle witness path via DFS when the sort doesn't consume
//! every node. Grounded on the in-degree/frontier Kahn loop in the
//! corpus's own spreadsheet-engine recalculation code
//! (`other_examples/..._wilson-anysphere-formula__...engine.rs`:
//! `recalculate_with_mode`'s `in_degree`/`current_level` loop) plus
//! `formualizer-eval/src/engine/graph.rs`'s dependents/dependencies
//! adjacency-list storage shape.
use std::collections::VecDeque;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use docflow_common::{ColumnKind, DocumentId, Project, Table, TableId};
use docflow_parse::ast::{AstKind, AstNode};
use docflow_parse::{CompiledFormula, TableArgHints, compile};

use crate::context::FormulaContext;

/// One node of the dependency DAG (§4.6): `table:{id}` or
/// `docvar:{docId}:{lowercase name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeId {
    Table(TableId),
    DocVar(DocumentId, String),
}

impl NodeId {
    /// Human-readable label used in cycle-witness messages (§7 kind 4,
    /// §8 scenario 4: `"table:A -> table:B -> table:A"`), resolving to the
    /// table/document's display name rather than its raw id so the
    /// message matches what an author actually named things.
    pub fn describe(&self, ctx: &dyn FormulaContext) -> String {
        match self {
            NodeId::Table(id) => {
                let name = ctx.table_by_id(*id).map(|t| t.name.as_str()).unwrap_or("?");
                format!("table:{name}")
            }
            NodeId::DocVar(doc_id, name) => {
                let doc_name = ctx
                    .document_by_id(*doc_id)
                    .map(|d| d.title.as_str())
                    .unwrap_or("?");
                format!("docvar:{doc_name}:{name}")
            }
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Table(id) => write!(f, "table:{id}"),
            NodeId::DocVar(doc, name) => write!(f, "docvar:{doc}:{name}"),
        }
    }
}

#[derive(Debug)]
pub struct PlanError {
    /// Arrow-joined cycle witness path (§4.6/§7: "raise an error with the
    /// arrow-joined path"), already resolved to display names.
    pub message: String,
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PlanError {}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub order: Vec<NodeId>,
    pub dependents: FxHashMap<NodeId, Vec<NodeId>>,
    pub dependencies: FxHashMap<NodeId, Vec<NodeId>>,
    pub table_nodes: FxHashSet<NodeId>,
    pub doc_var_nodes: FxHashMap<(DocumentId, String), NodeId>,
    pub doc_var_nodes_by_document: FxHashMap<DocumentId, Vec<NodeId>>,
}

/// Everything a single compiled-AST walk can tell the planner beyond what
/// `CompiledFormula`'s own summary already carries: document-variable
/// references precise enough to target a *specific* docvar node, and
/// whether this formula calls `graph.in(...)` (§4.6).
#[derive(Default)]
struct ExtraRefs {
    /// `thisDoc.X` — resolved against the formula's *own* document when
    /// compiling a document-variable expression; meaningless (and ignored)
    /// for table-scoped formulas, since those have no enclosing document
    /// frame (§SPEC_FULL Open Question: table formulas can still set
    /// `refs_document` structurally via `docs.alias.X`, but `thisDoc` only
    /// resolves inside a document frame per §4.7).
    this_doc_vars: Vec<String>,
    /// `@name` referenced while compiling another document variable's
    /// expression — a sibling variable reference (§8 scenario 5).
    at_idents: Vec<String>,
    /// `docs.alias.X` — resolvable from any scope, since the alias is
    /// explicit.
    docs_alias_vars: Vec<(String, String)>,
    /// `graph.in(...)` appeared anywhere in the formula.
    has_graph_in: bool,
}

fn scan_extra_refs(node: &AstNode, out: &mut ExtraRefs) {
    match &node.kind {
        AstKind::Literal(_) | AstKind::Ident(_) => {}
        AstKind::AtIdent(name) => out.at_idents.push(name.clone()),
        AstKind::Unary { expr, .. } => scan_extra_refs(expr, out),
        AstKind::Binary { left, right, .. } => {
            scan_extra_refs(left, out);
            scan_extra_refs(right, out);
        }
        AstKind::Ternary { cond, then, or_else } => {
            scan_extra_refs(cond, out);
            scan_extra_refs(then, out);
            scan_extra_refs(or_else, out);
        }
        AstKind::Member { base, name } => {
            match &base.kind {
                AstKind::Ident(b) if b.eq_ignore_ascii_case("thisdoc") => {
                    out.this_doc_vars.push(name.clone());
                    return;
                }
                AstKind::Member { base: inner_base, name: alias } => {
                    if let AstKind::Ident(b0) = &inner_base.kind {
                        if b0.eq_ignore_ascii_case("docs") {
                            out.docs_alias_vars.push((alias.clone(), name.clone()));
                            return;
                        }
                    }
                }
                _ => {}
            }
            scan_extra_refs(base, out);
        }
        AstKind::Call { callee, args } => {
            if let AstKind::Member { base, name } = &callee.kind {
                if name.eq_ignore_ascii_case("in") {
                    if let AstKind::Ident(b) = &base.kind {
                        if b.eq_ignore_ascii_case("graph") {
                            out.has_graph_in = true;
                        }
                    }
                }
            }
            scan_extra_refs(callee, out);
            for arg in args {
                scan_extra_refs(arg, out);
            }
        }
    }
}

struct EdgeSet {
    seen: FxHashSet<(NodeId, NodeId)>,
    dependents: FxHashMap<NodeId, Vec<NodeId>>,
    dependencies: FxHashMap<NodeId, Vec<NodeId>>,
}

impl EdgeSet {
    fn add(&mut self, dependency: NodeId, dependent: NodeId) {
        if dependency == dependent {
            // A formula referencing its own table/document by name is not a
            // structural cycle by itself (e.g. recursive aggregate methods
            // over `thisTable`'s own rows never reach here, since those use
            // `thisTable`, not a by-name reference) — but guard anyway so a
            // self-reference never manufactures a trivial unsatisfiable
            // topo order.
            return;
        }
        let key = (dependency.clone(), dependent.clone());
        if !self.seen.insert(key) {
            return;
        }
        self.dependents.entry(dependency.clone()).or_default().push(dependent.clone());
        self.dependencies.entry(dependent).or_default().push(dependency);
    }
}

/// Processes one compiled formula's dependency summary plus an extra-refs
/// scan, recording edges into `T`/`node` as the dependent (§4.6 bullets).
#[allow(clippy::too_many_arguments)]
fn record_formula_edges(
    source: &str,
    node: &NodeId,
    owning_table: Option<&Table>,
    owning_document: Option<DocumentId>,
    ctx: &dyn FormulaContext,
    hints: &dyn TableArgHints,
    edges: &mut EdgeSet,
    doc_var_nodes: &FxHashMap<(DocumentId, String), NodeId>,
) {
    if source.trim().is_empty() {
        return;
    }
    let compiled = compile(source, hints);
    let CompiledFormula::Valid { ast, referenced_tables, refs_parent, .. } = &compiled else {
        return;
    };

    for name in referenced_tables {
        if let Some(table) = ctx.table_by_name(name) {
            edges.add(NodeId::Table(table.id), node.clone());
        }
    }

    if *refs_parent {
        if let Some(table) = owning_table {
            if let Some((parent_id, _)) = table.parent {
                edges.add(NodeId::Table(parent_id), node.clone());
            }
        }
    }

    let mut extra = ExtraRefs::default();
    scan_extra_refs(ast, &mut extra);

    for (alias, var_name) in &extra.docs_alias_vars {
        if let Some(doc) = ctx.document_by_alias(alias) {
            if doc.variable(var_name).is_some() {
                let key = (doc.id, var_name.to_ascii_lowercase());
                if let Some(dep) = doc_var_nodes.get(&key) {
                    edges.add(dep.clone(), node.clone());
                }
            }
        }
    }

    if let Some(doc_id) = owning_document {
        if let Some(doc) = ctx.document_by_id(doc_id) {
            for var_name in extra.this_doc_vars.iter().chain(extra.at_idents.iter()) {
                if doc.variable(var_name).is_some() {
                    let key = (doc_id, var_name.to_ascii_lowercase());
                    if let Some(dep) = doc_var_nodes.get(&key) {
                        edges.add(dep.clone(), node.clone());
                    }
                }
            }
        }
    }

    if extra.has_graph_in {
        if let Some(table) = owning_table {
            if let Some(edges_col) = table
                .columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case("Edges") && matches!(c.kind, ColumnKind::Subtable))
            {
                if let Some(edge_table) = ctx.subtable_of(table.id, edges_col.id) {
                    edges.add(NodeId::Table(edge_table.id), node.clone());
                }
            }
        }
    }
}

/// Builds the dependency DAG and topologically sorts it (§4.6). Recompiles
/// every formula it visits purely to extract dependency edges — compiling
/// never evaluates (§4.2), so this duplicate compile work (the engine
/// façade separately caches `CompiledFormula` for evaluation) is cheap and
/// keeps the planner decoupled from the façade's cache lifetime.
pub fn build_plan(
    project: &Project,
    ctx: &dyn FormulaContext,
    hints: &dyn TableArgHints,
) -> Result<Plan, PlanError> {
    let mut nodes_in_order: Vec<NodeId> = Vec::new();
    let mut table_nodes: FxHashSet<NodeId> = FxHashSet::default();
    let mut doc_var_nodes: FxHashMap<(DocumentId, String), NodeId> = FxHashMap::default();
    let mut doc_var_nodes_by_document: FxHashMap<DocumentId, Vec<NodeId>> = FxHashMap::default();

    for table in &project.tables {
        let node = NodeId::Table(table.id);
        table_nodes.insert(node.clone());
        nodes_in_order.push(node);
    }
    for document in &project.documents {
        for name in document.variable_names() {
            let key = (document.id, name.to_ascii_lowercase());
            let node = NodeId::DocVar(document.id, name.to_ascii_lowercase());
            doc_var_nodes.entry(key).or_insert_with(|| node.clone());
            doc_var_nodes_by_document.entry(document.id).or_default().push(node.clone());
            nodes_in_order.push(node);
        }
    }

    let mut edges = EdgeSet {
        seen: FxHashSet::default(),
        dependents: FxHashMap::default(),
        dependencies: FxHashMap::default(),
    };
    for node in &nodes_in_order {
        edges.dependents.entry(node.clone()).or_default();
        edges.dependencies.entry(node.clone()).or_default();
    }

    for table in &project.tables {
        let node = NodeId::Table(table.id);

        for column in &table.columns {
            if let Some(expr) = &column.formula {
                record_formula_edges(expr, &node, Some(table), None, ctx, hints, &mut edges, &doc_var_nodes);
            }
        }
        for row in &table.rows {
            for cell in row.cells.values() {
                if let Some(expr) = &cell.formula {
                    record_formula_edges(expr, &node, Some(table), None, ctx, hints, &mut edges, &doc_var_nodes);
                }
            }
        }
        for variable in &table.variables {
            record_formula_edges(
                &variable.expression,
                &node,
                Some(table),
                None,
                ctx,
                hints,
                &mut edges,
                &doc_var_nodes,
            );
        }

        if let Some(derived) = &table.derived {
            if let Some(base_id) = derived.base_table {
                edges.add(NodeId::Table(base_id), node.clone());
            }
            for step in &derived.steps {
                let source = match step {
                    docflow_common::DerivedStep::Append { source_table, .. } => *source_table,
                    docflow_common::DerivedStep::Join { source_table, .. } => *source_table,
                };
                edges.add(NodeId::Table(source), node.clone());
            }
        }
    }

    for document in &project.documents {
        for name in document.variable_names() {
            let node = NodeId::DocVar(document.id, name.to_ascii_lowercase());
            if let Some(expr) = document.variable(name) {
                record_formula_edges(
                    expr,
                    &node,
                    None,
                    Some(document.id),
                    ctx,
                    hints,
                    &mut edges,
                    &doc_var_nodes,
                );
            }
        }
    }

    let order = topo_sort(&nodes_in_order, &edges.dependents, &edges.dependencies, ctx)?;

    Ok(Plan {
        order,
        dependents: edges.dependents,
        dependencies: edges.dependencies,
        table_nodes,
        doc_var_nodes,
        doc_var_nodes_by_document,
    })
}

/// Kahn's algorithm with an explicit in-degree map and a `VecDeque`
/// frontier (push to back, pop from front) — the exact shape of the
/// corpus's own recalculation loop. Seeds in insertion order so the result
/// is stable across runs on an unchanged project (§5, §8).
fn topo_sort(
    nodes_in_order: &[NodeId],
    dependents: &FxHashMap<NodeId, Vec<NodeId>>,
    dependencies: &FxHashMap<NodeId, Vec<NodeId>>,
    ctx: &dyn FormulaContext,
) -> Result<Vec<NodeId>, PlanError> {
    let mut in_degree: FxHashMap<NodeId, usize> = nodes_in_order
        .iter()
        .map(|n| (n.clone(), dependencies.get(n).map(Vec::len).unwrap_or(0)))
        .collect();

    let mut queue: VecDeque<NodeId> = nodes_in_order
        .iter()
        .filter(|n| in_degree.get(*n).copied().unwrap_or(0) == 0)
        .cloned()
        .collect();

    let mut order = Vec::with_capacity(nodes_in_order.len());
    while let Some(node) = queue.pop_front() {
        order.push(node.clone());
        if let Some(children) = dependents.get(&node) {
            for child in children {
                if let Some(entry) = in_degree.get_mut(child) {
                    *entry = entry.saturating_sub(1);
                    if *entry == 0 {
                        queue.push_back(child.clone());
                    }
                }
            }
        }
    }

    if order.len() < nodes_in_order.len() {
        let cycle = find_cycle(nodes_in_order, dependents);
        let path = cycle
            .iter()
            .map(|n| n.describe(ctx))
            .collect::<Vec<_>>()
            .join(" -> ");
        return Err(PlanError {
            message: format!("dependency cycle: {path}"),
        });
    }

    Ok(order)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Recovers one cycle witness path via 3-color DFS over the `dependents`
/// adjacency (§4.6/§7: "DFS ... recover a cycle witness"), joined in
/// traversal order so e.g. `A -> B -> A` reads as the edges actually
/// walked, not an arbitrary rotation.
fn find_cycle(nodes_in_order: &[NodeId], dependents: &FxHashMap<NodeId, Vec<NodeId>>) -> Vec<NodeId> {
    let mut color: FxHashMap<NodeId, Color> =
        nodes_in_order.iter().cloned().map(|n| (n, Color::White)).collect();
    let mut stack: Vec<NodeId> = Vec::new();

    for start in nodes_in_order {
        if color.get(start).copied().unwrap_or(Color::White) != Color::White {
            continue;
        }
        if let Some(cycle) = dfs_visit(start, dependents, &mut color, &mut stack) {
            return cycle;
        }
    }
    Vec::new()
}

fn dfs_visit(
    node: &NodeId,
    dependents: &FxHashMap<NodeId, Vec<NodeId>>,
    color: &mut FxHashMap<NodeId, Color>,
    stack: &mut Vec<NodeId>,
) -> Option<Vec<NodeId>> {
    color.insert(node.clone(), Color::Gray);
    stack.push(node.clone());
    if let Some(children) = dependents.get(node) {
        for child in children {
            match color.get(child).copied().unwrap_or(Color::White) {
                Color::White => {
                    if let Some(cycle) = dfs_visit(child, dependents, color, stack) {
                        return Some(cycle);
                    }
                }
                Color::Gray => {
                    let start_idx = stack.iter().position(|n| n == child).expect("gray node is on stack");
                    let mut cycle: Vec<NodeId> = stack[start_idx..].to_vec();
                    cycle.push(child.clone());
                    return Some(cycle);
                }
                Color::Black => {}
            }
        }
    }
    stack.pop();
    color.insert(node.clone(), Color::Black);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_common::{Column, Document, DocumentId, Project, Row, RowId, Table, TableId};
    use docflow_parse::NoTableArgHints;

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
        fn document_by_alias(&self, alias: &str) -> Option<&Document> {
            self.project
                .documents
                .iter()
                .find(|d| d.file_name.eq_ignore_ascii_case(alias) || d.title.eq_ignore_ascii_case(alias))
        }
        fn document_by_id(&self, id: DocumentId) -> Option<&Document> {
            self.project.document_by_id(id)
        }
    }

    fn formula_table(id: u64, name: &str, formula: &str) -> Table {
        let mut t = Table::new(TableId::new(id), name);
        let mut col = Column::new(docflow_common::ColumnId::new(1), "F", ColumnKind::Formula);
        col.formula = Some(formula.to_string());
        t.columns.push(col);
        t.rows.push(Row::new(RowId::new(1)));
        t
    }

    #[test]
    fn simple_chain_sorts_dependency_first() {
        let a = formula_table(1, "A", "1");
        let b = formula_table(2, "B", "tables.A.F");
        let project = Project { tables: vec![a, b], documents: vec![] };
        let ctx = TestCtx { project };
        let plan = build_plan(&ctx.project, &ctx, &NoTableArgHints).unwrap();
        let pos_a = plan.order.iter().position(|n| *n == NodeId::Table(TableId::new(1))).unwrap();
        let pos_b = plan.order.iter().position(|n| *n == NodeId::Table(TableId::new(2))).unwrap();
        assert!(pos_a < pos_b);
    }

    #[test]
    fn two_cycle_is_detected_with_named_path() {
        let a = formula_table(1, "A", "tables.B.F");
        let b = formula_table(2, "B", "tables.A.F");
        let project = Project { tables: vec![a, b], documents: vec![] };
        let ctx = TestCtx { project };
        let err = build_plan(&ctx.project, &ctx, &NoTableArgHints).unwrap_err();
        assert!(err.message.contains("table:A"));
        assert!(err.message.contains("table:B"));
        assert!(err.message.contains("->"));
    }

    #[test]
    fn document_variable_cycle_detected() {
        let doc_id = DocumentId::new(1);
        let doc = Document {
            id: doc_id,
            title: "Doc".to_string(),
            file_name: "doc.md".to_string(),
            blocks: vec![
                docflow_common::Block::Variable { name: "price".to_string(), expression: "@tax * 5".to_string() },
                docflow_common::Block::Variable { name: "tax".to_string(), expression: "@price * 0.2".to_string() },
            ],
        };
        let project = Project { tables: vec![], documents: vec![doc] };
        let ctx = TestCtx { project };
        let err = build_plan(&ctx.project, &ctx, &NoTableArgHints).unwrap_err();
        assert!(err.message.contains("price"));
        assert!(err.message.contains("tax"));
    }

    #[test]
    fn derived_table_depends_on_base_and_sources() {
        let base = Table::new(TableId::new(1), "Base");
        let source = Table::new(TableId::new(2), "Source");
        let mut derived = Table::new(TableId::new(3), "Derived");
        derived.derived = Some(docflow_common::DerivedConfig {
            base_table: Some(base.id),
            steps: vec![docflow_common::DerivedStep::Append { source_table: source.id, origin_override: None }],
            projections: vec![],
            suppressed_projections: vec![],
            filter_expression: None,
        });
        let project = Project { tables: vec![base, source, derived], documents: vec![] };
        let ctx = TestCtx { project };
        let plan = build_plan(&ctx.project, &ctx, &NoTableArgHints).unwrap();
        let pos_base = plan.order.iter().position(|n| *n == NodeId::Table(TableId::new(1))).unwrap();
        let pos_source = plan.order.iter().position(|n| *n == NodeId::Table(TableId::new(2))).unwrap();
        let pos_derived = plan.order.iter().position(|n| *n == NodeId::Table(TableId::new(3))).unwrap();
        assert!(pos_base < pos_derived);
        assert!(pos_source < pos_derived);
    }
}
