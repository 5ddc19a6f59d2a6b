//! The evaluator (§4.7, C7): a recursive interpreter over the compiled AST.
//! Grounded on the teacher's tree-walking interpreter
//! (`formualizer_eval::interpreter::Interpreter`) — same shape (a stack of
//! evaluation frames, memoized variable lookups with cycle detection
//! raised as an error rather than swallowed to `Null`), adapted from a
//! spreadsheet's `(sheet, row, col)` coordinate space to this model's
//! `(table, row)`/`(document, variable)` one.
use std::error::Error;
use std::fmt;

use chrono::{Datelike, Duration};
use rustc_hash::FxHashMap;

use docflow_common::{CellValue, ColumnId, ColumnKind, DocumentId, FormulaValue, LiteralValue, RowId, Table, TableId};
use docflow_parse::ast::{AstKind, AstNode, BinOp, UnOp};

use crate::config::EngineConfig;
use crate::context::FormulaContext;
use crate::registry::FunctionRegistry;

/// Raised only for what §4.7 calls a "runtime" failure: a variable cycle
/// discovered during evaluation, or misuse of a precomputed entry the
/// caller already marked errored. Everything else (missing table/column,
/// wrong operand types, division by zero) resolves locally to
/// `FormulaValue::Null`/`Error` rather than unwinding, per §4.7's
/// "Failure: caught at the cell boundary" policy.
#[derive(Debug, Clone)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn cycle(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for EvalError {}

/// A document variable the engine precomputed up front (§4.6/§4.7:
/// top-level document variables may be supplied precomputed for
/// incremental evaluation). An errored entry re-raises rather than
/// silently becoming `Null`, so the cycle/error it carries isn't masked.
#[derive(Debug, Clone)]
pub enum PrecomputedEntry {
    Value(FormulaValue),
    Errored,
}

pub type PrecomputedVars = FxHashMap<(DocumentId, String), PrecomputedEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VarScope {
    Table(TableId),
    Document(DocumentId),
}

type VarMapKey = (VarScope, String);

#[derive(Debug, Clone)]
enum VarState {
    Evaluating,
    Done(FormulaValue),
}

/// One level of evaluation context (§3 `EvaluationFrame`): the row/table a
/// formula is compiled against, the candidate row a method-call predicate
/// is currently scoped to, and the parent row/table a subtable's formulas
/// can reach via `parentRow`/`parentTable`.
#[derive(Debug, Clone, Default)]
pub struct EvaluationFrame {
    pub current_table: Option<TableId>,
    pub current_row: Option<RowId>,
    pub current_row_index1: usize,
    pub current_document: Option<DocumentId>,
    pub candidate_table: Option<TableId>,
    pub candidate_row: Option<RowId>,
    pub candidate_row_index1: usize,
    pub parent_table: Option<TableId>,
    pub parent_row: Option<RowId>,
    pub parent_row_index1: usize,
}

impl EvaluationFrame {
    pub fn for_row(table: TableId, row: RowId, row_index1: usize) -> Self {
        Self {
            current_table: Some(table),
            current_row: Some(row),
            current_row_index1: row_index1,
            ..Default::default()
        }
    }

    pub fn for_document(document: DocumentId) -> Self {
        Self {
            current_document: Some(document),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, table: TableId, row: RowId, row_index1: usize) -> Self {
        self.parent_table = Some(table);
        self.parent_row = Some(row);
        self.parent_row_index1 = row_index1;
        self
    }
}

pub struct Interpreter<'a> {
    ctx: &'a dyn FormulaContext,
    registry: &'a FunctionRegistry,
    config: EngineConfig,
    precomputed: Option<&'a PrecomputedVars>,
    frames: Vec<EvaluationFrame>,
    var_state: FxHashMap<VarMapKey, VarState>,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: &'a dyn FormulaContext, registry: &'a FunctionRegistry, config: EngineConfig) -> Self {
        Self {
            ctx,
            registry,
            config,
            precomputed: None,
            frames: vec![EvaluationFrame::default()],
            var_state: FxHashMap::default(),
        }
    }

    pub fn with_precomputed(mut self, precomputed: &'a PrecomputedVars) -> Self {
        self.precomputed = Some(precomputed);
        self
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub fn context(&self) -> &'a dyn FormulaContext {
        self.ctx
    }

    pub fn push_frame(&mut self, frame: EvaluationFrame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    fn frame(&self) -> &EvaluationFrame {
        self.frames.last().expect("at least one frame always present")
    }

    /// Evaluates a compiled formula's AST against the row currently
    /// on top of the frame stack, returning the engine-boundary result
    /// (§4.7 entry point used by `docflow-workbook`).
    pub fn eval_cell_formula(&mut self, table: TableId, row: RowId, row_index1: usize, ast: &AstNode) -> Result<FormulaValue, EvalError> {
        self.push_frame(EvaluationFrame::for_row(table, row, row_index1));
        let result = self.eval(ast);
        self.pop_frame();
        result
    }

    pub fn eval(&mut self, node: &AstNode) -> Result<FormulaValue, EvalError> {
        match &node.kind {
            AstKind::Literal(lit) => Ok(FormulaValue::from_literal(lit)),
            AstKind::Ident(name) => self.eval_ident(name),
            AstKind::AtIdent(name) => self.eval_at_ident(name),
            AstKind::Unary { op, expr } => self.eval_unary(*op, expr),
            AstKind::Binary { op, left, right } => self.eval_binary(*op, left, right),
            AstKind::Ternary { cond, then, or_else } => {
                let c = self.eval(cond)?;
                if c.is_truthy() { self.eval(then) } else { self.eval(or_else) }
            }
            AstKind::Member { base, name } => self.eval_member(base, name),
            AstKind::Call { callee, args } => self.eval_call(callee, args),
        }
    }

    fn eval_ident(&mut self, name: &str) -> Result<FormulaValue, EvalError> {
        let frame = self.frame().clone();
        let lower = name.to_ascii_lowercase();
        Ok(match lower.as_str() {
            "thisrow" => frame.current_row.map(FormulaValue::Row).unwrap_or(FormulaValue::Null),
            "thistable" => frame.current_table.map(FormulaValue::Table).unwrap_or(FormulaValue::Null),
            "thisrowindex" => FormulaValue::Number(frame.current_row_index1 as f64),
            "parentrow" => frame.parent_row.map(FormulaValue::Row).unwrap_or(FormulaValue::Null),
            "parenttable" => frame.parent_table.map(FormulaValue::Table).unwrap_or(FormulaValue::Null),
            "thisdoc" => frame.current_document.map(FormulaValue::Document).unwrap_or(FormulaValue::Null),
            _ => self
                .ctx
                .table_by_name(name)
                .map(|t| FormulaValue::Table(t.id))
                .unwrap_or(FormulaValue::Null),
        })
    }

    /// `@name`: a document variable inside a document frame, otherwise a
    /// candidate-row column or `@rowIndex` (§4.2, §4.7).
    fn eval_at_ident(&mut self, name: &str) -> Result<FormulaValue, EvalError> {
        let frame = self.frame().clone();
        if let Some(doc) = frame.current_document {
            return self.eval_document_variable(doc, name);
        }
        let table = frame.candidate_table.or(frame.current_table);
        let row = frame.candidate_row.or(frame.current_row);
        let row_index1 = if frame.candidate_row.is_some() {
            frame.candidate_row_index1
        } else {
            frame.current_row_index1
        };
        if name.eq_ignore_ascii_case("rowindex") {
            return Ok(FormulaValue::Number(row_index1 as f64));
        }
        let (Some(table), Some(row)) = (table, row) else {
            return Ok(FormulaValue::Null);
        };
        Ok(self.read_row_column(table, row, name))
    }

    fn read_row_column(&self, table: TableId, row: RowId, column_name: &str) -> FormulaValue {
        let Some(table) = self.ctx.table_by_id(table) else { return FormulaValue::Null };
        if column_name.eq_ignore_ascii_case("rowindex") {
            let idx = table.row_index(row).unwrap_or(0);
            return FormulaValue::Number(idx as f64);
        }
        let Some(column) = table.column_by_name(column_name) else { return FormulaValue::Null };
        let Some(row) = table.row_by_id(row) else { return FormulaValue::Null };
        docflow_common::cell_to_formula_value(&row.cell(column.id))
    }

    fn eval_unary(&mut self, op: UnOp, expr: &AstNode) -> Result<FormulaValue, EvalError> {
        let v = self.eval(expr)?;
        Ok(match op {
            UnOp::Not => FormulaValue::Bool(!v.is_truthy()),
            UnOp::Neg => match v {
                FormulaValue::Number(n) => FormulaValue::Number(-n),
                FormulaValue::Vec2(x, y) => FormulaValue::Vec2(-x, -y),
                FormulaValue::Vec3(x, y, z) => FormulaValue::Vec3(-x, -y, -z),
                FormulaValue::Vec4(x, y, z, w) => FormulaValue::Vec4(-x, -y, -z, -w),
                _ => FormulaValue::Error,
            },
        })
    }

    fn eval_binary(&mut self, op: BinOp, left: &AstNode, right: &AstNode) -> Result<FormulaValue, EvalError> {
        if op == BinOp::And {
            let l = self.eval(left)?;
            if !l.is_truthy() {
                return Ok(FormulaValue::Bool(false));
            }
            let r = self.eval(right)?;
            return Ok(FormulaValue::Bool(r.is_truthy()));
        }
        if op == BinOp::Or {
            let l = self.eval(left)?;
            if l.is_truthy() {
                return Ok(FormulaValue::Bool(true));
            }
            let r = self.eval(right)?;
            return Ok(FormulaValue::Bool(r.is_truthy()));
        }
        let l = self.eval(left)?;
        let r = self.eval(right)?;
        Ok(apply_binary(op, &l, &r, self.config))
    }

    fn eval_member(&mut self, base: &AstNode, name: &str) -> Result<FormulaValue, EvalError> {
        if let AstKind::Ident(base_name) = &base.kind {
            if base_name.eq_ignore_ascii_case("tables") {
                return Ok(self
                    .ctx
                    .table_by_name(name)
                    .map(|t| FormulaValue::Table(t.id))
                    .unwrap_or(FormulaValue::Null));
            }
            if base_name.eq_ignore_ascii_case("docs") {
                return Ok(self
                    .ctx
                    .document_by_alias(name)
                    .map(|d| FormulaValue::Document(d.id))
                    .unwrap_or(FormulaValue::Null));
            }
        }
        let receiver = self.eval(base)?;
        self.dispatch_member(receiver, name)
    }

    fn dispatch_member(&mut self, receiver: FormulaValue, name: &str) -> Result<FormulaValue, EvalError> {
        match receiver {
            FormulaValue::Table(table_id) => self.eval_table_variable(table_id, name),
            FormulaValue::Document(doc_id) => self.eval_document_variable(doc_id, name),
            FormulaValue::Row(row_id) => {
                let Some(table) = self.find_owning_table(row_id) else { return Ok(FormulaValue::Null) };
                Ok(self.read_row_column(table.id, row_id, name))
            }
            FormulaValue::DateTime(dt) => Ok(match name.to_ascii_lowercase().as_str() {
                "year" => FormulaValue::Number(dt.year() as f64),
                "month" => FormulaValue::Number(dt.month() as f64),
                "day" => FormulaValue::Number(dt.day() as f64),
                _ => FormulaValue::Null,
            }),
            FormulaValue::Vec2(x, y) => Ok(match name.to_ascii_lowercase().as_str() {
                "x" => FormulaValue::Number(x),
                "y" => FormulaValue::Number(y),
                _ => FormulaValue::Null,
            }),
            FormulaValue::Vec3(x, y, z) => Ok(match name.to_ascii_lowercase().as_str() {
                "x" => FormulaValue::Number(x),
                "y" => FormulaValue::Number(y),
                "z" => FormulaValue::Number(z),
                _ => FormulaValue::Null,
            }),
            FormulaValue::Vec4(x, y, z, w) => Ok(match name.to_ascii_lowercase().as_str() {
                "x" => FormulaValue::Number(x),
                "y" => FormulaValue::Number(y),
                "z" => FormulaValue::Number(z),
                "w" => FormulaValue::Number(w),
                _ => FormulaValue::Null,
            }),
            FormulaValue::Color(r, g, b, a) => Ok(match name.to_ascii_lowercase().as_str() {
                "r" => FormulaValue::Number(r),
                "g" => FormulaValue::Number(g),
                "b" => FormulaValue::Number(b),
                "a" => FormulaValue::Number(a),
                _ => FormulaValue::Null,
            }),
            FormulaValue::Text(s) => Ok(if name.eq_ignore_ascii_case("length") {
                FormulaValue::Number(s.chars().count() as f64)
            } else {
                FormulaValue::Null
            }),
            _ => Ok(FormulaValue::Null),
        }
    }

    fn find_owning_table(&self, row: RowId) -> Option<&'a Table> {
        self.ctx.tables().iter().find(|t| t.row_by_id(row).is_some())
    }

    fn eval_table_variable(&mut self, table: TableId, name: &str) -> Result<FormulaValue, EvalError> {
        let Some(table_ref) = self.ctx.table_by_id(table) else { return Ok(FormulaValue::Null) };
        let Some(expr) = self.ctx.table_variable_expr(table_ref, name) else { return Ok(FormulaValue::Null) };
        let expr = expr.to_string();
        let key: VarMapKey = (VarScope::Table(table), name.to_ascii_lowercase());
        let mut frame = EvaluationFrame::default();
        frame.current_table = Some(table);
        self.eval_variable_expr(key, &expr, frame)
    }

    fn eval_document_variable(&mut self, document: DocumentId, name: &str) -> Result<FormulaValue, EvalError> {
        if let Some(precomputed) = self.precomputed {
            if let Some(entry) = precomputed.get(&(document, name.to_ascii_lowercase())) {
                return match entry {
                    PrecomputedEntry::Value(v) => Ok(v.clone()),
                    PrecomputedEntry::Errored => Err(EvalError::cycle(format!(
                        "document variable '{name}' on {document} was precomputed as errored"
                    ))),
                };
            }
        }
        let Some(doc) = self.ctx.document_by_id(document) else { return Ok(FormulaValue::Null) };
        let Some(expr) = self.ctx.document_variable_expr(doc, name) else { return Ok(FormulaValue::Null) };
        let expr = expr.to_string();
        let key: VarMapKey = (VarScope::Document(document), name.to_ascii_lowercase());
        self.eval_variable_expr(key, &expr, EvaluationFrame::for_document(document))
    }

    fn eval_variable_expr(
        &mut self,
        key: VarMapKey,
        expr: &str,
        frame: EvaluationFrame,
    ) -> Result<FormulaValue, EvalError> {
        if let Some(state) = self.var_state.get(&key) {
            return match state {
                VarState::Done(v) => Ok(v.clone()),
                VarState::Evaluating => Err(EvalError::cycle(format!(
                    "cycle evaluating variable '{}'",
                    key.1
                ))),
            };
        }
        self.var_state.insert(key.clone(), VarState::Evaluating);
        let ast = match docflow_parse::parse(expr) {
            Ok(ast) => ast,
            Err(_) => AstNode::null(),
        };
        self.push_frame(frame);
        let result = self.eval(&ast);
        self.pop_frame();
        match &result {
            Ok(v) => {
                self.var_state.insert(key, VarState::Done(v.clone()));
            }
            Err(_) => {
                self.var_state.remove(&key);
            }
        }
        result
    }

    fn eval_call(&mut self, callee: &AstNode, args: &[AstNode]) -> Result<FormulaValue, EvalError> {
        if let AstKind::Member { base, name } = &callee.kind {
            let lname = name.to_ascii_lowercase();
            if lname == "in" {
                if let AstKind::Ident(b) = &base.kind {
                    if b.eq_ignore_ascii_case("graph") {
                        return self.eval_graph_in(args);
                    }
                }
            }
            if matches!(
                lname.as_str(),
                "filter" | "count" | "first" | "sum" | "average" | "sort" | "variant"
            ) {
                return self.eval_method_call(base, &lname, args);
            }
        }
        if let AstKind::Ident(name) = &callee.kind {
            let lname = name.to_ascii_lowercase();
            return match lname.as_str() {
                "if" => self.eval_if(args),
                "lookup" => self.eval_lookup(args),
                "countif" => self.eval_countif(args),
                "sumif" => self.eval_sumif(args),
                _ => {
                    let mut evaluated = Vec::with_capacity(args.len());
                    for a in args {
                        evaluated.push(self.eval(a)?);
                    }
                    self.registry.call(name, &evaluated, self)
                }
            };
        }
        Ok(FormulaValue::Null)
    }

    fn eval_if(&mut self, args: &[AstNode]) -> Result<FormulaValue, EvalError> {
        if args.len() < 3 {
            return Ok(FormulaValue::Null);
        }
        let cond = self.eval(&args[0])?;
        if cond.is_truthy() { self.eval(&args[1]) } else { self.eval(&args[2]) }
    }

    fn resolve_table_ref_ast(&self, ast: &AstNode) -> Option<TableId> {
        match &ast.kind {
            AstKind::Ident(name) => self.ctx.table_by_name(name).map(|t| t.id),
            AstKind::Literal(LiteralValue::Text(name)) => {
                self.ctx.table_by_name(name).map(|t| t.id)
            }
            AstKind::Member { base, name } => match &base.kind {
                AstKind::Ident(b) if b.eq_ignore_ascii_case("tables") => {
                    self.ctx.table_by_name(name).map(|t| t.id)
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn eval_lookup(&mut self, args: &[AstNode]) -> Result<FormulaValue, EvalError> {
        if args.len() < 2 {
            return Ok(FormulaValue::Null);
        }
        let Some(table_id) = self.resolve_table_ref_ast(&args[0]) else { return Ok(FormulaValue::Null) };
        let Some(table) = self.ctx.table_by_id(table_id) else { return Ok(FormulaValue::Null) };
        let row_ids: Vec<RowId> = table.rows.iter().map(|r| r.id).collect();
        for (idx, row_id) in row_ids.iter().enumerate() {
            let matched = self.eval_with_candidate(table_id, *row_id, idx + 1, &args[1])?;
            if matched.is_truthy() {
                if let Some(selector) = args.get(2) {
                    return self.eval_with_candidate(table_id, *row_id, idx + 1, selector);
                }
                return Ok(FormulaValue::Row(*row_id));
            }
        }
        Ok(FormulaValue::Null)
    }

    fn eval_countif(&mut self, args: &[AstNode]) -> Result<FormulaValue, EvalError> {
        if args.len() < 2 {
            return Ok(FormulaValue::Number(0.0));
        }
        let Some(table_id) = self.resolve_table_ref_ast(&args[0]) else { return Ok(FormulaValue::Number(0.0)) };
        let Some(table) = self.ctx.table_by_id(table_id) else { return Ok(FormulaValue::Number(0.0)) };
        let row_ids: Vec<RowId> = table.rows.iter().map(|r| r.id).collect();
        let mut count = 0.0;
        for (idx, row_id) in row_ids.iter().enumerate() {
            if self.eval_with_candidate(table_id, *row_id, idx + 1, &args[1])?.is_truthy() {
                count += 1.0;
            }
        }
        Ok(FormulaValue::Number(count))
    }

    fn eval_sumif(&mut self, args: &[AstNode]) -> Result<FormulaValue, EvalError> {
        if args.len() < 3 {
            return Ok(FormulaValue::Number(0.0));
        }
        let Some(table_id) = self.resolve_table_ref_ast(&args[0]) else { return Ok(FormulaValue::Number(0.0)) };
        let Some(table) = self.ctx.table_by_id(table_id) else { return Ok(FormulaValue::Number(0.0)) };
        let row_ids: Vec<RowId> = table.rows.iter().map(|r| r.id).collect();
        let mut total = 0.0;
        for (idx, row_id) in row_ids.iter().enumerate() {
            if self.eval_with_candidate(table_id, *row_id, idx + 1, &args[1])?.is_truthy() {
                if let FormulaValue::Number(n) = self.eval_with_candidate(table_id, *row_id, idx + 1, &args[2])? {
                    total += n;
                }
            }
        }
        Ok(FormulaValue::Number(total))
    }

    fn eval_with_candidate(
        &mut self,
        table: TableId,
        row: RowId,
        row_index1: usize,
        ast: &AstNode,
    ) -> Result<FormulaValue, EvalError> {
        let mut frame = self.frame().clone();
        frame.candidate_table = Some(table);
        frame.candidate_row = Some(row);
        frame.candidate_row_index1 = row_index1;
        self.push_frame(frame);
        let result = self.eval(ast);
        self.pop_frame();
        result
    }

    /// Resolves the AST of a method-call receiver to `(table, rows)`,
    /// re-deriving table identity structurally at each link of a chain
    /// rather than threading it through `FormulaValue::Rows`, which (per
    /// §3/§4.1) carries only row ids.
    fn resolve_collection(&mut self, ast: &AstNode) -> Result<Option<(TableId, Vec<RowId>)>, EvalError> {
        if let AstKind::Member { base, name } = &ast.kind {
            if let AstKind::Ident(b) = &base.kind {
                if b.eq_ignore_ascii_case("tables") {
                    return Ok(self
                        .ctx
                        .table_by_name(name)
                        .map(|t| (t.id, t.rows.iter().map(|r| r.id).collect())));
                }
            }
        }
        if let AstKind::Ident(name) = &ast.kind {
            return Ok(self
                .ctx
                .table_by_name(name)
                .map(|t| (t.id, t.rows.iter().map(|r| r.id).collect())));
        }
        if let AstKind::Call { callee, args } = &ast.kind {
            if let AstKind::Member { base, name } = &callee.kind {
                let lname = name.to_ascii_lowercase();
                if lname == "filter" {
                    let Some((table_id, rows)) = self.resolve_collection(base)? else { return Ok(None) };
                    let Some(pred) = args.first() else { return Ok(Some((table_id, rows))) };
                    let filtered = self.filter_rows(table_id, &rows, pred)?;
                    return Ok(Some((table_id, filtered)));
                }
                if lname == "sort" {
                    let Some((table_id, rows)) = self.resolve_collection(base)? else { return Ok(None) };
                    let sorted = self.sort_rows(table_id, rows, args.first())?;
                    return Ok(Some((table_id, sorted)));
                }
            }
        }
        match self.eval(ast)? {
            FormulaValue::Table(t) => Ok(self
                .ctx
                .table_by_id(t)
                .map(|tb| (t, tb.rows.iter().map(|r| r.id).collect()))),
            _ => Ok(None),
        }
    }

    fn filter_rows(&mut self, table: TableId, rows: &[RowId], pred: &AstNode) -> Result<Vec<RowId>, EvalError> {
        let mut out = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            if self.eval_with_candidate(table, *row, idx + 1, pred)?.is_truthy() {
                out.push(*row);
            }
        }
        Ok(out)
    }

    fn sort_rows(&mut self, table: TableId, rows: Vec<RowId>, expr: Option<&AstNode>) -> Result<Vec<RowId>, EvalError> {
        let Some(expr) = expr else { return Ok(rows) };
        let mut keyed = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let key = self.eval_with_candidate(table, *row, idx + 1, expr)?;
            keyed.push((key, *row));
        }
        keyed.sort_by(|a, b| compare_for_sort(&a.0, &b.0, self.config.numeric_epsilon));
        Ok(keyed.into_iter().map(|(_, id)| id).collect())
    }

    fn eval_method_call(&mut self, receiver_ast: &AstNode, method: &str, args: &[AstNode]) -> Result<FormulaValue, EvalError> {
        if method == "variant" {
            let recv = self.eval(receiver_ast)?;
            let FormulaValue::Table(table_id) = recv else { return Ok(FormulaValue::Null) };
            let Some(arg0) = args.first() else { return Ok(FormulaValue::Null) };
            let id_or_name = self.eval(arg0)?.display_value();
            return Ok(self
                .ctx
                .resolve_variant(table_id, &id_or_name)
                .map(FormulaValue::Table)
                .unwrap_or(FormulaValue::Null));
        }
        let Some((table_id, rows)) = self.resolve_collection(receiver_ast)? else {
            return Ok(match method {
                "count" => FormulaValue::Number(0.0),
                "sum" => FormulaValue::Number(0.0),
                "filter" | "sort" => FormulaValue::Rows(Vec::new()),
                _ => FormulaValue::Null,
            });
        };
        match method {
            "count" => Ok(FormulaValue::Number(rows.len() as f64)),
            "first" => Ok(rows.first().copied().map(FormulaValue::Row).unwrap_or(FormulaValue::Null)),
            "filter" => {
                let Some(pred) = args.first() else { return Ok(FormulaValue::Rows(rows)) };
                Ok(FormulaValue::Rows(self.filter_rows(table_id, &rows, pred)?))
            }
            "sort" => Ok(FormulaValue::Rows(self.sort_rows(table_id, rows, args.first())?)),
            "sum" => {
                let Some(expr) = args.first() else { return Ok(FormulaValue::Number(0.0)) };
                let mut total = 0.0;
                for (idx, row) in rows.iter().enumerate() {
                    if let FormulaValue::Number(n) = self.eval_with_candidate(table_id, *row, idx + 1, expr)? {
                        total += n;
                    }
                }
                Ok(FormulaValue::Number(total))
            }
            "average" => {
                let Some(expr) = args.first() else { return Ok(FormulaValue::Null) };
                if rows.is_empty() {
                    return Ok(FormulaValue::Null);
                }
                let mut total = 0.0;
                let mut count = 0u32;
                for (idx, row) in rows.iter().enumerate() {
                    if let FormulaValue::Number(n) = self.eval_with_candidate(table_id, *row, idx + 1, expr)? {
                        total += n;
                        count += 1;
                    }
                }
                if count == 0 { Ok(FormulaValue::Null) } else { Ok(FormulaValue::Number(total / count as f64)) }
            }
            _ => Ok(FormulaValue::Null),
        }
    }

    /// `graph.in(pinId)`: walks the current table's `Edges` subtable for an
    /// inbound edge whose `ToNode`/`ToPinId` match the current row/pin, then
    /// reads the named pin column on the source row (§4.6, §GLOSSARY "graph
    /// edges").
    fn eval_graph_in(&mut self, args: &[AstNode]) -> Result<FormulaValue, EvalError> {
        if args.is_empty() {
            return Ok(FormulaValue::Null);
        }
        let pin_id = self.eval(&args[0])?.display_value();
        let frame = self.frame().clone();
        let (Some(current_table), Some(current_row)) = (frame.current_table, frame.current_row) else {
            return Ok(FormulaValue::Null);
        };
        let Some(table) = self.ctx.table_by_id(current_table) else { return Ok(FormulaValue::Null) };
        let Some(edges_col) = table
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case("Edges") && matches!(c.kind, ColumnKind::Subtable))
        else {
            return Ok(FormulaValue::Null);
        };
        let Some(edge_table) = self.ctx.subtable_of(current_table, edges_col.id) else { return Ok(FormulaValue::Null) };
        let (Some(to_node_col), Some(to_pin_col), Some(from_node_col), Some(from_pin_col)) = (
            edge_table.column_by_name("ToNode"),
            edge_table.column_by_name("ToPinId"),
            edge_table.column_by_name("FromNode"),
            edge_table.column_by_name("FromPinId"),
        ) else {
            return Ok(FormulaValue::Null);
        };
        let ColumnKind::Relation { target_table: from_target } = from_node_col.kind else {
            return Ok(FormulaValue::Null);
        };
        let to_node_col_id: ColumnId = to_node_col.id;
        let to_pin_col_id = to_pin_col.id;
        let from_node_col_id = from_node_col.id;
        let from_pin_col_id = from_pin_col.id;
        for edge_row in &edge_table.rows {
            let to_node = edge_row.cell(to_node_col_id);
            let to_pin = edge_row.cell(to_pin_col_id);
            let matches_node = matches!(to_node.value, CellValue::Row(r) if r == current_row);
            let matches_pin = to_pin.value.text().map(|t| t.eq_ignore_ascii_case(&pin_id)).unwrap_or(false);
            if !(matches_node && matches_pin) {
                continue;
            }
            let from_node = edge_row.cell(from_node_col_id);
            let from_pin = edge_row.cell(from_pin_col_id);
            let CellValue::Row(source_row_id) = from_node.value else { return Ok(FormulaValue::Null) };
            let Some(from_pin_name) = from_pin.value.text() else { return Ok(FormulaValue::Null) };
            let Some(source_table) = self.ctx.table_by_id(from_target) else { return Ok(FormulaValue::Null) };
            let Some(source_row) = source_table.row_by_id(source_row_id) else { return Ok(FormulaValue::Null) };
            let Some(pin_column) = source_table.column_by_name(from_pin_name) else { return Ok(FormulaValue::Null) };
            return Ok(docflow_common::cell_to_formula_value(&source_row.cell(pin_column.id)));
        }
        Ok(FormulaValue::Null)
    }
}

fn apply_binary(op: BinOp, l: &FormulaValue, r: &FormulaValue, config: EngineConfig) -> FormulaValue {
    use FormulaValue::*;
    match op {
        BinOp::Add => match (l, r) {
            (Number(a), Number(b)) => Number(a + b),
            (Vec2(x1, y1), Vec2(x2, y2)) => Vec2(x1 + x2, y1 + y2),
            (Vec3(x1, y1, z1), Vec3(x2, y2, z2)) => Vec3(x1 + x2, y1 + y2, z1 + z2),
            (Vec4(x1, y1, z1, w1), Vec4(x2, y2, z2, w2)) => Vec4(x1 + x2, y1 + y2, z1 + z2, w1 + w2),
            (Color(r1, g1, b1, a1), Color(r2, g2, b2, a2)) => Color(r1 + r2, g1 + g2, b1 + b2, a1 + a2),
            (DateTime(dt), Number(n)) | (Number(n), DateTime(dt)) => DateTime(*dt + Duration::days(*n as i64)),
            (Text(_), _) | (_, Text(_)) => Text(format!("{}{}", l.display_value(), r.display_value())),
            _ => Error,
        },
        BinOp::Sub => match (l, r) {
            (Number(a), Number(b)) => Number(a - b),
            (Vec2(x1, y1), Vec2(x2, y2)) => Vec2(x1 - x2, y1 - y2),
            (Vec3(x1, y1, z1), Vec3(x2, y2, z2)) => Vec3(x1 - x2, y1 - y2, z1 - z2),
            (Vec4(x1, y1, z1, w1), Vec4(x2, y2, z2, w2)) => Vec4(x1 - x2, y1 - y2, z1 - z2, w1 - w2),
            (Color(r1, g1, b1, a1), Color(r2, g2, b2, a2)) => Color(r1 - r2, g1 - g2, b1 - b2, a1 - a2),
            (DateTime(a), DateTime(b)) => Number((*a - *b).num_days() as f64),
            (DateTime(dt), Number(n)) => DateTime(*dt - Duration::days(*n as i64)),
            _ => Error,
        },
        BinOp::Mul => match (l, r) {
            (Number(a), Number(b)) => Number(a * b),
            (Vec2(x, y), Number(s)) | (Number(s), Vec2(x, y)) => Vec2(x * s, y * s),
            (Vec3(x, y, z), Number(s)) | (Number(s), Vec3(x, y, z)) => Vec3(x * s, y * s, z * s),
            (Vec4(x, y, z, w), Number(s)) | (Number(s), Vec4(x, y, z, w)) => Vec4(x * s, y * s, z * s, w * s),
            (Color(r, g, b, a), Number(s)) | (Number(s), Color(r, g, b, a)) => Color(r * s, g * s, b * s, a * s),
            _ => Error,
        },
        // §4.7/§8: division or modulo by a divisor within `division_epsilon`
        // of zero yields `Null`, not the `#ERR` sentinel — this is a data
        // result, not a failure.
        BinOp::Div => match (l, r) {
            (Number(a), Number(b)) => {
                if b.abs() < config.division_epsilon { Null } else { Number(a / b) }
            }
            (Vec2(x, y), Number(b)) => {
                if b.abs() < config.division_epsilon { Null } else { Vec2(x / b, y / b) }
            }
            (Vec3(x, y, z), Number(b)) => {
                if b.abs() < config.division_epsilon { Null } else { Vec3(x / b, y / b, z / b) }
            }
            (Vec4(x, y, z, w), Number(b)) => {
                if b.abs() < config.division_epsilon { Null } else { Vec4(x / b, y / b, z / b, w / b) }
            }
            (Color(r, g, bl, a), Number(b)) => {
                if b.abs() < config.division_epsilon { Null } else { Color(r / b, g / b, bl / b, a / b) }
            }
            _ => Error,
        },
        // Rust's native `%` truncates toward zero and keeps the dividend's
        // sign, matching the original C# source's `%` (`-7 % 3` → `-1`, not
        // the Euclidean `2`).
        BinOp::Mod => match (l, r) {
            (Number(a), Number(b)) => {
                if b.abs() < config.division_epsilon { Null } else { Number(a % b) }
            }
            _ => Error,
        },
        BinOp::Eq => Bool(values_equal(l, r, config.numeric_epsilon)),
        BinOp::Ne => Bool(!values_equal(l, r, config.numeric_epsilon)),
        BinOp::Lt => compare(l, r, config.numeric_epsilon).map(|o| Bool(o == std::cmp::Ordering::Less)).unwrap_or(Error),
        BinOp::Le => compare(l, r, config.numeric_epsilon)
            .map(|o| Bool(o != std::cmp::Ordering::Greater))
            .unwrap_or(Error),
        BinOp::Gt => compare(l, r, config.numeric_epsilon).map(|o| Bool(o == std::cmp::Ordering::Greater)).unwrap_or(Error),
        BinOp::Ge => compare(l, r, config.numeric_epsilon)
            .map(|o| Bool(o != std::cmp::Ordering::Less))
            .unwrap_or(Error),
        BinOp::And | BinOp::Or => unreachable!("short-circuited in eval_binary"),
    }
}

/// Equality (§4.7): numbers/vectors within `epsilon`; bools/ids directly;
/// otherwise an invariant-culture, case-insensitive string compare.
fn values_equal(a: &FormulaValue, b: &FormulaValue, epsilon: f64) -> bool {
    use FormulaValue::*;
    match (a, b) {
        (Number(x), Number(y)) => (x - y).abs() <= epsilon,
        (Bool(x), Bool(y)) => x == y,
        (Vec2(x1, y1), Vec2(x2, y2)) => (x1 - x2).abs() <= epsilon && (y1 - y2).abs() <= epsilon,
        (Vec3(x1, y1, z1), Vec3(x2, y2, z2)) => {
            (x1 - x2).abs() <= epsilon && (y1 - y2).abs() <= epsilon && (z1 - z2).abs() <= epsilon
        }
        (Vec4(x1, y1, z1, w1), Vec4(x2, y2, z2, w2)) | (Color(x1, y1, z1, w1), Color(x2, y2, z2, w2)) => {
            (x1 - x2).abs() <= epsilon
                && (y1 - y2).abs() <= epsilon
                && (z1 - z2).abs() <= epsilon
                && (w1 - w2).abs() <= epsilon
        }
        (Row(x), Row(y)) => x == y,
        (Table(x), Table(y)) => x == y,
        (Document(x), Document(y)) => x == y,
        (DateTime(x), DateTime(y)) => x == y,
        _ => a.display_value().eq_ignore_ascii_case(&b.display_value()),
    }
}

fn compare(a: &FormulaValue, b: &FormulaValue, epsilon: f64) -> Option<std::cmp::Ordering> {
    use std::cmp::Ordering;
    match (a, b) {
        (FormulaValue::Number(x), FormulaValue::Number(y)) => {
            if (x - y).abs() <= epsilon {
                Some(Ordering::Equal)
            } else {
                x.partial_cmp(y)
            }
        }
        (FormulaValue::DateTime(x), FormulaValue::DateTime(y)) => x.partial_cmp(y),
        (FormulaValue::Text(x), FormulaValue::Text(y)) => {
            Some(x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase()))
        }
        _ => None,
    }
}

fn compare_for_sort(a: &FormulaValue, b: &FormulaValue, epsilon: f64) -> std::cmp::Ordering {
    compare(a, b, epsilon).unwrap_or(std::cmp::Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_common::{Document, DocumentId as DocId, Project};

    struct EmptyCtx {
        project: Project,
    }

    impl FormulaContext for EmptyCtx {
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
        fn document_by_id(&self, _id: DocId) -> Option<&Document> {
            None
        }
    }

    fn eval_expr(src: &str) -> FormulaValue {
        let ctx = EmptyCtx { project: Project { tables: vec![], documents: vec![] } };
        let registry = FunctionRegistry::with_builtins();
        let mut interp = Interpreter::new(&ctx, &registry, EngineConfig::default());
        let ast = docflow_parse::parse(src).expect("parses");
        interp.eval(&ast).expect("evaluates without a runtime error")
    }

    /// §4.7/§8: "Division by |d|<ε → Null" — a data result, distinct from
    /// the `#ERR` sentinel produced by a genuine type mismatch.
    #[test]
    fn division_by_near_zero_is_null_not_error() {
        assert_eq!(eval_expr("1 / 0"), FormulaValue::Null);
        assert_eq!(eval_expr("1 / 0.0000000001"), FormulaValue::Null);
    }

    #[test]
    fn modulo_by_near_zero_is_null_not_error() {
        assert_eq!(eval_expr("5 % 0"), FormulaValue::Null);
    }

    #[test]
    fn division_by_a_real_divisor_still_divides() {
        assert_eq!(eval_expr("10 / 4"), FormulaValue::Number(2.5));
    }

    #[test]
    fn type_mismatched_binary_op_is_still_error() {
        assert_eq!(eval_expr("true + false"), FormulaValue::Error);
    }

    /// §4.7: "same-dimension vectors (colors distinct from Vec4)" groups two
    /// `Color`s together for `+`/`-`, same as two `Vec4`s; only cross-type
    /// `Color`+`Vec4` mixing is excluded.
    #[test]
    fn color_plus_color_and_minus_color_are_componentwise() {
        assert_eq!(
            eval_expr("Color(0.1, 0.2, 0.3, 0.4) + Color(1, 1, 1, 1)"),
            FormulaValue::Color(1.1, 1.2, 1.3, 1.4)
        );
        assert_eq!(
            eval_expr("Color(1, 1, 1, 1) - Color(0.1, 0.2, 0.3, 0.4)"),
            FormulaValue::Color(0.9, 0.8, 0.7, 0.6)
        );
    }

    #[test]
    fn color_scales_and_divides_by_a_scalar() {
        assert_eq!(eval_expr("Color(1, 2, 3, 4) * 2"), FormulaValue::Color(2.0, 4.0, 6.0, 8.0));
        assert_eq!(eval_expr("2 * Color(1, 2, 3, 4)"), FormulaValue::Color(2.0, 4.0, 6.0, 8.0));
        assert_eq!(eval_expr("Color(2, 4, 6, 8) / 2"), FormulaValue::Color(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn color_division_by_near_zero_is_null_not_error() {
        assert_eq!(eval_expr("Color(1, 2, 3, 4) / 0"), FormulaValue::Null);
    }

    /// The original system is C#, whose `%` truncates toward zero and keeps
    /// the dividend's sign; a Euclidean remainder would return `2` here.
    #[test]
    fn modulo_keeps_the_dividend_sign_like_the_source_language() {
        assert_eq!(eval_expr("-7 % 3"), FormulaValue::Number(-1.0));
        assert_eq!(eval_expr("7 % -3"), FormulaValue::Number(1.0));
    }
}
