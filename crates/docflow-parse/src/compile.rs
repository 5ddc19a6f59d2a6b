//! Normalization, compilation, and dependency extraction (§4.2). Compiling
//! never evaluates — it only tokenizes, parses, structurally type-checks,
//! and walks the resulting AST once to record the four dependency
//! categories the planner (docflow-eval::planner) later turns into graph
//! edges.
use docflow_common::LiteralValue;

use crate::ast::{AstKind, AstNode};
use crate::parser::parse;

/// Function names that always treat their first argument as a table
/// reference, independent of the caller's registry (§4.2).
const BUILTIN_TABLE_ARG_FUNCTIONS: &[&str] = &["lookup", "countif", "sumif"];

/// Lets `compile` ask "does this function name treat its first argument as
/// a table" without depending on `docflow-eval`'s function registry, which
/// itself depends on `docflow-parse` for the AST — this seam exists purely
/// to avoid a crate cycle (§SPEC_FULL "docflow-parse" grounding notes).
pub trait TableArgHints {
    fn tracks_first_arg_table(&self, function_name: &str) -> bool;
}

/// A hint source with no registered functions beyond the three builtins
/// baked into `BUILTIN_TABLE_ARG_FUNCTIONS`. Useful for tests and for
/// callers that haven't wired up the full registry yet.
pub struct NoTableArgHints;

impl TableArgHints for NoTableArgHints {
    fn tracks_first_arg_table(&self, _function_name: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompiledFormula {
    Valid {
        ast: AstNode,
        referenced_tables: Vec<String>,
        this_row_columns: Vec<String>,
        refs_parent: bool,
        refs_document: bool,
    },
    /// Compile failed at any stage (tokenize, parse, or structural type
    /// check). Conceptually rooted at a null literal (§4.2); carries no
    /// dependencies, so the planner treats it as a leaf.
    Invalid,
}

impl CompiledFormula {
    pub fn is_valid(&self) -> bool {
        matches!(self, CompiledFormula::Valid { .. })
    }

    pub fn ast(&self) -> Option<&AstNode> {
        match self {
            CompiledFormula::Valid { ast, .. } => Some(ast),
            CompiledFormula::Invalid => None,
        }
    }

    pub fn referenced_tables(&self) -> &[String] {
        match self {
            CompiledFormula::Valid {
                referenced_tables, ..
            } => referenced_tables,
            CompiledFormula::Invalid => &[],
        }
    }

    pub fn this_row_columns(&self) -> &[String] {
        match self {
            CompiledFormula::Valid {
                this_row_columns, ..
            } => this_row_columns,
            CompiledFormula::Invalid => &[],
        }
    }

    pub fn refs_parent(&self) -> bool {
        matches!(self, CompiledFormula::Valid { refs_parent: true, .. })
    }

    pub fn refs_document(&self) -> bool {
        matches!(
            self,
            CompiledFormula::Valid {
                refs_document: true,
                ..
            }
        )
    }
}

/// Strips a leading `=` or `=(...)` before compilation (§4.2, §8: the
/// fixed-point law "Stringify(normalize(expr)) after `=` stripping").
/// String-literal-aware so parens inside quoted text never get mistaken for
/// the wrapping pair.
pub fn normalize(source: &str) -> &str {
    let trimmed = source.trim();
    let Some(rest) = trimmed.strip_prefix('=') else {
        return trimmed;
    };
    let rest = rest.trim();
    if rest.starts_with('(') && rest.ends_with(')') && is_fully_wrapped(rest) {
        rest[1..rest.len() - 1].trim()
    } else {
        rest
    }
}

/// True iff the first `(` in `s` is matched by the very last character,
/// i.e. the whole string is one parenthesized group.
fn is_fully_wrapped(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 && i != bytes.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
        i += 1;
    }
    depth == 0
}

/// Structural type check (§4.2): "operator texts must be from the fixed
/// set; all sub-nodes recursively valid." `BinOp`/`UnOp` are closed enums
/// the parser only ever constructs from the fixed token set, so by
/// construction every parsed AST already satisfies this; the walk exists so
/// the phase is explicit and so a future AST-transforming pass (e.g. a
/// macro-expansion step) has somewhere to plug in additional validation.
fn type_check(node: &AstNode) -> bool {
    match &node.kind {
        AstKind::Literal(_) | AstKind::Ident(_) | AstKind::AtIdent(_) => true,
        AstKind::Unary { expr, .. } => type_check(expr),
        AstKind::Binary { left, right, .. } => type_check(left) && type_check(right),
        AstKind::Ternary {
            cond,
            then,
            or_else,
        } => type_check(cond) && type_check(then) && type_check(or_else),
        AstKind::Member { base, .. } => type_check(base),
        AstKind::Call { callee, args } => {
            type_check(callee) && args.iter().all(type_check)
        }
    }
}

#[derive(Default)]
struct Deps {
    referenced_tables: Vec<String>,
    this_row_columns: Vec<String>,
    refs_parent: bool,
    refs_document: bool,
}

impl Deps {
    fn push_table(&mut self, name: String) {
        if !self
            .referenced_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&name))
        {
            self.referenced_tables.push(name);
        }
    }

    fn push_this_row_column(&mut self, name: String) {
        if !self
            .this_row_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&name))
        {
            self.this_row_columns.push(name);
        }
    }
}

const RESERVED_BASES: &[&str] = &[
    "thisrow",
    "thistable",
    "parentrow",
    "parenttable",
    "docs",
    "thisdoc",
];

fn walk(node: &AstNode, deps: &mut Deps, hints: &dyn TableArgHints) {
    match &node.kind {
        AstKind::Literal(_) => {}
        AstKind::Ident(name) => match name.to_ascii_lowercase().as_str() {
            "parentrow" | "parenttable" => deps.refs_parent = true,
            "thisdoc" => deps.refs_document = true,
            _ => {}
        },
        AstKind::AtIdent(_) => {}
        AstKind::Unary { expr, .. } => walk(expr, deps, hints),
        AstKind::Binary { left, right, .. } => {
            walk(left, deps, hints);
            walk(right, deps, hints);
        }
        AstKind::Ternary {
            cond,
            then,
            or_else,
        } => {
            walk(cond, deps, hints);
            walk(then, deps, hints);
            walk(or_else, deps, hints);
        }
        AstKind::Member { base, name } => {
            if let AstKind::Ident(base_name) = &base.kind {
                match base_name.to_ascii_lowercase().as_str() {
                    "tables" => deps.push_table(name.clone()),
                    "thisrow" => deps.push_this_row_column(name.clone()),
                    "parentrow" | "parenttable" => deps.refs_parent = true,
                    "docs" | "thisdoc" => deps.refs_document = true,
                    "thistable" => {}
                    other if RESERVED_BASES.contains(&other) => {}
                    _ => deps.push_table(base_name.clone()),
                }
            } else {
                walk(base, deps, hints);
            }
        }
        AstKind::Call { callee, args } => {
            if let AstKind::Ident(fname) = &callee.kind {
                let lower = fname.to_ascii_lowercase();
                let tracks = BUILTIN_TABLE_ARG_FUNCTIONS.contains(&lower.as_str())
                    || hints.tracks_first_arg_table(fname);
                if tracks {
                    if let Some(first) = args.first() {
                        match &first.kind {
                            AstKind::Ident(s) => deps.push_table(s.clone()),
                            AstKind::Literal(LiteralValue::Text(s)) => deps.push_table(s.clone()),
                            _ => {}
                        }
                    }
                }
            }
            walk(callee, deps, hints);
            for arg in args {
                walk(arg, deps, hints);
            }
        }
    }
}

/// Compiles one expression: normalize, tokenize, parse, structurally
/// type-check, then walk the AST once for dependencies (§4.2).
pub fn compile(source: &str, hints: &dyn TableArgHints) -> CompiledFormula {
    let normalized = normalize(source);
    let ast = match parse(normalized) {
        Ok(ast) => ast,
        Err(_) => return CompiledFormula::Invalid,
    };
    if !type_check(&ast) {
        return CompiledFormula::Invalid;
    }
    let mut deps = Deps::default();
    walk(&ast, &mut deps, hints);
    CompiledFormula::Valid {
        ast,
        referenced_tables: deps.referenced_tables,
        this_row_columns: deps.this_row_columns,
        refs_parent: deps.refs_parent,
        refs_document: deps.refs_document,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_leading_equals() {
        assert_eq!(normalize("=1+2"), "1+2");
        assert_eq!(normalize("1+2"), "1+2");
    }

    #[test]
    fn normalize_strips_fully_wrapping_parens() {
        assert_eq!(normalize("=(1+2)"), "1+2");
        // Not fully wrapping: the outer parens don't span the whole body.
        assert_eq!(normalize("=(1+2)*3"), "(1+2)*3");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("=(thisRow.A + thisRow.B)");
        let twice = normalize(once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_ignores_parens_in_strings() {
        assert_eq!(normalize(r#"=("a)b" + 1)"#), r#""a)b" + 1"#);
    }

    #[test]
    fn invalid_syntax_is_invalid() {
        assert_eq!(compile("1 +", &NoTableArgHints), CompiledFormula::Invalid);
    }

    #[test]
    fn this_row_columns_extracted() {
        let cf = compile("thisRow.A + thisRow.B", &NoTableArgHints);
        let CompiledFormula::Valid {
            this_row_columns, ..
        } = cf
        else {
            panic!("expected valid");
        };
        assert_eq!(this_row_columns, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn referenced_tables_from_tables_dot_and_bare_identifier() {
        let cf = compile("tables.Depts.Count() + Employees.Salary", &NoTableArgHints);
        assert_eq!(
            cf.referenced_tables(),
            &["Depts".to_string(), "Employees".to_string()]
        );
    }

    #[test]
    fn lookup_first_arg_is_table_dependency() {
        let cf = compile(r#"Lookup("Depts", thisRow.Id == @id)"#, &NoTableArgHints);
        assert_eq!(cf.referenced_tables(), &["Depts".to_string()]);
    }

    #[test]
    fn parent_and_document_refs_flagged() {
        let cf = compile("parentRow.X + thisDoc.Y", &NoTableArgHints);
        assert!(cf.refs_parent());
        assert!(cf.refs_document());
    }

    struct RegisteredHints;
    impl TableArgHints for RegisteredHints {
        fn tracks_first_arg_table(&self, name: &str) -> bool {
            name.eq_ignore_ascii_case("myfunc")
        }
    }

    #[test]
    fn registry_hint_extends_table_arg_functions() {
        let cf = compile("MyFunc(Depts, 1)", &RegisteredHints);
        assert_eq!(cf.referenced_tables(), &["Depts".to_string()]);
    }

    proptest::proptest! {
        /// §8: "Stringify(normalize(expr)) after `=` stripping is a fixed
        /// point" — normalizing twice never moves the text further than
        /// normalizing once, across arbitrary `=`/paren/whitespace wrapping.
        #[test]
        fn normalize_is_idempotent_over_arbitrary_wrapping(
            body in "[a-zA-Z0-9_+*. ]{0,24}",
            leading_eq in proptest::bool::ANY,
            wrap_parens in proptest::bool::ANY,
            pad in 0usize..3,
        ) {
            let mut source = body.clone();
            if wrap_parens {
                source = format!("({source})");
            }
            if leading_eq {
                source = format!("={source}");
            }
            source = format!("{}{}{}", " ".repeat(pad), source, " ".repeat(pad));

            let once = normalize(&source);
            let twice = normalize(once);
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
