//! The filter sub-language (§4.3, C3): a second, smaller lexer/parser used
//! only by derived-table `FilterExpression`s. Grammar: literals,
//! `thisRow.Column`, `!`, `&&`, `||`, `==`, `!=` — nothing else (no
//! arithmetic, no method calls, no `@` identifiers). Kept as a sibling
//! module rather than a separate crate since it reuses the same
//! number/string scanning primitives as §4.2's tokenizer almost verbatim.
use std::error::Error;
use std::fmt;

use docflow_common::FormulaValue;

#[derive(Debug)]
pub struct FilterCompileError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for FilterCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter expression error at {}: {}", self.pos, self.message)
    }
}

impl Error for FilterCompileError {}

#[derive(Debug, Clone, PartialEq)]
enum FTokenKind {
    Number(f64),
    Str(String),
    Bool(bool),
    Ident(String),
    Dot,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    Ne,
    LParen,
    RParen,
}

struct FToken {
    kind: FTokenKind,
    pos: usize,
}

fn tokenize(source: &str) -> Result<Vec<FToken>, FilterCompileError> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
            i += 1;
            continue;
        }
        if b.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'.' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let n: f64 = source[start..i].parse().unwrap_or(0.0);
            out.push(FToken {
                kind: FTokenKind::Number(n),
                pos: start,
            });
            continue;
        }
        if b == b'"' {
            let start = i;
            i += 1;
            let mut s = String::new();
            loop {
                match bytes.get(i) {
                    None => {
                        return Err(FilterCompileError {
                            message: "unterminated string literal".to_string(),
                            pos: start,
                        });
                    }
                    Some(b'"') => {
                        i += 1;
                        break;
                    }
                    Some(b'\\') => {
                        i += 1;
                        match bytes.get(i) {
                            Some(b'\\') => s.push('\\'),
                            Some(b'"') => s.push('"'),
                            Some(b'n') => s.push('\n'),
                            Some(b'r') => s.push('\r'),
                            Some(b't') => s.push('\t'),
                            _ => {
                                return Err(FilterCompileError {
                                    message: "invalid escape sequence".to_string(),
                                    pos: i,
                                });
                            }
                        }
                        i += 1;
                    }
                    Some(_) => {
                        let ch = source[i..].chars().next().expect("non-empty remainder");
                        s.push(ch);
                        i += ch.len_utf8();
                    }
                }
            }
            out.push(FToken {
                kind: FTokenKind::Str(s),
                pos: start,
            });
            continue;
        }
        if b == b'_' || b.is_ascii_alphabetic() {
            let start = i;
            while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                i += 1;
            }
            let text = &source[start..i];
            let kind = if text.eq_ignore_ascii_case("true") {
                FTokenKind::Bool(true)
            } else if text.eq_ignore_ascii_case("false") {
                FTokenKind::Bool(false)
            } else {
                FTokenKind::Ident(text.to_string())
            };
            out.push(FToken { kind, pos: start });
            continue;
        }
        if b == b'&' && bytes.get(i + 1) == Some(&b'&') {
            out.push(FToken {
                kind: FTokenKind::AndAnd,
                pos: i,
            });
            i += 2;
            continue;
        }
        if b == b'|' && bytes.get(i + 1) == Some(&b'|') {
            out.push(FToken {
                kind: FTokenKind::OrOr,
                pos: i,
            });
            i += 2;
            continue;
        }
        if b == b'=' && bytes.get(i + 1) == Some(&b'=') {
            out.push(FToken {
                kind: FTokenKind::EqEq,
                pos: i,
            });
            i += 2;
            continue;
        }
        if b == b'!' && bytes.get(i + 1) == Some(&b'=') {
            out.push(FToken {
                kind: FTokenKind::Ne,
                pos: i,
            });
            i += 2;
            continue;
        }
        let kind = match b {
            b'.' => FTokenKind::Dot,
            b'!' => FTokenKind::Bang,
            b'(' => FTokenKind::LParen,
            b')' => FTokenKind::RParen,
            _ => {
                return Err(FilterCompileError {
                    message: format!("unrecognized character '{}'", b as char),
                    pos: i,
                });
            }
        };
        out.push(FToken { kind, pos: i });
        i += 1;
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterAst {
    Literal(FilterLiteral),
    ThisRowColumn(String),
    Not(Box<FilterAst>),
    And(Box<FilterAst>, Box<FilterAst>),
    Or(Box<FilterAst>, Box<FilterAst>),
    Eq(Box<FilterAst>, Box<FilterAst>),
    Ne(Box<FilterAst>, Box<FilterAst>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterLiteral {
    Number(f64),
    Str(String),
    Bool(bool),
}

struct FParser {
    tokens: Vec<FToken>,
    pos: usize,
    end_pos: usize,
}

impl FParser {
    fn peek_kind(&self) -> Option<&FTokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn current_pos(&self) -> usize {
        self.tokens.get(self.pos).map(|t| t.pos).unwrap_or(self.end_pos)
    }

    fn eat(&mut self, kind: &FTokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &FTokenKind, what: &str) -> Result<(), FilterCompileError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(FilterCompileError {
                message: format!("expected {what}"),
                pos: self.current_pos(),
            })
        }
    }

    fn parse_or(&mut self) -> Result<FilterAst, FilterCompileError> {
        let mut left = self.parse_and()?;
        while self.eat(&FTokenKind::OrOr) {
            let right = self.parse_and()?;
            left = FilterAst::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterAst, FilterCompileError> {
        let mut left = self.parse_equality()?;
        while self.eat(&FTokenKind::AndAnd) {
            let right = self.parse_equality()?;
            left = FilterAst::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<FilterAst, FilterCompileError> {
        let mut left = self.parse_unary()?;
        loop {
            if self.eat(&FTokenKind::EqEq) {
                let right = self.parse_unary()?;
                left = FilterAst::Eq(Box::new(left), Box::new(right));
            } else if self.eat(&FTokenKind::Ne) {
                let right = self.parse_unary()?;
                left = FilterAst::Ne(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<FilterAst, FilterCompileError> {
        if self.eat(&FTokenKind::Bang) {
            let expr = self.parse_unary()?;
            return Ok(FilterAst::Not(Box::new(expr)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<FilterAst, FilterCompileError> {
        match self.tokens.get(self.pos).map(|t| &t.kind) {
            Some(FTokenKind::Number(n)) => {
                let n = *n;
                self.pos += 1;
                Ok(FilterAst::Literal(FilterLiteral::Number(n)))
            }
            Some(FTokenKind::Str(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(FilterAst::Literal(FilterLiteral::Str(s)))
            }
            Some(FTokenKind::Bool(b)) => {
                let b = *b;
                self.pos += 1;
                Ok(FilterAst::Literal(FilterLiteral::Bool(b)))
            }
            Some(FTokenKind::Ident(name)) if name.eq_ignore_ascii_case("thisrow") => {
                self.pos += 1;
                self.expect(&FTokenKind::Dot, "'.' after 'thisRow'")?;
                match self.tokens.get(self.pos).map(|t| &t.kind) {
                    Some(FTokenKind::Ident(col)) => {
                        let col = col.clone();
                        self.pos += 1;
                        Ok(FilterAst::ThisRowColumn(col))
                    }
                    _ => Err(FilterCompileError {
                        message: "expected column name after 'thisRow.'".to_string(),
                        pos: self.current_pos(),
                    }),
                }
            }
            Some(FTokenKind::Ident(name)) => Err(FilterCompileError {
                message: format!("unsupported identifier '{name}' (only thisRow.Column is valid)"),
                pos: self.current_pos(),
            }),
            Some(FTokenKind::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(&FTokenKind::RParen, "')'")?;
                Ok(inner)
            }
            _ => Err(FilterCompileError {
                message: "unexpected end of filter expression".to_string(),
                pos: self.current_pos(),
            }),
        }
    }
}

/// Compiles a `FilterExpression` (§4.4: "If `FilterExpression` is
/// non-blank, compile it once"). Blank input is not handled here — the
/// derived resolver checks blankness before calling.
pub fn compile_filter(source: &str) -> Result<FilterAst, FilterCompileError> {
    let tokens = tokenize(source)?;
    let end_pos = source.len();
    let mut parser = FParser {
        tokens,
        pos: 0,
        end_pos,
    };
    let ast = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(FilterCompileError {
            message: "unexpected trailing tokens".to_string(),
            pos: parser.current_pos(),
        });
    }
    Ok(ast)
}

/// Truthiness used by the filter (§4.3): "Bool as-is; Number truthy iff
/// `|x|>ε`; String truthy iff non-blank."
pub fn is_truthy(value: &FormulaValue, epsilon: f64) -> bool {
    match value {
        FormulaValue::Bool(b) => *b,
        FormulaValue::Number(n) => n.abs() > epsilon,
        FormulaValue::Text(s) => !s.trim().is_empty(),
        FormulaValue::Null | FormulaValue::Error => false,
        _ => true,
    }
}

/// Equality fallback is an Ordinal (case-sensitive) string compare (§4.3) —
/// distinct from the evaluator's own case-insensitive fallback (§4.7).
fn values_equal(a: &FormulaValue, b: &FormulaValue) -> bool {
    match (a, b) {
        (FormulaValue::Number(x), FormulaValue::Number(y)) => x == y,
        (FormulaValue::Bool(x), FormulaValue::Bool(y)) => x == y,
        _ => a.display_value() == b.display_value(),
    }
}

/// Evaluates a compiled filter expression against a row (§4.3). `column` is
/// the row's column accessor (`thisRow.Column` lookup); `epsilon` is the
/// truthiness/equality tolerance (default `1e-6`, mirroring the vector
/// equality tolerance in §4.7).
pub fn eval_filter(
    ast: &FilterAst,
    column: &dyn Fn(&str) -> FormulaValue,
    epsilon: f64,
) -> FormulaValue {
    match ast {
        FilterAst::Literal(FilterLiteral::Number(n)) => FormulaValue::Number(*n),
        FilterAst::Literal(FilterLiteral::Str(s)) => FormulaValue::Text(s.clone()),
        FilterAst::Literal(FilterLiteral::Bool(b)) => FormulaValue::Bool(*b),
        FilterAst::ThisRowColumn(name) => column(name),
        FilterAst::Not(inner) => {
            FormulaValue::Bool(!is_truthy(&eval_filter(inner, column, epsilon), epsilon))
        }
        FilterAst::And(l, r) => {
            let lv = eval_filter(l, column, epsilon);
            if !is_truthy(&lv, epsilon) {
                return FormulaValue::Bool(false);
            }
            FormulaValue::Bool(is_truthy(&eval_filter(r, column, epsilon), epsilon))
        }
        FilterAst::Or(l, r) => {
            let lv = eval_filter(l, column, epsilon);
            if is_truthy(&lv, epsilon) {
                return FormulaValue::Bool(true);
            }
            FormulaValue::Bool(is_truthy(&eval_filter(r, column, epsilon), epsilon))
        }
        FilterAst::Eq(l, r) => {
            let lv = eval_filter(l, column, epsilon);
            let rv = eval_filter(r, column, epsilon);
            FormulaValue::Bool(values_equal(&lv, &rv))
        }
        FilterAst::Ne(l, r) => {
            let lv = eval_filter(l, column, epsilon);
            let rv = eval_filter(r, column, epsilon);
            FormulaValue::Bool(!values_equal(&lv, &rv))
        }
    }
}

pub fn eval_filter_matches(
    ast: &FilterAst,
    column: &dyn Fn(&str) -> FormulaValue,
    epsilon: f64,
) -> bool {
    is_truthy(&eval_filter(ast, column, epsilon), epsilon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_common::FormulaValue;

    fn row(values: &'static [(&'static str, FormulaValue)]) -> impl Fn(&str) -> FormulaValue {
        move |name: &str| {
            values
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
                .unwrap_or(FormulaValue::Null)
        }
    }

    #[test]
    fn equality_and_thisrow_column() {
        let ast = compile_filter(r#"thisRow.Kind == "Texture""#).unwrap();
        let accessor = row(&[("Kind", FormulaValue::Text("Texture".to_string()))]);
        assert!(eval_filter_matches(&ast, &accessor, 1e-6));
        let accessor2 = row(&[("Kind", FormulaValue::Text("Mesh".to_string()))]);
        assert!(!eval_filter_matches(&ast, &accessor2, 1e-6));
    }

    #[test]
    fn blank_whitespace_string_is_falsy() {
        assert!(!is_truthy(&FormulaValue::Text("   ".to_string()), 1e-6));
    }

    #[test]
    fn numeric_truthiness_respects_epsilon() {
        assert!(!is_truthy(&FormulaValue::Number(1e-9), 1e-6));
        assert!(is_truthy(&FormulaValue::Number(1.0), 1e-6));
    }

    #[test]
    fn and_or_not_short_circuit_correctly() {
        let ast = compile_filter("!(thisRow.A == thisRow.B) && thisRow.C").unwrap();
        let accessor = row(&[
            ("A", FormulaValue::Number(1.0)),
            ("B", FormulaValue::Number(2.0)),
            ("C", FormulaValue::Bool(true)),
        ]);
        assert!(eval_filter_matches(&ast, &accessor, 1e-6));
    }

    #[test]
    fn malformed_expression_fails_to_compile() {
        assert!(compile_filter("thisRow.A ==").is_err());
        assert!(compile_filter("foo.Bar == 1").is_err());
    }
}
