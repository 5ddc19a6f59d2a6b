//! The expression AST (§4.2, §9 design notes). A narrower sum type with
//! per-variant data, which the teacher's own design notes (spec.md §9)
//! recommend over a single `{kind, text, num, bool, left, right, ...}`
//! struct-of-everything node in a language with good pattern matching.
use docflow_common::LiteralValue;

use crate::tokenizer::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstKind {
    Literal(LiteralValue),
    Ident(String),
    /// `@name` (§4.2, §6 document-variable block syntax).
    AtIdent(String),
    Unary {
        op: UnOp,
        expr: Box<AstNode>,
    },
    Binary {
        op: BinOp,
        left: Box<AstNode>,
        right: Box<AstNode>,
    },
    Ternary {
        cond: Box<AstNode>,
        then: Box<AstNode>,
        or_else: Box<AstNode>,
    },
    Member {
        base: Box<AstNode>,
        name: String,
    },
    Call {
        callee: Box<AstNode>,
        args: Vec<AstNode>,
    },
}

/// One AST node. `source_token` is kept for diagnostics (the token where
/// this node's syntax began) — never consulted by evaluation itself.
#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
    pub kind: AstKind,
    pub source_token: Option<Token>,
}

impl AstNode {
    pub fn new(kind: AstKind, source_token: Option<Token>) -> Self {
        Self { kind, source_token }
    }

    /// The canonical "no expression" root a failed compile falls back to
    /// (§4.2: "Failures at any stage yield `CompiledFormula::Invalid` (root
    /// = null literal)").
    pub fn null() -> Self {
        Self::new(AstKind::Literal(LiteralValue::Null), None)
    }
}
