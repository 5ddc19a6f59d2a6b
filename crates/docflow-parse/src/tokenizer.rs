//! Lexer for the expression grammar (§4.2): identifiers, `@`-identifiers,
//! numbers, double-quoted strings, the fixed operator set, and the
//! delimiters the parser needs (`( ) , . ? :`).
//!
//! Byte-indexed scan over the source text, grounded on the teacher's
//! `Tokenizer` shape in `formualizer-parse/src/tokenizer.rs`: an offset
//! cursor, one `try_*` method per token family, and a driver loop that
//! tries each in a fixed order (§SPEC_FULL Open Question 1: "attempt; on
//! success consume and continue; on failure error out").
use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tokenizer error at {}: {}", self.pos, self.message)
    }
}

impl Error for TokenizerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpToken {
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

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Bool(bool),
    Ident(String),
    AtIdent(String),
    BinOp(BinOpToken),
    Bang,
    Question,
    Colon,
    Dot,
    Comma,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Tokenizes `source` into a flat token list. Whitespace is consumed and
/// discarded between tokens; it carries no grammatical meaning here (unlike
/// the teacher's Excel grammar, which has a significant-whitespace
/// intersection operator).
pub struct Tokenizer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            offset: 0,
        }
    }

    pub fn tokenize(source: &'a str) -> Result<Vec<Token>, TokenizerError> {
        let mut t = Tokenizer::new(source);
        t.run()
    }

    fn run(&mut self) -> Result<Vec<Token>, TokenizerError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            if self.offset >= self.bytes.len() {
                break;
            }
            match self.next_token()? {
                Some(tok) => tokens.push(tok),
                None => {
                    return Err(TokenizerError {
                        message: format!(
                            "unrecognized character '{}'",
                            self.bytes[self.offset] as char
                        ),
                        pos: self.offset,
                    });
                }
            }
        }
        Ok(tokens)
    }

    fn skip_whitespace(&mut self) {
        while let Some(&b) = self.bytes.get(self.offset) {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.offset += 1;
            } else {
                break;
            }
        }
    }

    /// Try each token family in order; the first that matches consumes and
    /// returns. `None` means none of the families claim the current
    /// position (driver raises).
    fn next_token(&mut self) -> Result<Option<Token>, TokenizerError> {
        if let Some(t) = self.try_number() {
            return Ok(Some(t));
        }
        if let Some(t) = self.try_string()? {
            return Ok(Some(t));
        }
        if let Some(t) = self.try_at_ident() {
            return Ok(Some(t));
        }
        if let Some(t) = self.try_ident_or_keyword() {
            return Ok(Some(t));
        }
        if let Some(t) = self.try_operator_or_punct()? {
            return Ok(Some(t));
        }
        Ok(None)
    }

    fn make(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            text: self.source[start..self.offset].to_string(),
            kind,
            start,
            end: self.offset,
        }
    }

    /// Integer/decimal numbers, invariant locale. A trailing `.` (e.g. `3.`)
    /// is accepted (§SPEC_FULL Open Question 2), matching `f64::from_str`.
    fn try_number(&mut self) -> Option<Token> {
        let start = self.offset;
        let mut cursor = self.offset;
        while self.bytes.get(cursor).is_some_and(|b| b.is_ascii_digit()) {
            cursor += 1;
        }
        let had_int_digits = cursor > start;
        let mut had_dot = false;
        if self.bytes.get(cursor) == Some(&b'.') {
            had_dot = true;
            cursor += 1;
            while self.bytes.get(cursor).is_some_and(|b| b.is_ascii_digit()) {
                cursor += 1;
            }
        }
        if !had_int_digits && !(had_dot && cursor > start + 1) {
            return None;
        }
        self.offset = cursor;
        let text = &self.source[start..self.offset];
        let n: f64 = text.parse().unwrap_or_else(|_| {
            // A bare trailing dot ("3.") parses fine via f64::from_str; this
            // branch only guards against future grammar additions.
            text.trim_end_matches('.').parse().unwrap_or(0.0)
        });
        Some(self.make(TokenKind::Number(n), start))
    }

    /// Double-quoted strings with `\\ \" \n \r \t` escapes.
    fn try_string(&mut self) -> Result<Option<Token>, TokenizerError> {
        if self.bytes.get(self.offset) != Some(&b'"') {
            return Ok(None);
        }
        let start = self.offset;
        self.offset += 1;
        let mut value = String::new();
        loop {
            match self.bytes.get(self.offset) {
                None => {
                    return Err(TokenizerError {
                        message: "unterminated string literal".to_string(),
                        pos: start,
                    });
                }
                Some(b'"') => {
                    self.offset += 1;
                    break;
                }
                Some(b'\\') => {
                    self.offset += 1;
                    match self.bytes.get(self.offset) {
                        Some(b'\\') => value.push('\\'),
                        Some(b'"') => value.push('"'),
                        Some(b'n') => value.push('\n'),
                        Some(b'r') => value.push('\r'),
                        Some(b't') => value.push('\t'),
                        Some(other) => {
                            return Err(TokenizerError {
                                message: format!("invalid escape '\\{}'", *other as char),
                                pos: self.offset,
                            });
                        }
                        None => {
                            return Err(TokenizerError {
                                message: "unterminated escape sequence".to_string(),
                                pos: self.offset,
                            });
                        }
                    }
                    self.offset += 1;
                }
                Some(_) => {
                    let ch_start = self.offset;
                    let rest = &self.source[ch_start..];
                    let ch = rest.chars().next().expect("non-empty remainder");
                    value.push(ch);
                    self.offset += ch.len_utf8();
                }
            }
        }
        Ok(Some(self.make(TokenKind::Str(value), start)))
    }

    fn try_at_ident(&mut self) -> Option<Token> {
        if self.bytes.get(self.offset) != Some(&b'@') {
            return None;
        }
        let start = self.offset;
        self.offset += 1;
        let name_start = self.offset;
        self.consume_ident_chars(true);
        if self.offset == name_start {
            self.offset = start;
            return None;
        }
        let name = self.source[name_start..self.offset].to_string();
        Some(self.make(TokenKind::AtIdent(name), start))
    }

    fn try_ident_or_keyword(&mut self) -> Option<Token> {
        let start = self.offset;
        self.consume_ident_chars(true);
        if self.offset == start {
            return None;
        }
        let text = &self.source[start..self.offset];
        if text.eq_ignore_ascii_case("true") {
            return Some(self.make(TokenKind::Bool(true), start));
        }
        if text.eq_ignore_ascii_case("false") {
            return Some(self.make(TokenKind::Bool(false), start));
        }
        Some(self.make(TokenKind::Ident(text.to_string()), start))
    }

    /// `[A-Za-z_][A-Za-z0-9_]*`. `first` controls whether the very first
    /// character must obey the identifier-start rule (always true for our
    /// callers, kept as a parameter for clarity at call sites).
    fn consume_ident_chars(&mut self, first: bool) {
        let mut first = first;
        loop {
            match self.bytes.get(self.offset) {
                Some(&b) if b == b'_' || b.is_ascii_alphabetic() => {
                    self.offset += 1;
                    first = false;
                }
                Some(&b) if !first && b.is_ascii_digit() => {
                    self.offset += 1;
                }
                _ => break,
            }
        }
    }

    fn try_operator_or_punct(&mut self) -> Result<Option<Token>, TokenizerError> {
        let start = self.offset;
        let two = self.bytes.get(self.offset..self.offset + 2);
        if let Some(two) = two {
            let kind = match two {
                b"==" => Some(TokenKind::BinOp(BinOpToken::Eq)),
                b"!=" => Some(TokenKind::BinOp(BinOpToken::Ne)),
                b">=" => Some(TokenKind::BinOp(BinOpToken::Ge)),
                b"<=" => Some(TokenKind::BinOp(BinOpToken::Le)),
                b"&&" => Some(TokenKind::BinOp(BinOpToken::And)),
                b"||" => Some(TokenKind::BinOp(BinOpToken::Or)),
                _ => None,
            };
            if let Some(kind) = kind {
                self.offset += 2;
                return Ok(Some(self.make(kind, start)));
            }
        }
        let Some(&b) = self.bytes.get(self.offset) else {
            return Ok(None);
        };
        let kind = match b {
            b'+' => TokenKind::BinOp(BinOpToken::Add),
            b'-' => TokenKind::BinOp(BinOpToken::Sub),
            b'*' => TokenKind::BinOp(BinOpToken::Mul),
            b'/' => TokenKind::BinOp(BinOpToken::Div),
            b'%' => TokenKind::BinOp(BinOpToken::Mod),
            b'>' => TokenKind::BinOp(BinOpToken::Gt),
            b'<' => TokenKind::BinOp(BinOpToken::Lt),
            b'!' => TokenKind::Bang,
            b'?' => TokenKind::Question,
            b':' => TokenKind::Colon,
            b'.' => TokenKind::Dot,
            b',' => TokenKind::Comma,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            _ => return Ok(None),
        };
        self.offset += 1;
        Ok(Some(self.make(kind, start)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Tokenizer::tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn numbers_and_trailing_dot() {
        assert_eq!(kinds("3"), vec![TokenKind::Number(3.0)]);
        assert_eq!(kinds("3."), vec![TokenKind::Number(3.0)]);
        assert_eq!(kinds("3.14"), vec![TokenKind::Number(3.14)]);
    }

    #[test]
    fn keywords_case_insensitive() {
        assert_eq!(kinds("TRUE"), vec![TokenKind::Bool(true)]);
        assert_eq!(kinds("False"), vec![TokenKind::Bool(false)]);
    }

    #[test]
    fn string_escapes() {
        let toks = Tokenizer::tokenize(r#""a\nb\"c""#).unwrap();
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, TokenKind::Str("a\nb\"c".to_string()));
    }

    #[test]
    fn at_ident_and_dotted_member() {
        let toks = kinds("@price * thisRow.Qty");
        assert_eq!(
            toks,
            vec![
                TokenKind::AtIdent("price".to_string()),
                TokenKind::BinOp(BinOpToken::Mul),
                TokenKind::Ident("thisRow".to_string()),
                TokenKind::Dot,
                TokenKind::Ident("Qty".to_string()),
            ]
        );
    }

    #[test]
    fn two_char_operators_not_split() {
        assert_eq!(
            kinds("a>=b"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::BinOp(BinOpToken::Ge),
                TokenKind::Ident("b".to_string()),
            ]
        );
        assert_eq!(
            kinds("a!=b"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::BinOp(BinOpToken::Ne),
                TokenKind::Ident("b".to_string()),
            ]
        );
    }

    #[test]
    fn unterminated_string_errors() {
        assert!(Tokenizer::tokenize(r#""abc"#).is_err());
    }
}
