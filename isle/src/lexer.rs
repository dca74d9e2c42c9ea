//! Tokenizer for the rule-set source language.
//!
//! Grammar notes: `;` starts a line comment, `(;` ... `;)` is a nestable
//! block comment, symbols are any run of non-whitespace/non-paren
//! characters that isn't an integer literal, and integer literals accept
//! optional sign, `0b`/`0o`/`0x` radix prefixes, and `_` digit separators.

use crate::error::{IsleError, Pos};

/// A single lexical token together with the position it started at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The kind of token.
    pub kind: TokenKind,
    /// Where in the source it began.
    pub pos: Pos,
}

/// The kinds of token the lexer produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `@`, used to bind a pattern sub-match to a variable.
    At,
    /// A bare identifier, operator name, or keyword.
    Symbol(String),
    /// An integer literal, already parsed to its value.
    Int(i128),
}

/// Tokenizes `src`, labeling positions with `file` for diagnostics.
pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    file: &'static str,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer over `src`; `file` is only used to label errors.
    pub fn new(src: &'a str, file: &'static str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            file,
        }
    }

    fn here(&self) -> Pos {
        Pos {
            file: self.file,
            line: self.line,
            col: self.col,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> Result<(), IsleError> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b';') if self.peek2() == Some(b')') => return Ok(()),
                Some(b';') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'(') if self.peek2() == Some(b';') => {
                    let start = self.here();
                    self.bump();
                    self.bump();
                    let mut depth = 1usize;
                    while depth > 0 {
                        match (self.peek(), self.peek2()) {
                            (Some(b'('), Some(b';')) => {
                                self.bump();
                                self.bump();
                                depth += 1;
                            }
                            (Some(b';'), Some(b')')) => {
                                self.bump();
                                self.bump();
                                depth -= 1;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => {
                                return Err(IsleError::Parse {
                                    pos: start,
                                    message: "unterminated block comment".into(),
                                });
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn is_sym_char(c: u8) -> bool {
        !c.is_ascii_whitespace() && c != b'(' && c != b')' && c != b'@'
    }

    /// Returns the next token, or `Ok(None)` at end of input.
    pub fn next(&mut self) -> Result<Option<Token>, IsleError> {
        self.skip_trivia()?;
        let pos = self.here();
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        match c {
            b'(' => {
                self.bump();
                Ok(Some(Token {
                    kind: TokenKind::LParen,
                    pos,
                }))
            }
            b')' => {
                self.bump();
                Ok(Some(Token {
                    kind: TokenKind::RParen,
                    pos,
                }))
            }
            b'@' => {
                self.bump();
                Ok(Some(Token {
                    kind: TokenKind::At,
                    pos,
                }))
            }
            _ => {
                let start = self.pos;
                while self.peek().map(Self::is_sym_char).unwrap_or(false) {
                    self.bump();
                }
                let text = core::str::from_utf8(&self.src[start..self.pos])
                    .expect("input is valid UTF-8 ASCII-delimited text")
                    .to_string();
                if let Some(value) = parse_int_literal(&text) {
                    Ok(Some(Token {
                        kind: TokenKind::Int(value),
                        pos,
                    }))
                } else {
                    Ok(Some(Token {
                        kind: TokenKind::Symbol(text),
                        pos,
                    }))
                }
            }
        }
    }

    /// Tokenizes the entire input eagerly.
    pub fn lex_all(mut self) -> Result<Vec<Token>, IsleError> {
        let mut out = Vec::new();
        while let Some(tok) = self.next()? {
            out.push(tok);
        }
        Ok(out)
    }
}

fn parse_int_literal(text: &str) -> Option<i128> {
    let (neg, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if rest.is_empty() || !rest.as_bytes()[0].is_ascii_digit() {
        return None;
    }
    let (radix, digits) = if let Some(d) = rest.strip_prefix("0x") {
        (16, d)
    } else if let Some(d) = rest.strip_prefix("0o") {
        (8, d)
    } else if let Some(d) = rest.strip_prefix("0b") {
        (2, d)
    } else {
        (10, rest)
    };
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return None;
    }
    let value = i128::from_str_radix(&cleaned, radix).ok()?;
    Some(if neg { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, "test")
            .lex_all()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn basic_sexpr() {
        assert_eq!(
            kinds("(rule (iadd x y) (add x y))"),
            vec![
                TokenKind::LParen,
                TokenKind::Symbol("rule".into()),
                TokenKind::LParen,
                TokenKind::Symbol("iadd".into()),
                TokenKind::Symbol("x".into()),
                TokenKind::Symbol("y".into()),
                TokenKind::RParen,
                TokenKind::LParen,
                TokenKind::Symbol("add".into()),
                TokenKind::Symbol("x".into()),
                TokenKind::Symbol("y".into()),
                TokenKind::RParen,
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn integer_literals() {
        assert_eq!(
            kinds("1_000 -5 0x2A 0b101 0o17"),
            vec![
                TokenKind::Int(1000),
                TokenKind::Int(-5),
                TokenKind::Int(42),
                TokenKind::Int(5),
                TokenKind::Int(15),
            ]
        );
    }

    #[test]
    fn line_and_block_comments() {
        assert_eq!(
            kinds("a ; comment\nb (; nested (; block ;) comment ;) c"),
            vec![
                TokenKind::Symbol("a".into()),
                TokenKind::Symbol("b".into()),
                TokenKind::Symbol("c".into()),
            ]
        );
    }

    #[test]
    fn at_binding() {
        assert_eq!(
            kinds("(x @ y)"),
            vec![
                TokenKind::LParen,
                TokenKind::Symbol("x".into()),
                TokenKind::At,
                TokenKind::Symbol("y".into()),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn unterminated_block_comment_errors() {
        let err = Lexer::new("(; never closed", "test").lex_all().unwrap_err();
        assert!(matches!(err, IsleError::Parse { .. }));
    }
}
