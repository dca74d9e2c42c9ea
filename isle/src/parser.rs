//! Recursive-descent parser: tokens → [`SExpr`] → top-level [`Def`]s.

use crate::ast::{
    Def, DeclDef, Defs, ExternDef, IfLetDef, InternalExtractorDef, RuleDef, SExpr, TypeDef, VariantDef,
};
use crate::error::{IsleError, Pos};
use crate::lexer::{Lexer, Token, TokenKind};

struct Parser {
    toks: Vec<Token>,
    idx: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.idx)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.toks.get(self.idx).cloned();
        if t.is_some() {
            self.idx += 1;
        }
        t
    }

    fn eof_pos(&self) -> Pos {
        self.toks.last().map(|t| t.pos).unwrap_or_default()
    }

    fn parse_sexpr(&mut self) -> Result<SExpr, IsleError> {
        let tok = self.bump().ok_or_else(|| IsleError::Parse {
            pos: self.eof_pos(),
            message: "unexpected end of input".into(),
        })?;
        match tok.kind {
            TokenKind::Int(v) => Ok(SExpr::Int(v, tok.pos)),
            TokenKind::Symbol(s) => {
                // A bare symbol followed by `@` is a binding: `(var @
                // pattern)` names `var` as the binding for whatever
                // `pattern` (the sexpr following `@`) goes on to match.
                if let Some(t) = self.peek() {
                    if t.kind == TokenKind::At {
                        let at_pos = t.pos;
                        self.bump();
                        let pattern = self.parse_sexpr()?;
                        return Ok(SExpr::At(Box::new(pattern), s, at_pos));
                    }
                }
                Ok(SExpr::Symbol(s, tok.pos))
            }
            TokenKind::LParen => {
                // `(var @ pattern)`: the binding written with its own
                // enclosing parens, rather than inline after a bare
                // symbol in an argument list. Detected by lookahead since
                // the generic list-parsing loop below would otherwise
                // wrap the `At` it produces in an extra one-item `List`.
                if let (Some(sym_tok), Some(at_tok)) = (self.toks.get(self.idx), self.toks.get(self.idx + 1)) {
                    if let (TokenKind::Symbol(name), TokenKind::At) = (&sym_tok.kind, &at_tok.kind) {
                        let name = name.clone();
                        self.bump();
                        let at_pos = self.bump().expect("peeked above").pos;
                        let pattern = self.parse_sexpr()?;
                        return match self.bump() {
                            Some(t) if t.kind == TokenKind::RParen => Ok(SExpr::At(Box::new(pattern), name, at_pos)),
                            _ => Err(IsleError::Parse {
                                pos: tok.pos,
                                message: "expected `)` closing an `@` binding".into(),
                            }),
                        };
                    }
                }
                let mut items = Vec::new();
                loop {
                    match self.peek() {
                        Some(t) if t.kind == TokenKind::RParen => {
                            self.bump();
                            break;
                        }
                        None => {
                            return Err(IsleError::Parse {
                                pos: tok.pos,
                                message: "unclosed `(`".into(),
                            });
                        }
                        _ => items.push(self.parse_sexpr()?),
                    }
                }
                Ok(SExpr::List(items, tok.pos))
            }
            TokenKind::RParen => Err(IsleError::Parse {
                pos: tok.pos,
                message: "unexpected `)`".into(),
            }),
            TokenKind::At => Err(IsleError::Parse {
                pos: tok.pos,
                message: "unexpected `@`".into(),
            }),
        }
    }
}

fn sym<'a>(e: &'a SExpr) -> Option<&'a str> {
    match e {
        SExpr::Symbol(s, _) => Some(s.as_str()),
        _ => None,
    }
}

fn list(e: &SExpr) -> Option<&[SExpr]> {
    match e {
        SExpr::List(items, _) => Some(items.as_slice()),
        _ => None,
    }
}

fn expect_list(e: &SExpr) -> Result<&[SExpr], IsleError> {
    list(e).ok_or_else(|| IsleError::Parse {
        pos: e.pos(),
        message: "expected a parenthesized list".into(),
    })
}

fn expect_sym(e: &SExpr) -> Result<&str, IsleError> {
    sym(e).ok_or_else(|| IsleError::Parse {
        pos: e.pos(),
        message: "expected a symbol".into(),
    })
}

/// Parses `src` into a fully-formed [`Defs`].
pub fn parse(src: &str, file: &'static str) -> Result<Defs, IsleError> {
    let toks = Lexer::new(src, file).lex_all()?;
    let mut p = Parser { toks, idx: 0 };
    let mut defs = Vec::new();
    let mut top = Vec::new();
    while p.peek().is_some() {
        top.push(p.parse_sexpr()?);
    }
    for form in top {
        defs.push(parse_top_level(&form)?);
    }
    Ok(Defs { defs })
}

fn parse_top_level(form: &SExpr) -> Result<Def, IsleError> {
    let items = expect_list(form)?;
    let pos = form.pos();
    let head = items.first().ok_or(IsleError::Parse {
        pos,
        message: "empty top-level form".into(),
    })?;
    match expect_sym(head)? {
        "type" => parse_type(items, pos),
        "decl" => parse_decl(items, pos),
        "extern" | "constructor" => parse_extern(items, pos),
        "extractor" => parse_internal_extractor(items, pos),
        "rule" => parse_rule(items, pos),
        other => Err(IsleError::Parse {
            pos,
            message: format!("unknown top-level form `{other}`"),
        }),
    }
}

fn parse_type(items: &[SExpr], pos: Pos) -> Result<Def, IsleError> {
    let name = items
        .get(1)
        .ok_or(IsleError::Parse {
            pos,
            message: "`type` requires a name".into(),
        })
        .and_then(expect_sym)?
        .to_string();
    let is_primitive = items
        .get(2)
        .and_then(sym)
        .map(|s| s == "primitive")
        .unwrap_or(false);
    let variants = match items.get(2) {
        Some(body) if list(body).map(|items| matches!(items.first(), Some(SExpr::Symbol(s, _)) if s == "enum")).unwrap_or(false) => {
            let body_items = expect_list(body)?;
            body_items[1..]
                .iter()
                .map(parse_variant)
                .collect::<Result<Vec<_>, _>>()?
        }
        _ => Vec::new(),
    };
    Ok(Def::Type(TypeDef {
        name,
        is_primitive,
        variants,
        pos,
    }))
}

/// Parses one `(Variant (field ty) ...)` or bare `(Variant)` enum arm.
fn parse_variant(e: &SExpr) -> Result<VariantDef, IsleError> {
    let pos = e.pos();
    let items = expect_list(e)?;
    let name = items
        .first()
        .ok_or(IsleError::Parse {
            pos,
            message: "enum variant requires a name".into(),
        })
        .and_then(expect_sym)?
        .to_string();
    let field_types = items[1..]
        .iter()
        .map(|field| {
            let field_items = expect_list(field)?;
            field_items
                .get(1)
                .ok_or(IsleError::Parse {
                    pos: field.pos(),
                    message: "variant field requires a type".into(),
                })
                .and_then(expect_sym)
                .map(str::to_string)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(VariantDef { name, field_types, pos })
}

fn parse_decl(items: &[SExpr], pos: Pos) -> Result<Def, IsleError> {
    let term = items
        .get(1)
        .ok_or(IsleError::Parse {
            pos,
            message: "`decl` requires a term name".into(),
        })
        .and_then(expect_sym)?
        .to_string();
    let arg_list = items.get(2).ok_or(IsleError::Parse {
        pos,
        message: "`decl` requires an argument-type list".into(),
    })?;
    let arg_types = expect_list(arg_list)?
        .iter()
        .map(expect_sym)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(str::to_string)
        .collect();
    let ret_type = items
        .get(3)
        .ok_or(IsleError::Parse {
            pos,
            message: "`decl` requires a return type".into(),
        })
        .and_then(expect_sym)?
        .to_string();
    let is_extractor = items
        .get(4)
        .and_then(sym)
        .map(|s| s == "extractor")
        .unwrap_or(true);
    Ok(Def::Decl(DeclDef {
        term,
        arg_types,
        ret_type,
        is_extractor,
        pos,
    }))
}

/// Parses `(extern constructor|extractor term rust_fn)` or the `(constructor
/// term rust_fn)` shorthand. The `extractor` keyword alone is a different,
/// purely internal macro form handled by [`parse_internal_extractor`], not
/// this one.
fn parse_extern(items: &[SExpr], pos: Pos) -> Result<Def, IsleError> {
    let kind = expect_sym(&items[0])?;
    let (kind_idx, is_extractor) = match kind {
        "extern" => {
            let sub = items.get(1).ok_or(IsleError::Parse {
                pos,
                message: "`extern` requires `constructor` or `extractor`".into(),
            })?;
            (2, expect_sym(sub)? == "extractor")
        }
        "constructor" => (1, false),
        _ => unreachable!(),
    };
    let term = items
        .get(kind_idx)
        .ok_or(IsleError::Parse {
            pos,
            message: "expected term name".into(),
        })
        .and_then(expect_sym)?
        .to_string();
    let rust_fn = items
        .get(kind_idx + 1)
        .ok_or(IsleError::Parse {
            pos,
            message: "expected a Rust function name".into(),
        })
        .and_then(expect_sym)?
        .to_string();
    Ok(Def::Extern(ExternDef {
        term,
        rust_fn,
        is_extractor,
        pos,
    }))
}

/// Parses `(extractor (Name param ...) template)`: a pure pattern macro,
/// never bound to any Rust function.
fn parse_internal_extractor(items: &[SExpr], pos: Pos) -> Result<Def, IsleError> {
    let header = items.get(1).ok_or(IsleError::Parse {
        pos,
        message: "`extractor` requires a `(Name param ...)` header".into(),
    })?;
    let header_items = expect_list(header)?;
    let name = header_items
        .first()
        .ok_or(IsleError::Parse {
            pos: header.pos(),
            message: "extractor macro header requires a name".into(),
        })
        .and_then(expect_sym)?
        .to_string();
    let params = header_items[1..]
        .iter()
        .map(expect_sym)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(str::to_string)
        .collect();
    let template = items
        .get(2)
        .ok_or(IsleError::Parse {
            pos,
            message: "`extractor` requires a pattern template".into(),
        })?
        .clone();
    Ok(Def::InternalExtractor(InternalExtractorDef {
        name,
        params,
        template,
        pos,
    }))
}

fn parse_rule(items: &[SExpr], pos: Pos) -> Result<Def, IsleError> {
    let rest = &items[1..];
    let (priority, rest) = match rest.first() {
        Some(SExpr::Int(v, _)) => (*v as i64, &rest[1..]),
        _ => (0, rest),
    };
    if rest.is_empty() {
        return Err(IsleError::Parse {
            pos,
            message: "`rule` requires at least a pattern and a right-hand side".into(),
        });
    }
    let lhs = rest[0].clone();
    let rhs = rest
        .last()
        .ok_or(IsleError::Parse {
            pos,
            message: "`rule` requires a right-hand side".into(),
        })?
        .clone();
    let mut if_lets = Vec::new();
    for clause in &rest[1..rest.len() - 1] {
        let clause_items = expect_list(clause)?;
        let clause_pos = clause.pos();
        let head = clause_items.first().ok_or(IsleError::Parse {
            pos: clause_pos,
            message: "empty rule clause".into(),
        })?;
        if expect_sym(head)? != "if-let" {
            return Err(IsleError::Parse {
                pos: clause_pos,
                message: "expected an `if-let` clause between a rule's pattern and right-hand side".into(),
            });
        }
        let pattern = clause_items
            .get(1)
            .ok_or(IsleError::Parse {
                pos: clause_pos,
                message: "`if-let` requires a pattern".into(),
            })?
            .clone();
        let expr = clause_items
            .get(2)
            .ok_or(IsleError::Parse {
                pos: clause_pos,
                message: "`if-let` requires an expression".into(),
            })?
            .clone();
        if_lets.push(IfLetDef { pattern, expr, pos: clause_pos });
    }
    Ok(Def::Rule(RuleDef {
        priority,
        lhs,
        if_lets,
        rhs,
        pos,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decl_and_rule() {
        let src = "
            (type Imm primitive)
            (decl iadd (Imm Imm) Imm)
            (decl add_imm (Imm Imm) Imm extractor)
            (rule 5 (iadd x y) (add_imm x y))
        ";
        let defs = parse(src, "test").unwrap();
        assert_eq!(defs.defs.len(), 4);
        assert!(matches!(defs.defs[0], Def::Type(_)));
        match &defs.defs[2] {
            Def::Decl(d) => assert!(d.is_extractor),
            _ => panic!("expected decl"),
        }
        match &defs.defs[3] {
            Def::Rule(r) => assert_eq!(r.priority, 5),
            _ => panic!("expected rule"),
        }
    }

    #[test]
    fn parses_at_binding_pattern() {
        let defs = parse("(rule (iadd (x @ (const _)) y) (foo x y))", "test").unwrap();
        match &defs.defs[0] {
            Def::Rule(r) => {
                let items = list(&r.lhs).unwrap();
                assert!(matches!(items[1], SExpr::At(..)));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn at_binding_names_the_leading_variable() {
        let defs = parse("(rule (iadd (x @ (const _)) y) (foo x y))", "test").unwrap();
        match &defs.defs[0] {
            Def::Rule(r) => {
                let items = list(&r.lhs).unwrap();
                match &items[1] {
                    SExpr::At(pat, name, _) => {
                        assert_eq!(name, "x");
                        assert!(list(pat).is_some(), "the bound pattern should be `(const _)`");
                    }
                    other => panic!("expected an @ binding, got {other:?}"),
                }
            }
            _ => panic!(),
        }
    }

    #[test]
    fn rejects_unclosed_paren() {
        assert!(parse("(rule (iadd x y) (add x y)", "test").is_err());
    }

    #[test]
    fn parses_enum_type_with_typed_variants() {
        let defs = parse(
            "(type Inst (enum (Add (lhs Imm) (rhs Imm)) (Neg (val Imm)) (Nop)))",
            "test",
        )
        .unwrap();
        match &defs.defs[0] {
            Def::Type(t) => {
                assert_eq!(t.variants.len(), 3);
                assert_eq!(t.variants[0].name, "Add");
                assert_eq!(t.variants[0].field_types, vec!["Imm".to_string(), "Imm".to_string()]);
                assert!(t.variants[2].field_types.is_empty());
            }
            _ => panic!("expected a type def"),
        }
    }

    #[test]
    fn parses_if_let_guard_between_pattern_and_rhs() {
        let defs = parse(
            "(rule (iadd x y) (if-let z (half x)) (foo z y))",
            "test",
        )
        .unwrap();
        match &defs.defs[0] {
            Def::Rule(r) => {
                assert_eq!(r.if_lets.len(), 1);
                assert_eq!(sym(&r.if_lets[0].pattern), Some("z"));
            }
            _ => panic!("expected a rule"),
        }
    }

    #[test]
    fn parses_internal_extractor_macro() {
        let defs = parse("(extractor (pair a b) (cons a (cons b nil)))", "test").unwrap();
        match &defs.defs[0] {
            Def::InternalExtractor(e) => {
                assert_eq!(e.name, "pair");
                assert_eq!(e.params, vec!["a".to_string(), "b".to_string()]);
            }
            _ => panic!("expected an internal extractor macro"),
        }
    }

    #[test]
    fn extern_extractor_is_distinct_from_internal_extractor_macro() {
        let defs = parse("(extern extractor const_zero rust_const_zero)", "test").unwrap();
        match &defs.defs[0] {
            Def::Extern(e) => {
                assert!(e.is_extractor);
                assert_eq!(e.rust_fn, "rust_const_zero");
            }
            _ => panic!("expected an extern binding"),
        }
    }
}
