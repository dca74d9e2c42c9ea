//! Semantic analysis: resolves symbols against declarations, type-checks
//! rule left/right-hand sides, and normalizes patterns into a small typed
//! tree the match compiler (`trie`) consumes.
//!
//! Scope: type checking here is deliberately shallow — it checks term
//! arity and extractor/constructor capability, not full type inference.
//! Instruction-selection rule sets in practice lean on the host type system
//! (the Rust types `extern` functions actually take) for the rest; a
//! from-scratch Hindley-Milner pass would check nothing a real Rust build
//! of the generated dispatch code wouldn't already catch.

use std::collections::{HashMap, HashSet};

use crate::ast::{Def, Defs, SExpr};
use crate::error::{IsleError, Pos};

/// Index of a declared type within a [`TypeEnv`].
pub type TypeId = usize;
/// Index of a declared term within a [`TermEnv`].
pub type TermId = usize;

/// One variant of an enum-declared [`TypeInfo`], with its typed fields.
#[derive(Debug, Clone)]
pub struct VariantInfo {
    /// The variant's name.
    pub name: String,
    /// Declared field types, by name, in order.
    pub field_types: Vec<String>,
}

/// A declared type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    /// The type's name.
    pub name: String,
    /// Whether it has a primitive (externally defined) Rust representation.
    pub is_primitive: bool,
    /// The type's variants, if it was declared as a DSL enum rather than
    /// `primitive`.
    pub variants: Vec<VariantInfo>,
}

/// The set of types declared across a rule-set source.
#[derive(Debug, Clone, Default)]
pub struct TypeEnv {
    /// Declared types, in declaration order.
    pub types: Vec<TypeInfo>,
    by_name: HashMap<String, TypeId>,
}

impl TypeEnv {
    fn declare(&mut self, name: &str, is_primitive: bool, variants: Vec<VariantInfo>) -> TypeId {
        let id = self.types.len();
        self.types.push(TypeInfo {
            name: name.to_string(),
            is_primitive,
            variants,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Looks up a declared type by name.
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }
}

/// A declared term: its signature and, if bound, the external Rust
/// function implementing it.
#[derive(Debug, Clone)]
pub struct TermInfo {
    /// The term's name.
    pub name: String,
    /// Declared argument types, by name (see module docs on type-checking
    /// scope: stored but not unified against call sites beyond arity).
    pub arg_types: Vec<String>,
    /// Declared return type, by name.
    pub ret_type: String,
    /// Whether this term may appear in a pattern (left-hand side).
    pub is_extractor: bool,
    /// The external Rust function bound to this term, if any.
    pub rust_fn: Option<String>,
}

/// The set of terms declared across a rule-set source.
#[derive(Debug, Clone, Default)]
pub struct TermEnv {
    /// Declared terms, in declaration order.
    pub terms: Vec<TermInfo>,
    by_name: HashMap<String, TermId>,
}

impl TermEnv {
    /// Looks up a declared term by name.
    pub fn lookup(&self, name: &str) -> Option<TermId> {
        self.by_name.get(name).copied()
    }
}

/// A normalized left-hand-side pattern node.
#[derive(Debug, Clone)]
pub enum PatKind {
    /// Matches anything.
    Wildcard,
    /// Matches an exact integer value.
    Int(i128),
    /// Matches values produced by this term, recursively matching its
    /// arguments.
    Term(TermId, Vec<Pattern>),
    /// Matches only if every sub-pattern matches the same value (`(and p1
    /// p2 ...)`); used to attach an equality or extractor test alongside a
    /// plain binding without a separate `if-let`.
    And(Vec<Pattern>),
}

/// A pattern node, optionally binding its match to a variable name (either
/// because it is itself a bare variable reference or because of an
/// explicit `(name @ pat)` alias).
#[derive(Debug, Clone)]
pub struct Pattern {
    /// What this node matches.
    pub kind: PatKind,
    /// Variable name this match is bound to, if any.
    pub bind: Option<String>,
    /// Source position, for diagnostics.
    pub pos: Pos,
}

/// A normalized right-hand-side expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A reference to a pattern-bound (or `let`-bound) variable.
    Var(String, Pos),
    /// An integer literal.
    Int(i128, Pos),
    /// A constructor call.
    Term(TermId, Vec<Expr>, Pos),
    /// `(let ((name expr) ...) body)`: evaluates each binding in order
    /// (each may reference the ones before it, `let*`-style), then
    /// evaluates `body` with all of them in scope.
    Let(Vec<(String, Expr)>, Box<Expr>, Pos),
}

/// An `(if-let pattern expr)` rule guard, normalized.
#[derive(Debug, Clone)]
pub struct Guard {
    /// The pattern tested against `expr`'s evaluated value.
    pub pattern: Pattern,
    /// The expression evaluated in the rule's current binding scope.
    pub expr: Expr,
}

/// A fully analyzed rule: normalized pattern, expression, and the term the
/// pattern's root dispatches on.
#[derive(Debug, Clone)]
pub struct Rule {
    /// The term name rules are grouped (and dispatched) by.
    pub root_term: TermId,
    /// Priority; higher fires first among rules whose patterns overlap.
    pub priority: i64,
    /// The normalized pattern.
    pub pattern: Pattern,
    /// Guards evaluated, in order, after the pattern matches and before
    /// `rhs` is evaluated; any failing guard rejects the rule for this
    /// input with no backtracking into `pattern` (see DESIGN.md).
    pub guards: Vec<Guard>,
    /// The normalized right-hand side.
    pub rhs: Expr,
    /// Source position of the `rule` form, used to order same-priority
    /// rules deterministically and in diagnostics.
    pub pos: Pos,
}

/// The fully analyzed contents of a rule-set source: types, terms, and
/// rules, ready for the match compiler.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    /// Declared types.
    pub types: TypeEnv,
    /// Declared terms.
    pub terms: TermEnv,
    /// Analyzed rules, in source order.
    pub rules: Vec<Rule>,
}

/// A purely syntactic pattern macro, resolved while analyzing patterns: a
/// formal parameter list and the template pattern they substitute into.
type ExtractorMacros = HashMap<String, (Vec<String>, SExpr)>;

/// Runs semantic analysis over parsed top-level forms.
pub fn analyze(defs: &Defs) -> Result<RuleSet, IsleError> {
    let mut types = TypeEnv::default();
    let mut terms = TermEnv::default();

    for def in &defs.defs {
        if let Def::Type(t) = def {
            let variants = t
                .variants
                .iter()
                .map(|v| VariantInfo {
                    name: v.name.clone(),
                    field_types: v.field_types.clone(),
                })
                .collect();
            types.declare(&t.name, t.is_primitive, variants);
        }
    }

    for def in &defs.defs {
        if let Def::Decl(d) = def {
            let id = terms.terms.len();
            terms.terms.push(TermInfo {
                name: d.term.clone(),
                arg_types: d.arg_types.clone(),
                ret_type: d.ret_type.clone(),
                is_extractor: d.is_extractor,
                rust_fn: None,
            });
            terms.by_name.insert(d.term.clone(), id);
            for ty in d.arg_types.iter().chain(std::iter::once(&d.ret_type)) {
                if types.lookup(ty).is_none() {
                    return Err(IsleError::UnknownSymbol {
                        pos: d.pos,
                        name: ty.clone(),
                    });
                }
            }
        }
    }

    for def in &defs.defs {
        if let Def::Extern(e) = def {
            let Some(&id) = terms.by_name.get(&e.term) else {
                return Err(IsleError::UnknownSymbol {
                    pos: e.pos,
                    name: e.term.clone(),
                });
            };
            terms.terms[id].rust_fn = Some(e.rust_fn.clone());
            terms.terms[id].is_extractor |= e.is_extractor;
        }
    }

    let mut extractors: ExtractorMacros = HashMap::new();
    for def in &defs.defs {
        if let Def::InternalExtractor(e) = def {
            extractors.insert(e.name.clone(), (e.params.clone(), e.template.clone()));
        }
    }

    let mut rules = Vec::new();
    for def in &defs.defs {
        if let Def::Rule(r) = def {
            let pattern = analyze_pattern(&r.lhs, &terms, &extractors)?;
            let mut bound = HashSet::new();
            collect_bound_vars(&pattern, &mut bound);

            let mut guards = Vec::new();
            for ifl in &r.if_lets {
                let expr = analyze_expr(&ifl.expr, &terms, &bound)?;
                let gpattern = analyze_pattern(&ifl.pattern, &terms, &extractors)?;
                collect_bound_vars(&gpattern, &mut bound);
                guards.push(Guard { pattern: gpattern, expr });
            }

            let rhs = analyze_expr(&r.rhs, &terms, &bound)?;
            let root_term = match &pattern.kind {
                PatKind::Term(id, _) => *id,
                _ => {
                    return Err(IsleError::Parse {
                        pos: r.pos,
                        message: "a rule's left-hand side must match a term call".into(),
                    })
                }
            };
            rules.push(Rule {
                root_term,
                priority: r.priority,
                pattern,
                guards,
                rhs,
                pos: r.pos,
            });
        }
    }

    Ok(RuleSet {
        types,
        terms,
        rules,
    })
}

fn sexpr_list(e: &SExpr) -> Option<&[SExpr]> {
    match e {
        SExpr::List(items, _) => Some(items.as_slice()),
        _ => None,
    }
}

/// Substitutes every occurrence of a `subst` key standing alone as a
/// symbol within `template`, leaving everything else (including the `@`
/// binding name half of an `At` node, which names a variable rather than
/// referencing a parameter) untouched.
fn substitute_params(template: &SExpr, subst: &HashMap<String, SExpr>) -> SExpr {
    match template {
        SExpr::Symbol(s, pos) => subst.get(s).cloned().unwrap_or_else(|| SExpr::Symbol(s.clone(), *pos)),
        SExpr::Int(v, pos) => SExpr::Int(*v, *pos),
        SExpr::List(items, pos) => {
            SExpr::List(items.iter().map(|i| substitute_params(i, subst)).collect(), *pos)
        }
        SExpr::At(inner, name, pos) => {
            SExpr::At(Box::new(substitute_params(inner, subst)), name.clone(), *pos)
        }
    }
}

fn analyze_pattern(e: &SExpr, terms: &TermEnv, extractors: &ExtractorMacros) -> Result<Pattern, IsleError> {
    match e {
        SExpr::Int(v, pos) => Ok(Pattern {
            kind: PatKind::Int(*v),
            bind: None,
            pos: *pos,
        }),
        SExpr::Symbol(s, pos) => {
            if s == "_" {
                Ok(Pattern {
                    kind: PatKind::Wildcard,
                    bind: None,
                    pos: *pos,
                })
            } else if let Some(id) = terms.lookup(s) {
                if !terms.terms[id].arg_types.is_empty() {
                    return Err(IsleError::TypeMismatch {
                        pos: *pos,
                        expected: format!("{} arguments", terms.terms[id].arg_types.len()),
                        found: "0 arguments".into(),
                    });
                }
                Ok(Pattern {
                    kind: PatKind::Term(id, Vec::new()),
                    bind: None,
                    pos: *pos,
                })
            } else {
                Ok(Pattern {
                    kind: PatKind::Wildcard,
                    bind: Some(s.clone()),
                    pos: *pos,
                })
            }
        }
        SExpr::List(items, pos) => {
            let head = items.first().ok_or(IsleError::Parse {
                pos: *pos,
                message: "empty pattern list".into(),
            })?;
            let name = match head {
                SExpr::Symbol(s, _) => s.as_str(),
                _ => {
                    return Err(IsleError::Parse {
                        pos: *pos,
                        message: "expected a term name".into(),
                    })
                }
            };
            if name == "and" {
                let sub = items[1..]
                    .iter()
                    .map(|a| analyze_pattern(a, terms, extractors))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Pattern {
                    kind: PatKind::And(sub),
                    bind: None,
                    pos: *pos,
                });
            }
            if let Some((params, template)) = extractors.get(name) {
                let args = &items[1..];
                if args.len() != params.len() {
                    return Err(IsleError::TypeMismatch {
                        pos: *pos,
                        expected: format!("{} arguments", params.len()),
                        found: format!("{} arguments", args.len()),
                    });
                }
                let subst: HashMap<String, SExpr> = params.iter().cloned().zip(args.iter().cloned()).collect();
                let expanded = substitute_params(template, &subst);
                return analyze_pattern(&expanded, terms, extractors);
            }
            let id = terms.lookup(name).ok_or(IsleError::UnknownSymbol {
                pos: *pos,
                name: name.to_string(),
            })?;
            if !terms.terms[id].is_extractor {
                return Err(IsleError::TypeMismatch {
                    pos: *pos,
                    expected: "extractor".into(),
                    found: format!("constructor-only term `{name}`"),
                });
            }
            let args = &items[1..];
            if args.len() != terms.terms[id].arg_types.len() {
                return Err(IsleError::TypeMismatch {
                    pos: *pos,
                    expected: format!("{} arguments", terms.terms[id].arg_types.len()),
                    found: format!("{} arguments", args.len()),
                });
            }
            let sub = args
                .iter()
                .map(|a| analyze_pattern(a, terms, extractors))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Pattern {
                kind: PatKind::Term(id, sub),
                bind: None,
                pos: *pos,
            })
        }
        SExpr::At(inner, name, pos) => {
            let mut p = analyze_pattern(inner, terms, extractors)?;
            p.bind = Some(name.clone());
            p.pos = *pos;
            Ok(p)
        }
    }
}

fn collect_bound_vars(p: &Pattern, out: &mut HashSet<String>) {
    if let Some(name) = &p.bind {
        out.insert(name.clone());
    }
    match &p.kind {
        PatKind::Term(_, args) => {
            for a in args {
                collect_bound_vars(a, out);
            }
        }
        PatKind::And(subs) => {
            for a in subs {
                collect_bound_vars(a, out);
            }
        }
        PatKind::Wildcard | PatKind::Int(_) => {}
    }
}

fn analyze_expr(e: &SExpr, terms: &TermEnv, bound: &HashSet<String>) -> Result<Expr, IsleError> {
    match e {
        SExpr::Int(v, pos) => Ok(Expr::Int(*v, *pos)),
        SExpr::Symbol(s, pos) => {
            if bound.contains(s) {
                Ok(Expr::Var(s.clone(), *pos))
            } else if let Some(id) = terms.lookup(s) {
                if !terms.terms[id].arg_types.is_empty() {
                    return Err(IsleError::TypeMismatch {
                        pos: *pos,
                        expected: format!("{} arguments", terms.terms[id].arg_types.len()),
                        found: "0 arguments".into(),
                    });
                }
                Ok(Expr::Term(id, Vec::new(), *pos))
            } else {
                Err(IsleError::UnboundVariable {
                    pos: *pos,
                    name: s.clone(),
                })
            }
        }
        SExpr::List(items, pos) => {
            let head = items.first().ok_or(IsleError::Parse {
                pos: *pos,
                message: "empty expression list".into(),
            })?;
            let name = match head {
                SExpr::Symbol(s, _) => s.as_str(),
                _ => {
                    return Err(IsleError::Parse {
                        pos: *pos,
                        message: "expected a term name".into(),
                    })
                }
            };
            if name == "let" {
                let bindings_form = items.get(1).ok_or(IsleError::Parse {
                    pos: *pos,
                    message: "`let` requires a binding list".into(),
                })?;
                let binding_forms = sexpr_list(bindings_form).ok_or(IsleError::Parse {
                    pos: bindings_form.pos(),
                    message: "expected a parenthesized `let` binding list".into(),
                })?;
                let mut new_bound = bound.clone();
                let mut analyzed = Vec::new();
                for b in binding_forms {
                    let b_items = sexpr_list(b).ok_or(IsleError::Parse {
                        pos: b.pos(),
                        message: "expected a `(name expr)` let binding".into(),
                    })?;
                    let bname = match b_items.first() {
                        Some(SExpr::Symbol(s, _)) => s.clone(),
                        _ => {
                            return Err(IsleError::Parse {
                                pos: b.pos(),
                                message: "expected a variable name".into(),
                            })
                        }
                    };
                    let bexpr_sexpr = b_items.get(1).ok_or(IsleError::Parse {
                        pos: b.pos(),
                        message: "let binding requires an expression".into(),
                    })?;
                    let bexpr = analyze_expr(bexpr_sexpr, terms, &new_bound)?;
                    new_bound.insert(bname.clone());
                    analyzed.push((bname, bexpr));
                }
                let body_sexpr = items.get(2).ok_or(IsleError::Parse {
                    pos: *pos,
                    message: "`let` requires a body expression".into(),
                })?;
                let body = analyze_expr(body_sexpr, terms, &new_bound)?;
                return Ok(Expr::Let(analyzed, Box::new(body), *pos));
            }
            let id = terms.lookup(name).ok_or(IsleError::UnknownSymbol {
                pos: *pos,
                name: name.to_string(),
            })?;
            let args = &items[1..];
            if args.len() != terms.terms[id].arg_types.len() {
                return Err(IsleError::TypeMismatch {
                    pos: *pos,
                    expected: format!("{} arguments", terms.terms[id].arg_types.len()),
                    found: format!("{} arguments", args.len()),
                });
            }
            let sub = args
                .iter()
                .map(|a| analyze_expr(a, terms, bound))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Term(id, sub, *pos))
        }
        SExpr::At(..) => Err(IsleError::Parse {
            pos: e.pos(),
            message: "`@` bindings are only valid in patterns".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn analyzed(src: &str) -> RuleSet {
        analyze(&parse(src, "test").unwrap()).unwrap()
    }

    #[test]
    fn resolves_simple_rule() {
        let rs = analyzed(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl iadd_imm (Imm Imm) Imm)
             (rule (iadd x y) (iadd_imm x y))",
        );
        assert_eq!(rs.rules.len(), 1);
        assert_eq!(rs.rules[0].root_term, rs.terms.lookup("iadd").unwrap());
    }

    #[test]
    fn unbound_variable_is_rejected() {
        let defs = parse(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (rule (iadd x y) (iadd z z))",
            "test",
        )
        .unwrap();
        assert!(matches!(
            analyze(&defs),
            Err(IsleError::UnboundVariable { .. })
        ));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let defs = parse(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (rule (iadd x) (iadd x x))",
            "test",
        )
        .unwrap();
        assert!(matches!(analyze(&defs), Err(IsleError::TypeMismatch { .. })));
    }

    #[test]
    fn enum_type_declares_its_variants() {
        let rs = analyzed("(type Inst (enum (Add (lhs Imm) (rhs Imm)) (Nop)))");
        let ty = &rs.types.types[rs.types.lookup("Inst").unwrap()];
        assert_eq!(ty.variants.len(), 2);
        assert_eq!(ty.variants[0].field_types, vec!["Imm".to_string(), "Imm".to_string()]);
    }

    #[test]
    fn and_pattern_analyzes_every_sub_pattern() {
        let rs = analyzed(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl is_pow2 (Imm) Imm)
             (decl f (Imm Imm) Imm)
             (rule (iadd (and x (is_pow2 x)) y) (f x y))",
        );
        match &rs.rules[0].pattern.kind {
            PatKind::Term(_, args) => assert!(matches!(args[0].kind, PatKind::And(_))),
            _ => panic!("expected a term pattern"),
        }
    }

    #[test]
    fn if_let_guard_extends_scope_for_the_rhs() {
        let rs = analyzed(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl half (Imm) Imm)
             (decl f (Imm Imm) Imm)
             (rule (iadd x y) (if-let z (half x)) (f z y))",
        );
        assert_eq!(rs.rules[0].guards.len(), 1);
        assert!(matches!(rs.rules[0].rhs, Expr::Term(..)));
    }

    #[test]
    fn if_let_guard_referencing_unbound_expr_variable_is_rejected() {
        let defs = parse(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl half (Imm) Imm)
             (decl f (Imm Imm) Imm)
             (rule (iadd x y) (if-let z (half w)) (f z y))",
            "test",
        )
        .unwrap();
        assert!(matches!(
            analyze(&defs),
            Err(IsleError::UnboundVariable { .. })
        ));
    }

    #[test]
    fn let_expr_bindings_are_sequentially_scoped() {
        let rs = analyzed(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl half (Imm) Imm)
             (decl f (Imm Imm) Imm)
             (rule (iadd x y) (let ((a (half x)) (b (half a))) (f a b)))",
        );
        match &rs.rules[0].rhs {
            Expr::Let(bindings, body, _) => {
                assert_eq!(bindings.len(), 2);
                assert!(matches!(**body, Expr::Term(..)));
            }
            _ => panic!("expected a let expression"),
        }
    }

    #[test]
    fn extractor_macro_expands_into_its_template() {
        let rs = analyzed(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl is_pow2 (Imm) Imm)
             (decl f (Imm Imm) Imm)
             (extractor (pow2 v) (and v (is_pow2 v)))
             (rule (iadd (pow2 x) y) (f x y))",
        );
        match &rs.rules[0].pattern.kind {
            PatKind::Term(_, args) => assert!(matches!(args[0].kind, PatKind::And(_))),
            _ => panic!("expected a term pattern"),
        }
    }
}
