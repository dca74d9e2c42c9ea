//! Abstract syntax: the top-level forms a rule-set source file contains.

use crate::error::Pos;

/// An S-expression, the universal shape parsed from source before semantic
/// analysis assigns it a more specific meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SExpr {
    /// A bare symbol, e.g. `iadd` or `$I32`.
    Symbol(String, Pos),
    /// An integer literal.
    Int(i128, Pos),
    /// A parenthesized list of sub-expressions.
    List(Vec<SExpr>, Pos),
    /// `(var @ pattern)`: binds the match of `pattern` to `var`.
    At(Box<SExpr>, String, Pos),
}

impl SExpr {
    /// The position this expression started at.
    pub fn pos(&self) -> Pos {
        match self {
            SExpr::Symbol(_, p) | SExpr::Int(_, p) | SExpr::List(_, p) | SExpr::At(_, _, p) => *p,
        }
    }
}

/// A top-level form in a rule-set source file.
#[derive(Debug, Clone)]
pub enum Def {
    /// `(type Name (enum (variant ...) ...))` or a primitive type alias.
    Type(TypeDef),
    /// `(decl term (arg-ty ...) ret-ty)`: declares a term's signature.
    Decl(DeclDef),
    /// `(extern constructor term rust_fn)` or `(extern extractor term rust_fn)`:
    /// binds a term to an externally provided implementation.
    Extern(ExternDef),
    /// `(extractor (Name param ...) template)`: a purely-internal pattern
    /// macro, expanded at analysis time by substituting `param`s into
    /// `template` wherever `Name` is used in a pattern. Distinct from
    /// `(extern extractor ...)`, which binds to Rust rather than expanding
    /// to more DSL syntax.
    InternalExtractor(InternalExtractorDef),
    /// `(rule [priority] lhs (if-let pat expr)* rhs)`: a rewrite rule.
    Rule(RuleDef),
}

/// One variant of an enum type declaration, with its typed fields.
#[derive(Debug, Clone)]
pub struct VariantDef {
    /// The variant's name.
    pub name: String,
    /// Names of each field's declared type, in order.
    pub field_types: Vec<String>,
    /// Where this variant appears.
    pub pos: Pos,
}

/// A type declaration.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// The declared type's name.
    pub name: String,
    /// Whether values of this type carry a primitive Rust representation
    /// (`true`) or are an enum of variants defined purely within the DSL.
    pub is_primitive: bool,
    /// The type's variants, if it was declared `(enum (Variant (field ty)
    /// ...) ...)` rather than `primitive`.
    pub variants: Vec<VariantDef>,
    /// Where this declaration appears.
    pub pos: Pos,
}

/// A term signature declaration.
#[derive(Debug, Clone)]
pub struct DeclDef {
    /// The term's name, used in patterns and right-hand sides.
    pub term: String,
    /// Names of the argument types.
    pub arg_types: Vec<String>,
    /// Name of the return type.
    pub ret_type: String,
    /// Whether this term is usable as an extractor (in a pattern position)
    /// as well as a constructor (in a right-hand-side position).
    pub is_extractor: bool,
    /// Where this declaration appears.
    pub pos: Pos,
}

/// Binds a declared term to an externally supplied Rust function name.
#[derive(Debug, Clone)]
pub struct ExternDef {
    /// The term being bound.
    pub term: String,
    /// The Rust function name that implements it.
    pub rust_fn: String,
    /// `true` for `extractor`, `false` for `constructor`.
    pub is_extractor: bool,
    /// Where this declaration appears.
    pub pos: Pos,
}

/// A purely syntactic pattern macro: `Name` stands for `template` with each
/// `param` substituted by the argument expression a call site supplies.
#[derive(Debug, Clone)]
pub struct InternalExtractorDef {
    /// The macro's name, used as a pattern-position "term" at call sites.
    pub name: String,
    /// Formal parameter names, substituted into `template`.
    pub params: Vec<String>,
    /// The pattern template, with `param` occurrences standing in for the
    /// call site's actual sub-patterns.
    pub template: SExpr,
    /// Where this declaration appears.
    pub pos: Pos,
}

/// An `(if-let pattern expr)` rule guard: evaluates `expr` in the rule's
/// current binding scope and matches `pattern` against the result, binding
/// any new variables and extending scope for what follows; failure to
/// match rejects the rule entirely (no backtracking into the left-hand
/// side pattern — see DESIGN.md).
#[derive(Debug, Clone)]
pub struct IfLetDef {
    /// The pattern tested against `expr`'s value.
    pub pattern: SExpr,
    /// The expression evaluated in the current scope.
    pub expr: SExpr,
    /// Where this guard appears.
    pub pos: Pos,
}

/// A single rewrite rule: `lhs` is a pattern, `rhs` is a constructor
/// expression built from the pattern's bound variables (and any variables
/// `if_lets` add).
#[derive(Debug, Clone)]
pub struct RuleDef {
    /// Optional explicit priority; higher fires first when multiple rules'
    /// patterns overlap. Defaults to 0.
    pub priority: i64,
    /// The left-hand-side pattern.
    pub lhs: SExpr,
    /// Zero or more `if-let` guards, evaluated in order between matching
    /// `lhs` and evaluating `rhs`.
    pub if_lets: Vec<IfLetDef>,
    /// The right-hand-side constructor expression.
    pub rhs: SExpr,
    /// Where this rule appears.
    pub pos: Pos,
}

/// A fully parsed rule-set source file: an ordered list of top-level forms.
#[derive(Debug, Clone, Default)]
pub struct Defs {
    /// The forms, in source order.
    pub defs: Vec<Def>,
}
