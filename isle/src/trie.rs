//! Match compiler: turns a [`RuleSet`]'s rules into a decision tree per
//! root term.
//!
//! Patterns are not walked directly. Every value a pattern could touch —
//! the root input, and every argument reachable from it through nested
//! term patterns — is first hash-consed into a [`Binding`] so that two
//! rules extracting the same value the same way (say, the second operand
//! of an `iadd`) share one [`BindingId`] rather than each re-deriving it.
//! Sharing the id is what lets a non-linear pattern (the same variable
//! bound twice in one rule, e.g. `(iadd x x)`) compile down to a single
//! runtime equality test between two `BindingId`s ([`Disc::Eq`]) instead of
//! a second, redundant extraction.
//!
//! Two rules "overlap" when some concrete input matches both of their
//! patterns. We classify overlaps while building the tree:
//!
//! - **disjoint**: the patterns diverge at some discriminant (different
//!   term, different integer, or a failed equality test at the same
//!   binding) — they end up as distinct branches of a
//!   [`DecisionNode::Switch`] and never compete.
//! - **subset**: one pattern is a strict generalization of the other (it
//!   stops testing where the other keeps going, e.g. `x` vs. `(iadd x y)`)
//!   — the more general rule is reached first along any path that also
//!     satisfies the more specific one, so its priority must be set
//!     correctly by the rule's author for the specific rule to ever fire.
//! - **same**: both patterns test exactly the same discriminants and so
//!   land in the same leaf bucket — this is only resolvable by priority;
//!   two such rules at equal priority is a genuine ambiguity and rejected
//!   at build time rather than resolved by, say, source order.

use std::collections::{HashMap, HashSet, VecDeque};

use retarget_control::ControlPlane;

use crate::error::{IsleError, Pos};
use crate::sema::{Expr, PatKind, Pattern, Rule, RuleSet, TermId};

/// Index of an interned [`Binding`] within a [`Bindings`] table.
pub type BindingId = usize;

/// A value reachable from a dispatch root, in terms of how to extract it.
/// Two patterns (in the same rule or different rules) that reach a value
/// the same way intern to the same [`BindingId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Binding {
    /// The root input value itself.
    Argument,
    /// The `field`'th argument of whatever term matched at `source`.
    MatchArg { source: BindingId, field: usize },
}

/// Hash-conses [`Binding`]s: interning the same `Binding` twice returns the
/// same [`BindingId`], so structurally identical extraction paths across
/// different rules (or within one rule's non-linear pattern) share storage
/// and, more importantly, share identity for the `Disc::Eq` equality test.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    table: Vec<Binding>,
    by_binding: HashMap<Binding, BindingId>,
}

impl Bindings {
    fn intern(&mut self, b: Binding) -> BindingId {
        if let Some(&id) = self.by_binding.get(&b) {
            return id;
        }
        let id = self.table.len();
        self.table.push(b.clone());
        self.by_binding.insert(b, id);
        id
    }

    fn root(&mut self) -> BindingId {
        self.intern(Binding::Argument)
    }

    fn match_arg(&mut self, source: BindingId, field: usize) -> BindingId {
        self.intern(Binding::MatchArg { source, field })
    }

    /// Looks up the `BindingId` for `source`'s `field`'th argument without
    /// interning a new one; used at dispatch time, after compilation has
    /// already interned every binding a decision tree can reference.
    pub fn lookup_match_arg(&self, source: BindingId, field: usize) -> Option<BindingId> {
        self.by_binding.get(&Binding::MatchArg { source, field }).copied()
    }

    /// Looks up a previously interned binding's definition.
    pub fn get(&self, id: BindingId) -> &Binding {
        &self.table[id]
    }

    /// Number of distinct bindings interned so far.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no binding has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// A node of the compiled decision tree.
#[derive(Debug, Clone)]
pub enum DecisionNode {
    /// Test the value held by `binding` against each case in turn.
    Switch {
        /// The binding being tested.
        binding: BindingId,
        /// Each case: a discriminant to match, and the subtree to follow
        /// when it does.
        cases: Vec<(Disc, DecisionNode)>,
    },
    /// A rule matched: this is its index into [`CompiledRules::rules`].
    Leaf(usize),
    /// No rule matches.
    Fail,
}

/// A concrete test a [`DecisionNode::Switch`] discriminates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disc {
    /// An exact integer value.
    Int(i128),
    /// Production by a specific term, with its declared arity.
    Term(TermId, usize),
    /// The value must equal whatever was bound to `other` earlier in this
    /// same walk — the runtime form of a non-linear pattern's repeated
    /// variable.
    Eq(BindingId),
}

/// A rule set compiled into a decision tree, keyed by the term each rule's
/// pattern roots on (the term a lowering dispatcher looks up by the
/// instruction opcode it is currently processing).
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    /// The analyzed rules, indexed by the integers [`DecisionNode::Leaf`]
    /// refers to.
    pub rules: Vec<Rule>,
    /// One decision tree per distinct root term.
    pub by_root: Vec<(TermId, DecisionNode)>,
    /// For each rule (by index, matching `rules`), the variable-name to
    /// `BindingId` map its pattern produces, consulted when evaluating its
    /// right-hand side.
    pub var_bindings: Vec<Vec<(String, BindingId)>>,
    /// The hash-consed binding table every `BindingId` above indexes into.
    pub bindings: Bindings,
}

#[derive(Clone)]
enum Obligation {
    /// `pattern` must match the value held by `binding`.
    Pattern { binding: BindingId, pattern: Pattern },
    /// `binding` and `other` must hold equal values.
    Eq { binding: BindingId, other: BindingId },
}

#[derive(Clone, Default)]
struct RuleCase {
    rule_idx: usize,
    priority: i64,
    pos: Pos,
    pending: VecDeque<Obligation>,
    binds: Vec<(String, BindingId)>,
    /// Variable name to the binding it was first bound at, within this
    /// rule; a later occurrence of the same name becomes an
    /// `Obligation::Eq` against the recorded binding instead of a second
    /// bind.
    seen: HashMap<String, BindingId>,
    /// How many repeated-variable (`Obligation::Eq`) constraints this
    /// rule's pattern imposed. A rule matching `(iadd x x)` is strictly
    /// more specific than one matching `(iadd x y)` even though both have
    /// emptied their obligation queue by the same point in the tree, so
    /// this breaks what would otherwise be a spurious priority tie
    /// between them.
    specificity: usize,
}

/// Compiles every rule in `rs` into per-root-term decision trees, using
/// `control` to break ties among discriminants that don't otherwise have an
/// ordering preference (see [`retarget_control::ControlPlane::shuffle`]).
pub fn compile(rs: &RuleSet, control: &mut ControlPlane) -> Result<CompiledRules, IsleError> {
    let mut bindings = Bindings::default();
    let root_binding = bindings.root();

    let mut roots: Vec<TermId> = Vec::new();
    for r in &rs.rules {
        if !roots.contains(&r.root_term) {
            roots.push(r.root_term);
        }
    }

    let mut var_bindings = vec![Vec::new(); rs.rules.len()];
    let mut by_root = Vec::new();
    for root in roots {
        let cases: Vec<RuleCase> = rs
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.root_term == root)
            .map(|(idx, r)| RuleCase {
                rule_idx: idx,
                priority: r.priority,
                pos: r.pos,
                pending: VecDeque::from([Obligation::Pattern {
                    binding: root_binding,
                    pattern: r.pattern.clone(),
                }]),
                binds: Vec::new(),
                seen: HashMap::new(),
                specificity: 0,
            })
            .collect();
        #[cfg(feature = "logging")]
        log::trace!(
            "compiling {} rule(s) rooted at term {root} into a decision tree",
            rs.rules.iter().filter(|r| r.root_term == root).count()
        );
        let tree = compile_cases(cases, &mut var_bindings, &mut bindings, control)?;
        by_root.push((root, tree));
    }

    Ok(CompiledRules {
        rules: rs.rules.clone(),
        by_root,
        var_bindings,
        bindings,
    })
}

/// Resolves every obligation at the front of `case`'s queue that never
/// needs a branch: wildcards (bind-or-check-equal) and and-patterns
/// (flattened into obligations against the same binding).
fn resolve_front(case: &mut RuleCase) {
    loop {
        let is_wildcard = matches!(
            case.pending.front(),
            Some(Obligation::Pattern { pattern, .. }) if matches!(pattern.kind, PatKind::Wildcard)
        );
        let is_and = matches!(
            case.pending.front(),
            Some(Obligation::Pattern { pattern, .. }) if matches!(pattern.kind, PatKind::And(_))
        );
        if !is_wildcard && !is_and {
            break;
        }
        let Some(Obligation::Pattern { binding, pattern }) = case.pending.pop_front() else {
            unreachable!("checked above")
        };
        if let Some(name) = &pattern.bind {
            if let Some(&prior) = case.seen.get(name) {
                case.pending.push_front(Obligation::Eq { binding, other: prior });
                case.specificity += 1;
            } else {
                case.seen.insert(name.clone(), binding);
                case.binds.push((name.clone(), binding));
            }
        }
        if let PatKind::And(subs) = pattern.kind {
            for sub in subs.into_iter().rev() {
                case.pending.push_front(Obligation::Pattern { binding, pattern: sub });
            }
        }
    }
}

fn compile_cases(
    mut cases: Vec<RuleCase>,
    var_bindings: &mut [Vec<(String, BindingId)>],
    bindings: &mut Bindings,
    control: &mut ControlPlane,
) -> Result<DecisionNode, IsleError> {
    for c in cases.iter_mut() {
        resolve_front(c);
    }

    let (done, mut remaining): (Vec<_>, Vec<_>) =
        cases.drain(..).partition(|c| c.pending.is_empty());

    if remaining.is_empty() {
        if done.is_empty() {
            return Ok(DecisionNode::Fail);
        }
        let mut ordered = done;
        ordered.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.specificity.cmp(&a.specificity))
                .then(a.pos.line.cmp(&b.pos.line))
        });
        if ordered.len() > 1 && ordered[0].priority == ordered[1].priority && ordered[0].specificity == ordered[1].specificity {
            return Err(IsleError::PriorityAmbiguous {
                first: ordered[0].pos,
                second: ordered[1].pos,
            });
        }
        let winner = ordered.into_iter().next().unwrap();
        var_bindings[winner.rule_idx] = winner.binds;
        return Ok(DecisionNode::Leaf(winner.rule_idx));
    }

    let binding = match remaining[0].pending.front().unwrap() {
        Obligation::Pattern { binding, .. } | Obligation::Eq { binding, .. } => *binding,
    };

    let mut groups: Vec<(Disc, Vec<RuleCase>)> = Vec::new();
    for mut case in remaining.drain(..) {
        let ob = case.pending.pop_front().unwrap();
        let disc = match &ob {
            Obligation::Eq { binding: b, other } => {
                debug_assert_eq!(*b, binding);
                Disc::Eq(*other)
            }
            Obligation::Pattern { binding: b, pattern } => {
                debug_assert_eq!(*b, binding);
                match &pattern.kind {
                    PatKind::Int(v) => Disc::Int(*v),
                    PatKind::Term(id, args) => Disc::Term(*id, args.len()),
                    PatKind::Wildcard | PatKind::And(_) => unreachable!("resolved in resolve_front"),
                }
            }
        };
        if let Obligation::Pattern { pattern, .. } = &ob {
            if let Some(name) = &pattern.bind {
                if let Some(&prior) = case.seen.get(name) {
                    case.pending.push_front(Obligation::Eq { binding, other: prior });
                    case.specificity += 1;
                } else {
                    case.seen.insert(name.clone(), binding);
                    case.binds.push((name.clone(), binding));
                }
            }
            if let PatKind::Term(_, args) = &pattern.kind {
                for (i, arg) in args.iter().enumerate() {
                    let sub_binding = bindings.match_arg(binding, i);
                    case.pending.push_back(Obligation::Pattern {
                        binding: sub_binding,
                        pattern: arg.clone(),
                    });
                }
            }
        }
        if let Some(group) = groups.iter_mut().find(|(d, _)| *d == disc) {
            group.1.push(case);
        } else {
            groups.push((disc, vec![case]));
        }
    }

    // Cases that reached `done` before any case in this call needed the
    // discriminant at `binding` are strictly more general (a "subset"
    // overlap with everything tested below); fold them back into every
    // branch so their priority is honored no matter which branch is taken.
    let mut tree_cases = Vec::new();
    for (disc, mut group) in groups {
        for d in &done {
            group.push(d.clone());
        }
        let subtree = compile_cases(group, var_bindings, bindings, control)?;
        tree_cases.push((disc, subtree));
    }

    control.shuffle(&mut tree_cases);

    Ok(DecisionNode::Switch {
        binding,
        cases: tree_cases,
    })
}

/// Walks a right-hand-side [`Expr`] collecting the set of variable names it
/// references, for callers building an evaluation closure.
pub fn rhs_vars(e: &Expr, out: &mut HashSet<String>) {
    match e {
        Expr::Var(name, _) => {
            out.insert(name.clone());
        }
        Expr::Int(..) => {}
        Expr::Term(_, args, _) => {
            for a in args {
                rhs_vars(a, out);
            }
        }
        Expr::Let(bindings, body, _) => {
            for (_, e) in bindings {
                rhs_vars(e, out);
            }
            rhs_vars(body, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::sema::analyze;

    fn compiled(src: &str) -> CompiledRules {
        let defs = parse(src, "test").unwrap();
        let rs = analyze(&defs).unwrap();
        let mut control = ControlPlane::default();
        compile(&rs, &mut control).unwrap()
    }

    #[test]
    fn disjoint_constants_become_switch_cases() {
        let cr = compiled(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl zero (Imm) Imm)
             (decl one (Imm) Imm)
             (rule (iadd 0 y) (zero y))
             (rule (iadd 1 y) (one y))",
        );
        assert_eq!(cr.by_root.len(), 1);
        match &cr.by_root[0].1 {
            DecisionNode::Switch { cases, .. } => assert_eq!(cases.len(), 2),
            _ => panic!("expected a switch"),
        }
    }

    #[test]
    fn equal_priority_full_overlap_is_ambiguous() {
        let defs = parse(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl f (Imm Imm) Imm)
             (decl g (Imm Imm) Imm)
             (rule (iadd x y) (f x y))
             (rule (iadd x y) (g x y))",
            "test",
        )
        .unwrap();
        let rs = analyze(&defs).unwrap();
        let mut control = ControlPlane::default();
        assert!(matches!(
            compile(&rs, &mut control),
            Err(IsleError::PriorityAmbiguous { .. })
        ));
    }

    #[test]
    fn explicit_priority_breaks_the_tie() {
        let cr = compiled(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl f (Imm Imm) Imm)
             (decl g (Imm Imm) Imm)
             (rule (iadd x y) (f x y))
             (rule 10 (iadd x y) (g x y))",
        );
        match &cr.by_root[0].1 {
            DecisionNode::Leaf(idx) => assert_eq!(cr.rules[*idx].priority, 10),
            other => panic!("expected a leaf, got {other:?}"),
        }
    }

    #[test]
    fn repeated_variable_compiles_to_an_equality_switch() {
        let cr = compiled(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl same (Imm) Imm)
             (decl f (Imm Imm) Imm)
             (rule (iadd x x) (same x))
             (rule (iadd x y) (f x y))",
        );
        fn has_eq_case(n: &DecisionNode) -> bool {
            match n {
                DecisionNode::Switch { cases, .. } => cases.iter().any(|(d, sub)| {
                    matches!(d, Disc::Eq(_)) || has_eq_case(sub)
                }),
                _ => false,
            }
        }
        assert!(has_eq_case(&cr.by_root[0].1));
    }

    #[test]
    fn shared_extraction_path_interns_to_one_binding() {
        let cr = compiled(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl zero (Imm) Imm)
             (decl one (Imm) Imm)
             (rule (iadd 0 y) (zero y))
             (rule (iadd 1 y) (one y))",
        );
        // Both rules bind `y` to the second argument of `iadd`; that
        // extraction path must hash-cons to a single BindingId.
        let ys: Vec<BindingId> = cr
            .var_bindings
            .iter()
            .filter_map(|vb| vb.iter().find(|(n, _)| n == "y").map(|(_, b)| *b))
            .collect();
        assert_eq!(ys.len(), 2);
        assert_eq!(ys[0], ys[1]);
    }
}
