//! Turns [`CompiledRules`] into a [`Dispatcher`]: something a lowering
//! pass can call once per instruction to run whichever rule's pattern
//! matches and get back the constructed replacement.
//!
//! The teacher's own ISLE emits literal Rust source for this step, compiled
//! by a `build.rs` ahead of the main crate build. That is not available
//! here (the host never invokes the Rust toolchain), so the decision tree
//! is instead walked at runtime by [`Dispatcher::run`], driven by a small
//! [`DispatchEnv`] the embedder implements over its own value
//! representation (e.g. IR `Value`s during lowering). The tree itself is
//! still built exactly once per rule set and reused for every call —
//! `run` does no parsing or re-analysis, only a walk over already-compiled
//! [`DecisionNode`]s.

use std::collections::HashMap;

use crate::sema::{Expr, PatKind, Pattern, TermId};
use crate::trie::{Bindings, CompiledRules, Disc};

/// What a caller must provide so a [`Dispatcher`] can test and build
/// values in the caller's own representation.
pub trait DispatchEnv {
    /// The caller's representation of a matched value (an IR `Value`, a
    /// constant, whatever the embedding lowers against). `PartialEq` is
    /// needed to evaluate the equality test a non-linear pattern compiles
    /// to ([`Disc::Eq`]).
    type Value: Clone + PartialEq;

    /// Tests whether `value` matches `disc`. On a `Disc::Term` match,
    /// returns the sub-values for that term's arguments so the dispatcher
    /// can continue matching nested patterns; on a `Disc::Int` match,
    /// returns an empty vector. Never called with `Disc::Eq`, which the
    /// dispatcher resolves itself by comparing two already-bound values.
    fn try_match(&mut self, value: &Self::Value, disc: &Disc) -> Option<Vec<Self::Value>>;

    /// Builds the value for an integer literal appearing on a rule's
    /// right-hand side.
    fn int_value(&mut self, value: i128) -> Self::Value;

    /// Invokes the constructor bound to `term` (either an `extern
    /// constructor` or a plain declared term) with already-evaluated
    /// argument values.
    fn construct(&mut self, term: TermId, args: Vec<Self::Value>) -> Self::Value;
}

/// A compiled rule set ready to dispatch on, for a given `DispatchEnv`.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    rules: CompiledRules,
}

impl Dispatcher {
    /// Wraps already-compiled rules into a runnable dispatcher.
    pub fn new(rules: CompiledRules) -> Self {
        Dispatcher { rules }
    }

    /// Matches `input` against the rules rooted at `root_term` and, if one
    /// fires, evaluates its right-hand side and returns the result. If the
    /// winning rule carries `if-let` guards, they run after the pattern
    /// walk and before the right-hand side: the first one that fails to
    /// match rejects the rule entirely (no backtracking into the pattern).
    /// Returns `None` if no rule's pattern matches (or every guard fails).
    pub fn run<E: DispatchEnv>(&self, env: &mut E, root_term: TermId, input: E::Value) -> Option<E::Value> {
        let (_, tree) = self.rules.by_root.iter().find(|(t, _)| *t == root_term)?;
        let mut values: HashMap<usize, E::Value> = HashMap::new();
        values.insert(0, input); // binding 0 is always Binding::Argument, interned first
        let leaf = walk(tree, env, &mut values, &self.rules.bindings)?;
        let var_bindings = &self.rules.var_bindings[leaf];
        let rule = &self.rules.rules[leaf];

        let mut extra: HashMap<String, E::Value> = HashMap::new();
        for guard in &rule.guards {
            let guard_value = eval_expr(&guard.expr, var_bindings, &values, &extra, env);
            match_pattern(&guard.pattern, &guard_value, env, &mut extra)?;
        }

        Some(eval_expr(&rule.rhs, var_bindings, &values, &extra, env))
    }
}

fn walk<E: DispatchEnv>(
    node: &crate::trie::DecisionNode,
    env: &mut E,
    values: &mut HashMap<usize, E::Value>,
    bindings: &Bindings,
) -> Option<usize> {
    use crate::trie::DecisionNode::*;
    match node {
        Fail => None,
        Leaf(idx) => Some(*idx),
        Switch { binding, cases } => {
            let v = values.get(binding).cloned()?;
            for (disc, subtree) in cases {
                if let Disc::Eq(other) = disc {
                    if values.get(other) == Some(&v) {
                        return walk(subtree, env, values, bindings);
                    }
                    continue;
                }
                if let Some(subvals) = env.try_match(&v, disc) {
                    for (i, sv) in subvals.into_iter().enumerate() {
                        if let Some(sub_binding) = bindings.lookup_match_arg(*binding, i) {
                            values.insert(sub_binding, sv);
                        }
                    }
                    return walk(subtree, env, values, bindings);
                }
            }
            None
        }
    }
}

/// Matches an uncompiled (`if-let` guard) [`Pattern`] directly against a
/// runtime value, since guard patterns aren't part of the decision tree a
/// rule's own left-hand side compiles to. Newly bound names land in
/// `extra`; a name already bound (by the rule's pattern or an earlier
/// guard) must compare equal rather than silently rebind.
fn match_pattern<E: DispatchEnv>(
    pattern: &Pattern,
    value: &E::Value,
    env: &mut E,
    extra: &mut HashMap<String, E::Value>,
) -> Option<()> {
    match &pattern.kind {
        PatKind::Wildcard => {}
        PatKind::Int(v) => {
            env.try_match(value, &Disc::Int(*v))?;
        }
        PatKind::Term(id, args) => {
            let subvals = env.try_match(value, &Disc::Term(*id, args.len()))?;
            for (arg_pat, v) in args.iter().zip(subvals.iter()) {
                match_pattern(arg_pat, v, env, extra)?;
            }
        }
        PatKind::And(subs) => {
            for s in subs {
                match_pattern(s, value, env, extra)?;
            }
        }
    }
    if let Some(name) = &pattern.bind {
        match extra.get(name) {
            Some(existing) if existing != value => return None,
            Some(_) => {}
            None => {
                extra.insert(name.clone(), value.clone());
            }
        }
    }
    Some(())
}

fn eval_expr<E: DispatchEnv>(
    e: &Expr,
    var_bindings: &[(String, usize)],
    values: &HashMap<usize, E::Value>,
    extra: &HashMap<String, E::Value>,
    env: &mut E,
) -> E::Value {
    match e {
        Expr::Var(name, _) => {
            if let Some(v) = extra.get(name) {
                return v.clone();
            }
            let binding = var_bindings
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, b)| *b)
                .expect("semantic analysis guarantees every rhs variable is pattern-bound");
            values
                .get(&binding)
                .cloned()
                .expect("every bound path was populated while walking the decision tree")
        }
        Expr::Int(v, _) => env.int_value(*v),
        Expr::Term(id, args, _) => {
            let arg_values = args
                .iter()
                .map(|a| eval_expr(a, var_bindings, values, extra, env))
                .collect();
            env.construct(*id, arg_values)
        }
        Expr::Let(bindings, body, _) => {
            let mut new_extra = extra.clone();
            for (name, bexpr) in bindings {
                let v = eval_expr(bexpr, var_bindings, values, &new_extra, env);
                new_extra.insert(name.clone(), v);
            }
            eval_expr(body, var_bindings, values, &new_extra, env)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::sema::analyze;
    use crate::trie::compile;
    use retarget_control::ControlPlane;

    #[derive(Clone, Debug, PartialEq)]
    enum V {
        Int(i128),
        Add(Box<V>, Box<V>),
        AddImm(Box<V>, i128),
    }

    struct TestEnv {
        iadd: TermId,
        iadd_imm: TermId,
    }

    impl DispatchEnv for TestEnv {
        type Value = V;

        fn try_match(&mut self, value: &V, disc: &Disc) -> Option<Vec<V>> {
            match (value, disc) {
                (V::Add(a, b), Disc::Term(id, 2)) if *id == self.iadd => {
                    Some(vec![(**a).clone(), (**b).clone()])
                }
                (V::Int(n), Disc::Int(v)) if *n == *v => Some(vec![]),
                _ => None,
            }
        }

        fn int_value(&mut self, value: i128) -> V {
            V::Int(value)
        }

        fn construct(&mut self, term: TermId, mut args: Vec<V>) -> V {
            assert_eq!(term, self.iadd_imm);
            let imm = match args.pop().unwrap() {
                V::Int(n) => n,
                _ => panic!("expected an int"),
            };
            V::AddImm(Box::new(args.pop().unwrap()), imm)
        }
    }

    #[test]
    fn dispatches_constant_rhs_rule() {
        let defs = parse(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl iadd_imm (Imm Imm) Imm)
             (rule (iadd x 5) (iadd_imm x 5))",
            "test",
        )
        .unwrap();
        let rs = analyze(&defs).unwrap();
        let iadd = rs.terms.lookup("iadd").unwrap();
        let iadd_imm = rs.terms.lookup("iadd_imm").unwrap();
        let mut control = ControlPlane::default();
        let compiled = compile(&rs, &mut control).unwrap();
        let dispatcher = Dispatcher::new(compiled);
        let mut env = TestEnv { iadd, iadd_imm };

        let input = V::Add(Box::new(V::Int(7)), Box::new(V::Int(5)));
        let out = dispatcher.run(&mut env, iadd, input);
        assert_eq!(out, Some(V::AddImm(Box::new(V::Int(7)), 5)));

        let no_match = V::Add(Box::new(V::Int(7)), Box::new(V::Int(9)));
        assert_eq!(dispatcher.run(&mut env, iadd, no_match), None);
    }

    #[test]
    fn repeated_variable_requires_equal_operands_at_runtime() {
        let defs = parse(
            "(type Imm primitive)
             (decl iadd (Imm Imm) Imm)
             (decl iadd_imm (Imm Imm) Imm)
             (rule (iadd x x) (iadd_imm x 0))",
            "test",
        )
        .unwrap();
        let rs = analyze(&defs).unwrap();
        let iadd = rs.terms.lookup("iadd").unwrap();
        let iadd_imm = rs.terms.lookup("iadd_imm").unwrap();
        let mut control = ControlPlane::default();
        let compiled = compile(&rs, &mut control).unwrap();
        let dispatcher = Dispatcher::new(compiled);
        let mut env = TestEnv { iadd, iadd_imm };

        let equal = V::Add(Box::new(V::Int(3)), Box::new(V::Int(3)));
        assert_eq!(dispatcher.run(&mut env, iadd, equal), Some(V::AddImm(Box::new(V::Int(3)), 0)));

        let unequal = V::Add(Box::new(V::Int(3)), Box::new(V::Int(4)));
        assert_eq!(dispatcher.run(&mut env, iadd, unequal), None);
    }
}
