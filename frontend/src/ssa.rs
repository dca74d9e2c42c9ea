//! Automatic SSA construction: turns `def_var`/`use_var` calls against
//! mutable [`Variable`]s into block parameters and block-call arguments,
//! so a frontend never has to reason about dominance itself.
//!
//! This implements the simple, efficient SSA construction algorithm of
//! Braun et al. (CC 2013), the same algorithm `cranelift-frontend`'s own
//! `ssa.rs` is built on: a variable's value is looked up locally first;
//! failing that, an unsealed block gets an eagerly-appended block
//! parameter recorded as "incomplete" until the block is sealed (all its
//! predecessors known), while a sealed block resolves by recursing into
//! each predecessor and, for more than one, inserting a block parameter
//! to break cycles before recursing (so loop headers terminate). Trivial
//! (all-same-argument) parameters are not pruned here — that's left to
//! [`retarget_codegen::constant_phi`], which runs later in the pipeline
//! and already implements exactly that removal.

use hashbrown::HashMap;
use retarget_codegen::ir::{Block, Function, Inst, Type, Value};
use retarget_entity::SecondaryMap;
use smallvec::SmallVec;

use crate::variable::Variable;

#[derive(Clone, Default)]
struct BlockData {
    sealed: bool,
    /// Predecessor blocks reached so far, paired with the terminator
    /// instruction in that predecessor whose `BlockCall` targets this
    /// block (so a later seal can append its resolved argument there).
    /// Most blocks have one or two predecessors, so this stays inline.
    predecessors: SmallVec<[(Block, Inst); 4]>,
    /// Block parameters appended eagerly while this block was still
    /// unsealed, along with the variable each one stands for; resolved
    /// against every predecessor once the block seals.
    incomplete_params: SmallVec<[(Variable, Value); 4]>,
}

/// Per-function SSA-construction state, reset between functions by
/// [`crate::FunctionBuilderContext`].
#[derive(Default)]
pub(crate) struct SsaBuilder {
    blocks: SecondaryMap<Block, BlockData>,
    /// The value `var` currently resolves to at the end of `block`.
    defs: HashMap<(Block, Variable), Value>,
}

impl SsaBuilder {
    pub(crate) fn clear(&mut self) {
        self.blocks = SecondaryMap::new();
        self.defs.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub(crate) fn declare_block(&mut self, block: Block) {
        self.blocks[block] = BlockData::default();
    }

    /// Records that control can reach `block` from `pred`, via `pred`'s
    /// terminator `term_inst` (whose `BlockCall` to `block` will receive
    /// an argument once `block`'s parameters are resolved).
    pub(crate) fn declare_block_predecessor(&mut self, block: Block, pred: Block, term_inst: Inst) {
        debug_assert!(!self.blocks[block].sealed, "cannot add a predecessor to an already-sealed block");
        self.blocks[block].predecessors.push((pred, term_inst));
    }

    pub(crate) fn is_sealed(&self, block: Block) -> bool {
        self.blocks[block].sealed
    }

    /// Directly records `value` as `var`'s definition at the end of
    /// `block` (used both by explicit `def_var` and internally while
    /// resolving).
    pub(crate) fn def_var(&mut self, block: Block, var: Variable, value: Value) {
        self.defs.insert((block, var), value);
    }

    /// Resolves `var`'s value at the end of `block`, inserting block
    /// parameters and back-filling predecessor `BlockCall` arguments as
    /// needed.
    pub(crate) fn use_var(&mut self, func: &mut Function, block: Block, var: Variable, ty: Type) -> Value {
        if let Some(&val) = self.defs.get(&(block, var)) {
            return val;
        }
        self.use_var_fresh(func, block, var, ty)
    }

    fn use_var_fresh(&mut self, func: &mut Function, block: Block, var: Variable, ty: Type) -> Value {
        if !self.blocks[block].sealed {
            let val = func.dfg.append_block_param(block, ty);
            self.blocks[block].incomplete_params.push((var, val));
            self.def_var(block, var, val);
            return val;
        }

        let preds = self.blocks[block].predecessors.clone();
        match preds.as_slice() {
            [] => panic!("use of variable with no reaching definition in a sealed, predecessor-less block"),
            [(pred, _)] => {
                let pred = *pred;
                let val = self.use_var(func, pred, var, ty);
                self.def_var(block, var, val);
                val
            }
            _ => {
                let val = func.dfg.append_block_param(block, ty);
                self.def_var(block, var, val);
                for (pred, term_inst) in preds {
                    let pred_val = self.use_var(func, pred, var, ty);
                    append_block_call_arg(func, term_inst, block, pred_val);
                }
                val
            }
        }
    }

    /// Seals `block`: every predecessor is now known, so every block
    /// parameter appended for it while unsealed can be resolved against
    /// them.
    pub(crate) fn seal_block(&mut self, func: &mut Function, block: Block) {
        let incomplete = std::mem::take(&mut self.blocks[block].incomplete_params);
        let preds = self.blocks[block].predecessors.clone();
        for (var, param_val) in incomplete {
            let ty = func.dfg.value_type(param_val);
            for &(pred, term_inst) in &preds {
                let pred_val = self.use_var(func, pred, var, ty);
                append_block_call_arg(func, term_inst, block, pred_val);
            }
        }
        self.blocks[block].sealed = true;
    }
}

/// Appends `value` to the `BlockCall` within `term_inst` that targets
/// `block` (there is exactly one per predecessor edge declared to the SSA
/// builder, even if a branch's two arms happen to share a target).
fn append_block_call_arg(func: &mut Function, term_inst: Inst, block: Block, value: Value) {
    let data = func.dfg.inst_data_mut(term_inst);
    let mut appended = false;
    for bc in data.branch_destinations_mut() {
        if bc.block == block && !appended {
            bc.args.push(value);
            appended = true;
        }
    }
    debug_assert!(appended, "terminator has no BlockCall targeting the sealed block");
}
