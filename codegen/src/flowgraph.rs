//! The control-flow graph derived from a function's terminators (spec.md
//! §4.3). Rebuilt from scratch on request; nothing here is incrementally
//! maintained, so callers must recompute after any CFG-affecting mutation
//! (legalization, unreachable-code elimination, block splitting).

use retarget_entity::SecondaryMap;
use smallvec::SmallVec;

use crate::ir::{Block, Function, Inst};

#[derive(Clone, Default)]
struct BlockPreds {
    /// Predecessors in first-occurrence order, paired with the branch
    /// instruction that targets this block.
    preds: SmallVec<[(Block, Inst); 4]>,
    succs: SmallVec<[Block; 2]>,
}

/// Successor/predecessor edges for every block of one function.
#[derive(Clone, Default)]
pub struct ControlFlowGraph {
    data: SecondaryMap<Block, BlockPreds>,
}

impl ControlFlowGraph {
    /// Compute the CFG of `func` from its terminators (spec.md §4.3:
    /// `jump -> {dest}`, `branch -> {then, else}`, `return -> {}`).
    pub fn with_function(func: &Function) -> Self {
        let mut cfg = ControlFlowGraph::default();
        cfg.compute(func);
        cfg
    }

    /// Recompute in place, e.g. after a transform invalidates this CFG.
    pub fn compute(&mut self, func: &Function) {
        self.data.clear();
        for block in func.layout.blocks() {
            let Some(term) = func.layout.last_inst(block) else { continue };
            let data = func.dfg.inst_data(term);
            for bc in data.branch_destinations() {
                self.data[block].succs.push(bc.block);
                self.data[bc.block].preds.push((block, term));
            }
        }
    }

    /// Successor blocks of `block`, in the order their branch targets them
    /// (`[then, else]` for a two-way branch).
    pub fn succs(&self, block: Block) -> &[Block] {
        &self.data[block].succs
    }

    /// `(predecessor block, branching instruction)` pairs for `block`, in
    /// first-discovered order.
    pub fn preds(&self, block: Block) -> impl Iterator<Item = Block> + '_ {
        self.data[block].preds.iter().map(|(b, _)| *b)
    }

    /// Like `preds`, but also yielding the instruction in the predecessor
    /// that targets `block` (needed by register allocation to attribute a
    /// parallel-move group to a specific edge).
    pub fn pred_edges(&self, block: Block) -> impl Iterator<Item = (Block, Inst)> + '_ {
        self.data[block].preds.iter().copied()
    }

    /// Number of predecessor edges into `block`.
    pub fn num_preds(&self, block: Block) -> usize {
        self.data[block].preds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::{CallConv, Signature};

    #[test]
    fn branch_produces_two_successors_and_matching_preds() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        let t = b.create_block();
        let e = b.create_block();
        b.insert_block(entry);
        b.insert_block(t);
        b.insert_block(e);
        b.switch_to_block(entry);
        let cond = b.append_block_param(entry, crate::ir::I32);
        b.ins_brif(cond, t, &[], e, &[]).unwrap();
        b.switch_to_block(t);
        b.ins_return(&[]).unwrap();
        b.switch_to_block(e);
        b.ins_return(&[]).unwrap();

        let cfg = ControlFlowGraph::with_function(&func);
        assert_eq!(cfg.succs(entry), &[t, e]);
        assert_eq!(cfg.preds(t).collect::<Vec<_>>(), vec![entry]);
        assert_eq!(cfg.num_preds(e), 1);
    }
}
