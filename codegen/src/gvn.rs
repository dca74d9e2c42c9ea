//! Global value numbering (spec.md §4.5): hash-conses pure instructions by
//! `(opcode, canonicalized operands)`. Walking in reverse-postorder means
//! the first occurrence of a given key is always the dominating one, so a
//! later duplicate can simply be aliased to the earlier result without a
//! dominance check.
//!
//! Assumes alias resolution has already run (operands are not themselves
//! aliases); run order is legalize -> alias_resolution -> constant_phi ->
//! gvn -> dce.

use log::trace;
use rustc_hash::FxHashMap;

use crate::dominator_tree::DominatorTree;
use crate::ir::instructions::InstructionData;
use crate::ir::{Function, Value};

/// Run GVN over `func`, using `domtree`'s reverse-postorder as the walk
/// order. Returns `true` if any instruction was aliased away.
pub fn gvn(func: &mut Function, domtree: &DominatorTree) -> bool {
    let mut table: FxHashMap<InstructionData, Value> = FxHashMap::default();
    let mut changed = false;

    for &block in domtree.reverse_postorder() {
        let insts: Vec<_> = func.layout.block_insts(block).collect();
        for inst in insts {
            let data = func.dfg.inst_data(inst).clone();
            if !data.opcode().is_pure() {
                continue;
            }
            // Only single-result instructions are safe to alias wholesale;
            // isplit (two results) is excluded.
            if func.dfg.inst_results(inst).len() != 1 {
                continue;
            }

            match table.get(&data) {
                Some(&earlier) => {
                    let later = func.dfg.first_result(inst);
                    if later != earlier {
                        trace!("gvn: {inst} ({later}) is redundant with {earlier}");
                        func.dfg.change_to_alias(later, earlier);
                        changed = true;
                    }
                }
                None => {
                    table.insert(data, func.dfg.first_result(inst));
                }
            }
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::ControlFlowGraph;
    use crate::ir::builder::Builder;
    use crate::ir::{CallConv, Function, Opcode, Signature};

    #[test]
    fn duplicate_pure_computation_is_aliased() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let (_, v0) = b.ins_iconst(crate::ir::I32, 1).unwrap();
        let (_, v1) = b.ins_iconst(crate::ir::I32, 1).unwrap();
        let (_, v2) = b.ins_binary(Opcode::Iadd, v0, v1).unwrap();
        b.ins_return(&[v2]).unwrap();

        let cfg = ControlFlowGraph::with_function(&func);
        let mut domtree = DominatorTree::new();
        domtree.compute(&func, &cfg);
        let changed = gvn(&mut func, &domtree);
        assert!(changed);
        assert!(func.dfg.value_is_alias(v1));
        assert_eq!(func.dfg.resolve_alias_value(v1), v0);
    }

    #[test]
    fn second_run_is_idempotent() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let (_, v0) = b.ins_iconst(crate::ir::I32, 1).unwrap();
        let (_, v1) = b.ins_iconst(crate::ir::I32, 1).unwrap();
        b.ins_return(&[v0, v1]).unwrap();

        let cfg = ControlFlowGraph::with_function(&func);
        let mut domtree = DominatorTree::new();
        domtree.compute(&func, &cfg);
        assert!(gvn(&mut func, &domtree));
        crate::alias_resolution::resolve_aliases(&mut func);
        assert!(!gvn(&mut func, &domtree));
    }

    #[test]
    fn impure_loads_are_never_merged() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let addr = b.append_block_param(b0, crate::ir::I64);
        let (_, v0) = b.ins_load(crate::ir::I32, crate::ir::MemFlags::new(0), addr, 0).unwrap();
        let (_, v1) = b.ins_load(crate::ir::I32, crate::ir::MemFlags::new(0), addr, 0).unwrap();
        b.ins_return(&[v0, v1]).unwrap();

        let cfg = ControlFlowGraph::with_function(&func);
        let mut domtree = DominatorTree::new();
        domtree.compute(&func, &cfg);
        assert!(!gvn(&mut func, &domtree));
    }
}
