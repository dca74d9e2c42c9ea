//! Unreachable-code elimination (spec.md §4.5): forward reachability from
//! the entry block; unreachable blocks are dropped from the layout (their
//! instructions become orphans, still addressable in the DFG but no longer
//! executed).

use log::debug;
use retarget_entity::EntitySet;

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function};

/// Remove every block the CFG can't reach from the entry block. Returns
/// `true` if any block was removed.
pub fn eliminate_unreachable_code(func: &mut Function, cfg: &ControlFlowGraph) -> bool {
    let Some(entry) = func.layout.entry_block() else {
        return false;
    };

    let mut reachable = EntitySet::<Block>::new();
    let mut stack = vec![entry];
    reachable.insert(entry);
    while let Some(block) = stack.pop() {
        for succ in cfg.succs(block) {
            if reachable.insert(*succ) {
                stack.push(*succ);
            }
        }
    }

    let to_remove: Vec<Block> = func.layout.blocks().filter(|b| !reachable.contains(*b)).collect();
    for block in &to_remove {
        debug!("unreachable_code: removing block {block}");
        func.layout.remove_block(*block);
    }
    !to_remove.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::{CallConv, Function, Signature};

    #[test]
    fn block_with_no_predecessors_is_removed() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        let dead = b.create_block();
        b.insert_block(entry);
        b.insert_block(dead);
        b.switch_to_block(entry);
        b.ins_return(&[]).unwrap();
        b.switch_to_block(dead);
        b.ins_return(&[]).unwrap();

        let cfg = crate::flowgraph::ControlFlowGraph::with_function(&func);
        let changed = eliminate_unreachable_code(&mut func, &cfg);
        assert!(changed);
        assert_eq!(func.layout.blocks().collect::<Vec<_>>(), vec![entry]);
    }

    #[test]
    fn idempotent_when_nothing_is_unreachable() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.insert_block(entry);
        b.switch_to_block(entry);
        b.ins_return(&[]).unwrap();

        let cfg = crate::flowgraph::ControlFlowGraph::with_function(&func);
        assert!(!eliminate_unreachable_code(&mut func, &cfg));
    }
}
