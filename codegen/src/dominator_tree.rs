//! Dominator tree via iterative intersection (Cooper-Harvey-Kennedy, spec.md
//! §4.3): "A Simple, Fast Dominance Algorithm". Stable for both reducible
//! and irreducible CFGs.

use retarget_entity::{PackedOption, SecondaryMap};

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function};

/// The dominator tree of one function's CFG.
#[derive(Clone, Default)]
pub struct DominatorTree {
    idom: SecondaryMap<Block, PackedOption<Block>>,
    rpo: Vec<Block>,
    rpo_number: SecondaryMap<Block, u32>,
    valid: bool,
}

impl DominatorTree {
    /// An empty, not-yet-computed tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute (or recompute) the dominator tree of `func` using `cfg`.
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        self.idom.clear();
        self.rpo.clear();
        self.rpo_number.clear();
        self.valid = false;

        let Some(entry) = func.layout.entry_block() else {
            return;
        };

        // Reverse postorder via an explicit-stack DFS (spec.md §4.3
        // "reverse postorder iteration").
        let mut postorder = Vec::new();
        let mut visited = retarget_entity::EntitySet::<Block>::new();
        let mut stack: Vec<(Block, usize)> = vec![(entry, 0)];
        visited.insert(entry);
        while let Some((block, next_succ)) = stack.pop() {
            let succs = cfg.succs(block);
            if next_succ < succs.len() {
                let succ = succs[next_succ];
                stack.push((block, next_succ + 1));
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
            }
        }
        self.rpo = postorder.into_iter().rev().collect();
        for (i, &b) in self.rpo.iter().enumerate() {
            self.rpo_number.set(b, i as u32);
        }

        self.idom.set(entry, entry.into());

        let mut changed = true;
        while changed {
            changed = false;
            // Skip the entry block (index 0).
            for &block in self.rpo.iter().skip(1) {
                let mut new_idom: Option<Block> = None;
                for pred in cfg.preds(block) {
                    if self.idom.get(pred).is_none() {
                        continue; // not yet processed this pass
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(cur) => self.intersect(cur, pred),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if self.idom.get(block).expand() != Some(new_idom) {
                        self.idom.set(block, new_idom.into());
                        changed = true;
                    }
                }
            }
        }

        self.valid = true;
    }

    fn intersect(&self, mut a: Block, mut b: Block) -> Block {
        while a != b {
            while self.rpo_number.get(a) > self.rpo_number.get(b) {
                a = self.idom.get(a).expand().expect("processed block has idom");
            }
            while self.rpo_number.get(b) > self.rpo_number.get(a) {
                b = self.idom.get(b).expand().expect("processed block has idom");
            }
        }
        a
    }

    /// `true` once `compute` has run for the current function.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The immediate dominator of `block`, or `None` for the entry block or
    /// an unreachable block.
    pub fn idom(&self, block: Block) -> Option<Block> {
        let idom = self.idom.get(block).expand()?;
        if idom == block && self.rpo_number.get(block) == &0 {
            None // entry block is its own sentinel idom
        } else {
            Some(idom)
        }
    }

    /// `true` if `a` strictly dominates `b` (`a != b` and `a` dominates `b`).
    pub fn strictly_dominates(&self, a: Block, b: Block) -> bool {
        a != b && self.dominates(a, b)
    }

    /// `true` if `a` dominates `b` (reflexively: every block dominates
    /// itself).
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        if a == b {
            return true;
        }
        let Some(mut cur) = self.idom.get(b).expand() else {
            return false;
        };
        loop {
            if cur == a {
                return true;
            }
            let Some(next) = self.idom.get(cur).expand() else {
                return false;
            };
            if next == cur {
                return false; // reached entry without finding `a`
            }
            cur = next;
        }
    }

    /// Blocks in reverse-postorder, entry first.
    pub fn reverse_postorder(&self) -> &[Block] {
        &self.rpo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::{CallConv, Function, Signature};

    #[test]
    fn diamond_cfg_dominance() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        let t = b.create_block();
        let e = b.create_block();
        let merge = b.create_block();
        b.insert_block(entry);
        b.insert_block(t);
        b.insert_block(e);
        b.insert_block(merge);

        b.switch_to_block(entry);
        let cond = b.append_block_param(entry, crate::ir::I32);
        b.ins_brif(cond, t, &[], e, &[]).unwrap();
        b.switch_to_block(t);
        b.ins_jump(merge, &[]).unwrap();
        b.switch_to_block(e);
        b.ins_jump(merge, &[]).unwrap();
        b.switch_to_block(merge);
        b.ins_return(&[]).unwrap();

        let cfg = crate::flowgraph::ControlFlowGraph::with_function(&func);
        let mut dt = DominatorTree::new();
        dt.compute(&func, &cfg);

        assert!(dt.dominates(entry, merge));
        assert!(dt.strictly_dominates(entry, t));
        assert!(!dt.dominates(t, e));
        assert_eq!(dt.idom(merge), Some(entry));
        assert_eq!(dt.idom(t), Some(entry));
        assert_eq!(dt.idom(entry), None);
    }
}
