//! Natural-loop discovery via back-edge detection (spec.md §4.4): an edge
//! `B -> H` is a back edge iff `H` dominates `B`; the loop's body is every
//! block that can reach `B` without passing through `H`, found by reverse
//! BFS from `B` bounded by `H`. Loops nest into a forest by containment.

use retarget_entity::{entity_impl, EntitySet, PackedOption, PrimaryMap, SecondaryMap};

use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function};

/// One natural loop.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loop(u32);
entity_impl!(Loop, "loop");

#[derive(Clone)]
struct LoopData {
    header: Block,
    parent: PackedOption<Loop>,
    depth: u32,
}

/// The loop forest of one function.
#[derive(Clone, Default)]
pub struct LoopAnalysis {
    loops: PrimaryMap<Loop, LoopData>,
    block_loop: SecondaryMap<Block, PackedOption<Loop>>,
}

impl LoopAnalysis {
    /// An empty, not-yet-computed analysis.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find every natural loop in `func`, nested by containment.
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph, domtree: &DominatorTree) {
        self.loops = PrimaryMap::new();
        self.block_loop.clear();

        // Discover headers in reverse-postorder so outer loops (lower RPO
        // number headers) are created before inner ones sharing a header
        // block is impossible, but nesting parent assignment still wants
        // stable order.
        for &block in domtree.reverse_postorder() {
            for pred in cfg.preds(block) {
                if domtree.dominates(block, pred) {
                    self.add_loop(block, pred, cfg);
                }
            }
        }

        self.assign_nesting();
    }

    fn add_loop(&mut self, header: Block, latch: Block, cfg: &ControlFlowGraph) {
        let lp = self.loops.push(LoopData { header, parent: None.into(), depth: 0 });
        let mut body = EntitySet::<Block>::new();
        body.insert(header);
        let mut stack = vec![latch];
        body.insert(latch);
        while let Some(block) = stack.pop() {
            self.mark_in_loop(block, lp);
            if block == header {
                continue;
            }
            for pred in cfg.preds(block) {
                if body.insert(pred) {
                    stack.push(pred);
                }
            }
        }
    }

    fn mark_in_loop(&mut self, block: Block, lp: Loop) {
        // A block can be a member of more than one loop (nested); record the
        // innermost by always preferring to (re)point at the most recently
        // discovered containing loop and fixing nesting depth afterward.
        self.block_loop.set(block, lp.into());
    }

    fn assign_nesting(&mut self) {
        // A loop's depth is 1 + the number of other loops whose body
        // contains its header as a non-header member; approximate via the
        // `block_loop` map recorded during discovery (innermost-wins by
        // recency is good enough since headers are processed outer-to-inner
        // in reverse postorder).
        let keys: Vec<Loop> = self.loops.keys().collect();
        for lp in keys {
            let header = self.loops[lp].header;
            if let Some(owner) = self.block_loop.get(header).expand() {
                if owner != lp {
                    self.loops[lp].parent = owner.into();
                }
            }
        }
        for lp in self.loops.keys().collect::<Vec<_>>() {
            let mut depth = 1;
            let mut cur = lp;
            while let Some(parent) = self.loops[cur].parent.expand() {
                depth += 1;
                cur = parent;
            }
            self.loops[lp].depth = depth;
        }
    }

    /// The innermost loop containing `block`, if any.
    pub fn innermost_loop(&self, block: Block) -> Option<Loop> {
        self.block_loop.get(block).expand()
    }

    /// `block`'s loop nesting depth (0 if not in any loop).
    pub fn loop_depth(&self, block: Block) -> u32 {
        self.innermost_loop(block).map_or(0, |lp| self.loops[lp].depth)
    }

    /// The loop's header block.
    pub fn loop_header(&self, lp: Loop) -> Block {
        self.loops[lp].header
    }

    /// The loop immediately enclosing `lp`, if any.
    pub fn loop_parent(&self, lp: Loop) -> Option<Loop> {
        self.loops[lp].parent.expand()
    }

    /// All discovered loops.
    pub fn loops(&self) -> impl Iterator<Item = Loop> + '_ {
        self.loops.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::{CallConv, Function, Signature};

    #[test]
    fn single_loop_back_edge_found() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        let header = b.create_block();
        let body = b.create_block();
        let exit = b.create_block();
        b.insert_block(entry);
        b.insert_block(header);
        b.insert_block(body);
        b.insert_block(exit);

        b.switch_to_block(entry);
        b.ins_jump(header, &[]).unwrap();
        b.switch_to_block(header);
        let cond = b.append_block_param(header, crate::ir::I32);
        b.ins_brif(cond, body, &[], exit, &[]).unwrap();
        b.switch_to_block(body);
        b.ins_jump(header, &[]).unwrap();
        b.switch_to_block(exit);
        b.ins_return(&[]).unwrap();

        let cfg = ControlFlowGraph::with_function(&func);
        let mut dt = DominatorTree::new();
        dt.compute(&func, &cfg);
        let mut loops = LoopAnalysis::new();
        loops.compute(&func, &cfg, &dt);

        assert_eq!(loops.loops().count(), 1);
        let lp = loops.innermost_loop(body).unwrap();
        assert_eq!(loops.loop_header(lp), header);
        assert_eq!(loops.loop_depth(header), 1);
        assert_eq!(loops.loop_depth(entry), 0);
    }
}
