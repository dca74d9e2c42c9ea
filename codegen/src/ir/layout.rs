//! Independent execution order for blocks and instructions (spec.md §3
//! "DFG vs Layout"). A `DataFlowGraph` knows *what* an instruction is and
//! what it uses; only the `Layout` knows *where* it sits, as a doubly
//! linked list of blocks, each holding a doubly linked list of
//! instructions. Moving an instruction between blocks, or reordering
//! blocks, touches only this structure.

use retarget_entity::{PackedOption, SecondaryMap};

use super::entities::{Block, Inst};

#[derive(Clone, Copy, Default)]
struct BlockNode {
    prev: PackedOption<Block>,
    next: PackedOption<Block>,
    first_inst: PackedOption<Inst>,
    last_inst: PackedOption<Inst>,
}

#[derive(Clone, Copy, Default)]
struct InstNode {
    block: PackedOption<Block>,
    prev: PackedOption<Inst>,
    next: PackedOption<Inst>,
}

/// The linear order blocks and instructions will be emitted in.
#[derive(Clone, Default)]
pub struct Layout {
    blocks: SecondaryMap<Block, BlockNode>,
    insts: SecondaryMap<Inst, InstNode>,
    first_block: PackedOption<Block>,
    last_block: PackedOption<Block>,
}

impl Layout {
    /// Create an empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if `block` currently appears in the layout.
    pub fn is_block_inserted(&self, block: Block) -> bool {
        self.first_block == PackedOption::from(block) || self.blocks[block].prev.is_some() || self.blocks[block].next.is_some()
    }

    /// Append `block` to the end of the layout.
    pub fn append_block(&mut self, block: Block) {
        debug_assert!(!self.is_block_inserted(block), "block already in layout");
        if let Some(last) = self.last_block.expand() {
            self.blocks[last].next = block.into();
            self.blocks[block].prev = last.into();
        } else {
            self.first_block = block.into();
        }
        self.last_block = block.into();
    }

    /// Insert `block` immediately before `before` in the layout.
    pub fn insert_block_before(&mut self, block: Block, before: Block) {
        debug_assert!(!self.is_block_inserted(block));
        let prev = self.blocks[before].prev;
        self.blocks[block].prev = prev;
        self.blocks[block].next = before.into();
        self.blocks[before].prev = block.into();
        if let Some(p) = prev.expand() {
            self.blocks[p].next = block.into();
        } else {
            self.first_block = block.into();
        }
    }

    /// Remove `block` from the layout; does not touch the DFG, so its
    /// instructions become orphaned (still addressable, just unreachable).
    pub fn remove_block(&mut self, block: Block) {
        let node = self.blocks[block];
        match node.prev.expand() {
            Some(p) => self.blocks[p].next = node.next,
            None => self.first_block = node.next,
        }
        match node.next.expand() {
            Some(n) => self.blocks[n].prev = node.prev,
            None => self.last_block = node.prev,
        }
        self.blocks[block] = BlockNode::default();
    }

    /// The first block in layout order (the entry block), if any.
    pub fn entry_block(&self) -> Option<Block> {
        self.first_block.expand()
    }

    /// The block following `block` in layout order.
    pub fn next_block(&self, block: Block) -> Option<Block> {
        self.blocks[block].next.expand()
    }

    /// The block preceding `block` in layout order.
    pub fn prev_block(&self, block: Block) -> Option<Block> {
        self.blocks[block].prev.expand()
    }

    /// Iterate blocks in layout order.
    pub fn blocks(&self) -> BlockIter<'_> {
        BlockIter { layout: self, next: self.first_block.expand() }
    }

    /// Append `inst` to the end of `block`'s instruction list.
    pub fn append_inst(&mut self, inst: Inst, block: Block) {
        debug_assert!(self.insts[inst].block.is_none(), "inst already in a block");
        let node = self.blocks[block];
        if let Some(last) = node.last_inst.expand() {
            self.insts[last].next = inst.into();
            self.insts[inst].prev = last.into();
        } else {
            self.blocks[block].first_inst = inst.into();
        }
        self.blocks[block].last_inst = inst.into();
        self.insts[inst].block = block.into();
    }

    /// Insert `inst` immediately before `before`, which must already be laid
    /// out in some block.
    pub fn insert_inst_before(&mut self, inst: Inst, before: Inst) {
        debug_assert!(self.insts[inst].block.is_none());
        let block = self.insts[before].block.expand().expect("`before` must be laid out");
        let prev = self.insts[before].prev;
        self.insts[inst].prev = prev;
        self.insts[inst].next = before.into();
        self.insts[inst].block = block.into();
        self.insts[before].prev = inst.into();
        match prev.expand() {
            Some(p) => self.insts[p].next = inst.into(),
            None => self.blocks[block].first_inst = inst.into(),
        }
    }

    /// Remove `inst` from its block. The DFG entry for `inst` is untouched;
    /// this only detaches it from execution order.
    pub fn remove_inst(&mut self, inst: Inst) {
        let node = self.insts[inst];
        let Some(block) = node.block.expand() else {
            return;
        };
        match node.prev.expand() {
            Some(p) => self.insts[p].next = node.next,
            None => self.blocks[block].first_inst = node.next,
        }
        match node.next.expand() {
            Some(n) => self.insts[n].prev = node.prev,
            None => self.blocks[block].last_inst = node.prev,
        }
        self.insts[inst] = InstNode::default();
    }

    /// The block `inst` currently belongs to, if laid out.
    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.insts[inst].block.expand()
    }

    /// The instruction following `inst` within its block.
    pub fn next_inst(&self, inst: Inst) -> Option<Inst> {
        self.insts[inst].next.expand()
    }

    /// The instruction preceding `inst` within its block.
    pub fn prev_inst(&self, inst: Inst) -> Option<Inst> {
        self.insts[inst].prev.expand()
    }

    /// The last instruction laid out in `block` (its terminator, once the
    /// function is well-formed).
    pub fn last_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].last_inst.expand()
    }

    /// Iterate the instructions of `block` in layout order.
    pub fn block_insts(&self, block: Block) -> InstIter<'_> {
        InstIter { layout: self, next: self.blocks[block].first_inst.expand() }
    }
}

/// Iterator over blocks in layout order.
pub struct BlockIter<'a> {
    layout: &'a Layout,
    next: Option<Block>,
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = self.next?;
        self.next = self.layout.next_block(block);
        Some(block)
    }
}

/// Iterator over the instructions of one block in layout order.
pub struct InstIter<'a> {
    layout: &'a Layout,
    next: Option<Inst>,
}

impl<'a> Iterator for InstIter<'a> {
    type Item = Inst;

    fn next(&mut self) -> Option<Inst> {
        let inst = self.next?;
        self.next = self.layout.next_inst(inst);
        Some(inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_iterate_in_append_order() {
        let mut layout = Layout::new();
        let b0 = Block::from_u32(0);
        let b1 = Block::from_u32(1);
        layout.append_block(b0);
        layout.append_block(b1);
        assert_eq!(layout.blocks().collect::<Vec<_>>(), vec![b0, b1]);
    }

    #[test]
    fn insts_iterate_within_block() {
        let mut layout = Layout::new();
        let b0 = Block::from_u32(0);
        layout.append_block(b0);
        let i0 = Inst::from_u32(0);
        let i1 = Inst::from_u32(1);
        layout.append_inst(i0, b0);
        layout.append_inst(i1, b0);
        assert_eq!(layout.block_insts(b0).collect::<Vec<_>>(), vec![i0, i1]);
        assert_eq!(layout.last_inst(b0), Some(i1));
    }

    #[test]
    fn remove_inst_detaches_from_siblings() {
        let mut layout = Layout::new();
        let b0 = Block::from_u32(0);
        layout.append_block(b0);
        let i0 = Inst::from_u32(0);
        let i1 = Inst::from_u32(1);
        let i2 = Inst::from_u32(2);
        layout.append_inst(i0, b0);
        layout.append_inst(i1, b0);
        layout.append_inst(i2, b0);
        layout.remove_inst(i1);
        assert_eq!(layout.block_insts(b0).collect::<Vec<_>>(), vec![i0, i2]);
    }
}
