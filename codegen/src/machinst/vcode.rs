//! Virtual-code: architecture-specific machine-instruction records
//! referencing virtual registers, labels, and branch targets (spec.md
//! §4.8). A `VCode<I>` is built once per function by a target's `lower`
//! module, handed to `regalloc2` (spec.md §4.9), and then walked again by
//! frame finalization (spec.md §4.10) and emission (spec.md §4.11).
//!
//! This is deliberately generic over the per-target instruction type `I`:
//! the aarch64 and x64 backends each supply their own `Inst` enum and
//! implement [`MachInst`] for it; everything in this module is ISA-blind.

use core::fmt;

use regalloc2::{Allocation, Block as RBlock, Inst as RInst, InstRange, Operand, PRegSet, VReg};
use smallvec::SmallVec;

use super::reg::VRegAllocator;

/// A branch target within a `VCode` function: an index into its own block
/// list, distinct from the IR's `ir::Block` (spec.md §9 "Two-level CFG" —
/// lowering may split or fuse blocks, so the VCode CFG is tracked
/// separately from the IR CFG it was lowered from).
pub type MachLabel = RBlock;

/// The per-target contract `VCode<I>` needs from its instruction type to
/// drive register allocation, frame finalization, and emission.
pub trait MachInst: Clone + fmt::Debug {
    /// This instruction's operands (uses/defs/mods/fixed constraints), in
    /// the order `apply_regalloc` should assume `allocs` was produced in.
    fn operands(&self) -> SmallVec<[Operand; 4]>;

    /// `true` if this is a block terminator (the last instruction of its
    /// VCode block).
    fn is_term(&self) -> bool {
        false
    }

    /// `true` if this is a function return.
    fn is_ret(&self) -> bool {
        false
    }

    /// If this instruction is a plain register-to-register move, the
    /// `(dst, src)` VRegs it moves between (lets regalloc2 coalesce it
    /// away when `dst`/`src` end up in the same physical register).
    fn is_move(&self) -> Option<(VReg, VReg)> {
        None
    }

    /// Physical registers this instruction clobbers beyond its declared
    /// defs (e.g. a call's caller-saved set).
    fn clobbers(&self) -> PRegSet {
        PRegSet::empty()
    }

    /// Rewrites this instruction's VReg operands in place to the
    /// allocations regalloc2 assigned, in the same order `operands()`
    /// enumerated them.
    fn apply_regalloc(&mut self, allocs: &[Allocation]);

    /// Synthesizes a register/spill move `dst <- src` of `class` — used to
    /// materialize the edits regalloc2 requests (spill, reload, and
    /// parallel moves on block-parameter edges, spec.md §4.9 step 6).
    fn gen_move(dst: Allocation, src: Allocation, class: regalloc2::RegClass) -> Self;
}

/// One VCode-level basic block: a label plus the range of instruction
/// indices it covers once the function is finalized into a flat `Vec<I>`.
#[derive(Debug, Clone, Default)]
struct VCodeBlock {
    /// Indices into `VCode::insts`, end-exclusive.
    start: u32,
    end: u32,
    succs: SmallVec<[MachLabel; 2]>,
    preds: SmallVec<[MachLabel; 4]>,
    /// VReg that each of this block's IR-level parameters was lowered to;
    /// empty for every VCode block that isn't the direct image of an IR
    /// block with parameters.
    params: SmallVec<[VReg; 4]>,
}

/// A function's virtual-register machine code, block-structured,
/// pre-register-allocation.
#[derive(Debug, Clone)]
pub struct VCode<I: MachInst> {
    insts: Vec<I>,
    /// `operands()` of each instruction in `insts`, collected once as it
    /// was pushed rather than recomputed on every `regalloc2` query.
    operands: Vec<SmallVec<[Operand; 4]>>,
    blocks: Vec<VCodeBlock>,
    entry: MachLabel,
    vregs: VRegAllocator,
    /// For each instruction, the VRegs passed as block-call arguments to
    /// each successor, aligned with that block's `succs` order — the raw
    /// material for regalloc2's `branch_blockparams`.
    branch_args: std::collections::BTreeMap<(RInst, usize), SmallVec<[VReg; 4]>>,
}

/// Incrementally builds a [`VCode`]: one block at a time, instructions
/// appended within a block in emission order, terminated by a branch/ret
/// whose successors are declared via `set_succs`.
pub struct VCodeBuilder<I: MachInst> {
    insts: Vec<I>,
    operands: Vec<SmallVec<[Operand; 4]>>,
    blocks: Vec<VCodeBlock>,
    cur_block: Option<usize>,
    vregs: VRegAllocator,
    branch_args: std::collections::BTreeMap<(RInst, usize), SmallVec<[VReg; 4]>>,
}

impl<I: MachInst> VCodeBuilder<I> {
    /// Starts building a new, empty VCode function.
    pub fn new() -> Self {
        VCodeBuilder {
            insts: Vec::new(),
            operands: Vec::new(),
            blocks: Vec::new(),
            cur_block: None,
            vregs: VRegAllocator::new(),
            branch_args: std::collections::BTreeMap::new(),
        }
    }

    /// Mints a fresh virtual register of `class`.
    pub fn alloc_vreg(&mut self, class: regalloc2::RegClass) -> VReg {
        self.vregs.alloc(class)
    }

    /// Mints a fresh virtual register sized for IR type `ty`.
    pub fn alloc_vreg_for_type(&mut self, ty: crate::ir::Type) -> VReg {
        self.vregs.alloc_for_type(ty)
    }

    /// Starts a new VCode block, returning its label. The caller must
    /// `start_block` before emitting any instruction and before ending the
    /// previous block with a terminator.
    pub fn start_block(&mut self, params: &[VReg]) -> MachLabel {
        let idx = self.blocks.len();
        self.blocks.push(VCodeBlock {
            start: self.insts.len() as u32,
            end: self.insts.len() as u32,
            succs: SmallVec::new(),
            preds: SmallVec::new(),
            params: SmallVec::from_slice(params),
        });
        self.cur_block = Some(idx);
        MachLabel::new(idx)
    }

    /// Appends `inst` to the current block.
    pub fn push(&mut self, inst: I) {
        self.operands.push(inst.operands());
        self.insts.push(inst);
        let idx = self.cur_block.expect("start_block before push");
        self.blocks[idx].end = self.insts.len() as u32;
    }

    /// Declares the successor labels of the current block's terminator, in
    /// the same order the terminator's own branch targets are listed (so
    /// `branch_blockparams` can line up `args` positionally). `args[i]` is
    /// the VReg list passed to `succs[i]`'s block parameters.
    pub fn set_succs(&mut self, succs: &[MachLabel], args: &[&[VReg]]) {
        let idx = self.cur_block.expect("start_block before set_succs");
        self.blocks[idx].succs = SmallVec::from_slice(succs);
        let term_inst = RInst::new(self.insts.len() - 1);
        for (i, a) in args.iter().enumerate() {
            self.branch_args.insert((term_inst, i), SmallVec::from_slice(a));
        }
    }

    /// Finishes building, computing predecessor lists from the declared
    /// successors and taking `entry` as the function's entry label.
    pub fn finish(mut self, entry: MachLabel) -> VCode<I> {
        for i in 0..self.blocks.len() {
            let succs = self.blocks[i].succs.clone();
            for s in succs {
                self.blocks[s.index()].preds.push(MachLabel::new(i));
            }
        }
        VCode {
            insts: self.insts,
            operands: self.operands,
            blocks: self.blocks,
            entry,
            vregs: self.vregs,
            branch_args: self.branch_args,
        }
    }
}

impl<I: MachInst> Default for VCodeBuilder<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: MachInst> VCode<I> {
    /// Number of VCode blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// The entry block's label.
    pub fn entry_label(&self) -> MachLabel {
        self.entry
    }

    /// Borrows the flat instruction stream, in block order.
    pub fn insts(&self) -> &[I] {
        &self.insts
    }

    /// Mutably borrows the flat instruction stream (used by
    /// `apply_regalloc` to rewrite operands in place).
    pub fn insts_mut(&mut self) -> &mut [I] {
        &mut self.insts
    }

    /// The instruction range covered by `block`.
    pub fn block_insn_range(&self, block: MachLabel) -> (usize, usize) {
        let b = &self.blocks[block.index()];
        (b.start as usize, b.end as usize)
    }

    /// The successor labels of `block`, in terminator order.
    pub fn block_succs(&self, block: MachLabel) -> &[MachLabel] {
        &self.blocks[block.index()].succs
    }

    /// Iterates VCode blocks in index order (their creation order, which
    /// `VCodeBuilder` assigns in lowering order).
    pub fn blocks(&self) -> impl Iterator<Item = MachLabel> + '_ {
        (0..self.blocks.len()).map(MachLabel::new)
    }

    /// Which block `inst_idx` (an index into `insts()`) belongs to.
    pub fn block_of_inst(&self, inst_idx: usize) -> MachLabel {
        self.blocks
            .iter()
            .position(|b| inst_idx >= b.start as usize && inst_idx < b.end as usize)
            .map(MachLabel::new)
            .expect("every instruction index belongs to some block")
    }

    /// Number of VRegs minted while building this function.
    pub fn num_vregs(&self) -> usize {
        self.vregs.num_vregs()
    }

    /// Replaces the instruction stream wholesale (used after register
    /// allocation splices in spill/reload/edge-resolving moves, shifting
    /// every later instruction's index) and updates each block's `start`/
    /// `end` to match `new_block_ranges` (indexed by block index, in the
    /// same order `blocks()` iterates).
    pub fn replace_insts(&mut self, insts: Vec<I>, new_block_ranges: Vec<(u32, u32)>) {
        self.operands = insts.iter().map(|i| i.operands()).collect();
        self.insts = insts;
        for (block, (start, end)) in self.blocks.iter_mut().zip(new_block_ranges) {
            block.start = start;
            block.end = end;
        }
    }
}

/// Implements `regalloc2::Function` over a `VCode<I>` so the allocator can
/// run directly against it without an intermediate copy (spec.md §4.9:
/// "Input: VCode with VRegs, operand-role annotations, block structure").
pub struct RegallocAdapter<'a, I: MachInst> {
    /// The VCode function this adapter views.
    pub vcode: &'a VCode<I>,
}

impl<'a, I: MachInst> regalloc2::Function for RegallocAdapter<'a, I> {
    fn num_insts(&self) -> usize {
        self.vcode.insts.len()
    }

    fn num_blocks(&self) -> usize {
        self.vcode.blocks.len()
    }

    fn entry_block(&self) -> RBlock {
        self.vcode.entry
    }

    fn block_insns(&self, block: RBlock) -> InstRange {
        let b = &self.vcode.blocks[block.index()];
        InstRange::new(RInst::new(b.start as usize), RInst::new(b.end as usize))
    }

    fn block_succs(&self, block: RBlock) -> &[RBlock] {
        &self.vcode.blocks[block.index()].succs
    }

    fn block_preds(&self, block: RBlock) -> &[RBlock] {
        &self.vcode.blocks[block.index()].preds
    }

    fn block_params(&self, block: RBlock) -> &[VReg] {
        &self.vcode.blocks[block.index()].params
    }

    fn is_ret(&self, insn: RInst) -> bool {
        self.vcode.insts[insn.index()].is_ret()
    }

    fn is_branch(&self, insn: RInst) -> bool {
        self.vcode.insts[insn.index()].is_term() && !self.vcode.insts[insn.index()].is_ret()
    }

    fn branch_blockparams(&self, _block: RBlock, insn: RInst, succ_idx: usize) -> &[VReg] {
        self.vcode
            .branch_args
            .get(&(insn, succ_idx))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn is_move(&self, insn: RInst) -> Option<(Operand, Operand)> {
        self.vcode.insts[insn.index()].is_move().map(|(dst, src)| {
            (super::reg::operand_def(dst), super::reg::operand_use(src))
        })
    }

    fn inst_operands(&self, insn: RInst) -> &[Operand] {
        &self.vcode.operands[insn.index()]
    }

    fn inst_clobbers(&self, insn: RInst) -> PRegSet {
        self.vcode.insts[insn.index()].clobbers()
    }

    fn num_vregs(&self) -> usize {
        self.vcode.num_vregs()
    }

    fn spillslot_size(&self, regclass: regalloc2::RegClass) -> usize {
        match regclass {
            regalloc2::RegClass::Int => 1,
            regalloc2::RegClass::Float => 2,
            regalloc2::RegClass::Vector => 2,
        }
    }
}
