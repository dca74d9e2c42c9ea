//! Register allocation (spec.md §4.9): runs `regalloc2`'s backtracking
//! linear-scan-with-coalescing allocator against a [`VCode`] through the
//! [`RegallocAdapter`], then rewrites the VCode's VReg operands to the
//! physical registers/spill slots it chose and splices in the moves it
//! requested (spill stores, reloads, and the parallel moves that resolve
//! block-parameter edges — spec.md §4.9 steps 4 and 6).
//!
//! This module is the one place spec.md's "suitable substitutions from the
//! graph-coloring family are acceptable" note doesn't apply: the teacher
//! depends on `regalloc2` for exactly this algorithm (see its root
//! `Cargo.toml`), so this crate adapts to it rather than reimplementing
//! live-range allocation by hand.

use regalloc2::{MachineEnv, PReg, RegAllocError, RegallocOptions};
use retarget_control::ControlPlane;

use crate::machinst::{MachInst, RegallocAdapter, VCode};
use crate::result::CodegenError;

/// What a successful allocation run produced, beyond the rewritten VCode
/// itself: the raw material frame finalization needs (spec.md §4.10
/// "Given the set of callee-saved registers actually used, the total
/// spill-slot bytes").
#[derive(Debug, Clone)]
pub struct RegallocResult {
    /// Number of spill slots `regalloc2` allocated.
    pub num_spill_slots: usize,
    /// Physical registers the allocator actually assigned to some VReg
    /// and that the calling convention marks callee-saved — these must be
    /// saved in the prologue and restored in the epilogue.
    pub callee_saved_used: Vec<PReg>,
}

/// Runs the allocator over `vcode` and rewrites its instructions in place.
///
/// `machine_env` enumerates the physical registers available on this
/// target (spec.md §4.9 "a calling-convention descriptor (argument
/// registers ... caller-saved, callee-saved ...)"); `callee_saved` is the
/// subset of `machine_env`'s registers this ABI requires the callee to
/// preserve, used after the fact to compute [`RegallocResult::callee_saved_used`].
/// `control` perturbs the order `regalloc2` tries same-class preferred
/// registers in, off by default (see [`retarget_control::ControlPlane`]).
pub fn allocate<I: MachInst>(
    vcode: &mut VCode<I>,
    machine_env: &MachineEnv,
    callee_saved: &[PReg],
    control: &mut ControlPlane,
) -> Result<RegallocResult, CodegenError> {
    let mut shuffled_env = machine_env.clone();
    for class_regs in shuffled_env.preferred_regs_by_class.iter_mut() {
        control.shuffle(class_regs);
    }

    let output = {
        let adapter = RegallocAdapter { vcode };
        let mut options = RegallocOptions::default();
        options.validate_ssa = cfg!(debug_assertions);
        regalloc2::run(&adapter, &shuffled_env, &options).map_err(map_err)?
    };

    // Rewrite every instruction's VReg operands to the allocations
    // regalloc2 chose, instruction by instruction (spec.md §4.9 "Output:
    // a map VReg -> physical register or spill slot").
    for (i, inst) in vcode.insts_mut().iter_mut().enumerate() {
        let allocs = output.inst_allocs(regalloc2::Inst::new(i));
        inst.apply_regalloc(allocs);
    }

    // Splice in the moves regalloc2 asked for (spill stores, reloads, and
    // edge-resolving parallel moves, spec.md §4.9 step 6) at their
    // recorded program points. `output.edits` is sorted by program point;
    // walking it alongside the original instruction stream in a single
    // pass keeps both indices monotonic, and we track each block's new
    // start/end as we go since inserted moves shift every later index.
    let num_blocks = vcode.num_blocks();
    let mut new_insts = Vec::with_capacity(vcode.insts().len() + output.edits.len());
    let mut new_block_ranges = vec![(0u32, 0u32); num_blocks];
    let mut edit_iter = output.edits.iter().peekable();
    for (i, inst) in vcode.insts().iter().cloned().enumerate() {
        let block = vcode.block_of_inst(i).index();
        let before = regalloc2::ProgPoint::before(regalloc2::Inst::new(i));
        while edit_iter.peek().map(|(pp, _)| *pp == before).unwrap_or(false) {
            let (_, edit) = edit_iter.next().unwrap();
            new_insts.push(gen_move_for_edit::<I>(edit));
        }
        new_insts.push(inst);
        let after = regalloc2::ProgPoint::after(regalloc2::Inst::new(i));
        while edit_iter.peek().map(|(pp, _)| *pp == after).unwrap_or(false) {
            let (_, edit) = edit_iter.next().unwrap();
            new_insts.push(gen_move_for_edit::<I>(edit));
        }
        new_block_ranges[block].1 = new_insts.len() as u32;
        if new_block_ranges[block].0 == 0 && block > 0 {
            new_block_ranges[block].0 = new_block_ranges[block - 1].1;
        }
    }
    vcode.replace_insts(new_insts, new_block_ranges);

    let callee_saved_used = output
        .allocs
        .iter()
        .filter_map(|a| a.as_reg())
        .filter(|p| callee_saved.contains(p))
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    Ok(RegallocResult { num_spill_slots: output.num_spillslots, callee_saved_used })
}

fn gen_move_for_edit<I: MachInst>(edit: &regalloc2::Edit) -> I {
    match edit {
        regalloc2::Edit::Move { from, to } => {
            let class = to
                .as_reg()
                .map(|p| p.class())
                .or_else(|| from.as_reg().map(|p| p.class()))
                .unwrap_or(regalloc2::RegClass::Int);
            I::gen_move(*to, *from, class)
        }
    }
}

fn map_err(e: RegAllocError) -> CodegenError {
    CodegenError::RegisterAllocation { message: e.to_string() }
}
