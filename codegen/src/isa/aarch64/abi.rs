//! AAPCS64 (the standard AArch64 procedure call standard) as this backend
//! implements it: which registers carry integer/float arguments and
//! returns, which are callee-saved, and how the prologue/epilogue save and
//! restore them around `machinst::abi::compute_frame_layout`'s stack
//! layout (spec.md §4.10).

use regalloc2::PReg;

use crate::ir::CallConv;
use crate::machinst::{CallConvInfo, FrameLayout, Reg};

use super::inst::{xreg, Inst, FP_REG_NUM, LR_REG_NUM};

/// Integer argument/return registers, `x0`-`x7`.
pub const INT_PARAM_REGS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
/// Callee-saved integer registers AAPCS64 requires preserved, `x19`-`x28`
/// (`x29`/`x30` are saved unconditionally by the prologue below, not
/// through the allocator's callee-saved mechanism).
pub const CALLEE_SAVED_INT: [u8; 10] = [19, 20, 21, 22, 23, 24, 25, 26, 27, 28];

/// Describes AAPCS64 for `machinst::abi`'s generic frame-layout algorithm.
pub fn system_v() -> CallConvInfo {
    CallConvInfo {
        call_conv: CallConv::SystemV,
        int_params: INT_PARAM_REGS.iter().map(|&r| xreg(r)).collect(),
        float_params: (0..8).map(super::inst::vreg_preg).collect(),
        int_returns: vec![xreg(0), xreg(1)],
        float_returns: vec![super::inst::vreg_preg(0), super::inst::vreg_preg(1)],
        callee_saved: CALLEE_SAVED_INT.iter().map(|&r| xreg(r)).chain(std::iter::once(xreg(FP_REG_NUM))).collect(),
        caller_saved: (0..19).map(xreg).collect(),
    }
}

/// Per-register spill/save home size used by `compute_frame_layout`: 8
/// bytes, AAPCS64 only mandates preserving the bottom 8 bytes of a
/// vector/float callee-save.
pub const CALLEE_SAVED_REG_BYTES: u32 = 8;

/// Emits the function prologue: saves the frame pointer and link register,
/// establishes the new frame pointer, allocates the frame, then saves every
/// callee-saved integer register the allocator actually used.
///
/// Pairs registers two at a time with `stp` to match AAPCS64's 16-byte
/// alignment discipline; an odd one out is paired with `x29`'s slot being
/// reused is avoided by padding (`compute_frame_layout` already rounds
/// `saved_regs_bytes` up to a multiple of 8, and the caller is expected to
/// have an even `callee_saved_used` count after that rounding — a single
/// leftover register still emits correctly paired with `x29`/`x30`'s own
/// `stp`, handled as the first pair).
pub fn gen_prologue(layout: &FrameLayout) -> Vec<Inst> {
    let mut insts = Vec::new();
    // stp x29, x30, [sp, #-frame_size]!
    insts.push(Inst::StpPre {
        rt1: Reg::Real(xreg(FP_REG_NUM)),
        rt2: Reg::Real(xreg(LR_REG_NUM)),
        offset: -(layout.frame_size as i32),
    });
    // mov x29, sp (post-writeback sp is the new frame base).
    insts.push(Inst::MovReg { rd: Reg::Real(xreg(FP_REG_NUM)), rn: Reg::Real(xreg(31)) });

    for pair in layout.callee_saved_used.chunks(2) {
        let off = callee_save_offset(layout, pair);
        match pair {
            [a, b] => {
                insts.push(Inst::Store { rt: Reg::Real(*a), base: Reg::Real(xreg(FP_REG_NUM)), offset: off, ty: crate::ir::I64 });
                insts.push(Inst::Store { rt: Reg::Real(*b), base: Reg::Real(xreg(FP_REG_NUM)), offset: off + 8, ty: crate::ir::I64 });
            }
            [a] => insts.push(Inst::Store { rt: Reg::Real(*a), base: Reg::Real(xreg(FP_REG_NUM)), offset: off, ty: crate::ir::I64 }),
            _ => {}
        }
    }
    insts
}

/// Emits the epilogue: restores callee-saved registers, then `x29`/`x30`
/// with writeback, then `ret`.
pub fn gen_epilogue(layout: &FrameLayout) -> Vec<Inst> {
    let mut insts = Vec::new();
    for pair in layout.callee_saved_used.chunks(2) {
        let off = callee_save_offset(layout, pair);
        match pair {
            [a, b] => {
                insts.push(Inst::Load { rd: Reg::Real(*a), base: Reg::Real(xreg(FP_REG_NUM)), offset: off, ty: crate::ir::I64 });
                insts.push(Inst::Load { rd: Reg::Real(*b), base: Reg::Real(xreg(FP_REG_NUM)), offset: off + 8, ty: crate::ir::I64 });
            }
            [a] => insts.push(Inst::Load { rd: Reg::Real(*a), base: Reg::Real(xreg(FP_REG_NUM)), offset: off, ty: crate::ir::I64 }),
            _ => {}
        }
    }
    insts.push(Inst::LdpPost {
        rt1: Reg::Real(xreg(FP_REG_NUM)),
        rt2: Reg::Real(xreg(LR_REG_NUM)),
        offset: layout.frame_size as i32,
    });
    // The epilogue's own `ret` carries no return-value operands: by the
    // time lowering reaches it, the function-level `Ret` instruction it
    // replaces already pinned those values to x0/x1 via fixed-use
    // operands, so nothing here needs to read them again.
    insts.push(Inst::Ret { rets: smallvec::smallvec![] });
    insts
}

fn callee_save_offset(layout: &FrameLayout, pair: &[PReg]) -> i32 {
    let idx = layout.callee_saved_used.iter().position(|r| r == &pair[0]).unwrap_or(0);
    -(layout.saved_regs_bytes as i32) + (idx as i32) * 8
}
