//! The System V AMD64 ABI as this backend implements it: which registers
//! carry integer/float arguments and returns, which are callee-saved, and
//! how the prologue/epilogue save and restore them around
//! `machinst::abi::compute_frame_layout`'s stack layout (spec.md §4.10).

use regalloc2::PReg;

use crate::ir::CallConv;
use crate::machinst::{CallConvInfo, FrameLayout, Reg};

use super::inst::{greg, xmm, Inst, RBP_ENC};

/// Integer argument registers, in SysV passing order: `rdi, rsi, rdx, rcx,
/// r8, r9`.
pub const INT_PARAM_REGS: [u8; 6] = [7, 6, 2, 1, 8, 9];
/// Integer return registers: `rax`, `rdx`.
pub const INT_RETURN_REGS: [u8; 2] = [0, 2];
/// Callee-saved integer registers SysV requires preserved: `rbx, r12-r15`
/// (`rbp` is saved unconditionally by the prologue below, like AArch64's
/// frame pointer).
pub const CALLEE_SAVED_INT: [u8; 5] = [3, 12, 13, 14, 15];
/// Caller-saved (volatile) integer registers.
pub const CALLER_SAVED_INT: [u8; 9] = [0, 1, 2, 6, 7, 8, 9, 10, 11];

/// Describes SysV for `machinst::abi`'s generic frame-layout algorithm.
pub fn system_v() -> CallConvInfo {
    CallConvInfo {
        call_conv: CallConv::SystemV,
        int_params: INT_PARAM_REGS.iter().map(|&r| greg(r)).collect(),
        float_params: (0..8).map(xmm).collect(),
        int_returns: INT_RETURN_REGS.iter().map(|&r| greg(r)).collect(),
        float_returns: vec![xmm(0), xmm(1)],
        callee_saved: CALLEE_SAVED_INT.iter().map(|&r| greg(r)).chain(std::iter::once(greg(RBP_ENC))).collect(),
        caller_saved: CALLER_SAVED_INT.iter().map(|&r| greg(r)).collect(),
    }
}

/// Per-register spill/save home size (8 bytes; this backend doesn't spill
/// vector callee-saves since SysV has none).
pub const CALLEE_SAVED_REG_BYTES: u32 = 8;

/// Emits the function prologue: `push rbp; mov rbp, rsp; sub rsp,
/// frame_size` (frame-size adjustment covers explicit slots, spills, and
/// outgoing-argument area; callee-saved-register homes are included
/// below), then pushes every callee-saved register the allocator used.
pub fn gen_prologue(layout: &FrameLayout) -> Vec<Inst> {
    let mut insts = Vec::new();
    insts.push(Inst::Push { src: Reg::Real(greg(RBP_ENC)) });
    insts.push(Inst::MovRR { dst: Reg::Real(greg(RBP_ENC)), src: Reg::Real(greg(super::inst::RSP_ENC)), ty: crate::ir::I64 });
    let below_saves = layout.frame_size - layout.saved_regs_bytes;
    if below_saves > 0 {
        insts.push(Inst::AluRmImm32 {
            op: super::inst::AluOp::Sub,
            dst: Reg::Real(greg(super::inst::RSP_ENC)),
            imm: below_saves as i32,
            ty: crate::ir::I64,
        });
    }
    for &reg in &layout.callee_saved_used {
        if reg != greg(RBP_ENC) {
            insts.push(Inst::Push { src: Reg::Real(reg) });
        }
    }
    insts
}

/// Emits the epilogue: pops callee-saved registers in reverse order, tears
/// down the frame (`mov rsp, rbp`), restores `rbp`, then `ret`.
pub fn gen_epilogue(layout: &FrameLayout) -> Vec<Inst> {
    let mut insts = Vec::new();
    for &reg in layout.callee_saved_used.iter().rev() {
        if reg != greg(RBP_ENC) {
            insts.push(Inst::Pop { dst: Reg::Real(reg) });
        }
    }
    insts.push(Inst::MovRR { dst: Reg::Real(greg(super::inst::RSP_ENC)), src: Reg::Real(greg(RBP_ENC)), ty: crate::ir::I64 });
    insts.push(Inst::Pop { dst: Reg::Real(greg(RBP_ENC)) });
    insts.push(Inst::Ret { rets: smallvec::smallvec![] });
    insts
}

#[allow(dead_code)]
fn unused(_: PReg) {}
