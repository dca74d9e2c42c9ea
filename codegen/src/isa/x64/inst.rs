//! x86-64's `MachInst`: the System V ABI's two-address ALU shape (unlike
//! AArch64's three-address forms, every x86-64 ALU instruction reads and
//! rewrites its destination — spec.md §4.8 models that as a `mod`
//! operand), plus moves, compares, conditional moves, loads/stores, and
//! the handful of branch/return/frame forms the seed scenarios in
//! spec.md §8 need.

use core::fmt;

use regalloc2::{Allocation, Operand, PReg, PRegSet, RegClass, VReg};
use smallvec::{smallvec, SmallVec};

use crate::ir::{IntCC, StackSlot, Type};
use crate::machinst::{operand_def, operand_fixed_use, operand_mod, operand_use, MachInst, MachLabel, Reg};

/// `rax`-`r15` as a `PReg` in `regalloc2`'s integer class, numbered by
/// their hardware encoding (`rsp`, encoding 4, is never handed to the
/// allocator — see [`super::abi`]).
pub fn greg(n: u8) -> PReg {
    PReg::new(n as usize, RegClass::Int)
}

/// `xmm0`-`xmm15` as a `PReg` in the float/vector class.
pub fn xmm(n: u8) -> PReg {
    PReg::new(n as usize, RegClass::Float)
}

pub const RSP_ENC: u8 = 4;
pub const RBP_ENC: u8 = 5;

/// An x86-64 condition code (the 4-bit `cc` field shared by `jcc`,
/// `setcc`, and `cmovcc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Lo,
    Ls,
    Hi,
    Hs,
}

impl Cond {
    /// Maps an IR `IntCC` to the x86-64 flag test that holds after a
    /// `cmp lhs, rhs` (flags computed as `lhs - rhs`, matching IR operand
    /// order directly).
    pub fn from_intcc(cc: IntCC) -> Cond {
        match cc {
            IntCC::Equal => Cond::Eq,
            IntCC::NotEqual => Cond::Ne,
            IntCC::SignedLessThan => Cond::Lt,
            IntCC::SignedLessThanOrEqual => Cond::Le,
            IntCC::SignedGreaterThan => Cond::Gt,
            IntCC::SignedGreaterThanOrEqual => Cond::Ge,
            IntCC::UnsignedLessThan => Cond::Lo,
            IntCC::UnsignedLessThanOrEqual => Cond::Ls,
            IntCC::UnsignedGreaterThan => Cond::Hi,
            IntCC::UnsignedGreaterThanOrEqual => Cond::Hs,
        }
    }

    /// The 4-bit `cc` field used by the `0f 80+cc`/`0f 90+cc`/`0f 40+cc`
    /// opcode families (`jcc rel32`, `setcc r/m8`, `cmovcc r, r/m`).
    pub fn bits(self) -> u8 {
        match self {
            Cond::Eq => 0x4,
            Cond::Ne => 0x5,
            Cond::Lt => 0xc,
            Cond::Ge => 0xd,
            Cond::Le => 0xe,
            Cond::Gt => 0xf,
            Cond::Lo => 0x2,
            Cond::Hs => 0x3,
            Cond::Ls => 0x6,
            Cond::Hi => 0x7,
        }
    }
}

/// A two-address ALU operation (`dst = dst <op> src`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Imul,
}

/// One x86-64 machine instruction over virtual registers (pre-regalloc) or
/// physical registers (post-regalloc) — see [`Reg`].
#[derive(Debug, Clone)]
pub enum Inst {
    /// `dst <op>= src` (two-address; `dst` is both read and written).
    AluRmR { op: AluOp, dst: Reg, src: Reg, ty: Type },
    /// `dst <op>= imm` (`add`/`sub`/... with a sign-extended 32-bit
    /// immediate).
    AluRmImm32 { op: AluOp, dst: Reg, imm: i32, ty: Type },
    /// `dst = -dst` (`neg`).
    Neg { dst: Reg, ty: Type },
    /// `dst = ~dst` (`not`).
    Not { dst: Reg, ty: Type },
    /// Loads a full immediate into `dst` (`mov r64, imm64` or `mov r32,
    /// imm32`, per `ty`).
    MovImm { dst: Reg, imm: u64, ty: Type },
    /// `dst = src` (`mov`).
    MovRR { dst: Reg, src: Reg, ty: Type },
    /// Sets flags from `lhs - rhs` without keeping the result (`cmp`).
    Cmp { lhs: Reg, rhs: Reg, ty: Type },
    /// Sets flags from `lhs - imm`.
    CmpImm32 { lhs: Reg, imm: i32, ty: Type },
    /// `if cc then dst = src` (two-address; `dst` is both read and
    /// written, used for the branch-free select of spec.md §8's abs-via-
    /// select seed scenario).
    CMov { dst: Reg, src: Reg, cond: Cond, ty: Type },
    /// Loads `ty` from `[base + offset]` into `dst`.
    Load { dst: Reg, base: Reg, offset: i32, ty: Type },
    /// Stores `src` to `[base + offset]`.
    Store { src: Reg, base: Reg, offset: i32, ty: Type },
    /// A load from a `StackSlot` whose frame offset isn't known yet
    /// (spec.md §4.10); frame finalization rewrites this to [`Inst::Load`].
    LoadStack { dst: Reg, slot: StackSlot, in_slot_offset: i32, ty: Type },
    /// The store counterpart of [`Inst::LoadStack`].
    StoreStack { src: Reg, slot: StackSlot, in_slot_offset: i32, ty: Type },
    /// A reload from a register-allocator spill slot (spec.md §4.9 step 4),
    /// symbolic until frame finalization like [`Inst::LoadStack`].
    LoadSpill { dst: Reg, slot: u32, ty: Type },
    /// The spill-store counterpart of [`Inst::LoadSpill`].
    StoreSpill { src: Reg, slot: u32, ty: Type },
    /// Unconditional jump to `target` (`jmp rel32`).
    Jump { target: MachLabel },
    /// `jcc taken`, falling through to `not_taken` when it's the next
    /// block in layout order (elided at emission time, mirroring the
    /// AArch64 backend).
    CondBr { cond: Cond, taken: MachLabel, not_taken: MachLabel },
    /// `ret`. `rets` pins each returned value to its SysV return register
    /// (`rax`/`rdx`) via a fixed-register operand, exactly as the
    /// AArch64 backend does.
    Ret { rets: SmallVec<[(Reg, PReg); 2]> },
    /// `push r64` — the prologue's callee-saved-register save.
    Push { src: Reg },
    /// `pop r64` — the epilogue's mirror of [`Inst::Push`].
    Pop { dst: Reg },
    /// No-op (`nop`).
    Nop,
}

impl Inst {
    fn reg_use(r: Reg) -> VReg {
        r.as_vreg().expect("operands() called on an already-allocated instruction")
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl MachInst for Inst {
    fn operands(&self) -> SmallVec<[Operand; 4]> {
        match self {
            Inst::AluRmR { op: AluOp::Shl | AluOp::Shr | AluOp::Sar, dst, src, .. } => {
                // Variable shift counts are only encodable out of `cl`; pin
                // the count operand to `rcx` (encoding 1) rather than
                // letting the allocator place it anywhere.
                smallvec![operand_mod(Self::reg_use(*dst)), operand_fixed_use(Self::reg_use(*src), greg(1))]
            }
            Inst::AluRmR { dst, src, .. } => smallvec![operand_mod(Self::reg_use(*dst)), operand_use(Self::reg_use(*src))],
            Inst::AluRmImm32 { dst, .. } => smallvec![operand_mod(Self::reg_use(*dst))],
            Inst::Neg { dst, .. } | Inst::Not { dst, .. } => smallvec![operand_mod(Self::reg_use(*dst))],
            Inst::MovImm { dst, .. } => smallvec![operand_def(Self::reg_use(*dst))],
            Inst::MovRR { dst, src, .. } => smallvec![operand_def(Self::reg_use(*dst)), operand_use(Self::reg_use(*src))],
            Inst::Cmp { lhs, rhs, .. } => smallvec![operand_use(Self::reg_use(*lhs)), operand_use(Self::reg_use(*rhs))],
            Inst::CmpImm32 { lhs, .. } => smallvec![operand_use(Self::reg_use(*lhs))],
            Inst::CMov { dst, src, .. } => smallvec![operand_mod(Self::reg_use(*dst)), operand_use(Self::reg_use(*src))],
            Inst::Load { dst, base, .. } => smallvec![operand_def(Self::reg_use(*dst)), operand_use(Self::reg_use(*base))],
            Inst::Store { src, base, .. } => smallvec![operand_use(Self::reg_use(*src)), operand_use(Self::reg_use(*base))],
            Inst::LoadStack { dst, .. } => smallvec![operand_def(Self::reg_use(*dst))],
            Inst::StoreStack { src, .. } => smallvec![operand_use(Self::reg_use(*src))],
            Inst::LoadSpill { dst, .. } => smallvec![operand_def(Self::reg_use(*dst))],
            Inst::StoreSpill { src, .. } => smallvec![operand_use(Self::reg_use(*src))],
            Inst::Ret { rets } => rets.iter().map(|(r, preg)| operand_fixed_use(Self::reg_use(*r), *preg)).collect(),
            Inst::Push { src } => smallvec![operand_use(Self::reg_use(*src))],
            Inst::Pop { dst } => smallvec![operand_def(Self::reg_use(*dst))],
            Inst::Jump { .. } | Inst::CondBr { .. } | Inst::Nop => SmallVec::new(),
        }
    }

    fn is_term(&self) -> bool {
        matches!(self, Inst::Jump { .. } | Inst::CondBr { .. } | Inst::Ret { .. })
    }

    fn is_ret(&self) -> bool {
        matches!(self, Inst::Ret { .. })
    }

    fn is_move(&self) -> Option<(VReg, VReg)> {
        match self {
            Inst::MovRR { dst, src, .. } => Some((Self::reg_use(*dst), Self::reg_use(*src))),
            _ => None,
        }
    }

    fn clobbers(&self) -> PRegSet {
        PRegSet::empty()
    }

    fn apply_regalloc(&mut self, allocs: &[Allocation]) {
        let mut i = 0;
        let mut next = || {
            let a = allocs[i];
            i += 1;
            Reg::Real(a.as_reg().expect("this backend never requests stack-allocation operands"))
        };
        match self {
            Inst::AluRmR { dst, src, .. } => {
                *dst = next();
                *src = next();
            }
            Inst::AluRmImm32 { dst, .. } => *dst = next(),
            Inst::Neg { dst, .. } | Inst::Not { dst, .. } => *dst = next(),
            Inst::MovImm { dst, .. } => *dst = next(),
            Inst::MovRR { dst, src, .. } => {
                *dst = next();
                *src = next();
            }
            Inst::Cmp { lhs, rhs, .. } => {
                *lhs = next();
                *rhs = next();
            }
            Inst::CmpImm32 { lhs, .. } => *lhs = next(),
            Inst::CMov { dst, src, .. } => {
                *dst = next();
                *src = next();
            }
            Inst::Load { dst, base, .. } => {
                *dst = next();
                *base = next();
            }
            Inst::Store { src, base, .. } => {
                *src = next();
                *base = next();
            }
            Inst::LoadStack { dst, .. } => *dst = next(),
            Inst::StoreStack { src, .. } => *src = next(),
            Inst::LoadSpill { dst, .. } => *dst = next(),
            Inst::StoreSpill { src, .. } => *src = next(),
            Inst::Ret { rets } => {
                for (r, _) in rets.iter_mut() {
                    *r = next();
                }
            }
            Inst::Push { src } => *src = next(),
            Inst::Pop { dst } => *dst = next(),
            Inst::Jump { .. } | Inst::CondBr { .. } | Inst::Nop => {}
        }
    }

    fn gen_move(dst: Allocation, src: Allocation, class: RegClass) -> Self {
        // See the AArch64 backend's `gen_move` for why this branches on
        // which side (if either) is a spill slot rather than a register.
        let ty = if class == RegClass::Float { crate::ir::F64 } else { crate::ir::I64 };
        match (dst.as_reg(), src.as_reg()) {
            (Some(dst), Some(src)) => Inst::MovRR { dst: Reg::Real(dst), src: Reg::Real(src), ty },
            (None, Some(src)) => {
                let slot = dst.as_stack().expect("non-register dst must be a spill slot").index() as u32;
                Inst::StoreSpill { src: Reg::Real(src), slot, ty }
            }
            (Some(dst), None) => {
                let slot = src.as_stack().expect("non-register src must be a spill slot").index() as u32;
                Inst::LoadSpill { dst: Reg::Real(dst), slot, ty }
            }
            (None, None) => unreachable!("regalloc2 never moves stack slot to stack slot directly"),
        }
    }
}
