//! AArch64's `MachInst`: one variant per instruction shape this backend
//! actually emits (spec.md §4.8's VCode, specialized to AAPCS64). Kept to
//! the handful of forms the seed scenarios in spec.md §8 exercise —
//! register-register and register-immediate ALU ops, the `madd`
//! multiply-add fusion, compare-and-branch, `csel`, loads/stores with a
//! 12-bit scaled immediate, and the move this ISA's regalloc edits and
//! prologue/epilogue both need.

use core::fmt;

use regalloc2::{Allocation, Operand, PReg, PRegSet, RegClass, VReg};
use smallvec::{smallvec, SmallVec};

use crate::ir::{IntCC, StackSlot, Type};
use crate::machinst::{operand_def, operand_fixed_use, operand_use, MachInst, MachLabel, Reg};

/// `x0`-`x30` as a `PReg` in `regalloc2`'s integer class (`x31`/`sp` is not
/// separately allocatable — it never holds a value the register allocator
/// manages, so instructions reference it by encoding alone).
pub fn xreg(n: u8) -> regalloc2::PReg {
    regalloc2::PReg::new(n as usize, RegClass::Int)
}

/// `v0`-`v31` as a `PReg` in `regalloc2`'s float/vector class.
pub fn vreg_preg(n: u8) -> regalloc2::PReg {
    regalloc2::PReg::new(n as usize, RegClass::Float)
}

/// The frame pointer, `x29` per AAPCS64.
pub const FP_REG_NUM: u8 = 29;
/// The link register, `x30`.
pub const LR_REG_NUM: u8 = 30;

/// An AArch64 condition-code field (the 4-bit `cond` operand of `b.cond`
/// and `csel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    /// Signed `<`
    Lt,
    /// Signed `<=`
    Le,
    /// Signed `>`
    Gt,
    /// Signed `>=`
    Ge,
    /// Unsigned `<` (`lo`/`cc`)
    Lo,
    /// Unsigned `<=` (`ls`)
    Ls,
    /// Unsigned `>` (`hi`)
    Hi,
    /// Unsigned `>=` (`hs`/`cs`)
    Hs,
}

impl Cond {
    /// Maps an IR `IntCC` to the AArch64 condition it tests after a `cmp`
    /// (`a - b`; note `subs` sets flags as `a cmp b`, matching IR operand
    /// order directly, no swap needed).
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

    /// The condition that holds exactly when `self` does not (used to
    /// invert a fall-through branch when the taken target is laid out
    /// immediately after).
    pub fn invert(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
            Cond::Lo => Cond::Hs,
            Cond::Ls => Cond::Hi,
            Cond::Hi => Cond::Ls,
            Cond::Hs => Cond::Lo,
        }
    }

    /// The 4-bit encoding used by both `b.cond` and `csel`.
    pub fn bits(self) -> u32 {
        match self {
            Cond::Eq => 0b0000,
            Cond::Ne => 0b0001,
            Cond::Hs => 0b0010,
            Cond::Lo => 0b0011,
            Cond::Hi => 0b1000,
            Cond::Ls => 0b1001,
            Cond::Ge => 0b1010,
            Cond::Lt => 0b1011,
            Cond::Gt => 0b1100,
            Cond::Le => 0b1101,
        }
    }
}

/// A two-register-operand integer ALU operation (`add`/`sub`/`and`/`orr`/
/// `eor`, plus the shifts, all sharing the same three-register encoding
/// shape modulo opcode bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Orr,
    Eor,
    Lsl,
    Lsr,
    Asr,
    Mul,
}

/// One AArch64 machine instruction over virtual registers (pre-regalloc) or
/// physical registers (post-regalloc) — see [`Reg`].
#[derive(Debug, Clone)]
pub enum Inst {
    /// `rd = rn <op> rm` (64-bit or 32-bit form per `ty`).
    AluRRR { op: AluOp, rd: Reg, rn: Reg, rm: Reg, ty: Type },
    /// `rd = rn <op> #imm` for `add`/`sub` with a 12-bit unsigned immediate.
    AluRRImm12 { op: AluOp, rd: Reg, rn: Reg, imm: u32, ty: Type },
    /// `rd = ra + rn * rm` — the `madd` fusion of an `imul` feeding an
    /// `iadd` (spec.md §8's FMA/fusion seed scenario).
    MAdd { rd: Reg, rn: Reg, rm: Reg, ra: Reg, ty: Type },
    /// `rd = -rn` (`sub rd, xzr, rn`).
    Neg { rd: Reg, rn: Reg, ty: Type },
    /// `rd = ~rn` (`orn rd, xzr, rn`).
    Not { rd: Reg, rn: Reg, ty: Type },
    /// Loads a 16-bit-chunked immediate into `rd` via `movz`/`movk`.
    MovImm { rd: Reg, imm: u64, ty: Type },
    /// `rd = rn` (`mov`, encoded as `orr rd, xzr, rn`).
    MovReg { rd: Reg, rn: Reg },
    /// Sets flags from `rn - rm` without keeping the result (`subs xzr, ..`).
    Cmp { rn: Reg, rm: Reg, ty: Type },
    /// Sets flags from `rn - #imm`.
    CmpImm { rn: Reg, imm: u32, ty: Type },
    /// `rd = cond ? rn : rm` (spec.md §8's select/abs seed scenario).
    CSel { rd: Reg, rn: Reg, rm: Reg, cond: Cond, ty: Type },
    /// Loads `ty` from `[base, #offset]` into `rd`.
    Load { rd: Reg, base: Reg, offset: i32, ty: Type },
    /// Stores `rt` to `[base, #offset]`.
    Store { rt: Reg, base: Reg, offset: i32, ty: Type },
    /// A load from a `StackSlot` whose frame offset is not yet known
    /// (spec.md §3 "StackSlots": "before that, references are symbolic").
    /// Frame finalization (spec.md §4.10) rewrites every occurrence of
    /// this variant to [`Inst::Load`] with a concrete frame-pointer-
    /// relative offset before emission ever sees it.
    LoadStack { rd: Reg, slot: StackSlot, in_slot_offset: i32, ty: Type },
    /// The symbolic-offset counterpart of [`Inst::LoadStack`] for stores.
    StoreStack { rt: Reg, slot: StackSlot, in_slot_offset: i32, ty: Type },
    /// A reload from a register-allocator spill slot (spec.md §4.9 step 4
    /// "spill — ... insert loads before each subsequent use"). `slot` is
    /// the raw index `regalloc2` assigned; like [`Inst::LoadStack`] this
    /// stays symbolic until frame finalization knows every spill slot's
    /// concrete frame offset.
    LoadSpill { rd: Reg, slot: u32, ty: Type },
    /// A spill store (spec.md §4.9 step 4 "... and stores after each
    /// def"), the [`Inst::LoadSpill`] counterpart.
    StoreSpill { rt: Reg, slot: u32, ty: Type },
    /// Unconditional branch to `target`.
    Jump { target: MachLabel },
    /// `b.cond taken` falling through to `not_taken` if untaken (the
    /// fallthrough edge is elided at emission time when `not_taken` is the
    /// next block in layout order).
    CondBr { cond: Cond, taken: MachLabel, not_taken: MachLabel },
    /// `ret` (via `x30`). `rets` pins each returned value to its AAPCS64
    /// return register (`x0`/`x1` or `v0`/`v1`) via a fixed-register
    /// operand, so the allocator itself places return values correctly
    /// rather than this backend emitting a separate ABI-shuffling move.
    Ret { rets: SmallVec<[(Reg, PReg); 2]> },
    /// Store-pair, used by the prologue to save two callee-saved registers
    /// in one instruction (`stp`) at `[sp, #offset]` with pre-indexed
    /// writeback when `offset` doubles as the frame-allocation amount.
    StpPre { rt1: Reg, rt2: Reg, offset: i32 },
    /// Load-pair with post-indexed writeback, the epilogue's mirror of
    /// [`Inst::StpPre`].
    LdpPost { rt1: Reg, rt2: Reg, offset: i32 },
    /// No-op (legalized-away `nop`/debug markers).
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
            Inst::AluRRR { rd, rn, rm, .. } => {
                smallvec![operand_def(Self::reg_use(*rd)), operand_use(Self::reg_use(*rn)), operand_use(Self::reg_use(*rm))]
            }
            Inst::AluRRImm12 { rd, rn, .. } => smallvec![operand_def(Self::reg_use(*rd)), operand_use(Self::reg_use(*rn))],
            Inst::MAdd { rd, rn, rm, ra, .. } => smallvec![
                operand_def(Self::reg_use(*rd)),
                operand_use(Self::reg_use(*rn)),
                operand_use(Self::reg_use(*rm)),
                operand_use(Self::reg_use(*ra)),
            ],
            Inst::Neg { rd, rn, .. } | Inst::Not { rd, rn, .. } => {
                smallvec![operand_def(Self::reg_use(*rd)), operand_use(Self::reg_use(*rn))]
            }
            Inst::MovImm { rd, .. } => smallvec![operand_def(Self::reg_use(*rd))],
            Inst::MovReg { rd, rn } => smallvec![operand_def(Self::reg_use(*rd)), operand_use(Self::reg_use(*rn))],
            Inst::Cmp { rn, rm, .. } => smallvec![operand_use(Self::reg_use(*rn)), operand_use(Self::reg_use(*rm))],
            Inst::CmpImm { rn, .. } => smallvec![operand_use(Self::reg_use(*rn))],
            Inst::CSel { rd, rn, rm, .. } => {
                smallvec![operand_def(Self::reg_use(*rd)), operand_use(Self::reg_use(*rn)), operand_use(Self::reg_use(*rm))]
            }
            Inst::Load { rd, base, .. } => smallvec![operand_def(Self::reg_use(*rd)), operand_use(Self::reg_use(*base))],
            Inst::Store { rt, base, .. } => smallvec![operand_use(Self::reg_use(*rt)), operand_use(Self::reg_use(*base))],
            Inst::LoadStack { rd, .. } => smallvec![operand_def(Self::reg_use(*rd))],
            Inst::StoreStack { rt, .. } => smallvec![operand_use(Self::reg_use(*rt))],
            Inst::LoadSpill { rd, .. } => smallvec![operand_def(Self::reg_use(*rd))],
            Inst::StoreSpill { rt, .. } => smallvec![operand_use(Self::reg_use(*rt))],
            Inst::Ret { rets } => rets.iter().map(|(r, preg)| operand_fixed_use(Self::reg_use(*r), *preg)).collect(),
            Inst::Jump { .. } | Inst::Nop => SmallVec::new(),
            Inst::CondBr { .. } => SmallVec::new(),
            Inst::StpPre { rt1, rt2, .. } | Inst::LdpPost { rt1, rt2, .. } => {
                smallvec![operand_use(Self::reg_use(*rt1)), operand_use(Self::reg_use(*rt2))]
            }
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
            Inst::MovReg { rd, rn } => Some((Self::reg_use(*rd), Self::reg_use(*rn))),
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
            Inst::AluRRR { rd, rn, rm, .. } => {
                *rd = next();
                *rn = next();
                *rm = next();
            }
            Inst::AluRRImm12 { rd, rn, .. } => {
                *rd = next();
                *rn = next();
            }
            Inst::MAdd { rd, rn, rm, ra, .. } => {
                *rd = next();
                *rn = next();
                *rm = next();
                *ra = next();
            }
            Inst::Neg { rd, rn, .. } | Inst::Not { rd, rn, .. } => {
                *rd = next();
                *rn = next();
            }
            Inst::MovImm { rd, .. } => *rd = next(),
            Inst::MovReg { rd, rn } => {
                *rd = next();
                *rn = next();
            }
            Inst::Cmp { rn, rm, .. } => {
                *rn = next();
                *rm = next();
            }
            Inst::CmpImm { rn, .. } => *rn = next(),
            Inst::CSel { rd, rn, rm, .. } => {
                *rd = next();
                *rn = next();
                *rm = next();
            }
            Inst::Load { rd, base, .. } => {
                *rd = next();
                *base = next();
            }
            Inst::Store { rt, base, .. } => {
                *rt = next();
                *base = next();
            }
            Inst::LoadStack { rd, .. } => *rd = next(),
            Inst::StoreStack { rt, .. } => *rt = next(),
            Inst::LoadSpill { rd, .. } => *rd = next(),
            Inst::StoreSpill { rt, .. } => *rt = next(),
            Inst::StpPre { rt1, rt2, .. } | Inst::LdpPost { rt1, rt2, .. } => {
                *rt1 = next();
                *rt2 = next();
            }
            Inst::Ret { rets } => {
                for (r, _) in rets.iter_mut() {
                    *r = next();
                }
            }
            Inst::Jump { .. } | Inst::CondBr { .. } | Inst::Nop => {}
        }
    }

    fn gen_move(dst: Allocation, src: Allocation, class: RegClass) -> Self {
        // regalloc2 asks for three distinct shapes here (spec.md §4.9 step
        // 4's spill/reload plus the plain register-to-register parallel
        // moves of step 6): reg<-reg is a real `mov`; either side touching
        // a spill slot becomes a symbolic load/store that frame
        // finalization resolves once every spill slot's offset is known,
        // exactly as `LoadStack`/`StoreStack` do for explicit slots.
        let ty = if class == RegClass::Float { crate::ir::F64 } else { crate::ir::I64 };
        match (dst.as_reg(), src.as_reg()) {
            (Some(rd), Some(rn)) => Inst::MovReg { rd: Reg::Real(rd), rn: Reg::Real(rn) },
            (None, Some(rn)) => {
                let slot = dst.as_stack().expect("non-register dst must be a spill slot").index() as u32;
                Inst::StoreSpill { rt: Reg::Real(rn), slot, ty }
            }
            (Some(rd), None) => {
                let slot = src.as_stack().expect("non-register src must be a spill slot").index() as u32;
                Inst::LoadSpill { rd: Reg::Real(rd), slot, ty }
            }
            (None, None) => unreachable!("regalloc2 never moves stack slot to stack slot directly"),
        }
    }
}
