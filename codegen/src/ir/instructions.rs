//! Opcodes and the `InstructionData` sum type: every operation the IR can
//! express carries exactly the operands and immediates its opcode needs
//! (spec.md §3 "Instruction variants"), so the verifier and lowering can
//! exhaustively match on the tag rather than guessing which fields are
//! meaningful.

use core::fmt;

use smallvec::SmallVec;

use super::condcodes::{FloatCC, IntCC};
use super::entities::{BlockCall, Constant, FuncRef, GlobalValue, SigRef, StackSlot, Value};
use super::memflags::MemFlags;
use super::trapcode::TrapCode;
use super::types::Type;
use retarget_entity::EntityList;

/// The operation an instruction performs. Each variant of [`InstructionData`]
/// is shared by several opcodes that have the same operand shape; the
/// opcode is what actually distinguishes "add" from "subtract".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `v = iconst.T N` — a constant integer.
    Iconst,
    /// `v = f32const N` / `f64const N` — a constant float, bit-pattern encoded.
    Fconst,
    /// `v = a + b` (wrapping).
    Iadd,
    /// `v = a - b` (wrapping).
    Isub,
    /// `v = a * b` (wrapping, low half).
    Imul,
    /// Signed division; traps on divide-by-zero or overflow.
    Sdiv,
    /// Unsigned division; traps on divide-by-zero.
    Udiv,
    /// Signed remainder.
    Srem,
    /// Unsigned remainder.
    Urem,
    /// Bitwise and.
    Band,
    /// Bitwise or.
    Bor,
    /// Bitwise xor.
    Bxor,
    /// Logical shift left.
    Ishl,
    /// Logical (unsigned) shift right.
    Ushr,
    /// Arithmetic (signed) shift right.
    Sshr,
    /// `iadd` against an immediate right operand.
    IaddImm,
    /// `imul` against an immediate right operand.
    ImulImm,
    /// Two's-complement negation.
    Ineg,
    /// IEEE-754 negation (sign-bit flip).
    Fneg,
    /// Bitwise complement.
    Bnot,
    /// `v = a + b` (float).
    Fadd,
    /// `v = a - b` (float).
    Fsub,
    /// `v = a * b` (float).
    Fmul,
    /// `v = a / b` (float).
    Fdiv,
    /// Sign-extend a narrower integer into a wider one.
    Sextend,
    /// Zero-extend a narrower integer into a wider one.
    Uextend,
    /// Truncate a wider integer into a narrower one.
    Ireduce,
    /// Widen a float into a wider float type.
    Fpromote,
    /// Narrow a float into a narrower float type.
    Fdemote,
    /// Reinterpret the bits of a value as a different, same-width type.
    Bitcast,
    /// Integer comparison, producing an `i8` of 0 or 1.
    Icmp,
    /// Float comparison, producing an `i8` of 0 or 1.
    Fcmp,
    /// `v = cond ? a : b`, branch-free select.
    Select,
    /// Fused multiply-add: `v = a*b + c`.
    Fma,
    /// Load a value of the instruction's result type from memory.
    Load,
    /// Store a value to memory.
    Store,
    /// Load a value from a `StackSlot`.
    StackLoad,
    /// Store a value to a `StackSlot`.
    StackStore,
    /// Unconditional jump, carrying the destination's block-call arguments.
    Jump,
    /// Conditional branch: `brif cond, then(args), else(args)`.
    Brif,
    /// Direct call through a `FuncRef`.
    Call,
    /// Indirect call: first `args` element is the callee address, second is
    /// `SigRef`'s declared argument list.
    CallIndirect,
    /// Return from the function with the given argument values.
    Return,
    /// Unconditional trap.
    Trap,
    /// Trap if the argument is zero.
    Trapz,
    /// Trap if the argument is nonzero.
    Trapnz,
    /// Fixed-permutation lane shuffle of two same-typed vectors.
    Shuffle,
    /// Extract a single lane of a vector as a scalar.
    ExtractLane,
    /// Insert a scalar into one lane of a vector, producing a new vector.
    InsertLane,
    /// The address of a `GlobalValue`.
    SymbolValue,
    /// The address of a `FuncRef`, for taking a function pointer.
    FuncAddr,
    /// A no-op that keeps a value live across a point debuginfo/regalloc
    /// testing wants to observe; lowers to nothing.
    Nop,
    /// Splits an oversized integer (`i128`) into its low and high `i64`
    /// halves (two results), introduced by legalization (spec.md §4.5
    /// "oversized integer widths are expanded into pairs").
    Isplit,
    /// The inverse of `isplit`: combines a low and high `i64` into one
    /// `i128`.
    Iconcat,
}

impl Opcode {
    /// `true` for opcodes that end a block (spec.md §3 I3).
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::Brif | Opcode::Return | Opcode::Trap
        )
    }

    /// `true` for opcodes with no observable side effect: safe for GVN to
    /// dedup and for DCE to remove when dead (spec.md §4.5).
    pub fn is_pure(self) -> bool {
        !matches!(
            self,
            Opcode::Store
                | Opcode::StackStore
                | Opcode::Call
                | Opcode::CallIndirect
                | Opcode::Trap
                | Opcode::Trapz
                | Opcode::Trapnz
                | Opcode::Jump
                | Opcode::Brif
                | Opcode::Return
                | Opcode::Load // conservatively impure: may alias a store
                | Opcode::StackLoad
        )
    }

    /// `true` for opcodes with an observable side effect that DCE must keep
    /// live unconditionally, even with no users.
    pub fn has_side_effect(self) -> bool {
        matches!(
            self,
            Opcode::Store
                | Opcode::StackStore
                | Opcode::Call
                | Opcode::CallIndirect
                | Opcode::Trap
                | Opcode::Trapz
                | Opcode::Trapnz
                | Opcode::Jump
                | Opcode::Brif
                | Opcode::Return
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Opcode::Iconst => "iconst",
            Opcode::Fconst => "fconst",
            Opcode::Iadd => "iadd",
            Opcode::Isub => "isub",
            Opcode::Imul => "imul",
            Opcode::Sdiv => "sdiv",
            Opcode::Udiv => "udiv",
            Opcode::Srem => "srem",
            Opcode::Urem => "urem",
            Opcode::Band => "band",
            Opcode::Bor => "bor",
            Opcode::Bxor => "bxor",
            Opcode::Ishl => "ishl",
            Opcode::Ushr => "ushr",
            Opcode::Sshr => "sshr",
            Opcode::IaddImm => "iadd_imm",
            Opcode::ImulImm => "imul_imm",
            Opcode::Ineg => "ineg",
            Opcode::Fneg => "fneg",
            Opcode::Bnot => "bnot",
            Opcode::Fadd => "fadd",
            Opcode::Fsub => "fsub",
            Opcode::Fmul => "fmul",
            Opcode::Fdiv => "fdiv",
            Opcode::Sextend => "sextend",
            Opcode::Uextend => "uextend",
            Opcode::Ireduce => "ireduce",
            Opcode::Fpromote => "fpromote",
            Opcode::Fdemote => "fdemote",
            Opcode::Bitcast => "bitcast",
            Opcode::Icmp => "icmp",
            Opcode::Fcmp => "fcmp",
            Opcode::Select => "select",
            Opcode::Fma => "fma",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::StackLoad => "stack_load",
            Opcode::StackStore => "stack_store",
            Opcode::Jump => "jump",
            Opcode::Brif => "brif",
            Opcode::Call => "call",
            Opcode::CallIndirect => "call_indirect",
            Opcode::Return => "return",
            Opcode::Trap => "trap",
            Opcode::Trapz => "trapz",
            Opcode::Trapnz => "trapnz",
            Opcode::Shuffle => "shuffle",
            Opcode::ExtractLane => "extractlane",
            Opcode::InsertLane => "insertlane",
            Opcode::SymbolValue => "symbol_value",
            Opcode::FuncAddr => "func_addr",
            Opcode::Nop => "nop",
            Opcode::Isplit => "isplit",
            Opcode::Iconcat => "iconcat",
        };
        f.write_str(s)
    }
}

/// A fixed 16-lane shuffle permutation mask (spec.md §3 "shuffle").
/// Lane indices `0..16` select from the first operand, `16..32` from the
/// second, matching the widest vector type (`i8x16`) this IR supports;
/// narrower shuffles use a prefix of this mask.
pub type ShuffleMask = [u8; 16];

/// Every shape an instruction's operands/immediates/result-type annotation
/// can take. One variant per row of spec.md §3's "Instruction variants"
/// list.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum InstructionData {
    /// No operands (e.g. `nop`, `trap`).
    Nullary { opcode: Opcode, trap_code: Option<TrapCode> },
    /// One operand, no immediate (`ineg`, `sextend`, `bitcast`, ...). The
    /// annotated `ty` is the *result* type for conversions that change type.
    Unary { opcode: Opcode, arg: Value, ty: Type },
    /// One integer immediate, no value operand (`iconst`).
    UnaryImm { opcode: Opcode, imm: i64, ty: Type },
    /// One float immediate (IEEE-754 bit pattern), no value operand
    /// (`fconst`).
    UnaryIeeeImm { opcode: Opcode, bits: u64, ty: Type },
    /// A vector constant, interned in the function's constant pool
    /// (`iconst`/`fconst` on a vector type).
    UnaryConst { opcode: Opcode, constant: Constant, ty: Type },
    /// The address of a `GlobalValue` or `FuncRef`.
    UnaryGlobalValue { opcode: Opcode, global_value: GlobalValue },
    /// One value operand plus a trap code, used by `trapz`/`trapnz`.
    UnaryWithTrap { opcode: Opcode, arg: Value, code: TrapCode },
    /// Two value operands (`iadd`, `band`, `fdiv`, ...).
    Binary { opcode: Opcode, args: [Value; 2] },
    /// One value operand plus an integer immediate right-hand side
    /// (`iadd_imm`, `imul_imm`).
    BinaryImm { opcode: Opcode, arg: Value, imm: i64 },
    /// Three value operands (`select`, `fma`).
    Ternary { opcode: Opcode, args: [Value; 3] },
    /// An integer comparison.
    IntCompare { opcode: Opcode, cond: IntCC, args: [Value; 2] },
    /// A floating-point comparison.
    FloatCompare { opcode: Opcode, cond: FloatCC, args: [Value; 2] },
    /// A memory load: address operand, byte offset, flags. `ty` is the
    /// loaded value's type.
    Load { opcode: Opcode, arg: Value, offset: i32, flags: MemFlags, ty: Type },
    /// A memory store: value operand, address operand, byte offset, flags.
    Store { opcode: Opcode, args: [Value; 2], offset: i32, flags: MemFlags },
    /// A load from a `StackSlot` at a byte offset within it.
    StackLoad { opcode: Opcode, slot: StackSlot, offset: i32, ty: Type },
    /// A store to a `StackSlot` at a byte offset within it.
    StackStore { opcode: Opcode, arg: Value, slot: StackSlot, offset: i32 },
    /// An unconditional jump to one `BlockCall`.
    Jump { opcode: Opcode, destination: BlockCall },
    /// A two-way conditional branch: `cond` selects between `blocks[0]`
    /// (true) and `blocks[1]` (false).
    Branch { opcode: Opcode, cond: Value, blocks: [BlockCall; 2] },
    /// A direct call to `func_ref` with `args` interned in the function's
    /// shared value-list pool.
    Call { opcode: Opcode, func_ref: FuncRef, args: EntityList<Value> },
    /// An indirect call through `sig_ref`; `args[0]` is the callee address,
    /// the rest are the call's actual arguments.
    CallIndirect { opcode: Opcode, sig_ref: SigRef, args: EntityList<Value> },
    /// A vector lane shuffle.
    Shuffle { opcode: Opcode, args: [Value; 2], mask: Box<ShuffleMask> },
    /// Extracts lane `lane` of `arg`.
    ExtractLane { opcode: Opcode, arg: Value, lane: u8 },
    /// Inserts `args[1]` into lane `lane` of `args[0]`.
    InsertLane { opcode: Opcode, args: [Value; 2], lane: u8 },
    /// A function return.
    Return { opcode: Opcode, args: EntityList<Value> },
}

impl InstructionData {
    /// The opcode this instruction performs.
    pub fn opcode(&self) -> Opcode {
        match self {
            InstructionData::Nullary { opcode, .. }
            | InstructionData::Unary { opcode, .. }
            | InstructionData::UnaryImm { opcode, .. }
            | InstructionData::UnaryIeeeImm { opcode, .. }
            | InstructionData::UnaryConst { opcode, .. }
            | InstructionData::UnaryGlobalValue { opcode, .. }
            | InstructionData::UnaryWithTrap { opcode, .. }
            | InstructionData::Binary { opcode, .. }
            | InstructionData::BinaryImm { opcode, .. }
            | InstructionData::Ternary { opcode, .. }
            | InstructionData::IntCompare { opcode, .. }
            | InstructionData::FloatCompare { opcode, .. }
            | InstructionData::Load { opcode, .. }
            | InstructionData::Store { opcode, .. }
            | InstructionData::StackLoad { opcode, .. }
            | InstructionData::StackStore { opcode, .. }
            | InstructionData::Jump { opcode, .. }
            | InstructionData::Branch { opcode, .. }
            | InstructionData::Call { opcode, .. }
            | InstructionData::CallIndirect { opcode, .. }
            | InstructionData::Shuffle { opcode, .. }
            | InstructionData::ExtractLane { opcode, .. }
            | InstructionData::InsertLane { opcode, .. }
            | InstructionData::Return { opcode, .. } => *opcode,
        }
    }

    /// `true` if this instruction is a block terminator.
    pub fn is_terminator(&self) -> bool {
        self.opcode().is_terminator()
    }

    /// `true` if this instruction is a branch carrying `BlockCall`s (i.e.
    /// `Jump` or `Branch`, as opposed to `Return`, which also terminates
    /// but does not target a block).
    pub fn is_branch(&self) -> bool {
        matches!(self, InstructionData::Jump { .. } | InstructionData::Branch { .. })
    }

    /// The value operands read by this instruction, in a small, allocation-
    /// free vector for the common (fixed-arity) case. Variable-arity
    /// operands (`call`, `call_indirect`, `return`) need the pool, so
    /// callers that need those should use
    /// [`DataFlowGraph::inst_args`](super::dfg::DataFlowGraph::inst_args)
    /// instead; this helper covers everything with a statically known arity.
    pub fn fixed_args(&self) -> SmallVec<[Value; 4]> {
        match self {
            InstructionData::Nullary { .. }
            | InstructionData::UnaryImm { .. }
            | InstructionData::UnaryIeeeImm { .. }
            | InstructionData::UnaryConst { .. }
            | InstructionData::UnaryGlobalValue { .. } => SmallVec::new(),
            InstructionData::Unary { arg, .. }
            | InstructionData::UnaryWithTrap { arg, .. }
            | InstructionData::Load { arg, .. }
            | InstructionData::StackStore { arg, .. }
            | InstructionData::ExtractLane { arg, .. } => SmallVec::from_slice(&[*arg]),
            InstructionData::BinaryImm { arg, .. } => SmallVec::from_slice(&[*arg]),
            InstructionData::Binary { args, .. }
            | InstructionData::IntCompare { args, .. }
            | InstructionData::FloatCompare { args, .. }
            | InstructionData::Store { args, .. }
            | InstructionData::Shuffle { args, .. }
            | InstructionData::InsertLane { args, .. } => SmallVec::from_slice(args),
            InstructionData::Ternary { args, .. } => SmallVec::from_slice(args),
            InstructionData::StackLoad { .. } => SmallVec::new(),
            InstructionData::Jump { destination, .. } => SmallVec::from_slice(&destination.args),
            InstructionData::Branch { cond, blocks, .. } => {
                let mut v = SmallVec::from_slice(&[*cond]);
                v.extend(blocks[0].args.iter().copied());
                v.extend(blocks[1].args.iter().copied());
                v
            }
            InstructionData::Call { .. }
            | InstructionData::CallIndirect { .. }
            | InstructionData::Return { .. } => SmallVec::new(),
        }
    }

    /// The `BlockCall`s this instruction branches to, in source order
    /// (`[then, else]` for `Branch`, `[dest]` for `Jump`).
    pub fn branch_destinations(&self) -> SmallVec<[&BlockCall; 2]> {
        match self {
            InstructionData::Jump { destination, .. } => SmallVec::from_slice(&[destination]),
            InstructionData::Branch { blocks, .. } => SmallVec::from_slice(&[&blocks[0], &blocks[1]]),
            _ => SmallVec::new(),
        }
    }

    /// Mutable access to the `BlockCall`s this instruction branches to,
    /// used by unreachable-code elimination and alias resolution to rewrite
    /// targets/arguments in place.
    pub fn branch_destinations_mut(&mut self) -> SmallVec<[&mut BlockCall; 2]> {
        match self {
            InstructionData::Jump { destination, .. } => SmallVec::from_slice(&[destination]),
            InstructionData::Branch { blocks, .. } => {
                let [a, b] = blocks;
                SmallVec::from_slice(&[a, b])
            }
            _ => SmallVec::new(),
        }
    }
}

impl fmt::Debug for InstructionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(..)", self.opcode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminators_agree_with_opcode() {
        let ret = InstructionData::Return {
            opcode: Opcode::Return,
            args: EntityList::default(),
        };
        assert!(ret.is_terminator());
        assert!(!ret.is_branch());
    }

    #[test]
    fn branch_destinations_reports_both_edges() {
        let data = InstructionData::Branch {
            opcode: Opcode::Brif,
            cond: Value::from_u32(0),
            blocks: [
                BlockCall::new(super::super::entities::Block::from_u32(1), vec![]),
                BlockCall::new(super::super::entities::Block::from_u32(2), vec![]),
            ],
        };
        assert_eq!(data.branch_destinations().len(), 2);
    }
}
