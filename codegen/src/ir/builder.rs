//! The raw, invariant-preserving IR construction API (spec.md §4.1).
//!
//! `Builder` is deliberately low-level: it has no notion of "variables" or
//! unsealed blocks (that convenience layer is `retarget_frontend::FunctionBuilder`,
//! built on top of this). What it does guarantee is spec.md §3's structural
//! invariants as instructions are appended: a block never gets two
//! terminators, and every `BlockCall` this API helps construct carries as
//! many arguments as its destination has parameters.

use core::fmt;

use retarget_entity::EntityList;

use super::entities::{Block, BlockCall, Inst, Value};
use super::function::Function;
use super::instructions::{InstructionData, Opcode};
use super::types::Type;

/// An error the raw builder rejects at construction time rather than
/// letting an invalid `Function` reach the verifier (spec.md §4.1
/// "Errors").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    /// Tried to append a non-terminator after a block's terminator, or a
    /// second terminator to an already-terminated block.
    InsertAfterTerminator,
    /// A `BlockCall`'s argument count didn't match its target's declared
    /// parameter count.
    BlockCallArityMismatch {
        /// The target block.
        block: Block,
        /// Parameters the target declares.
        expected: usize,
        /// Arguments actually supplied.
        found: usize,
    },
    /// No cursor position is set; call `switch_to_block` first.
    NoInsertionPoint,
}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderError::InsertAfterTerminator => write!(f, "cannot insert after a block terminator"),
            BuilderError::BlockCallArityMismatch { block, expected, found } => write!(
                f,
                "block call to {block} supplies {found} argument(s), expected {expected}"
            ),
            BuilderError::NoInsertionPoint => write!(f, "no insertion point set"),
        }
    }
}

impl std::error::Error for BuilderError {}

/// A cursor-based builder over a `Function`'s IR, appending instructions at
/// the end of whichever block is currently selected.
pub struct Builder<'f> {
    func: &'f mut Function,
    at: Option<Block>,
}

impl<'f> Builder<'f> {
    /// Start building on top of `func`, with no block selected yet.
    pub fn new(func: &'f mut Function) -> Self {
        Builder { func, at: None }
    }

    /// Create a new block, not yet inserted into the layout.
    pub fn create_block(&mut self) -> Block {
        self.func.dfg.make_block()
    }

    /// Append `block` to the end of the function's layout.
    pub fn insert_block(&mut self, block: Block) {
        self.func.layout.append_block(block);
        if self.func.entry_block.is_none() {
            self.func.entry_block = Some(block);
        }
    }

    /// Select `block` as the insertion point: subsequent `ins_*` calls
    /// append to its end.
    pub fn switch_to_block(&mut self, block: Block) {
        self.at = Some(block);
    }

    /// The block currently selected for insertion, if any.
    pub fn current_block(&self) -> Option<Block> {
        self.at
    }

    /// Append a new parameter of type `ty` to `block`.
    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        self.func.dfg.append_block_param(block, ty)
    }

    /// `true` if the current block already ends in a terminator.
    fn current_block_is_terminated(&self) -> bool {
        let Some(block) = self.at else { return false };
        match self.func.layout.last_inst(block) {
            Some(last) => self.func.dfg.inst_data(last).is_terminator(),
            None => false,
        }
    }

    fn insert(&mut self, data: InstructionData) -> Result<Inst, BuilderError> {
        let block = self.at.ok_or(BuilderError::NoInsertionPoint)?;
        if self.current_block_is_terminated() {
            return Err(BuilderError::InsertAfterTerminator);
        }
        let is_term = data.is_terminator();
        let _ = is_term;
        let inst = self.func.dfg.make_inst(data);
        self.func.layout.append_inst(inst, block);
        Ok(inst)
    }

    /// Validates a `BlockCall`'s arity against its destination's declared
    /// parameters before it's allowed into a terminator.
    fn check_block_call(&self, bc: &BlockCall) -> Result<(), BuilderError> {
        let expected = self.func.dfg.num_block_params(bc.block);
        if bc.args.len() != expected {
            return Err(BuilderError::BlockCallArityMismatch {
                block: bc.block,
                expected,
                found: bc.args.len(),
            });
        }
        Ok(())
    }

    /// Intern `values` into the function's shared operand pool.
    pub fn make_value_list(&mut self, values: &[Value]) -> EntityList<Value> {
        EntityList::from_slice(values, &mut self.func.dfg.value_lists)
    }

    // --- Instruction constructors -----------------------------------------
    //
    // One entry per InstructionData shape actually exercised by the
    // lowering/transform pipeline and the seed scenarios. Each returns the
    // new `Inst`; callers needing the result value follow with
    // `func.dfg.first_result(inst)`.

    /// `v = iconst.ty imm`
    pub fn ins_iconst(&mut self, ty: Type, imm: i64) -> Result<(Inst, Value), BuilderError> {
        let inst = self.insert(InstructionData::UnaryImm { opcode: Opcode::Iconst, imm, ty })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    /// `v = fconst.ty bits`
    pub fn ins_fconst(&mut self, ty: Type, bits: u64) -> Result<(Inst, Value), BuilderError> {
        let inst = self.insert(InstructionData::UnaryIeeeImm { opcode: Opcode::Fconst, bits, ty })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    /// A generic binary integer/float opcode: `v = op a, b`.
    pub fn ins_binary(&mut self, opcode: Opcode, a: Value, b: Value) -> Result<(Inst, Value), BuilderError> {
        let ty = self.func.dfg.value_type(a);
        let inst = self.insert(InstructionData::Binary { opcode, args: [a, b] })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    /// A generic unary opcode that keeps the operand's type (`ineg`,
    /// `fneg`, `bnot`).
    pub fn ins_unary(&mut self, opcode: Opcode, a: Value) -> Result<(Inst, Value), BuilderError> {
        let ty = self.func.dfg.value_type(a);
        let inst = self.insert(InstructionData::Unary { opcode, arg: a, ty })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    /// A type-changing unary conversion (`sextend`/`uextend`/`ireduce`/
    /// `fpromote`/`fdemote`/`bitcast`), producing `ty`.
    pub fn ins_convert(&mut self, opcode: Opcode, ty: Type, a: Value) -> Result<(Inst, Value), BuilderError> {
        let inst = self.insert(InstructionData::Unary { opcode, arg: a, ty })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    /// `v = icmp cond, a, b` — always produces `I8` (boolean-as-integer).
    pub fn ins_icmp(&mut self, cond: super::condcodes::IntCC, a: Value, b: Value) -> Result<(Inst, Value), BuilderError> {
        let inst = self.insert(InstructionData::IntCompare { opcode: Opcode::Icmp, cond, args: [a, b] })?;
        let v = self.func.dfg.append_result(inst, super::types::I8);
        Ok((inst, v))
    }

    /// `v = fcmp cond, a, b` — produces `I8`.
    pub fn ins_fcmp(&mut self, cond: super::condcodes::FloatCC, a: Value, b: Value) -> Result<(Inst, Value), BuilderError> {
        let inst = self.insert(InstructionData::FloatCompare { opcode: Opcode::Fcmp, cond, args: [a, b] })?;
        let v = self.func.dfg.append_result(inst, super::types::I8);
        Ok((inst, v))
    }

    /// `v = select cond, a, b`
    pub fn ins_select(&mut self, cond: Value, a: Value, b: Value) -> Result<(Inst, Value), BuilderError> {
        let ty = self.func.dfg.value_type(a);
        let inst = self.insert(InstructionData::Ternary { opcode: Opcode::Select, args: [cond, a, b] })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    /// `v = fma a, b, c`
    pub fn ins_fma(&mut self, a: Value, b: Value, c: Value) -> Result<(Inst, Value), BuilderError> {
        let ty = self.func.dfg.value_type(a);
        let inst = self.insert(InstructionData::Ternary { opcode: Opcode::Fma, args: [a, b, c] })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    /// `lo, hi = isplit a` — splits an oversized (`i128`) value into its
    /// low and high `i64` halves. Legalization-only; see
    /// [`crate::legalizer`].
    pub fn ins_isplit(&mut self, a: Value) -> Result<(Inst, Value, Value), BuilderError> {
        let inst = self.insert(InstructionData::Unary { opcode: Opcode::Isplit, arg: a, ty: super::types::I64 })?;
        let lo = self.func.dfg.append_result(inst, super::types::I64);
        let hi = self.func.dfg.append_result(inst, super::types::I64);
        Ok((inst, lo, hi))
    }

    /// `v = iconcat lo, hi` — the inverse of `isplit`, producing `i128`.
    pub fn ins_iconcat(&mut self, lo: Value, hi: Value) -> Result<(Inst, Value), BuilderError> {
        let inst = self.insert(InstructionData::Binary { opcode: Opcode::Iconcat, args: [lo, hi] })?;
        let v = self.func.dfg.append_result(inst, super::types::I128);
        Ok((inst, v))
    }

    /// `v = load.ty addr+offset, flags`
    pub fn ins_load(
        &mut self,
        ty: Type,
        flags: super::memflags::MemFlags,
        addr: Value,
        offset: i32,
    ) -> Result<(Inst, Value), BuilderError> {
        let inst = self.insert(InstructionData::Load { opcode: Opcode::Load, arg: addr, offset, flags, ty })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    /// `store value, addr+offset, flags`
    pub fn ins_store(
        &mut self,
        flags: super::memflags::MemFlags,
        value: Value,
        addr: Value,
        offset: i32,
    ) -> Result<Inst, BuilderError> {
        self.insert(InstructionData::Store { opcode: Opcode::Store, args: [value, addr], offset, flags })
    }

    /// `v = stack_load.ty slot+offset`
    pub fn ins_stack_load(&mut self, ty: Type, slot: super::entities::StackSlot, offset: i32) -> Result<(Inst, Value), BuilderError> {
        let inst = self.insert(InstructionData::StackLoad { opcode: Opcode::StackLoad, slot, offset, ty })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    /// `stack_store value, slot+offset`
    pub fn ins_stack_store(&mut self, value: Value, slot: super::entities::StackSlot, offset: i32) -> Result<Inst, BuilderError> {
        self.insert(InstructionData::StackStore { opcode: Opcode::StackStore, arg: value, slot, offset })
    }

    /// Terminates the current block with an unconditional jump. Validates
    /// the destination's arity (spec.md §4.1 "Errors").
    pub fn ins_jump(&mut self, block: Block, args: &[Value]) -> Result<Inst, BuilderError> {
        let values = self.make_value_list_into_vec(args);
        let bc = BlockCall::new(block, values);
        self.check_block_call(&bc)?;
        self.insert(InstructionData::Jump { opcode: Opcode::Jump, destination: bc })
    }

    /// Terminates the current block with a two-way conditional branch.
    pub fn ins_brif(
        &mut self,
        cond: Value,
        then_block: Block,
        then_args: &[Value],
        else_block: Block,
        else_args: &[Value],
    ) -> Result<Inst, BuilderError> {
        let then_bc = BlockCall::new(then_block, then_args.to_vec());
        let else_bc = BlockCall::new(else_block, else_args.to_vec());
        self.check_block_call(&then_bc)?;
        self.check_block_call(&else_bc)?;
        self.insert(InstructionData::Branch { opcode: Opcode::Brif, cond, blocks: [then_bc, else_bc] })
    }

    /// Terminates the current block with a `return`.
    pub fn ins_return(&mut self, args: &[Value]) -> Result<Inst, BuilderError> {
        let list = self.make_value_list(args);
        self.insert(InstructionData::Return { opcode: Opcode::Return, args: list })
    }

    /// A direct call. Results are appended per the callee's signature
    /// return list (the caller supplies `num_results` since the DFG doesn't
    /// chase `FuncRef -> Signature -> arity` itself here).
    pub fn ins_call(&mut self, func_ref: super::entities::FuncRef, args: &[Value], result_types: &[Type]) -> Result<Inst, BuilderError> {
        let list = self.make_value_list(args);
        let inst = self.insert(InstructionData::Call { opcode: Opcode::Call, func_ref, args: list })?;
        for ty in result_types {
            self.func.dfg.append_result(inst, *ty);
        }
        Ok(inst)
    }

    /// An indirect call through `sig_ref`; `callee` is the address operand,
    /// prepended to `args` in the interned argument list.
    pub fn ins_call_indirect(
        &mut self,
        sig_ref: super::entities::SigRef,
        callee: Value,
        args: &[Value],
        result_types: &[Type],
    ) -> Result<Inst, BuilderError> {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(callee);
        all.extend_from_slice(args);
        let list = self.make_value_list(&all);
        let inst = self.insert(InstructionData::CallIndirect { opcode: Opcode::CallIndirect, sig_ref, args: list })?;
        for ty in result_types {
            self.func.dfg.append_result(inst, *ty);
        }
        Ok(inst)
    }

    /// An unconditional trap.
    pub fn ins_trap(&mut self, code: super::trapcode::TrapCode) -> Result<Inst, BuilderError> {
        self.insert(InstructionData::Nullary { opcode: Opcode::Trap, trap_code: Some(code) })
    }

    /// Traps if `arg` is zero (`trapz`) or nonzero (`trapnz`).
    pub fn ins_cond_trap(&mut self, opcode: Opcode, arg: Value, code: super::trapcode::TrapCode) -> Result<Inst, BuilderError> {
        debug_assert!(matches!(opcode, Opcode::Trapz | Opcode::Trapnz));
        self.insert(InstructionData::UnaryWithTrap { opcode, arg, code })
    }

    /// `v = shuffle a, b, mask`
    pub fn ins_shuffle(&mut self, ty: Type, a: Value, b: Value, mask: super::instructions::ShuffleMask) -> Result<(Inst, Value), BuilderError> {
        let inst = self.insert(InstructionData::Shuffle { opcode: Opcode::Shuffle, args: [a, b], mask: Box::new(mask) })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    /// `v = extractlane a, lane` of lane type `ty`.
    pub fn ins_extractlane(&mut self, ty: Type, a: Value, lane: u8) -> Result<(Inst, Value), BuilderError> {
        let inst = self.insert(InstructionData::ExtractLane { opcode: Opcode::ExtractLane, arg: a, lane })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    /// `v = insertlane a, b, lane`
    pub fn ins_insertlane(&mut self, a: Value, b: Value, lane: u8) -> Result<(Inst, Value), BuilderError> {
        let ty = self.func.dfg.value_type(a);
        let inst = self.insert(InstructionData::InsertLane { opcode: Opcode::InsertLane, args: [a, b], lane })?;
        let v = self.func.dfg.append_result(inst, ty);
        Ok((inst, v))
    }

    fn make_value_list_into_vec(&self, args: &[Value]) -> Vec<Value> {
        args.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::{CallConv, Signature};
    use crate::ir::types::I32;

    #[test]
    fn second_terminator_is_rejected() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        b.ins_return(&[]).unwrap();
        let err = b.ins_return(&[]).unwrap_err();
        assert_eq!(err, BuilderError::InsertAfterTerminator);
    }

    #[test]
    fn jump_arity_mismatch_is_rejected() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        let b1 = b.create_block();
        b.insert_block(b0);
        b.insert_block(b1);
        b.append_block_param(b1, I32);
        b.switch_to_block(b0);
        let err = b.ins_jump(b1, &[]).unwrap_err();
        assert!(matches!(err, BuilderError::BlockCallArityMismatch { expected: 1, found: 0, .. }));
    }

    #[test]
    fn identity_add_builds_expected_shape() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let v0 = b.append_block_param(b0, I32);
        let v1 = b.append_block_param(b0, I32);
        let (_, v2) = b.ins_binary(Opcode::Iadd, v0, v1).unwrap();
        b.ins_return(&[v2]).unwrap();
        assert_eq!(func.dfg.value_type(v2), I32);
    }
}
