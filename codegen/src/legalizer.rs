//! Legalization (spec.md §4.5): rewrites IR the target can't represent
//! directly into sequences it can. Only one legalization is implemented —
//! oversized integer arithmetic — following the same `isplit`/`iconcat`
//! strategy as splitting an `i128` into a pair of `i64` halves, carrying
//! the carry/borrow across the high half by hand. General unsupported-
//! opcode sequencing and per-lane vector scalarization are out of scope;
//! see DESIGN.md.
//!
//! Builder only appends at the end of a block, so this pass manipulates
//! `Function` directly, inserting the expansion before the instruction
//! being replaced and then removing the original.

use log::trace;

use crate::ir::condcodes::IntCC;
use crate::ir::instructions::InstructionData;
use crate::ir::types::I64;
use crate::ir::{Function, Inst, Opcode, Value};

fn insert_before(func: &mut Function, before: Inst, data: InstructionData) -> Inst {
    let inst = func.dfg.make_inst(data);
    let block = func.layout.inst_block(before).expect("legalizing an instruction not yet in layout");
    func.layout.insert_inst_before(inst, before);
    let _ = block;
    inst
}

fn isplit(func: &mut Function, before: Inst, a: Value) -> (Value, Value) {
    let inst = insert_before(func, before, InstructionData::Unary { opcode: Opcode::Isplit, arg: a, ty: I64 });
    let lo = func.dfg.append_result(inst, I64);
    let hi = func.dfg.append_result(inst, I64);
    (lo, hi)
}

fn binary(func: &mut Function, before: Inst, opcode: Opcode, a: Value, b: Value) -> Value {
    let inst = insert_before(func, before, InstructionData::Binary { opcode, args: [a, b] });
    func.dfg.append_result(inst, I64)
}

fn icmp(func: &mut Function, before: Inst, cond: IntCC, a: Value, b: Value) -> Value {
    let inst = insert_before(func, before, InstructionData::IntCompare { opcode: Opcode::Icmp, cond, args: [a, b] });
    func.dfg.append_result(inst, crate::ir::types::I8)
}

fn uextend(func: &mut Function, before: Inst, a: Value) -> Value {
    let inst = insert_before(func, before, InstructionData::Unary { opcode: Opcode::Uextend, arg: a, ty: I64 });
    func.dfg.append_result(inst, I64)
}

fn iconcat(func: &mut Function, before: Inst, lo: Value, hi: Value) -> Value {
    let inst = insert_before(func, before, InstructionData::Binary { opcode: Opcode::Iconcat, args: [lo, hi] });
    func.dfg.append_result(inst, crate::ir::types::I128)
}

/// Expand every `i128` `iadd`/`isub` into a carry/borrow-propagating pair
/// of `i64` operations. Returns `true` if anything was rewritten.
pub fn legalize_function(func: &mut Function) -> bool {
    let mut changed = false;
    let blocks: Vec<_> = func.layout.blocks().collect();
    for block in blocks {
        let insts: Vec<_> = func.layout.block_insts(block).collect();
        for inst in insts {
            let data = func.dfg.inst_data(inst).clone();
            let InstructionData::Binary { opcode, args: [a, b] } = data else { continue };
            if !matches!(opcode, Opcode::Iadd | Opcode::Isub) {
                continue;
            }
            if func.dfg.value_type(a) != crate::ir::types::I128 {
                continue;
            }

            trace!("legalizer: expanding {} {inst} (i128) at {block}", opcode);
            let (lo_a, hi_a) = isplit(func, inst, a);
            let (lo_b, hi_b) = isplit(func, inst, b);

            let (lo, hi) = match opcode {
                Opcode::Iadd => {
                    let lo = binary(func, inst, Opcode::Iadd, lo_a, lo_b);
                    // unsigned overflow iff the sum wrapped below either operand
                    let carry = icmp(func, inst, IntCC::UnsignedLessThan, lo, lo_a);
                    let carry64 = uextend(func, inst, carry);
                    let hi_partial = binary(func, inst, Opcode::Iadd, hi_a, hi_b);
                    let hi = binary(func, inst, Opcode::Iadd, hi_partial, carry64);
                    (lo, hi)
                }
                Opcode::Isub => {
                    let borrow = icmp(func, inst, IntCC::UnsignedLessThan, lo_a, lo_b);
                    let borrow64 = uextend(func, inst, borrow);
                    let lo = binary(func, inst, Opcode::Isub, lo_a, lo_b);
                    let hi_partial = binary(func, inst, Opcode::Isub, hi_a, hi_b);
                    let hi = binary(func, inst, Opcode::Isub, hi_partial, borrow64);
                    (lo, hi)
                }
                _ => unreachable!(),
            };

            let combined = iconcat(func, inst, lo, hi);
            let old_result = func.dfg.first_result(inst);
            func.dfg.change_to_alias(old_result, combined);
            func.layout.remove_inst(inst);
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::{CallConv, Function, Signature};

    #[test]
    fn i128_add_expands_to_isplit_iconcat_sequence() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let a = b.append_block_param(b0, crate::ir::I128);
        let c = b.append_block_param(b0, crate::ir::I128);
        let (_, sum) = b.ins_binary(Opcode::Iadd, a, c).unwrap();
        b.ins_return(&[sum]).unwrap();

        let changed = legalize_function(&mut func);
        assert!(changed);
        assert!(func.dfg.value_is_alias(sum));

        let mut saw_isplit = false;
        let mut saw_iconcat = false;
        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                match func.dfg.inst_data(inst).opcode() {
                    Opcode::Isplit => saw_isplit = true,
                    Opcode::Iconcat => saw_iconcat = true,
                    Opcode::Iadd | Opcode::Icmp | Opcode::Uextend => {}
                    other => panic!("unexpected opcode after legalization: {other}"),
                }
            }
        }
        assert!(saw_isplit && saw_iconcat);
    }

    #[test]
    fn narrow_arithmetic_is_untouched() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let a = b.append_block_param(b0, crate::ir::I32);
        let c = b.append_block_param(b0, crate::ir::I32);
        let (_, sum) = b.ins_binary(Opcode::Iadd, a, c).unwrap();
        b.ins_return(&[sum]).unwrap();

        assert!(!legalize_function(&mut func));
    }
}
