//! Instruction selection for x86-64: walks one IR `Function` in layout
//! order and builds a [`VCode<Inst>`] (spec.md §4.6 "Lowering"). Every
//! x86-64 ALU form is two-address, so each binary op first copies its left
//! operand into a fresh destination VReg, then applies the operation in
//! place — mirroring exactly what a real x86-64 assembler would need
//! (`mov`, then `add`/`sub`/...).
//!
//! This backend doesn't route any opcode through `retarget_isle`: the one
//! pattern-combination seed scenario spec.md §8 names (multiply-add
//! fusion) is called out specifically for AArch64, which has a `madd`
//! instruction to fuse into; x86-64 has no equivalent single-instruction
//! fused multiply-add over general-purpose registers, so there is no
//! rewrite for the selector DSL to usefully apply here (see DESIGN.md).

use std::collections::HashMap;

use crate::ir::{Function, InstructionData, Opcode, Type, Value};
use crate::machinst::{MachLabel, Reg, VCodeBuilder};
use crate::result::{CodegenError, CodegenResult};

use super::inst::{AluOp, Cond, Inst};

/// Lowers `func` into a [`crate::machinst::VCode<Inst>`], one VCode block
/// per IR block.
pub fn lower(func: &Function) -> CodegenResult<crate::machinst::VCode<Inst>> {
    let mut b = VCodeBuilder::<Inst>::new();
    let mut values: HashMap<Value, regalloc2::VReg> = HashMap::new();
    let mut labels: HashMap<crate::ir::Block, MachLabel> = HashMap::new();

    let mut order = Vec::new();
    for (i, block) in func.layout.blocks().enumerate() {
        labels.insert(block, MachLabel::new(i));
        order.push(block);
    }

    for block in order {
        let params: Vec<regalloc2::VReg> = func
            .dfg
            .block_params(block)
            .iter()
            .map(|&v| {
                let vreg = b.alloc_vreg_for_type(func.dfg.value_type(v));
                values.insert(v, vreg);
                vreg
            })
            .collect();
        let label = b.start_block(&params);
        debug_assert_eq!(label, labels[&block]);

        for inst in func.layout.block_insts(block) {
            lower_inst(func, inst, &mut b, &mut values, &labels)?;
        }
    }

    let entry = labels[&func.entry_block.ok_or_else(|| CodegenError::Lowering {
        opcode: "<no entry block>".to_string(),
        inst: crate::ir::Inst::from_u32(0),
    })?];
    Ok(b.finish(entry))
}

fn value_vreg(values: &HashMap<Value, regalloc2::VReg>, func: &Function, v: Value) -> regalloc2::VReg {
    let v = func.dfg.resolve_alias_value(v);
    values[&v]
}

fn emit_alu_two_address(
    func: &Function,
    inst: crate::ir::Inst,
    op: AluOp,
    args: [Value; 2],
    ty: Type,
    b: &mut VCodeBuilder<Inst>,
    values: &mut HashMap<Value, regalloc2::VReg>,
) {
    let rd = b.alloc_vreg_for_type(ty);
    b.push(Inst::MovRR { dst: Reg::Virtual(rd), src: Reg::Virtual(value_vreg(values, func, args[0])), ty });
    b.push(Inst::AluRmR { op, dst: Reg::Virtual(rd), src: Reg::Virtual(value_vreg(values, func, args[1])), ty });
    values.insert(func.dfg.first_result(inst), rd);
}

fn lower_inst(
    func: &Function,
    inst: crate::ir::Inst,
    b: &mut VCodeBuilder<Inst>,
    values: &mut HashMap<Value, regalloc2::VReg>,
    labels: &HashMap<crate::ir::Block, MachLabel>,
) -> CodegenResult<()> {
    let data = func.dfg.inst_data(inst);

    macro_rules! vreg {
        ($v:expr) => {
            value_vreg(values, func, $v)
        };
    }

    match data.clone() {
        InstructionData::Binary { opcode: Opcode::Iadd, args } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            emit_alu_two_address(func, inst, AluOp::Add, args, ty, b, values);
        }
        InstructionData::Binary { opcode: Opcode::Isub, args } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            emit_alu_two_address(func, inst, AluOp::Sub, args, ty, b, values);
        }
        InstructionData::Binary { opcode: Opcode::Imul, args } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            emit_alu_two_address(func, inst, AluOp::Imul, args, ty, b, values);
        }
        InstructionData::Binary { opcode: Opcode::Band, args } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            emit_alu_two_address(func, inst, AluOp::And, args, ty, b, values);
        }
        InstructionData::Binary { opcode: Opcode::Bor, args } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            emit_alu_two_address(func, inst, AluOp::Or, args, ty, b, values);
        }
        InstructionData::Binary { opcode: Opcode::Bxor, args } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            emit_alu_two_address(func, inst, AluOp::Xor, args, ty, b, values);
        }
        InstructionData::Binary { opcode: Opcode::Ishl, args } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            emit_alu_two_address(func, inst, AluOp::Shl, args, ty, b, values);
        }
        InstructionData::Binary { opcode: Opcode::Ushr, args } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            emit_alu_two_address(func, inst, AluOp::Shr, args, ty, b, values);
        }
        InstructionData::Binary { opcode: Opcode::Sshr, args } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            emit_alu_two_address(func, inst, AluOp::Sar, args, ty, b, values);
        }
        InstructionData::BinaryImm { opcode: Opcode::IaddImm, arg, imm } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            let rd = b.alloc_vreg_for_type(ty);
            b.push(Inst::MovRR { dst: Reg::Virtual(rd), src: Reg::Virtual(vreg!(arg)), ty });
            b.push(Inst::AluRmImm32 { op: AluOp::Add, dst: Reg::Virtual(rd), imm: imm as i32, ty });
            values.insert(func.dfg.first_result(inst), rd);
        }
        InstructionData::BinaryImm { opcode: Opcode::ImulImm, arg, imm } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            let imm_reg = b.alloc_vreg_for_type(ty);
            b.push(Inst::MovImm { dst: Reg::Virtual(imm_reg), imm: imm as u64, ty });
            let rd = b.alloc_vreg_for_type(ty);
            b.push(Inst::MovRR { dst: Reg::Virtual(rd), src: Reg::Virtual(vreg!(arg)), ty });
            b.push(Inst::AluRmR { op: AluOp::Imul, dst: Reg::Virtual(rd), src: Reg::Virtual(imm_reg), ty });
            values.insert(func.dfg.first_result(inst), rd);
        }
        InstructionData::Unary { opcode: Opcode::Ineg, arg, ty } => {
            let rd = b.alloc_vreg_for_type(ty);
            b.push(Inst::MovRR { dst: Reg::Virtual(rd), src: Reg::Virtual(vreg!(arg)), ty });
            b.push(Inst::Neg { dst: Reg::Virtual(rd), ty });
            values.insert(func.dfg.first_result(inst), rd);
        }
        InstructionData::Unary { opcode: Opcode::Bnot, arg, ty } => {
            let rd = b.alloc_vreg_for_type(ty);
            b.push(Inst::MovRR { dst: Reg::Virtual(rd), src: Reg::Virtual(vreg!(arg)), ty });
            b.push(Inst::Not { dst: Reg::Virtual(rd), ty });
            values.insert(func.dfg.first_result(inst), rd);
        }
        InstructionData::Unary { opcode: Opcode::Sextend | Opcode::Uextend | Opcode::Ireduce | Opcode::Bitcast, arg, ty } => {
            let rd = b.alloc_vreg_for_type(ty);
            values.insert(func.dfg.first_result(inst), rd);
            b.push(Inst::MovRR { dst: Reg::Virtual(rd), src: Reg::Virtual(vreg!(arg)), ty });
        }
        InstructionData::UnaryImm { opcode: Opcode::Iconst, imm, ty } => {
            let rd = b.alloc_vreg_for_type(ty);
            values.insert(func.dfg.first_result(inst), rd);
            b.push(Inst::MovImm { dst: Reg::Virtual(rd), imm: imm as u64, ty });
        }
        InstructionData::IntCompare { cond, args, .. } => {
            let ty = func.dfg.value_type(args[0]);
            b.push(Inst::Cmp { lhs: Reg::Virtual(vreg!(args[0])), rhs: Reg::Virtual(vreg!(args[1])), ty });
            let rd = b.alloc_vreg_for_type(crate::ir::I8);
            let one = b.alloc_vreg_for_type(crate::ir::I8);
            b.push(Inst::MovImm { dst: Reg::Virtual(rd), imm: 0, ty: crate::ir::I8 });
            b.push(Inst::MovImm { dst: Reg::Virtual(one), imm: 1, ty: crate::ir::I8 });
            b.push(Inst::CMov {
                dst: Reg::Virtual(rd),
                src: Reg::Virtual(one),
                cond: Cond::from_intcc(cond),
                ty: crate::ir::I8,
            });
            values.insert(func.dfg.first_result(inst), rd);
        }
        InstructionData::Ternary { opcode: Opcode::Select, args } => {
            let ty = func.dfg.value_type(func.dfg.first_result(inst));
            // `select cond, x, y`: start with the else-value `y`, then
            // conditionally overwrite with `x` when `cond != 0`.
            b.push(Inst::CmpImm32 { lhs: Reg::Virtual(vreg!(args[0])), imm: 0, ty: crate::ir::I8 });
            let rd = b.alloc_vreg_for_type(ty);
            b.push(Inst::MovRR { dst: Reg::Virtual(rd), src: Reg::Virtual(vreg!(args[2])), ty });
            b.push(Inst::CMov { dst: Reg::Virtual(rd), src: Reg::Virtual(vreg!(args[1])), cond: Cond::Ne, ty });
            values.insert(func.dfg.first_result(inst), rd);
        }
        InstructionData::StackLoad { slot, offset, ty, .. } => {
            let rd = b.alloc_vreg_for_type(ty);
            values.insert(func.dfg.first_result(inst), rd);
            b.push(Inst::LoadStack { dst: Reg::Virtual(rd), slot, in_slot_offset: offset, ty });
        }
        InstructionData::StackStore { arg, slot, offset, .. } => {
            b.push(Inst::StoreStack { src: Reg::Virtual(vreg!(arg)), slot, in_slot_offset: offset, ty: func.dfg.value_type(arg) });
        }
        InstructionData::Load { arg, offset, ty, .. } => {
            let rd = b.alloc_vreg_for_type(ty);
            values.insert(func.dfg.first_result(inst), rd);
            b.push(Inst::Load { dst: Reg::Virtual(rd), base: Reg::Virtual(vreg!(arg)), offset, ty });
        }
        InstructionData::Store { args, offset, .. } => {
            let ty = func.dfg.value_type(args[0]);
            b.push(Inst::Store { src: Reg::Virtual(vreg!(args[0])), base: Reg::Virtual(vreg!(args[1])), offset, ty });
        }
        InstructionData::Jump { destination, .. } => {
            let target_args: Vec<regalloc2::VReg> = destination.args.iter().map(|&v| vreg!(v)).collect();
            let target = labels[&destination.block];
            b.push(Inst::Jump { target });
            b.set_succs(&[target], &[&target_args]);
        }
        InstructionData::Branch { cond, blocks, .. } => {
            b.push(Inst::CmpImm32 { lhs: Reg::Virtual(vreg!(cond)), imm: 0, ty: crate::ir::I8 });
            let taken = labels[&blocks[0].block];
            let not_taken = labels[&blocks[1].block];
            let taken_args: Vec<regalloc2::VReg> = blocks[0].args.iter().map(|&v| vreg!(v)).collect();
            let not_taken_args: Vec<regalloc2::VReg> = blocks[1].args.iter().map(|&v| vreg!(v)).collect();
            b.push(Inst::CondBr { cond: Cond::Ne, taken, not_taken });
            b.set_succs(&[taken, not_taken], &[&taken_args, &not_taken_args]);
        }
        InstructionData::Return { .. } => {
            let rets = func
                .dfg
                .inst_variable_args(inst)
                .iter()
                .enumerate()
                .map(|(i, &arg)| {
                    let preg = super::inst::greg(super::abi::INT_RETURN_REGS[i]);
                    (Reg::Virtual(vreg!(arg)), preg)
                })
                .collect();
            b.push(Inst::Ret { rets });
            b.set_succs(&[], &[]);
        }
        InstructionData::Nullary { opcode: Opcode::Nop, .. } => b.push(Inst::Nop),
        other => {
            return Err(CodegenError::Lowering { opcode: other.opcode().to_string(), inst });
        }
    }
    Ok(())
}
