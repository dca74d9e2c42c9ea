//! Alias resolution (spec.md §4.5): walks every operand slot in the
//! function, replacing each `Value` with the representative of its alias
//! chain. `DataFlowGraph::resolve_alias_value` already does the
//! union-find-style "walk to representative" lookup; this pass is what
//! actually rewrites every use so that, afterward, no instruction or
//! branch argument still names an aliased `Value` (spec.md §8: "After
//! alias resolution, no Value is an alias").

use log::trace;

use crate::ir::instructions::InstructionData;
use crate::ir::{Function, Inst, Value};

/// Rewrite every operand in `func` to its alias representative. Returns
/// `true` if any operand was rewritten.
pub fn resolve_aliases(func: &mut Function) -> bool {
    let mut changed = false;
    let insts: Vec<Inst> = func.dfg.all_insts().collect();
    for inst in insts {
        if func.layout.inst_block(inst).is_none() {
            continue; // orphaned, unreachable from any block
        }
        changed |= rewrite_inst(func, inst);
    }
    changed
}

fn rewrite_inst(func: &mut Function, inst: Inst) -> bool {
    let mut changed = false;
    let data = func.dfg.inst_data(inst).clone();
    let mut data = data;
    match &mut data {
        InstructionData::Unary { arg, .. }
        | InstructionData::UnaryWithTrap { arg, .. }
        | InstructionData::Load { arg, .. }
        | InstructionData::StackStore { arg, .. }
        | InstructionData::ExtractLane { arg, .. }
        | InstructionData::BinaryImm { arg, .. } => {
            changed |= resolve_one(func, inst, arg);
        }
        InstructionData::Binary { args, .. }
        | InstructionData::IntCompare { args, .. }
        | InstructionData::FloatCompare { args, .. }
        | InstructionData::Store { args, .. }
        | InstructionData::Shuffle { args, .. }
        | InstructionData::InsertLane { args, .. } => {
            for a in args.iter_mut() {
                changed |= resolve_one(func, inst, a);
            }
        }
        InstructionData::Ternary { args, .. } => {
            for a in args.iter_mut() {
                changed |= resolve_one(func, inst, a);
            }
        }
        InstructionData::Branch { cond, blocks, .. } => {
            changed |= resolve_one(func, inst, cond);
            for bc in blocks.iter_mut() {
                for a in bc.args.iter_mut() {
                    changed |= resolve_one(func, inst, a);
                }
            }
        }
        InstructionData::Jump { destination, .. } => {
            for a in destination.args.iter_mut() {
                changed |= resolve_one(func, inst, a);
            }
        }
        InstructionData::Call { args, .. } | InstructionData::CallIndirect { args, .. } | InstructionData::Return { args, .. } => {
            let resolved: Vec<Value> = args
                .as_slice(&func.dfg.value_lists)
                .iter()
                .map(|v| func.dfg.resolve_alias_value(*v))
                .collect();
            for (slot, new) in args.as_mut_slice(&mut func.dfg.value_lists).iter_mut().zip(resolved.iter()) {
                if *slot != *new {
                    trace!("alias_resolution: {inst} operand {slot} -> {new}");
                    *slot = *new;
                    changed = true;
                }
            }
        }
        InstructionData::Nullary { .. }
        | InstructionData::UnaryImm { .. }
        | InstructionData::UnaryIeeeImm { .. }
        | InstructionData::UnaryConst { .. }
        | InstructionData::UnaryGlobalValue { .. }
        | InstructionData::StackLoad { .. } => {}
    }
    if changed {
        *func.dfg.inst_data_mut(inst) = data;
    }
    changed
}

fn resolve_one(func: &Function, inst: Inst, slot: &mut Value) -> bool {
    let resolved = func.dfg.resolve_alias_value(*slot);
    if resolved != *slot {
        trace!("alias_resolution: {inst} operand {} -> {}", *slot, resolved);
        *slot = resolved;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::{CallConv, Function, Opcode, Signature};

    #[test]
    fn resolves_simple_alias_in_operand() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let v0 = b.append_block_param(b0, crate::ir::I32);
        let (_, v1) = b.ins_unary(Opcode::Ineg, v0).unwrap();
        let (_, v2) = b.ins_unary(Opcode::Ineg, v1).unwrap();
        b.ins_return(&[v2]).unwrap();

        func.dfg.change_to_alias(v1, v0);
        let changed = resolve_aliases(&mut func);
        assert!(changed);

        let def_inst = match func.dfg.value_def(v2) {
            crate::ir::ValueDef::Result(inst, _) => inst,
            _ => unreachable!(),
        };
        assert_eq!(func.dfg.inst_args(def_inst)[0], v0);
    }

    #[test]
    fn second_run_is_idempotent() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let v0 = b.append_block_param(b0, crate::ir::I32);
        let (_, v1) = b.ins_unary(Opcode::Ineg, v0).unwrap();
        b.ins_return(&[v1]).unwrap();

        assert!(!resolve_aliases(&mut func));
        assert!(!resolve_aliases(&mut func));
    }
}
