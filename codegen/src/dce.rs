//! Dead-code elimination (spec.md §4.5): marks every instruction with an
//! observable side effect live, propagates liveness backward through
//! operands, then drops everything left unmarked from the layout. Pure
//! instructions whose result is never (transitively) used by a live
//! instruction are removed entirely, not just orphaned.

use log::debug;
use retarget_entity::EntitySet;

use crate::ir::{Function, Inst, ValueDef};

/// Run DCE over `func`. Returns `true` if any instruction was removed.
pub fn eliminate_dead_code(func: &mut Function) -> bool {
    let mut live = EntitySet::<Inst>::new();
    let mut worklist = Vec::new();

    for block in func.layout.blocks() {
        for inst in func.layout.block_insts(block) {
            if func.dfg.inst_data(inst).opcode().has_side_effect() || func.dfg.inst_data(inst).is_terminator() {
                if live.insert(inst) {
                    worklist.push(inst);
                }
            }
        }
    }

    while let Some(inst) = worklist.pop() {
        for arg in func.dfg.inst_args(inst).into_iter().chain(func.dfg.inst_variable_args(inst).iter().copied()) {
            let arg = func.dfg.resolve_alias_value(arg);
            if let ValueDef::Result(def_inst, _) = func.dfg.value_def(arg) {
                if live.insert(def_inst) {
                    worklist.push(def_inst);
                }
            }
        }
    }

    let mut changed = false;
    for block in func.layout.blocks().collect::<Vec<_>>() {
        for inst in func.layout.block_insts(block).collect::<Vec<_>>() {
            if !live.contains(inst) {
                debug!("dce: removing dead {inst}");
                func.layout.remove_inst(inst);
                changed = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::{CallConv, Function, Opcode, Signature};

    #[test]
    fn unused_pure_computation_is_removed() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let v0 = b.append_block_param(b0, crate::ir::I32);
        let (dead_inst, _) = b.ins_unary(Opcode::Ineg, v0).unwrap();
        b.ins_return(&[v0]).unwrap();

        let changed = eliminate_dead_code(&mut func);
        assert!(changed);
        assert!(func.layout.inst_block(dead_inst).is_none());
    }

    #[test]
    fn store_is_kept_even_though_unused() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let addr = b.append_block_param(b0, crate::ir::I64);
        let val = b.append_block_param(b0, crate::ir::I32);
        let store_inst = b.ins_store(crate::ir::MemFlags::new(0), val, addr, 0).unwrap();
        b.ins_return(&[]).unwrap();

        assert!(!eliminate_dead_code(&mut func));
        assert!(func.layout.inst_block(store_inst).is_some());
    }

    #[test]
    fn chain_feeding_a_live_return_is_kept() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let v0 = b.append_block_param(b0, crate::ir::I32);
        let (live_inst, v1) = b.ins_unary(Opcode::Ineg, v0).unwrap();
        b.ins_return(&[v1]).unwrap();

        assert!(!eliminate_dead_code(&mut func));
        assert!(func.layout.inst_block(live_inst).is_some());
    }

    #[test]
    fn second_run_is_idempotent() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let v0 = b.append_block_param(b0, crate::ir::I32);
        b.ins_unary(Opcode::Ineg, v0).unwrap();
        b.ins_return(&[v0]).unwrap();

        assert!(eliminate_dead_code(&mut func));
        assert!(!eliminate_dead_code(&mut func));
    }
}
