//! Structural, type, dominance and terminator checks (spec.md §4.2).
//!
//! `verify_function` never mutates the function (spec.md §8 "the verifier
//! never mutates"; "running the verifier twice produces identical
//! results"), and accumulates every violation it finds before returning
//! them, rather than stopping at the first (spec.md §4.2: "reports the
//! first N issues"). `N` here is unbounded — the caller can truncate.

use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Function, Inst, Value, ValueDef};
use crate::result::{CodegenError, EntityRef};

/// Verify every invariant spec.md §3/§4.2/§8 names. Returns every violation
/// found; an empty vector means `func` is well-formed.
pub fn verify_function(func: &Function) -> Vec<CodegenError> {
    let mut errors = Vec::new();

    verify_blocks_and_terminators(func, &mut errors);

    let cfg = ControlFlowGraph::with_function(func);
    verify_block_calls(func, &mut errors);

    let mut domtree = DominatorTree::new();
    domtree.compute(func, &cfg);
    verify_dominance(func, &domtree, &mut errors);

    errors
}

fn verify_blocks_and_terminators(func: &Function, errors: &mut Vec<CodegenError>) {
    for block in func.layout.blocks() {
        let insts: Vec<Inst> = func.layout.block_insts(block).collect();
        if insts.is_empty() {
            errors.push(CodegenError::Verifier {
                message: format!("block {block} has no instructions (needs a terminator)"),
                at: Some(EntityRef::Block(block)),
            });
            continue;
        }
        for (i, &inst) in insts.iter().enumerate() {
            let is_last = i == insts.len() - 1;
            let is_term = func.dfg.inst_data(inst).is_terminator();
            if is_term && !is_last {
                errors.push(CodegenError::Verifier {
                    message: format!("terminator {inst} is not the last instruction in {block}"),
                    at: Some(EntityRef::Inst(inst)),
                });
            }
            if !is_term && is_last {
                errors.push(CodegenError::Verifier {
                    message: format!("block {block} does not end in a terminator"),
                    at: Some(EntityRef::Block(block)),
                });
            }
        }

        // Parameters must resolve to distinct values (spec.md §4.2 "Block:
        // parameters have distinct Values" — always true by construction
        // since each `append_block_param` mints a fresh `Value`, but
        // checked here as a cheap sanity net rather than trusted blindly).
        let params = func.dfg.block_params(block);
        for (i, &p) in params.iter().enumerate() {
            if params[..i].contains(&p) {
                errors.push(CodegenError::Verifier {
                    message: format!("block {block} parameter {p} is duplicated"),
                    at: Some(EntityRef::Value(p)),
                });
            }
        }
    }

    if let Some(entry) = func.layout.entry_block() {
        if !func.dfg.block_params(entry).is_empty() && func.signature.params.len() != func.dfg.num_block_params(entry) {
            errors.push(CodegenError::Verifier {
                message: format!(
                    "entry block {entry} declares {} parameter(s), signature has {}",
                    func.dfg.num_block_params(entry),
                    func.signature.params.len()
                ),
                at: Some(EntityRef::Block(entry)),
            });
        }
    }
}

fn verify_block_calls(func: &Function, errors: &mut Vec<CodegenError>) {
    for block in func.layout.blocks() {
        let Some(term) = func.layout.last_inst(block) else { continue };
        let data = func.dfg.inst_data(term);
        for bc in data.branch_destinations() {
            let expected = func.dfg.num_block_params(bc.block);
            if bc.args.len() != expected {
                errors.push(CodegenError::Verifier {
                    message: format!(
                        "branch to {} supplies {} argument(s), expected {}",
                        bc.block,
                        bc.args.len(),
                        expected
                    ),
                    at: Some(EntityRef::Inst(term)),
                });
                continue;
            }
            let params = func.dfg.block_params(bc.block);
            for (arg, param) in bc.args.iter().zip(params.iter()) {
                let arg_ty = func.dfg.value_type(*arg);
                let param_ty = func.dfg.value_type(*param);
                if arg_ty != param_ty {
                    errors.push(CodegenError::Verifier {
                        message: format!(
                            "branch argument {arg} has type {arg_ty}, {} parameter {param} expects {param_ty}",
                            bc.block
                        ),
                        at: Some(EntityRef::Inst(term)),
                    });
                }
            }
        }
    }
}

fn verify_dominance(func: &Function, domtree: &DominatorTree, errors: &mut Vec<CodegenError>) {
    for block in func.layout.blocks() {
        for inst in func.layout.block_insts(block) {
            for arg in func.dfg.inst_args(inst).into_iter().chain(func.dfg.inst_variable_args(inst).iter().copied()) {
                verify_use_dominated(func, domtree, block, inst, arg, errors);
            }
        }
    }
}

fn verify_use_dominated(
    func: &Function,
    domtree: &DominatorTree,
    use_block: crate::ir::Block,
    use_inst: Inst,
    value: Value,
    errors: &mut Vec<CodegenError>,
) {
    if func.dfg.value_is_alias(value) {
        // Aliases are resolved before lowering ever observes them; the
        // verifier checks the representative, not the now-dead alias chain.
        return verify_use_dominated(func, domtree, use_block, use_inst, func.dfg.resolve_alias_value(value), errors);
    }
    let def_block = match func.dfg.value_def(value) {
        ValueDef::Param(b, _) => b,
        ValueDef::Result(def_inst, _) => match func.layout.inst_block(def_inst) {
            Some(b) => b,
            None => {
                errors.push(CodegenError::Verifier {
                    message: format!("{value} is defined by an instruction not in the layout"),
                    at: Some(EntityRef::Inst(use_inst)),
                });
                return;
            }
        },
    };

    let dominates = if def_block == use_block {
        // Same-block: the def must come strictly before the use in layout
        // order (block-parameter defs always qualify).
        match func.dfg.value_def(value) {
            ValueDef::Param(..) => true,
            ValueDef::Result(def_inst, _) => {
                let mut cur = func.layout.block_insts(use_block);
                cur.find(|&i| i == def_inst).is_some() && !is_after(func, def_inst, use_inst)
            }
        }
    } else {
        domtree.strictly_dominates(def_block, use_block)
    };

    if !dominates {
        errors.push(CodegenError::Verifier {
            message: format!("use of {value} at {use_inst} is not dominated by its definition"),
            at: Some(EntityRef::Value(value)),
        });
    }
}

/// `true` if `a` is laid out after `b` within the same block.
fn is_after(func: &Function, a: Inst, b: Inst) -> bool {
    let mut cur = b;
    while let Some(next) = func.layout.next_inst(cur) {
        if next == a {
            return true;
        }
        cur = next;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::{CallConv, Opcode, Signature};

    #[test]
    fn well_formed_function_verifies_clean() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let v0 = b.append_block_param(b0, crate::ir::I32);
        let v1 = b.append_block_param(b0, crate::ir::I32);
        let (_, v2) = b.ins_binary(Opcode::Iadd, v0, v1).unwrap();
        b.ins_return(&[v2]).unwrap();

        assert!(verify_function(&func).is_empty());
    }

    #[test]
    fn running_twice_is_idempotent() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        b.ins_return(&[]).unwrap();

        let first = verify_function(&func);
        let second = verify_function(&func);
        assert_eq!(first, second);
    }

    #[test]
    fn mismatched_block_call_arity_is_reported() {
        use crate::ir::instructions::InstructionData;
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        func.layout.append_block(b0);
        func.layout.append_block(b1);
        func.dfg.append_block_param(b1, crate::ir::I32);
        let jump = func.dfg.make_inst(InstructionData::Jump {
            opcode: Opcode::Jump,
            destination: crate::ir::BlockCall::new(b1, vec![]),
        });
        func.layout.append_inst(jump, b0);
        let ret = func.dfg.make_inst(InstructionData::Return {
            opcode: Opcode::Return,
            args: Default::default(),
        });
        func.layout.append_inst(ret, b1);

        let errors = verify_function(&func);
        assert!(!errors.is_empty());
    }
}
