//! Constant-phi removal (spec.md §4.5): a block parameter whose incoming
//! `BlockCall` arguments are all the same value (after alias resolution)
//! carries no information — every predecessor already agrees on it — so
//! it's aliased away and dropped, along with its slot in every incoming
//! `BlockCall`.

use log::debug;

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function, Value};

/// Remove every block parameter all of whose incoming arguments agree.
/// Returns `true` if any parameter was removed.
pub fn remove_constant_phis(func: &mut Function, cfg: &ControlFlowGraph) -> bool {
    let mut changed = false;
    let blocks: Vec<Block> = func.layout.blocks().collect();

    for block in blocks {
        if func.layout.entry_block() == Some(block) {
            continue; // entry params are the function's own arguments, never a phi
        }
        let preds: Vec<_> = cfg.pred_edges(block).collect();
        if preds.is_empty() {
            continue;
        }

        let num_params = func.dfg.num_block_params(block);
        let mut keep = vec![true; num_params];
        let mut constant_value = vec![None; num_params];

        for i in 0..num_params {
            let mut agreed: Option<Value> = None;
            let mut all_agree = true;
            for &(_, branch_inst) in &preds {
                let data = func.dfg.inst_data(branch_inst);
                let Some(bc) = data.branch_destinations().into_iter().find(|bc| bc.block == block) else {
                    all_agree = false;
                    break;
                };
                let arg = func.dfg.resolve_alias_value(bc.args[i]);
                match agreed {
                    None => agreed = Some(arg),
                    Some(a) if a == arg => {}
                    Some(_) => {
                        all_agree = false;
                        break;
                    }
                }
            }
            let param = func.dfg.block_params(block)[i];
            if all_agree {
                if let Some(value) = agreed {
                    if value != param {
                        keep[i] = false;
                        constant_value[i] = Some(value);
                    }
                }
            }
        }

        if keep.iter().all(|k| *k) {
            continue;
        }

        // Alias each dropped parameter to its agreed value.
        for i in 0..num_params {
            if let Some(value) = constant_value[i] {
                let param = func.dfg.block_params(block)[i];
                debug!("constant_phi: {param} in {block} collapses to {value}");
                func.dfg.change_to_alias(param, value);
            }
        }

        // Rebuild the surviving parameter list.
        let new_params: Vec<Value> = func
            .dfg
            .block_params(block)
            .iter()
            .enumerate()
            .filter(|(i, _)| keep[*i])
            .map(|(_, v)| *v)
            .collect();
        func.dfg.set_block_params(block, &new_params);

        // Drop the corresponding slot from every incoming `BlockCall`.
        for &(_, branch_inst) in &preds {
            let data = func.dfg.inst_data_mut(branch_inst);
            for bc in data.branch_destinations_mut() {
                if bc.block == block {
                    let new_args: Vec<Value> = bc
                        .args
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| keep[*i])
                        .map(|(_, v)| *v)
                        .collect();
                    bc.args = new_args;
                }
            }
        }

        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::{CallConv, Function, Signature};

    #[test]
    fn phi_with_identical_incoming_args_is_removed() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        let t = b.create_block();
        let e = b.create_block();
        let merge = b.create_block();
        b.insert_block(entry);
        b.insert_block(t);
        b.insert_block(e);
        b.insert_block(merge);

        b.switch_to_block(entry);
        let cond = b.append_block_param(entry, crate::ir::I32);
        let x = b.append_block_param(entry, crate::ir::I32);
        b.ins_brif(cond, t, &[], e, &[]).unwrap();
        b.switch_to_block(t);
        b.ins_jump(merge, &[x]).unwrap();
        b.switch_to_block(e);
        b.ins_jump(merge, &[x]).unwrap();
        b.switch_to_block(merge);
        let p = b.append_block_param(merge, crate::ir::I32);
        b.ins_return(&[p]).unwrap();

        let cfg = crate::flowgraph::ControlFlowGraph::with_function(&func);
        let changed = remove_constant_phis(&mut func, &cfg);
        assert!(changed);
        assert_eq!(func.dfg.num_block_params(merge), 0);
        assert!(func.dfg.value_is_alias(p));
        assert_eq!(func.dfg.resolve_alias_value(p), x);
    }

    #[test]
    fn phi_with_differing_incoming_args_is_kept() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        let t = b.create_block();
        let e = b.create_block();
        let merge = b.create_block();
        b.insert_block(entry);
        b.insert_block(t);
        b.insert_block(e);
        b.insert_block(merge);

        b.switch_to_block(entry);
        let cond = b.append_block_param(entry, crate::ir::I32);
        b.ins_brif(cond, t, &[], e, &[]).unwrap();
        b.switch_to_block(t);
        let (_, one) = b.ins_iconst(crate::ir::I32, 1).unwrap();
        b.ins_jump(merge, &[one]).unwrap();
        b.switch_to_block(e);
        let (_, two) = b.ins_iconst(crate::ir::I32, 2).unwrap();
        b.ins_jump(merge, &[two]).unwrap();
        b.switch_to_block(merge);
        let p = b.append_block_param(merge, crate::ir::I32);
        b.ins_return(&[p]).unwrap();

        let cfg = crate::flowgraph::ControlFlowGraph::with_function(&func);
        assert!(!remove_constant_phis(&mut func, &cfg));
        assert_eq!(func.dfg.num_block_params(merge), 1);
    }
}
