//! The x86-64 `TargetIsa`: the SysV-ABI mirror of `isa::aarch64`, wiring
//! this ISA's lowering, ABI, register allocation adapter, frame
//! finalization, and emission together behind [`crate::isa::TargetIsa`].

pub mod abi;
pub mod emit;
pub mod inst;
pub mod lower;

use regalloc2::MachineEnv;

use crate::ir::{Function, StackSlotKind};
use crate::isa::{Architecture, CompileOptions, CompiledFunction, TargetDescription, TargetIsa};
use crate::machinst::{compute_frame_layout, FrameLayout, Reg};
use crate::regalloc;
use crate::result::CodegenResult;

use self::inst::{greg, xmm, Inst, RBP_ENC, RSP_ENC};

/// The x86-64 backend. Stateless beyond the target description it was
/// built from (spec.md §5).
pub struct X64Backend {
    target: TargetDescription,
}

impl X64Backend {
    /// Builds a backend for `target` (expected to name [`Architecture::X86_64`]).
    pub fn new(target: TargetDescription) -> Self {
        X64Backend { target }
    }

    fn machine_env(&self) -> MachineEnv {
        let allocatable_int: Vec<u8> = (0..16).filter(|&r| r != RSP_ENC && r != RBP_ENC).collect();
        let preferred_int: Vec<_> = abi::CALLER_SAVED_INT.iter().map(|&r| greg(r)).collect();
        let non_preferred_int: Vec<_> = allocatable_int
            .iter()
            .filter(|r| !abi::CALLER_SAVED_INT.contains(r))
            .map(|&r| greg(r))
            .collect();
        let preferred_float: Vec<_> = (0..16).map(xmm).collect();
        MachineEnv {
            preferred_regs_by_class: [preferred_int, preferred_float, vec![]],
            non_preferred_regs_by_class: [non_preferred_int, vec![], vec![]],
            fixed_stack_slots: vec![],
            scratch_by_class: [None, None, None],
        }
    }
}

impl TargetIsa for X64Backend {
    fn architecture(&self) -> Architecture {
        Architecture::X86_64
    }

    fn compile_function(
        &self,
        func: &Function,
        _options: &CompileOptions,
        control: &mut retarget_control::ControlPlane,
    ) -> CodegenResult<CompiledFunction> {
        let mut vcode = lower::lower(func)?;

        let call_conv_info = abi::system_v();
        let env = self.machine_env();
        let regalloc::RegallocResult { num_spill_slots, callee_saved_used } =
            regalloc::allocate(&mut vcode, &env, &call_conv_info.callee_saved, control)?;

        let explicit_slots: Vec<(crate::ir::StackSlot, u32, u8)> = func
            .stack_slots
            .iter()
            .filter(|(_, data)| data.kind == StackSlotKind::ExplicitSlot)
            .map(|(slot, data)| (slot, data.size, data.align))
            .collect();

        let frame_layout = compute_frame_layout(
            &callee_saved_used,
            abi::CALLEE_SAVED_REG_BYTES,
            &explicit_slots,
            num_spill_slots,
            /* spill_slot_bytes = */ 8,
            /* outgoing_args_bytes = */ 0,
        );

        let slot_offsets: std::collections::HashMap<crate::ir::StackSlot, i32> = explicit_slots
            .iter()
            .zip(frame_layout.explicit_slot_offsets.iter())
            .map(|((slot, ..), off)| (*slot, off.offset))
            .collect();

        let mut insts: Vec<Inst> = vcode.insts().to_vec();
        finalize_stack_refs(&mut insts, &slot_offsets, &frame_layout.spill_slot_offsets);
        splice_prologue_epilogue(&mut insts, &frame_layout);

        let bytes = emit::emit(&insts)?;

        Ok(CompiledFunction {
            bytes,
            relocations: Vec::new(),
            frame_size: frame_layout.frame_size,
            callee_saved_used: frame_layout.callee_saved_used.iter().map(|p| format!("r{}", p.hw_enc())).collect(),
        })
    }
}

/// Rewrites every [`Inst::LoadStack`]/[`Inst::StoreStack`] (explicit
/// `StackSlot`s) and every [`Inst::LoadSpill`]/[`Inst::StoreSpill`]
/// (register-allocator spill slots) to a concrete `rbp`-relative
/// [`Inst::Load`]/[`Inst::Store`] (spec.md §4.10).
fn finalize_stack_refs(
    insts: &mut [Inst],
    slot_offsets: &std::collections::HashMap<crate::ir::StackSlot, i32>,
    spill_slot_offsets: &[crate::machinst::FrameOffset],
) {
    for inst in insts.iter_mut() {
        match *inst {
            Inst::LoadStack { dst, slot, in_slot_offset, ty } => {
                let base_offset = slot_offsets.get(&slot).copied().unwrap_or(0);
                *inst = Inst::Load { dst, base: Reg::Real(greg(RBP_ENC)), offset: base_offset + in_slot_offset, ty };
            }
            Inst::StoreStack { src, slot, in_slot_offset, ty } => {
                let base_offset = slot_offsets.get(&slot).copied().unwrap_or(0);
                *inst = Inst::Store { src, base: Reg::Real(greg(RBP_ENC)), offset: base_offset + in_slot_offset, ty };
            }
            Inst::LoadSpill { dst, slot, ty } => {
                let offset = spill_slot_offsets[slot as usize].offset;
                *inst = Inst::Load { dst, base: Reg::Real(greg(RBP_ENC)), offset, ty };
            }
            Inst::StoreSpill { src, slot, ty } => {
                let offset = spill_slot_offsets[slot as usize].offset;
                *inst = Inst::Store { src, base: Reg::Real(greg(RBP_ENC)), offset, ty };
            }
            _ => {}
        }
    }
}

/// Prepends the prologue to the function's entry and the epilogue to
/// every `ret` (spec.md §4.10).
fn splice_prologue_epilogue(insts: &mut Vec<Inst>, layout: &FrameLayout) {
    let prologue = abi::gen_prologue(layout);
    let mut out = Vec::with_capacity(insts.len() + prologue.len() * 2);
    out.extend(prologue);
    for inst in insts.drain(..) {
        if matches!(inst, Inst::Ret { .. }) {
            out.extend(abi::gen_epilogue(layout));
        } else {
            out.push(inst);
        }
    }
    *insts = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{types::I32, CallConv, Function, InstructionData, Opcode, Signature};
    use crate::isa::{CompileOptions, TargetIsa};
    use retarget_entity::EntityList;

    fn identity_add_function() -> Function {
        let mut func = Function::with_name_signature("identity_add", Signature::new(CallConv::SystemV));
        let b0 = func.dfg.make_block();
        func.layout.append_block(b0);
        func.entry_block = Some(b0);
        let v0 = func.dfg.append_block_param(b0, I32);
        let v1 = func.dfg.append_block_param(b0, I32);
        let add = func.dfg.make_inst(InstructionData::Binary { opcode: Opcode::Iadd, args: [v0, v1] });
        func.layout.append_inst(add, b0);
        func.dfg.append_result(add, I32);
        let v2 = func.dfg.first_result(add);
        let ret = func.dfg.make_inst(InstructionData::Return {
            opcode: Opcode::Return,
            args: EntityList::from_slice(&[v2], &mut func.dfg.value_lists),
        });
        func.layout.append_inst(ret, b0);
        func
    }

    #[test]
    fn identity_add_compiles_to_nonempty_code() {
        let func = identity_add_function();
        let backend = X64Backend::new(TargetDescription::x86_64());
        let mut control = retarget_control::ControlPlane::default();
        let compiled = backend
            .compile_function(&func, &CompileOptions::default(), &mut control)
            .expect("compiles");
        assert!(!compiled.bytes.is_empty());
    }
}
