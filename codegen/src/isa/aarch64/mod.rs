//! The AArch64 `TargetIsa` (spec.md §2 stages 8-12 for this one
//! architecture): wires this ISA's lowering, ABI, register allocation
//! adapter, frame finalization, and emission together behind the
//! architecture-blind [`crate::isa::TargetIsa`] trait.

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

use self::inst::{xreg, vreg_preg, Inst, FP_REG_NUM};

/// The AArch64 backend. Stateless beyond the target description it was
/// built from — spec.md §5 "no shared mutable state across Functions
/// apart from read-only configuration ... initialized once".
pub struct Aarch64Backend {
    target: TargetDescription,
}

impl Aarch64Backend {
    /// Builds a backend for `target` (expected to name [`Architecture::Aarch64`]).
    pub fn new(target: TargetDescription) -> Self {
        Aarch64Backend { target }
    }

    fn machine_env(&self) -> MachineEnv {
        let preferred_int: Vec<_> = (0..19).map(xreg).collect();
        let non_preferred_int: Vec<_> = abi::CALLEE_SAVED_INT.iter().map(|&r| xreg(r)).collect();
        let preferred_float: Vec<_> = (0..8).map(vreg_preg).collect();
        let non_preferred_float: Vec<_> = (8..32).map(vreg_preg).collect();
        MachineEnv {
            preferred_regs_by_class: [preferred_int, preferred_float, vec![]],
            non_preferred_regs_by_class: [non_preferred_int, non_preferred_float, vec![]],
            fixed_stack_slots: vec![],
            scratch_by_class: [None, None, None],
        }
    }
}

impl TargetIsa for Aarch64Backend {
    fn architecture(&self) -> Architecture {
        Architecture::Aarch64
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
            callee_saved_used: frame_layout.callee_saved_used.iter().map(|p| format!("x{}", p.hw_enc())).collect(),
        })
    }
}

/// Rewrites every [`Inst::LoadStack`]/[`Inst::StoreStack`] (explicit
/// `StackSlot`s) and every [`Inst::LoadSpill`]/[`Inst::StoreSpill`]
/// (register-allocator spill slots) to a concrete frame-pointer-relative
/// [`Inst::Load`]/[`Inst::Store`] (spec.md §4.10 "All stack-relative
/// references in VCode are rewritten to concrete base+offset forms").
/// Both symbolic forms are only resolvable here: explicit slots need the
/// whole function's slot set (§3), and spill slots don't exist until
/// `regalloc2` has already run (§4.9 step 4).
fn finalize_stack_refs(
    insts: &mut [Inst],
    slot_offsets: &std::collections::HashMap<crate::ir::StackSlot, i32>,
    spill_slot_offsets: &[crate::machinst::FrameOffset],
) {
    for inst in insts.iter_mut() {
        match *inst {
            Inst::LoadStack { rd, slot, in_slot_offset, ty } => {
                let base_offset = slot_offsets.get(&slot).copied().unwrap_or(0);
                *inst = Inst::Load { rd, base: Reg::Real(xreg(FP_REG_NUM)), offset: base_offset + in_slot_offset, ty };
            }
            Inst::StoreStack { rt, slot, in_slot_offset, ty } => {
                let base_offset = slot_offsets.get(&slot).copied().unwrap_or(0);
                *inst = Inst::Store { rt, base: Reg::Real(xreg(FP_REG_NUM)), offset: base_offset + in_slot_offset, ty };
            }
            Inst::LoadSpill { rd, slot, ty } => {
                let offset = spill_slot_offsets[slot as usize].offset;
                *inst = Inst::Load { rd, base: Reg::Real(xreg(FP_REG_NUM)), offset, ty };
            }
            Inst::StoreSpill { rt, slot, ty } => {
                let offset = spill_slot_offsets[slot as usize].offset;
                *inst = Inst::Store { rt, base: Reg::Real(xreg(FP_REG_NUM)), offset, ty };
            }
            _ => {}
        }
    }
}

/// Prepends the prologue to the function's entry and the epilogue to every
/// `ret` (spec.md §4.10 "A prologue prepended to the entry block ... An
/// epilogue prepended to each return terminator").
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
        let backend = Aarch64Backend::new(TargetDescription::aarch64());
        let mut control = retarget_control::ControlPlane::default();
        let compiled = backend
            .compile_function(&func, &CompileOptions::default(), &mut control)
            .expect("compiles");
        assert!(!compiled.bytes.is_empty());
        assert_eq!(compiled.bytes.len() % 4, 0, "every AArch64 instruction is 4 bytes");
    }

    /// spec.md §8 seed scenario 6: 40 mutually-live `i64` values, summed,
    /// on a target with far fewer integer registers — the allocator must
    /// spill some of them, and the emitted code must contain matching
    /// stack stores/loads rather than panicking (`gen_move`'s spill-slot
    /// branch below is what this exercises).
    fn many_live_values_sum() -> Function {
        let mut func = Function::with_name_signature("sum40", Signature::new(CallConv::SystemV));
        let mut b = crate::ir::Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let params: Vec<_> = (0..40).map(|_| b.append_block_param(b0, crate::ir::types::I64)).collect();
        let mut acc = params[0];
        for &p in &params[1..] {
            let (_, sum) = b.ins_binary(Opcode::Iadd, acc, p).unwrap();
            acc = sum;
        }
        b.ins_return(&[acc]).unwrap();
        func
    }

    #[test]
    fn forty_live_values_spill_to_the_stack() {
        let func = many_live_values_sum();
        let mut vcode = lower::lower(&func).expect("lowers");
        let call_conv_info = abi::system_v();
        let backend = Aarch64Backend::new(TargetDescription::aarch64());
        let env = backend.machine_env();
        let mut control = retarget_control::ControlPlane::default();
        let result =
            regalloc::allocate(&mut vcode, &env, &call_conv_info.callee_saved, &mut control).expect("allocates");
        assert!(result.num_spill_slots > 0, "40 simultaneously live i64s must exceed the integer register file");
        let stores = vcode.insts().iter().filter(|i| matches!(i, Inst::StoreSpill { .. })).count();
        let loads = vcode.insts().iter().filter(|i| matches!(i, Inst::LoadSpill { .. })).count();
        assert!(stores > 0, "expected at least one spill store");
        assert!(loads > 0, "expected at least one matching spill reload");

        // The full pipeline (through emission) must also succeed: frame
        // finalization has to resolve every LoadSpill/StoreSpill it just
        // produced to a concrete frame-pointer-relative offset.
        let compiled = backend
            .compile_function(&func, &CompileOptions::default(), &mut control)
            .expect("compiles");
        assert!(!compiled.bytes.is_empty());
        assert!(compiled.frame_size > 0, "spill slots must grow the frame");
    }
}
