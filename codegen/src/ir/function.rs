//! `Function`: the unit of compilation. Owns every table its entities index
//! into (spec.md §3 "Lifecycles": "The Function owns all tables and is the
//! unit of destruction").

use core::fmt;

use retarget_entity::PrimaryMap;

use super::dfg::DataFlowGraph;
use super::entities::StackSlot;
use super::layout::Layout;
use super::types::Type;

/// Which ABI-visible role a parameter or return value plays, beyond its
/// bare type — e.g. a hidden struct-return pointer or varargs marker. Kept
/// deliberately small; frontends needing more ABI expressiveness attach it
/// via `purpose`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentPurpose {
    /// An ordinary value argument/return.
    Normal,
    /// The callee-saved frame/link register snapshot the ABI keeps (rare;
    /// exposed for calling conventions that model it as an explicit value).
    FramePointer,
    /// A hidden pointer to struct-return storage, prepended to the real
    /// argument list by the ABI.
    StructReturn,
}

/// One parameter or return value's type and ABI role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbiParam {
    /// The value's IR type.
    pub value_type: Type,
    /// Its ABI role.
    pub purpose: ArgumentPurpose,
}

impl AbiParam {
    /// A plain, non-special-purpose parameter of `ty`.
    pub fn new(ty: Type) -> Self {
        AbiParam { value_type: ty, purpose: ArgumentPurpose::Normal }
    }
}

/// Which calling convention a `Signature` follows. The core does not
/// encode calling-convention *behavior* here (that lives in
/// `isa::*::abi`); this is just the tag the target description dispatches
/// on (spec.md §6 "Target description").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallConv {
    /// The target platform's standard ABI (SysV on x86-64/AArch64 ELF, the
    /// AAPCS64 procedure call standard on AArch64).
    SystemV,
    /// The Windows x64 ABI.
    WindowsFastcall,
    /// A backend-internal convention used for calls between functions the
    /// compiler controls entirely (e.g. can pass more values in registers
    /// since there's no external ABI to honor).
    Fast,
}

/// `(calling-convention, parameters[], returns[])` — immutable once built
/// (spec.md §3 "Signatures").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// The calling convention this signature follows.
    pub call_conv: CallConv,
    /// Parameter types and ABI roles, in order.
    pub params: Vec<AbiParam>,
    /// Return types and ABI roles, in order.
    pub returns: Vec<AbiParam>,
}

impl Signature {
    /// An empty signature (no parameters, no returns) for `call_conv`.
    pub fn new(call_conv: CallConv) -> Self {
        Signature { call_conv, params: Vec::new(), returns: Vec::new() }
    }
}

/// A stack slot's role, affecting how frame finalization and alias
/// resolution treat it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackSlotKind {
    /// A frontend-requested local (e.g. a variable whose address is taken).
    ExplicitSlot,
    /// A slot the register allocator created to spill a `VReg`.
    SpillSlot,
}

/// One stack-allocated region's static shape. Concrete offsets are not
/// assigned until frame finalization (spec.md §3 "StackSlots";
/// spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackSlotData {
    /// What kind of slot this is.
    pub kind: StackSlotKind,
    /// Size in bytes.
    pub size: u32,
    /// Required alignment in bytes (a power of two).
    pub align: u8,
}

impl StackSlotData {
    /// A new explicit stack slot of `size` bytes, naturally aligned up to 16
    /// bytes (the common worst case on both target ABIs).
    pub fn new(kind: StackSlotKind, size: u32, align: u8) -> Self {
        StackSlotData { kind, size, align }
    }
}

/// A complete function: its signature, IR data, and execution order.
#[derive(Clone)]
pub struct Function {
    /// This function's name, for diagnostics and as the symbol the caller's
    /// object-file sink will bind machine code to.
    pub name: String,
    /// This function's calling-convention contract.
    pub signature: Signature,
    /// Stack-allocated locals, append-only.
    pub stack_slots: PrimaryMap<StackSlot, StackSlotData>,
    /// Definitions, uses, and interned metadata.
    pub dfg: DataFlowGraph,
    /// Execution order.
    pub layout: Layout,
    /// The entry block, once created. Always the first block appended; kept
    /// as an explicit field so callers don't have to assume `layout` order
    /// never changes underneath them.
    pub entry_block: Option<super::entities::Block>,
}

impl Function {
    /// Create an empty function named `name` with the given `signature`.
    pub fn with_name_signature(name: impl Into<String>, signature: Signature) -> Self {
        Function {
            name: name.into(),
            signature,
            stack_slots: PrimaryMap::new(),
            dfg: DataFlowGraph::new(),
            layout: Layout::new(),
            entry_block: None,
        }
    }

    /// Create a new stack slot.
    pub fn create_stack_slot(&mut self, data: StackSlotData) -> StackSlot {
        self.stack_slots.push(data)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {}() {{", self.name)?;
        for block in self.layout.blocks() {
            let params = self.dfg.block_params(block);
            if params.is_empty() {
                writeln!(f, "{block}:")?;
            } else {
                let params = params
                    .iter()
                    .map(|v| format!("{v}: {}", self.dfg.value_type(*v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(f, "{block}({params}):")?;
            }
            for inst in self.layout.block_insts(block) {
                self.write_inst(f, inst)?;
            }
        }
        writeln!(f, "}}")
    }
}

impl Function {
    fn write_inst(&self, f: &mut fmt::Formatter<'_>, inst: super::entities::Inst) -> fmt::Result {
        use super::instructions::InstructionData::*;
        if self.dfg.has_results(inst) {
            let results = self
                .dfg
                .inst_results(inst)
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "    {results} = ")?;
        } else {
            write!(f, "    ")?;
        }
        let data = self.dfg.inst_data(inst);
        match data {
            Jump { destination, .. } => {
                writeln!(f, "jump {}({})", destination.block, fmt_args(&destination.args))
            }
            Branch { cond, blocks, .. } => writeln!(
                f,
                "brif {cond}, {}({}), {}({})",
                blocks[0].block,
                fmt_args(&blocks[0].args),
                blocks[1].block,
                fmt_args(&blocks[1].args)
            ),
            Return { .. } => writeln!(f, "return {}", fmt_args(self.dfg.inst_variable_args(inst))),
            _ => writeln!(f, "{}", data.opcode()),
        }
    }
}

fn fmt_args(args: &[super::entities::Value]) -> String {
    args.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::I32;

    #[test]
    fn empty_function_displays_entry_and_return() {
        let mut func = Function::with_name_signature("f", Signature::new(CallConv::SystemV));
        let b0 = func.dfg.make_block();
        func.layout.append_block(b0);
        func.entry_block = Some(b0);
        let v0 = func.dfg.append_block_param(b0, I32);
        let ret = func.dfg.make_inst(super::super::instructions::InstructionData::Return {
            opcode: super::super::instructions::Opcode::Return,
            args: retarget_entity::EntityList::from_slice(&[v0], &mut func.dfg.value_lists),
        });
        func.layout.append_inst(ret, b0);
        let text = func.to_string();
        assert!(text.contains("function f()"));
        assert!(text.contains("return"));
    }
}
