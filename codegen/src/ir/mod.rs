//! The IR data model (spec.md §3): entities, types, instructions, the
//! data-flow graph, layout, and `Function` that ties them together, plus
//! the raw [`Builder`] primitive API (spec.md §4.1).

pub mod builder;
pub mod condcodes;
pub mod dfg;
pub mod entities;
pub mod function;
pub mod instructions;
pub mod layout;
pub mod memflags;
pub mod trapcode;
pub mod types;

pub use builder::{Builder, BuilderError};
pub use condcodes::{FloatCC, IntCC};
pub use dfg::{DataFlowGraph, ExtFuncData, GlobalValueData, ValueDef};
pub use entities::{Block, BlockCall, Constant, FuncRef, GlobalValue, Inst, SigRef, StackSlot, Value};
pub use function::{AbiParam, ArgumentPurpose, CallConv, Function, Signature, StackSlotData, StackSlotKind};
pub use instructions::{InstructionData, Opcode, ShuffleMask};
pub use layout::Layout;
pub use memflags::{AliasRegion, AtomicOrdering, MemFlags};
pub use trapcode::TrapCode;
pub use types::{Domain, Type, B1, F16, F32, F64, F128, I8, I16, I32, I64, I128};
