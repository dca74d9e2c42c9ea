//! The entity references used throughout the IR: opaque, `Copy` handles
//! into the dense tables owned by [`super::dfg::DataFlowGraph`] and
//! [`super::layout::Layout`]. No IR data structure holds a pointer or a
//! `Rc` to another; everything is an index, so functions can be freely
//! cloned, sent across threads, and stored in [`retarget_entity`] maps.

use retarget_entity::entity_impl;

/// An SSA value: the result of an instruction, or a block parameter.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// An instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A basic block: an ordered list of instructions ending in exactly one
/// terminator, with zero or more typed block parameters standing in for
/// the phi nodes a non-block-parameter SSA form would need.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// A stack-allocated local: either an explicit local variable / spill slot
/// or, after frame finalization, any frame-relative storage the codegen
/// inserted (spills, callee-save homes).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackSlot(u32);
entity_impl!(StackSlot, "ss");

/// A reference to an external function signature + symbol, usable as the
/// callee operand of a call instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "fn");

/// A reference to a named external datum (a global variable, a TLS slot,
/// or a pointer computed from one via a fixed addressing expression).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalValue(u32);
entity_impl!(GlobalValue, "gv");

/// A reference to a [`super::function::Signature`] interned in a
/// `Function`, used by `call_indirect` (the callee's signature is not known
/// from a `FuncRef` since there is no fixed callee).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SigRef(u32);
entity_impl!(SigRef, "sig");

/// An interned constant blob (used for vector constants wider than fits in
/// an immediate field).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constant(u32);
entity_impl!(Constant, "const");

/// A `Block` together with the actual argument values passed to it along
/// one control-flow edge (a branch target plus its block-call arguments).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlockCall {
    /// The target block.
    pub block: Block,
    /// Values passed as that block's parameters, in order.
    pub args: Vec<Value>,
}

impl BlockCall {
    /// Creates a block call with the given target and arguments.
    pub fn new(block: Block, args: Vec<Value>) -> Self {
        BlockCall { block, args }
    }
}
