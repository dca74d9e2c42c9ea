//! The data-flow graph: definitions and use sites for every `Value`, and
//! the storage for every `Inst`'s operands. Execution order is *not*
//! represented here — that's [`super::layout::Layout`]'s job — so the same
//! `DataFlowGraph` can be walked by both order-sensitive and
//! order-insensitive analyses without either stepping on the other.

use retarget_entity::{EntityList, ListPool, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

use super::entities::{Block, Constant, FuncRef, GlobalValue, Inst, SigRef, Value};
use super::function::Signature;
use super::instructions::{InstructionData, Opcode};
use super::types::Type;

/// Where a `Value` is defined (spec.md §3 "Value definition").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    /// Result number `num` of `inst`.
    Result(Inst, usize),
    /// Parameter number `num` of `block`.
    Param(Block, usize),
}

impl ValueDef {
    /// The block this value is defined in; for a result, the block the
    /// defining instruction is laid out in (the caller must supply that,
    /// since `DataFlowGraph` alone doesn't know layout).
    pub fn unwrap_inst(self) -> Option<Inst> {
        match self {
            ValueDef::Result(inst, _) => Some(inst),
            ValueDef::Param(..) => None,
        }
    }
}

#[derive(Clone)]
enum ValueData {
    /// Result `num` of `inst`, of type `ty`.
    Inst { ty: Type, inst: Inst, num: u16 },
    /// Parameter `num` of `block`, of type `ty`.
    Param { ty: Type, block: Block, num: u16 },
    /// An alias introduced by a transform (GVN, constant-phi removal): this
    /// value has been proven equal to `original`. Resolved away before
    /// lowering (spec.md §3 "Value definition").
    Alias { ty: Type, original: Value },
}

#[derive(Clone, Default)]
struct BlockData {
    params: EntityList<Value>,
}

/// External callable metadata bound to a `FuncRef`.
#[derive(Debug, Clone)]
pub struct ExtFuncData {
    /// The opaque symbol name the object-file sink will resolve.
    pub name: String,
    /// The callee's signature.
    pub signature: SigRef,
    /// `true` if this is a reference to a function defined in the same
    /// compilation (so the caller may choose a direct, relocation-free
    /// encoding where the target supports one); `false` for a genuinely
    /// external symbol.
    pub colocated: bool,
}

/// Metadata for a `GlobalValue`: an external symbol plus a constant byte
/// offset from it.
#[derive(Debug, Clone)]
pub struct GlobalValueData {
    /// The opaque symbol name.
    pub name: String,
    /// Byte offset added to the symbol's address.
    pub offset: i64,
}

/// An interned vector constant's raw little-endian bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantData(pub Vec<u8>);

/// A handle into [`DataFlowGraph`] tracking every inserted instruction's
/// result values, sized for the 0/1/2-result common case.
type ResultList = SmallVec<[Value; 1]>;

/// Definitions, uses, and per-entity metadata for one function. See the
/// module doc for the DFG/Layout split.
#[derive(Clone, Default)]
pub struct DataFlowGraph {
    values: PrimaryMap<Value, ValueData>,
    insts: PrimaryMap<Inst, InstructionData>,
    results: SecondaryMap<Inst, ResultListHandle>,
    blocks: PrimaryMap<Block, BlockData>,
    /// Shared arena backing every `EntityList<Value>` in the function: call
    /// arguments, block parameters, block-call arguments, and results.
    pub value_lists: ListPool<Value>,
    pub(crate) signatures: PrimaryMap<SigRef, Signature>,
    pub(crate) ext_funcs: PrimaryMap<FuncRef, ExtFuncData>,
    pub(crate) global_values: PrimaryMap<GlobalValue, GlobalValueData>,
    pub(crate) constants: PrimaryMap<Constant, ConstantData>,
}

#[derive(Clone, Default)]
struct ResultListHandle(ResultList);

impl DataFlowGraph {
    /// Create an empty DFG.
    pub fn new() -> Self {
        Self::default()
    }

    // --- Blocks --------------------------------------------------------

    /// Create a new, parameterless block.
    pub fn make_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    /// Number of blocks created so far (including ones later removed from
    /// layout — the DFG never reclaims entity numbers).
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Append a new parameter of type `ty` to `block`, returning the fresh
    /// `Value` that represents it.
    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        let num = self.blocks[block].params.len(&self.value_lists) as u16;
        let value = self.values.push(ValueData::Param { ty, block, num });
        self.blocks[block].params.push(value, &mut self.value_lists);
        value
    }

    /// The typed parameters of `block`, in declaration order.
    pub fn block_params(&self, block: Block) -> &[Value] {
        self.blocks[block].params.as_slice(&self.value_lists)
    }

    /// Replace `block`'s parameter list wholesale, renumbering each
    /// survivor's `ValueData::Param::num` to its new position. Used by
    /// constant-phi removal to drop parameters whose incoming arguments
    /// all collapsed to one value.
    pub fn set_block_params(&mut self, block: Block, params: &[Value]) {
        for (i, &v) in params.iter().enumerate() {
            if let ValueData::Param { num, block: b, .. } = &mut self.values[v] {
                debug_assert_eq!(*b, block);
                *num = i as u16;
            }
        }
        self.blocks[block].params = EntityList::from_slice(params, &mut self.value_lists);
    }

    /// Number of parameters `block` declares.
    pub fn num_block_params(&self, block: Block) -> usize {
        self.blocks[block].params.len(&self.value_lists)
    }

    // --- Instructions ----------------------------------------------------

    /// Insert `data` as a fresh instruction with no results yet attached;
    /// callers are expected to follow with [`Self::make_inst_results`] (or,
    /// for terminators, nothing).
    pub fn make_inst(&mut self, data: InstructionData) -> Inst {
        self.insts.push(data)
    }

    /// Borrow the data of `inst`.
    pub fn inst_data(&self, inst: Inst) -> &InstructionData {
        &self.insts[inst]
    }

    /// Mutably borrow the data of `inst`. Transforms use this to rewrite an
    /// instruction in place (e.g. alias resolution substituting operands)
    /// without disturbing its identity or its results.
    pub fn inst_data_mut(&mut self, inst: Inst) -> &mut InstructionData {
        &mut self.insts[inst]
    }

    /// Total number of instructions ever created.
    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// Append a fresh result value of type `ty` to `inst`, returning it.
    pub fn append_result(&mut self, inst: Inst, ty: Type) -> Value {
        let num = self.results[inst].0.len() as u16;
        let value = self.values.push(ValueData::Inst { ty, inst, num });
        self.results[inst].0.push(value);
        value
    }

    /// The result values of `inst`, in declaration order.
    pub fn inst_results(&self, inst: Inst) -> &[Value] {
        &self.results[inst].0
    }

    /// The first (and, for almost every opcode, only) result of `inst`.
    pub fn first_result(&self, inst: Inst) -> Value {
        self.results[inst].0[0]
    }

    /// `true` if `inst` produces no results (a pure terminator, a bare
    /// store, a trap).
    pub fn has_results(&self, inst: Inst) -> bool {
        !self.results[inst].0.is_empty()
    }

    /// The fixed-arity value operands of `inst` (see
    /// [`InstructionData::fixed_args`]).
    pub fn inst_args(&self, inst: Inst) -> SmallVec<[Value; 4]> {
        self.insts[inst].fixed_args()
    }

    /// The variable-arity argument list of a `call`/`call_indirect`/`return`,
    /// resolved against the shared value-list pool.
    pub fn inst_variable_args(&self, inst: Inst) -> &[Value] {
        match &self.insts[inst] {
            InstructionData::Call { args, .. }
            | InstructionData::CallIndirect { args, .. }
            | InstructionData::Return { args, .. } => args.as_slice(&self.value_lists),
            _ => &[],
        }
    }

    // --- Values ----------------------------------------------------------

    /// Where `value` is defined.
    pub fn value_def(&self, value: Value) -> ValueDef {
        match self.values[self.resolve_alias_value(value)] {
            ValueData::Inst { inst, num, .. } => ValueDef::Result(inst, num as usize),
            ValueData::Param { block, num, .. } => ValueDef::Param(block, num as usize),
            ValueData::Alias { .. } => unreachable!("resolve_alias_value strips aliases"),
        }
    }

    /// The type of `value`.
    pub fn value_type(&self, value: Value) -> Type {
        match self.values[value] {
            ValueData::Inst { ty, .. } | ValueData::Param { ty, .. } | ValueData::Alias { ty, .. } => ty,
        }
    }

    /// `true` if `value` is (still) an alias to another value.
    pub fn value_is_alias(&self, value: Value) -> bool {
        matches!(self.values[value], ValueData::Alias { .. })
    }

    /// Makes `value` an alias of `original`, both standing for the same
    /// type. Used by GVN and constant-phi removal (spec.md §3: "Values are
    /// immutable except for alias substitution").
    ///
    /// # Panics
    /// If `value == original` (would create a self-reference, spec.md §3).
    pub fn change_to_alias(&mut self, value: Value, original: Value) {
        assert_ne!(value, original, "a value cannot alias itself");
        let ty = self.value_type(value);
        self.values[value] = ValueData::Alias { ty, original };
    }

    /// Follows an alias chain to its representative. Chains always
    /// terminate (spec.md §3 invariant); `debug_assert`s a bound on chain
    /// length rather than looping forever on a corrupted DFG.
    pub fn resolve_alias_value(&self, mut value: Value) -> Value {
        let mut steps = 0usize;
        while let ValueData::Alias { original, .. } = self.values[value] {
            value = original;
            steps += 1;
            debug_assert!(steps <= self.values.len(), "alias cycle detected");
        }
        value
    }

    /// Total number of values ever created.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Iterate all live value keys (including still-aliased ones).
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.values.keys()
    }

    /// Iterate all instruction keys ever created.
    pub fn all_insts(&self) -> impl Iterator<Item = Inst> + '_ {
        self.insts.keys()
    }

    // --- Signatures / externals -------------------------------------------

    /// Intern a signature, returning a reference usable by `call_indirect`.
    pub fn import_signature(&mut self, sig: Signature) -> SigRef {
        self.signatures.push(sig)
    }

    /// Look up a previously interned signature.
    pub fn signature(&self, sig_ref: SigRef) -> &Signature {
        &self.signatures[sig_ref]
    }

    /// Declare an external function, returning a `FuncRef` usable by `call`.
    pub fn import_function(&mut self, data: ExtFuncData) -> FuncRef {
        self.ext_funcs.push(data)
    }

    /// Look up a previously declared external function.
    pub fn ext_func(&self, func_ref: FuncRef) -> &ExtFuncData {
        &self.ext_funcs[func_ref]
    }

    /// Declare a global value.
    pub fn create_global_value(&mut self, data: GlobalValueData) -> GlobalValue {
        self.global_values.push(data)
    }

    /// Look up a previously declared global value.
    pub fn global_value(&self, gv: GlobalValue) -> &GlobalValueData {
        &self.global_values[gv]
    }

    /// Intern a vector constant's raw bytes, returning a handle reusable by
    /// later identical constants (simple linear dedup; constant pools are
    /// small in practice).
    pub fn make_constant(&mut self, data: ConstantData) -> Constant {
        if let Some((k, _)) = self.constants.iter().find(|(_, v)| **v == data) {
            return k;
        }
        self.constants.push(data)
    }

    /// Look up previously interned constant bytes.
    pub fn constant(&self, constant: Constant) -> &ConstantData {
        &self.constants[constant]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::I32;

    #[test]
    fn block_params_round_trip() {
        let mut dfg = DataFlowGraph::new();
        let b0 = dfg.make_block();
        let v0 = dfg.append_block_param(b0, I32);
        let v1 = dfg.append_block_param(b0, I32);
        assert_eq!(dfg.block_params(b0), &[v0, v1]);
        assert_eq!(dfg.value_type(v0), I32);
    }

    #[test]
    fn alias_resolves_to_representative() {
        let mut dfg = DataFlowGraph::new();
        let b0 = dfg.make_block();
        let v0 = dfg.append_block_param(b0, I32);
        let v1 = dfg.append_block_param(b0, I32);
        dfg.change_to_alias(v1, v0);
        assert_eq!(dfg.resolve_alias_value(v1), v0);
        assert!(dfg.value_is_alias(v1));
        assert!(!dfg.value_is_alias(v0));
    }

    #[test]
    fn inst_results_accumulate_in_order() {
        let mut dfg = DataFlowGraph::new();
        let inst = dfg.make_inst(InstructionData::Nullary {
            opcode: Opcode::Nop,
            trap_code: None,
        });
        let r0 = dfg.append_result(inst, I32);
        assert_eq!(dfg.inst_results(inst), &[r0]);
        assert_eq!(dfg.first_result(inst), r0);
    }
}
