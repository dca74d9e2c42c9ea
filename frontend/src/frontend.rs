//! `FunctionBuilder`: the SSA-construction convenience layer over
//! `retarget_codegen::ir::Builder`. A frontend translating some other
//! language into IR declares its source variables once, then freely
//! calls `def_var`/`use_var` as if they were ordinary mutable locals —
//! block parameters and the `BlockCall` arguments that feed them are
//! inserted automatically (see [`crate::ssa`]).

use retarget_codegen::ir::{
    AbiParam, Block, Builder, FuncRef, GlobalValue, GlobalValueData, Inst, IntCC, MemFlags, Opcode,
    SigRef, Signature, StackSlot, StackSlotData, Type, Value,
};
use retarget_entity::SecondaryMap;

use crate::ssa::SsaBuilder;
use crate::variable::Variable;

/// Reusable scratch state for building a series of functions. Clearing
/// and reusing this across functions (rather than allocating a fresh one
/// each time) avoids repeated allocation, mirroring the teacher's own
/// `FunctionBuilderContext`.
#[derive(Default)]
pub struct FunctionBuilderContext {
    pub(crate) ssa: SsaBuilder,
    pub(crate) var_types: SecondaryMap<Variable, Option<Type>>,
    pub(crate) block_filled: SecondaryMap<Block, bool>,
}

impl FunctionBuilderContext {
    /// A fresh, empty context.
    pub fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        self.ssa.clear();
        self.var_types = SecondaryMap::new();
        self.block_filled = SecondaryMap::new();
    }

    fn is_empty(&self) -> bool {
        self.ssa.is_empty()
    }
}

/// Builds one [`retarget_codegen::ir::Function`] at a time, borrowing both
/// the function being built and the reusable context.
pub struct FunctionBuilder<'a> {
    /// The function under construction. Public so callers can read back
    /// finished IR (e.g. to run the verifier) without a separate accessor.
    pub func: &'a mut retarget_codegen::ir::Function,
    ctx: &'a mut FunctionBuilderContext,
    position: Option<Block>,
}

impl<'a> FunctionBuilder<'a> {
    /// Starts building `func` using `ctx`. `func` should be freshly
    /// created (via [`retarget_codegen::ir::Function::with_name_signature`]);
    /// `ctx` must be empty (freshly created, or [`Self::finalize`]d since
    /// its last use).
    pub fn new(func: &'a mut retarget_codegen::ir::Function, ctx: &'a mut FunctionBuilderContext) -> Self {
        debug_assert!(ctx.is_empty(), "FunctionBuilderContext must be finalized between functions");
        FunctionBuilder { func, ctx, position: None }
    }

    /// Creates a new, not-yet-inserted, unsealed block.
    pub fn create_block(&mut self) -> Block {
        let block = self.func.dfg.make_block();
        self.ctx.ssa.declare_block(block);
        self.ctx.block_filled[block] = false;
        block
    }

    /// Declares that `var` holds values of type `ty`. Must precede any
    /// `def_var`/`use_var` referencing `var`.
    pub fn declare_var(&mut self, var: Variable, ty: Type) {
        self.ctx.var_types[var] = Some(ty);
    }

    /// Records `val` as `var`'s current value in the block being built.
    pub fn def_var(&mut self, var: Variable, val: Value) {
        let block = self.current_block();
        self.ctx.ssa.def_var(block, var, val);
    }

    /// Resolves `var`'s current value in the block being built, inserting
    /// block parameters on its behalf as needed.
    pub fn use_var(&mut self, var: Variable) -> Value {
        let block = self.current_block();
        let ty = self.ctx.var_types[var].expect("use_var on an undeclared Variable");
        self.ctx.ssa.use_var(self.func, block, var, ty)
    }

    /// Selects `block` as the insertion point, appending it to the
    /// function's layout the first time it's switched to (so blocks need
    /// not be laid out in the order they're created, matching the
    /// teacher's `switch_to_block`/`ensure_inserted_ebb` split).
    pub fn switch_to_block(&mut self, block: Block) {
        if !self.func.layout.is_block_inserted(block) {
            self.func.layout.append_block(block);
            if self.func.entry_block.is_none() {
                self.func.entry_block = Some(block);
            }
        }
        self.position = Some(block);
    }

    fn current_block(&self) -> Block {
        self.position.expect("no block selected; call switch_to_block first")
    }

    /// Declares that `pred` (the block currently being built) can reach
    /// `dest` via `branch`. Called automatically by [`Self::ins_jump`] and
    /// [`Self::ins_brif`]; exposed for frontends building terminators some
    /// other way (e.g. a `BranchTable`).
    pub fn declare_block_predecessor(&mut self, dest: Block, pred: Block, branch: Inst) {
        self.ctx.ssa.declare_block_predecessor(dest, pred, branch);
    }

    /// Declares every predecessor of `block` final: any block parameter
    /// created on `block`'s behalf while it was unsealed can now be
    /// resolved against them.
    pub fn seal_block(&mut self, block: Block) {
        self.ctx.ssa.seal_block(self.func, block);
    }

    /// Seals every block created so far. The common case for a frontend
    /// that builds all of a function's control flow before finishing.
    pub fn seal_all_blocks(&mut self) {
        let blocks: Vec<Block> = self.func.layout.blocks().collect();
        for block in blocks {
            if !self.ctx.ssa.is_sealed(block) {
                self.seal_block(block);
            }
        }
    }

    /// Appends one block parameter per entry of the function's signature
    /// parameter list, in order. Typically called once on the entry block.
    pub fn append_block_params_for_function_params(&mut self, block: Block) {
        let params: Vec<AbiParam> = self.func.signature.params.clone();
        for p in params {
            self.func.dfg.append_block_param(block, p.value_type);
        }
    }

    /// The parameters of `block`, as appended so far.
    pub fn block_params(&self, block: Block) -> &[Value] {
        self.func.dfg.block_params(block)
    }

    /// Creates a new explicit stack slot.
    pub fn create_stack_slot(&mut self, data: StackSlotData) -> StackSlot {
        self.func.create_stack_slot(data)
    }

    /// Interns a callee signature for an indirect call.
    pub fn import_signature(&mut self, sig: Signature) -> SigRef {
        self.func.dfg.import_signature(sig)
    }

    /// Declares an external function for a direct call.
    pub fn import_function(&mut self, data: retarget_codegen::ir::ExtFuncData) -> FuncRef {
        self.func.dfg.import_function(data)
    }

    /// Declares a global value (e.g. a named external symbol).
    pub fn create_global_value(&mut self, data: GlobalValueData) -> GlobalValue {
        self.func.dfg.create_global_value(data)
    }

    /// Finishes building: seals any block a caller forgot to, then resets
    /// `ctx` so it can build the next function.
    pub fn finalize(mut self) {
        self.seal_all_blocks();
        self.ctx.clear();
    }

    fn builder(&mut self) -> Builder<'_> {
        let block = self.current_block();
        let mut b = Builder::new(self.func);
        b.switch_to_block(block);
        b
    }

    // --- Instruction convenience wrappers --------------------------------
    //
    // Thin pass-throughs to `ir::Builder`'s `ins_*` constructors, adding
    // only what the raw builder can't know about: hooking new jump/branch
    // targets into the SSA builder's predecessor tracking.

    /// `v = iconst.ty imm`
    pub fn ins_iconst(&mut self, ty: Type, imm: i64) -> Value {
        self.builder().ins_iconst(ty, imm).expect("well-formed insertion point").1
    }

    /// `v = op a, b` for a binary integer/float opcode.
    pub fn ins_binary(&mut self, opcode: Opcode, a: Value, b: Value) -> Value {
        self.builder().ins_binary(opcode, a, b).expect("well-formed insertion point").1
    }

    /// `v = icmp cond, a, b`
    pub fn ins_icmp(&mut self, cond: IntCC, a: Value, b: Value) -> Value {
        self.builder().ins_icmp(cond, a, b).expect("well-formed insertion point").1
    }

    /// `v = select cond, a, b`
    pub fn ins_select(&mut self, cond: Value, a: Value, b: Value) -> Value {
        self.builder().ins_select(cond, a, b).expect("well-formed insertion point").1
    }

    /// `v = load.ty addr+offset, flags`
    pub fn ins_load(&mut self, ty: Type, flags: MemFlags, addr: Value, offset: i32) -> Value {
        self.builder().ins_load(ty, flags, addr, offset).expect("well-formed insertion point").1
    }

    /// `store value, addr+offset, flags`
    pub fn ins_store(&mut self, flags: MemFlags, value: Value, addr: Value, offset: i32) {
        self.builder().ins_store(flags, value, addr, offset).expect("well-formed insertion point");
    }

    /// `v = stack_load.ty slot+offset`
    pub fn ins_stack_load(&mut self, ty: Type, slot: StackSlot, offset: i32) -> Value {
        self.builder().ins_stack_load(ty, slot, offset).expect("well-formed insertion point").1
    }

    /// `stack_store value, slot+offset`
    pub fn ins_stack_store(&mut self, value: Value, slot: StackSlot, offset: i32) {
        self.builder().ins_stack_store(value, slot, offset).expect("well-formed insertion point");
    }

    /// Terminates the current block with an unconditional jump, declaring
    /// the edge to the SSA builder so `dest`'s eventual parameters can
    /// thread a value back through this predecessor.
    pub fn ins_jump(&mut self, dest: Block, args: &[Value]) -> Inst {
        let pred = self.current_block();
        let inst = self.builder().ins_jump(dest, args).expect("well-formed jump");
        self.declare_block_predecessor(dest, pred, inst);
        inst
    }

    /// Terminates the current block with a two-way conditional branch,
    /// declaring both edges to the SSA builder.
    pub fn ins_brif(&mut self, cond: Value, then_block: Block, then_args: &[Value], else_block: Block, else_args: &[Value]) -> Inst {
        let pred = self.current_block();
        let inst = self
            .builder()
            .ins_brif(cond, then_block, then_args, else_block, else_args)
            .expect("well-formed branch");
        self.declare_block_predecessor(then_block, pred, inst);
        self.declare_block_predecessor(else_block, pred, inst);
        inst
    }

    /// Terminates the current block with a `return`.
    pub fn ins_return(&mut self, args: &[Value]) -> Inst {
        self.builder().ins_return(args).expect("well-formed return")
    }
}
