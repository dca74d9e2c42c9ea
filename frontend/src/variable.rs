//! A frontend-local name for a mutable source-language variable, kept
//! distinct from [`retarget_codegen::ir::Value`] since a variable may be
//! assigned to many times while each `Value` it resolves to stays
//! immutable SSA data.

use retarget_entity::entity_impl;

/// A mutable variable as the calling frontend names it. Opaque and cheap
/// to copy; carries no type of its own (see
/// [`crate::FunctionBuilder::declare_var`]).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(u32);
entity_impl!(Variable, "var");
