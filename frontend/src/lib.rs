//! An SSA-construction convenience layer over `retarget_codegen::ir::Builder`
//! (spec.md §4.1's raw API): lets a frontend declare mutable source-language
//! variables and call `def_var`/`use_var` on them as if they were ordinary
//! locals, with block parameters and the `BlockCall` arguments that feed
//! them inserted automatically as blocks are sealed.
//!
//! [`FunctionBuilder`] is the entry point; [`FunctionBuilderContext`] is
//! reusable scratch state a caller keeps across many functions to avoid
//! repeated allocation.

mod frontend;
mod ssa;
mod variable;

pub use frontend::{FunctionBuilder, FunctionBuilderContext};
pub use variable::Variable;
