//! A retargetable, ahead-of-time code generator: consumes a verified SSA IR
//! and emits position-independent relocatable machine code for multiple
//! target architectures (spec.md §1).
//!
//! The pipeline, leaves first (spec.md §2):
//!
//! 1. [`ir`] — the data model: types, entities, instructions, the data-flow
//!    graph, layout, and `Function`, plus the raw [`ir::Builder`] API.
//! 2. [`verifier`] — structural, type, dominance, and terminator checks.
//! 3. [`flowgraph`], [`dominator_tree`], [`loop_analysis`] — CFG and its
//!    derived analyses.
//! 4. [`legalizer`], [`unreachable_code`], [`alias_resolution`],
//!    [`constant_phi`], [`gvn`], [`dce`] — the mandatory and optional
//!    mutating transforms.
//! 5. `retarget_isle` (re-exported by each `isa::*::lower` module) — the
//!    selector DSL that drives instruction selection.
//! 6. [`machinst`] — the architecture-blind VCode scaffolding: virtual
//!    registers, the ABI/frame-layout algorithm, and the two-pass emission
//!    buffer.
//! 7. [`regalloc`] — the `regalloc2` adapter that turns a VReg program into
//!    a physical-register program.
//! 8. [`isa`] — per-architecture backends (`isa::aarch64`, `isa::x64`) and
//!    the [`isa::compile`] entry point that runs a `Function` through every
//!    stage above.
//!
//! [`result`] is the error taxonomy every fallible pass returns.

#![deny(missing_docs)]
#![allow(clippy::new_without_default)]

pub mod alias_resolution;
pub mod constant_phi;
pub mod dce;
pub mod dominator_tree;
pub mod flowgraph;
pub mod gvn;
pub mod ir;
pub mod isa;
pub mod legalizer;
pub mod loop_analysis;
pub mod machinst;
pub mod regalloc;
pub mod result;
pub mod unreachable_code;
pub mod verifier;

#[cfg(any(test, feature = "interp"))]
pub mod interp;

pub use isa::{compile, CompileOptions, CompiledFunction, OptLevel, TargetDescription, VerifyLevel};
pub use result::{CodegenError, CodegenResult};
