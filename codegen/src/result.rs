//! The error taxonomy of spec.md §7: one variant per pass category that can
//! fail a compilation, each naming the offending entity where one is
//! available. Every fallible pass in this crate returns
//! `Result<T, CodegenError>` and, per spec.md §7's propagation policy,
//! either commits its mutation in full or discards it — no pass leaves a
//! `Function` half-mutated on the error path.

use core::fmt;

use thiserror::Error;

use crate::ir::{Block, Inst, Value};

/// Where in a function an error occurred, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    /// An instruction.
    Inst(Inst),
    /// A value.
    Value(Value),
    /// A block.
    Block(Block),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Inst(i) => write!(f, "{i}"),
            EntityRef::Value(v) => write!(f, "{v}"),
            EntityRef::Block(b) => write!(f, "{b}"),
        }
    }
}

/// The failure taxonomy of spec.md §7. Each variant is non-recoverable for
/// the function it names (the caller may still retry other functions).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// The IR violates a structural, type, or dominance invariant.
    #[error("verifier: {message}{}", at_suffix(.at))]
    Verifier {
        /// Human-readable description of the violated invariant.
        message: String,
        /// The offending entity, if identifiable.
        at: Option<EntityRef>,
    },
    /// An IR operation or type has no expression on the target ISA.
    #[error("legalization: {message}{}", at_suffix(.at))]
    Legalization {
        /// What couldn't be legalized.
        message: String,
        /// The offending entity, if identifiable.
        at: Option<EntityRef>,
    },
    /// No selector-DSL rule matched an instruction during lowering.
    #[error("lowering: no rule matched `{opcode}` at {inst}")]
    Lowering {
        /// The opcode that failed to select.
        opcode: String,
        /// The instruction that failed to lower.
        inst: Inst,
    },
    /// The register allocator could not satisfy the program's constraints.
    #[error("register allocation: {message}")]
    RegisterAllocation {
        /// Description of the unsatisfiable constraint or pathological
        /// pressure.
        message: String,
    },
    /// An immediate or offset didn't fit its encoding after fixed-point
    /// branch-range iteration.
    #[error("encoding: {message} at {inst}")]
    Encoding {
        /// Description of the encoding failure.
        message: String,
        /// The instruction that failed to encode.
        inst: Inst,
    },
}

fn at_suffix(at: Option<EntityRef>) -> String {
    match at {
        Some(e) => format!(" (at {e})"),
        None => String::new(),
    }
}

/// Convenience alias used throughout the pass pipeline.
pub type CodegenResult<T> = Result<T, CodegenError>;
