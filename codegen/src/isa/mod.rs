//! The target description and compilation entry point (spec.md §6
//! "Compilation entry point" / "Target description"), and the glue that
//! runs one `Function` through every numbered stage of spec.md §2's
//! pipeline for whichever architecture the caller asked for.

pub mod aarch64;
pub mod x64;

use std::fmt;

use crate::ir::{CallConv, Function};
use crate::machinst::{CodeOffset, Relocation};
use crate::result::{CodegenError, CodegenResult};

/// A closed enumeration of the architectures this crate can retarget to
/// (spec.md §1 "minimally AArch64, x86-64; extensible to RISC-V 64").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// ARM's 64-bit instruction set (AAPCS64).
    Aarch64,
    /// Intel/AMD's 64-bit instruction set (SysV or Windows x64 ABI).
    X86_64,
}

impl Architecture {
    /// Pointer width in bytes — implicit from the architecture (spec.md
    /// §6 "pointer width").
    pub fn pointer_bytes(self) -> u8 {
        8
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Aarch64 => write!(f, "aarch64"),
            Architecture::X86_64 => write!(f, "x86_64"),
        }
    }
}

/// Per-ISA feature flags the caller may enable (spec.md §6 "a feature flag
/// set (e.g., LSE, NEON)"). The core never probes the host for these —
/// they're supplied, not detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// AArch64 Large System Extensions: enables single-instruction atomic
    /// read-modify-write in place of load/store-exclusive loops.
    pub lse: bool,
    /// AArch64 NEON / x86-64 SSE2-class vector support (always assumed
    /// present on x86-64; gates whether AArch64 lowers vector ops at all).
    pub neon: bool,
}

/// What the caller tells the core about the machine it's compiling for
/// (spec.md §6 "Target description"): "architecture ..., endianness
/// (implicit from architecture), pointer width, ABI variant, and a
/// feature flag set."
#[derive(Debug, Clone)]
pub struct TargetDescription {
    /// Which ISA to lower and emit for.
    pub architecture: Architecture,
    /// The default calling convention for functions compiled against this
    /// description (individual functions/`CompileOptions` may override).
    pub default_call_conv: CallConv,
    /// Enabled optional ISA features.
    pub features: FeatureFlags,
}

impl TargetDescription {
    /// AArch64, AAPCS64 (`CallConv::SystemV`), no optional features.
    pub fn aarch64() -> Self {
        TargetDescription {
            architecture: Architecture::Aarch64,
            default_call_conv: CallConv::SystemV,
            features: FeatureFlags::default(),
        }
    }

    /// x86-64, the SysV ABI, no optional features.
    pub fn x86_64() -> Self {
        TargetDescription {
            architecture: Architecture::X86_64,
            default_call_conv: CallConv::SystemV,
            features: FeatureFlags::default(),
        }
    }
}

/// Which optional transform passes of spec.md §4.5 a compilation enables
/// beyond the mandatory ones (legalization, unreachable-code elimination,
/// alias resolution, constant-phi removal, DCE always run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    /// Only the mandatory transforms run.
    None,
    /// Also runs GVN (spec.md §4.5's one implemented optional-in-practice
    /// pass; LICM/strength-reduction/peephole/copy-propagation/branch
    /// simplification are out of scope per DESIGN.md's Open Questions).
    Speed,
}

/// How strict the verifier (spec.md §4.2) is before lowering begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyLevel {
    /// Skip verification (the caller has already verified, or trusts its
    /// frontend completely).
    None,
    /// Run the full verifier and fail compilation on the first reported
    /// issue.
    Full,
}

/// Per-compilation options (spec.md §6 "Options include: calling
/// convention override ..., optimization level ..., and a
/// verification-strictness level").
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Overrides `signature.call_conv` for this compilation, if set.
    pub call_conv_override: Option<CallConv>,
    /// Which optional transforms to run.
    pub opt_level: OptLevel,
    /// Verifier strictness.
    pub verify: VerifyLevel,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { call_conv_override: None, opt_level: OptLevel::Speed, verify: VerifyLevel::Full }
    }
}

/// `{ bytes, relocations, frame-size, callee-saved-used }` — the core's
/// entire output for one function (spec.md §4.11 "Output of the core for
/// one function").
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    /// The encoded machine code.
    pub bytes: Vec<u8>,
    /// Unresolved references an object-file writer must patch.
    pub relocations: Vec<Relocation>,
    /// The final, 16-byte-aligned stack frame size.
    pub frame_size: CodeOffset,
    /// Which callee-saved physical registers the prologue/epilogue save
    /// and restore, by target-specific name.
    pub callee_saved_used: Vec<String>,
}

/// One target architecture's implementation of every per-ISA stage of the
/// pipeline (lowering, ABI, encoding) behind a single object-safe
/// interface, so `compile` can dispatch on `TargetDescription::architecture`
/// without the caller needing to name a concrete backend type.
pub trait TargetIsa {
    /// Which architecture this implements.
    fn architecture(&self) -> Architecture;

    /// Runs `func` through lowering, register allocation, frame
    /// finalization, and emission (spec.md §2 stages 8-12), returning the
    /// encoded function or the first typed error a pass reported. `control`
    /// drives the nondeterministic tie-breaks register allocation and the
    /// match compiler (instruction selection) both expose — off by default,
    /// see [`retarget_control::ControlPlane`].
    fn compile_function(
        &self,
        func: &Function,
        options: &CompileOptions,
        control: &mut retarget_control::ControlPlane,
    ) -> CodegenResult<CompiledFunction>;
}

/// Looks up the `TargetIsa` implementation for `target.architecture`.
pub fn lookup(target: &TargetDescription) -> Box<dyn TargetIsa> {
    match target.architecture {
        Architecture::Aarch64 => Box::new(aarch64::Aarch64Backend::new(target.clone())),
        Architecture::X86_64 => Box::new(x64::X64Backend::new(target.clone())),
    }
}

/// The core's single public entry point (spec.md §6 "Compilation entry
/// point"): verifies (per `options.verify`), runs the mandatory and
/// opted-in transforms of spec.md §4.5, then lowers/allocates/finalizes/
/// emits through whichever `TargetIsa` matches `target`.
pub fn compile(func: &Function, target: &TargetDescription, options: &CompileOptions) -> CodegenResult<CompiledFunction> {
    if options.verify == VerifyLevel::Full {
        if let Some(first) = crate::verifier::verify_function(func).into_iter().next() {
            return Err(first);
        }
    }

    let mut func = func.clone();
    if let Some(cc) = options.call_conv_override {
        func.signature.call_conv = cc;
    }

    crate::legalizer::legalize_function(&mut func);
    let cfg = crate::flowgraph::ControlFlowGraph::with_function(&func);
    crate::unreachable_code::eliminate_unreachable_code(&mut func, &cfg);
    crate::alias_resolution::resolve_aliases(&mut func);
    let cfg = crate::flowgraph::ControlFlowGraph::with_function(&func);
    crate::constant_phi::remove_constant_phis(&mut func, &cfg);
    if options.opt_level >= OptLevel::Speed {
        let cfg = crate::flowgraph::ControlFlowGraph::with_function(&func);
        let mut domtree = crate::dominator_tree::DominatorTree::new();
        domtree.compute(&func, &cfg);
        crate::gvn::gvn(&mut func, &domtree);
    }
    crate::dce::eliminate_dead_code(&mut func);

    if options.verify == VerifyLevel::Full {
        if let Some(first) = crate::verifier::verify_function(&func).into_iter().next() {
            return Err(first);
        }
    }

    let isa = lookup(target);
    let mut control = retarget_control::ControlPlane::default();
    isa.compile_function(&func, options, &mut control)
}
