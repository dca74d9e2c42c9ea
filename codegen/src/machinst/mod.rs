//! The architecture-blind half of the backend: virtual-code
//! representation (spec.md §4.8), the shared ABI/frame-layout algorithm
//! (spec.md §4.10), and the two-pass emission buffer (spec.md §4.11).
//! Each target (`isa::aarch64`, `isa::x64`) supplies the ISA-specific
//! pieces — its `Inst` enum, its lowering rules, its encoder — and plugs
//! them into the generic scaffolding here.

pub mod abi;
pub mod buffer;
pub mod reg;
pub mod vcode;

pub use abi::{compute_frame_layout, CallConvInfo, FrameLayout, FrameOffset, STACK_ALIGN_BYTES};
pub use buffer::{Addend, CodeOffset, MachBuffer, RelocKind, Relocation};
pub use reg::{regclass_for_type, Reg, VRegAllocator};
pub use vcode::{MachInst, MachLabel, RegallocAdapter, VCode, VCodeBuilder};
