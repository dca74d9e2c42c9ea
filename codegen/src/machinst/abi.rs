//! Calling-convention and stack-frame shapes shared by every target's
//! `isa::*::abi` (spec.md §4.9 "a calling-convention descriptor" and
//! §4.10 "Frame Finalization, Prologue & Epilogue").
//!
//! What lives here is ISA-blind: the *layout algorithm* (stack areas in a
//! fixed order, 16-byte alignment, offsets relative to one frame base).
//! What differs per target — which registers are callee-saved, how a
//! prologue actually pushes them — stays in `isa::aarch64::abi` /
//! `isa::x64::abi`.

use regalloc2::PReg;

use crate::ir::{CallConv, StackSlot};

/// Where a concrete stack reference resolves to once frame finalization
/// has run (spec.md §3 "StackSlots": "before that, references are
/// symbolic").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOffset {
    /// Byte offset from the frame base (conventionally the frame pointer;
    /// some ABIs' leaf functions may instead use the stack pointer — the
    /// target's `abi` module decides which register this is relative to).
    pub offset: i32,
}

/// The four stack areas spec.md §4.10 lays out, in the fixed order they
/// appear in the frame (closest to the frame pointer first).
#[derive(Debug, Clone, Default)]
pub struct FrameLayout {
    /// Total bytes reserved for callee-saved register spill homes.
    pub saved_regs_bytes: u32,
    /// Total bytes reserved for the function's explicit `StackSlot`s.
    pub explicit_slots_bytes: u32,
    /// Total bytes reserved for register-allocator spill slots.
    pub spill_slots_bytes: u32,
    /// Total bytes reserved for this function's own outgoing call
    /// arguments that don't fit in registers.
    pub outgoing_args_bytes: u32,
    /// The concrete, 16-byte-aligned total frame size subtracted from the
    /// stack pointer in the prologue.
    pub frame_size: u32,
    /// Byte offset of each explicit `StackSlot`, relative to the frame
    /// base, in creation order.
    pub explicit_slot_offsets: Vec<FrameOffset>,
    /// Byte offset of each register-allocator spill slot (index is the
    /// spill slot number `regalloc2` assigned), relative to the frame
    /// base.
    pub spill_slot_offsets: Vec<FrameOffset>,
    /// Which physical registers the function actually used and must
    /// therefore save/restore (spec.md §4.9 "callee-saved registers that
    /// the allocator used are recorded for prologue/epilogue").
    pub callee_saved_used: Vec<PReg>,
}

/// Required stack alignment on every ABI this crate targets (spec.md
/// §4.10 "Alignment per ABI (e.g., 16-byte stack on AArch64/x86-64)").
pub const STACK_ALIGN_BYTES: u32 = 16;

fn align_up(n: u32, align: u32) -> u32 {
    (n + align - 1) & !(align - 1)
}

/// Computes a [`FrameLayout`] from the raw, unordered inputs spec.md §4.10
/// names: the callee-saved set actually used, the function's explicit
/// stack slots (size + alignment, in declaration order), the number of
/// spill slots `regalloc2` requested, and how many bytes of outgoing
/// argument area the function's own calls need.
///
/// `callee_saved_reg_bytes` is the per-register home size (8 on AArch64's
/// integer file, 8 or 16 depending on whether a target also saves
/// vector/float callee-saves as a pair — the caller decides).
pub fn compute_frame_layout(
    callee_saved_used: &[PReg],
    callee_saved_reg_bytes: u32,
    explicit_slots: &[(StackSlot, u32, u8)],
    num_spill_slots: usize,
    spill_slot_bytes: u32,
    outgoing_args_bytes: u32,
) -> FrameLayout {
    let saved_regs_bytes = align_up(callee_saved_used.len() as u32 * callee_saved_reg_bytes, 8);

    let mut explicit_slot_offsets = Vec::with_capacity(explicit_slots.len());
    let mut cursor = 0u32;
    for &(_, size, align) in explicit_slots {
        cursor = align_up(cursor, align as u32);
        explicit_slot_offsets.push(cursor);
        cursor += size;
    }
    let explicit_slots_bytes = align_up(cursor, 8);

    let spill_slots_bytes = align_up(num_spill_slots as u32 * spill_slot_bytes, 8);
    let mut spill_slot_offsets = Vec::with_capacity(num_spill_slots);
    let mut spill_cursor = explicit_slots_bytes;
    for _ in 0..num_spill_slots {
        spill_slot_offsets.push(spill_cursor);
        spill_cursor += spill_slot_bytes;
    }

    let outgoing_args_bytes = align_up(outgoing_args_bytes, STACK_ALIGN_BYTES);

    let unaligned = saved_regs_bytes + explicit_slots_bytes + spill_slots_bytes + outgoing_args_bytes;
    let frame_size = align_up(unaligned, STACK_ALIGN_BYTES);

    // Offsets so far were measured from the top of the explicit/spill
    // area; rebase them to the frame base (negative, growing toward lower
    // addresses, with the saved-registers area closest to the base).
    let base = saved_regs_bytes;
    FrameLayout {
        saved_regs_bytes,
        explicit_slots_bytes,
        spill_slots_bytes,
        outgoing_args_bytes,
        frame_size,
        explicit_slot_offsets: explicit_slot_offsets
            .into_iter()
            .map(|o| FrameOffset { offset: -((base + o) as i32) })
            .collect(),
        spill_slot_offsets: spill_slot_offsets
            .into_iter()
            .map(|o| FrameOffset { offset: -((base + o) as i32) })
            .collect(),
        callee_saved_used: callee_saved_used.to_vec(),
    }
}

/// Which physical registers a calling convention uses for integer and
/// float/vector argument/return passing, and which it designates
/// caller-/callee-saved. Each target's `abi` module provides one of these
/// per [`CallConv`] it supports.
#[derive(Debug, Clone)]
pub struct CallConvInfo {
    /// The convention this describes.
    pub call_conv: CallConv,
    /// Integer argument registers, in passing order.
    pub int_params: Vec<PReg>,
    /// Float/vector argument registers, in passing order.
    pub float_params: Vec<PReg>,
    /// Integer return-value registers, in order.
    pub int_returns: Vec<PReg>,
    /// Float/vector return-value registers, in order.
    pub float_returns: Vec<PReg>,
    /// Registers the callee must preserve across the call.
    pub callee_saved: Vec<PReg>,
    /// Registers the caller must assume are clobbered by the call.
    pub caller_saved: Vec<PReg>,
}
