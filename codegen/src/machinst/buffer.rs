//! Binary emission: the two-pass buffer described in spec.md §4.11.
//!
//! Pass 1 (sizing): as the emitter walks the finalized instruction stream
//! it records, per label, the byte offset it resolved to. Pass 2
//! (encoding): a second walk calls each instruction's encoder, patching
//! intra-function branch immediates from the offsets pass 1 recorded and
//! recording a [`Relocation`] (rather than patching bytes) for every
//! reference to something outside the function.

use std::collections::HashMap;

use super::vcode::MachLabel;

/// Offset in bytes from the start of the function's code, spec.md §4.11.
pub type CodeOffset = u32;

/// Which kind of fixup a later stage (linker) must apply to patch the
/// emitted bytes at `offset` (spec.md §4.11 "Relocation kinds are
/// target-specific ... correspond 1:1 to the kinds the object-file writers
/// understand").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocKind {
    /// A plain 64-bit absolute address.
    Abs8,
    /// A 32-bit value PC-relative to the relocation site (x86-64 `call
    /// rel32`/RIP-relative loads).
    X86PcRel4,
    /// A 32-bit value PC-relative to the PLT-relative relocation site,
    /// used for calls the linker may redirect through a PLT stub.
    X86CallPlt4,
    /// AArch64 `ADRP`'s page-relative high bits.
    Aarch64AdrpHi21,
    /// AArch64 `ADD`/`LDR` immediate's low 12 bits of a page-local address.
    Aarch64AddAbsLo12,
    /// AArch64 `BL`'s 26-bit PC-relative call offset.
    Aarch64Call26,
}

/// Addend to add to the symbol value before patching (spec.md §4.11).
pub type Addend = i64;

/// An unresolved reference to something outside the function: the object
/// file writer (out of this crate's scope, spec.md §1) is responsible for
/// actually patching the bytes once it knows the symbol's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Byte offset within the function's code this relocation patches.
    pub offset: CodeOffset,
    /// What shape of patch is needed.
    pub kind: RelocKind,
    /// The opaque external symbol name being referenced (spec.md §6
    /// "symbol names are opaque strings").
    pub symbol: String,
    /// Constant to add to the symbol's resolved address.
    pub addend: Addend,
}

/// A pending fixup of an intra-function branch's immediate, recorded
/// during pass 1 and patched during pass 2 once every label's offset is
/// known.
struct LabelUse {
    /// Byte offset of the instruction (or the specific field within it)
    /// that encodes the branch target.
    offset: CodeOffset,
    /// The label this branch targets.
    label: MachLabel,
    /// How many bytes wide the encoded immediate field is (so pass 2 knows
    /// how to mask/shift the relative offset into it); interpretation is
    /// target-specific and left to the `patch` closure supplied at
    /// `MachBuffer::new` time... in practice each ISA's own emitter calls
    /// `MachBuffer::patch_branch` directly rather than going through a
    /// generic closure, keeping the patch logic with the encoding it
    /// belongs to.
    #[allow(dead_code)]
    width: u8,
}

/// Accumulates a function's machine code across the two emission passes.
pub struct MachBuffer {
    data: Vec<u8>,
    label_offsets: HashMap<MachLabel, CodeOffset>,
    label_uses: Vec<LabelUse>,
    relocations: Vec<Relocation>,
}

impl MachBuffer {
    /// Starts an empty buffer.
    pub fn new() -> Self {
        MachBuffer {
            data: Vec::new(),
            label_offsets: HashMap::new(),
            label_uses: Vec::new(),
            relocations: Vec::new(),
        }
    }

    /// The current write position — the offset the next `put*` call will
    /// land at.
    pub fn cur_offset(&self) -> CodeOffset {
        self.data.len() as CodeOffset
    }

    /// Binds `label` to the current offset. Must be called exactly once
    /// per label, before pass 2 resolves any use of it.
    pub fn bind_label(&mut self, label: MachLabel) {
        self.label_offsets.insert(label, self.cur_offset());
    }

    /// The offset `label` was bound to, if known yet.
    pub fn resolved_offset(&self, label: MachLabel) -> Option<CodeOffset> {
        self.label_offsets.get(&label).copied()
    }

    /// Appends raw bytes (an already-encoded instruction with no label
    /// dependency).
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Appends a little-endian `u32` (the common fixed-width instruction
    /// size on AArch64; x64 uses `put_bytes` for its variable-length
    /// encodings).
    pub fn put4(&mut self, word: u32) {
        self.data.extend_from_slice(&word.to_le_bytes());
    }

    /// Records that the 4 bytes just written at `offset` encode a branch
    /// to `label`, to be patched once `label`'s offset is known (spec.md
    /// §4.11 pass 1 "sizing and label resolution"). `width` documents how
    /// many bytes the immediate occupies, for the ISA's own patch routine.
    pub fn use_label_at_offset(&mut self, offset: CodeOffset, label: MachLabel, width: u8) {
        self.label_uses.push(LabelUse { offset, label, width });
    }

    /// Reads back the raw 4-byte little-endian word at `offset`, for an
    /// ISA's patch routine to decode-modify-reencode.
    pub fn read4(&self, offset: CodeOffset) -> u32 {
        let o = offset as usize;
        u32::from_le_bytes(self.data[o..o + 4].try_into().unwrap())
    }

    /// Overwrites the 4-byte little-endian word at `offset`.
    pub fn write4(&mut self, offset: CodeOffset, word: u32) {
        let o = offset as usize;
        self.data[o..o + 4].copy_from_slice(&word.to_le_bytes());
    }

    /// Records a relocation at the current offset (spec.md §4.11 pass 2:
    /// "record a `Relocation` ... without patching the bytes").
    pub fn add_relocation(&mut self, kind: RelocKind, symbol: impl Into<String>, addend: Addend) {
        self.relocations.push(Relocation { offset: self.cur_offset(), kind, symbol: symbol.into(), addend });
    }

    /// Every pending intra-function label use recorded so far, so an
    /// ISA-specific `finish` routine can patch each one by calling back
    /// into its own branch encoder once all labels are bound.
    pub fn label_uses(&self) -> impl Iterator<Item = (CodeOffset, MachLabel)> + '_ {
        self.label_uses.iter().map(|u| (u.offset, u.label))
    }

    /// Consumes the buffer, returning the final byte sequence and the
    /// relocation list (spec.md §4.11 "Output of the core for one
    /// function").
    pub fn finish(self) -> (Vec<u8>, Vec<Relocation>) {
        (self.data, self.relocations)
    }
}

impl Default for MachBuffer {
    fn default() -> Self {
        Self::new()
    }
}
