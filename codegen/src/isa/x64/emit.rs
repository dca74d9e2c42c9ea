//! Binary encoding for x86-64: turns a fully frame-finalized,
//! post-register-allocation `Vec<Inst>` into bytes (spec.md §4.11).
//! Unlike AArch64's fixed 4-byte words, x86-64 instructions vary in
//! length, so sizing and encoding happen together in one pass here — no
//! instruction this backend emits chooses between branch-range variants,
//! so the fixed-point iteration spec.md §4.11 describes for that case
//! never actually needs more than the one pass.

use crate::ir::Type;
use crate::machinst::{MachBuffer, MachLabel, Reg};
use crate::result::{CodegenError, CodegenResult};

use super::inst::{AluOp, Inst, RSP_ENC};

fn enc(r: Reg) -> u8 {
    r.as_real().hw_enc() as u8
}

/// `true` if `ty` needs the `REX.W` 64-bit operand-size override; this
/// backend otherwise defaults to the 32-bit operand size (zero-extending
/// writes, matching SysV convention).
fn rex_w(ty: Type) -> bool {
    ty.bits() > 32
}

/// Appends a REX prefix (`0100WRXB`) iff one is structurally required:
/// 64-bit operand size, or either register operand is `r8`-`r15`.
fn rex(buf: &mut MachBuffer, w: bool, reg_field: u8, rm_field: u8) {
    let r = (reg_field >> 3) & 1;
    let b = (rm_field >> 3) & 1;
    let w_bit = if w { 1 } else { 0 };
    if w || r != 0 || b != 0 {
        buf.put_bytes(&[0x40 | (w_bit << 3) | (r << 2) | b]);
    }
}

/// A direct register-to-register ModRM byte (`mod=11`).
fn modrm_reg(reg_field: u8, rm_field: u8) -> u8 {
    0xc0 | ((reg_field & 7) << 3) | (rm_field & 7)
}

/// A `[base + disp32]` ModRM + SIB pair, always using a SIB byte with no
/// index so any base register (including `rsp`/`r12`, which otherwise
/// need special-casing) encodes uniformly.
fn modrm_mem_disp32(reg_field: u8, base: u8) -> [u8; 2] {
    let modrm = 0x80 | ((reg_field & 7) << 3) | 0b100;
    let sib = (base & 7) | 0b0010_0000; // scale=00, index=100 (none), base
    [modrm, sib]
}

fn alu_opcode_rm_r(op: AluOp) -> u8 {
    match op {
        AluOp::Add => 0x01,
        AluOp::Or => 0x09,
        AluOp::And => 0x21,
        AluOp::Sub => 0x29,
        AluOp::Xor => 0x31,
        AluOp::Shl | AluOp::Shr | AluOp::Sar | AluOp::Imul => unreachable!("encoded by their own opcode family"),
    }
}

fn alu_imm_digit(op: AluOp) -> u8 {
    match op {
        AluOp::Add => 0,
        AluOp::Or => 1,
        AluOp::And => 4,
        AluOp::Sub => 5,
        AluOp::Xor => 6,
        AluOp::Shl | AluOp::Shr | AluOp::Sar | AluOp::Imul => unreachable!("no immediate-group encoding"),
    }
}

fn shift_digit(op: AluOp) -> u8 {
    match op {
        AluOp::Shl => 4,
        AluOp::Shr => 5,
        AluOp::Sar => 7,
        _ => unreachable!("not a shift"),
    }
}

/// Encodes the finalized instruction stream to bytes.
pub fn emit(insts: &[Inst]) -> CodegenResult<Vec<u8>> {
    let mut buf = MachBuffer::new();
    let mut offsets = vec![0u32; insts.len()];
    for (idx, inst) in insts.iter().enumerate() {
        buf.bind_label(MachLabel::new(idx));
        offsets[idx] = buf.cur_offset();
        emit_one(&mut buf, inst, idx)?;
    }

    let pending: Vec<(crate::machinst::CodeOffset, MachLabel)> = buf.label_uses().collect();
    let (mut bytes, relocations) = buf.finish();
    for (site, label) in pending {
        let target = offsets[label.index()];
        // The rel32 field sits in the 4 bytes immediately preceding the
        // next instruction; relative to the byte right after the field.
        let rel = target as i64 - (site as i64 + 4);
        bytes[site as usize..site as usize + 4].copy_from_slice(&(rel as i32).to_le_bytes());
    }
    debug_assert!(relocations.is_empty(), "this backend's seed scenarios never reference an external symbol");
    Ok(bytes)
}

fn emit_one(buf: &mut MachBuffer, inst: &Inst, idx: usize) -> CodegenResult<()> {
    match *inst {
        Inst::AluRmR { op: op @ (AluOp::Shl | AluOp::Shr | AluOp::Sar), dst, .. } => {
            // `shl/shr/sar r/m, cl` (`src` is always pinned to `cl`).
            let d = enc(dst);
            rex(buf, rex_w(inst_ty(inst)), 0, d);
            buf.put_bytes(&[0xd3, modrm_reg(shift_digit(op), d)]);
        }
        Inst::AluRmR { op: AluOp::Imul, dst, src, ty } => {
            // `imul r, r/m` (0F AF /r): `dst *= src`.
            let (d, s) = (enc(dst), enc(src));
            rex(buf, rex_w(ty), d, s);
            buf.put_bytes(&[0x0f, 0xaf, modrm_reg(d, s)]);
        }
        Inst::AluRmR { op, dst, src, ty } => {
            let (d, s) = (enc(dst), enc(src));
            rex(buf, rex_w(ty), s, d);
            buf.put_bytes(&[alu_opcode_rm_r(op), modrm_reg(s, d)]);
        }
        Inst::AluRmImm32 { op, dst, imm, ty } => {
            let d = enc(dst);
            rex(buf, rex_w(ty), 0, d);
            buf.put_bytes(&[0x81, modrm_reg(alu_imm_digit(op), d)]);
            buf.put_bytes(&imm.to_le_bytes());
        }
        Inst::Neg { dst, ty } => {
            let d = enc(dst);
            rex(buf, rex_w(ty), 0, d);
            buf.put_bytes(&[0xf7, modrm_reg(3, d)]);
        }
        Inst::Not { dst, ty } => {
            let d = enc(dst);
            rex(buf, rex_w(ty), 0, d);
            buf.put_bytes(&[0xf7, modrm_reg(2, d)]);
        }
        Inst::MovImm { dst, imm, ty } => {
            let d = enc(dst);
            if rex_w(ty) {
                rex(buf, true, 0, d);
                buf.put_bytes(&[0xb8 | (d & 7)]);
                buf.put_bytes(&imm.to_le_bytes());
            } else {
                rex(buf, false, 0, d);
                buf.put_bytes(&[0xb8 | (d & 7)]);
                buf.put_bytes(&(imm as u32).to_le_bytes());
            }
        }
        Inst::MovRR { dst, src, ty } => {
            let (d, s) = (enc(dst), enc(src));
            if d == s {
                return Ok(());
            }
            rex(buf, rex_w(ty), s, d);
            buf.put_bytes(&[0x89, modrm_reg(s, d)]);
        }
        Inst::Cmp { lhs, rhs, ty } => {
            let (l, r) = (enc(lhs), enc(rhs));
            rex(buf, rex_w(ty), r, l);
            buf.put_bytes(&[0x39, modrm_reg(r, l)]);
        }
        Inst::CmpImm32 { lhs, imm, ty } => {
            let l = enc(lhs);
            rex(buf, rex_w(ty), 0, l);
            buf.put_bytes(&[0x81, modrm_reg(7, l)]);
            buf.put_bytes(&imm.to_le_bytes());
        }
        Inst::CMov { dst, src, cond, ty } => {
            // `cmovcc r, r/m` (0F 40+cc /r).
            let (d, s) = (enc(dst), enc(src));
            rex(buf, rex_w(ty), d, s);
            buf.put_bytes(&[0x0f, 0x40 | cond.bits(), modrm_reg(d, s)]);
        }
        Inst::Load { dst, base, offset, ty } => {
            let (d, b) = (enc(dst), enc(base));
            rex(buf, rex_w(ty), d, b);
            buf.put_bytes(&[0x8b]);
            let [modrm, sib] = modrm_mem_disp32(d, b);
            buf.put_bytes(&[modrm, sib]);
            buf.put_bytes(&offset.to_le_bytes());
        }
        Inst::Store { src, base, offset, ty } => {
            let (s, b) = (enc(src), enc(base));
            rex(buf, rex_w(ty), s, b);
            buf.put_bytes(&[0x89]);
            let [modrm, sib] = modrm_mem_disp32(s, b);
            buf.put_bytes(&[modrm, sib]);
            buf.put_bytes(&offset.to_le_bytes());
        }
        Inst::LoadStack { .. } | Inst::StoreStack { .. } | Inst::LoadSpill { .. } | Inst::StoreSpill { .. } => {
            unreachable!("frame finalization rewrites every LoadStack/StoreStack/LoadSpill/StoreSpill before emission")
        }
        Inst::Jump { target } => {
            buf.put_bytes(&[0xe9]);
            buf.use_label_at_offset(buf.cur_offset(), target, 32);
            buf.put_bytes(&[0, 0, 0, 0]);
        }
        Inst::CondBr { cond, taken, not_taken } => {
            buf.put_bytes(&[0x0f, 0x80 | cond.bits()]);
            buf.use_label_at_offset(buf.cur_offset(), taken, 32);
            buf.put_bytes(&[0, 0, 0, 0]);
            let _ = not_taken;
        }
        Inst::Ret { ref rets } => {
            let _ = rets;
            let _ = idx;
            buf.put_bytes(&[0xc3]);
        }
        Inst::Push { src } => {
            let s = enc(src);
            if s >= 8 {
                buf.put_bytes(&[0x41]);
            }
            buf.put_bytes(&[0x50 | (s & 7)]);
        }
        Inst::Pop { dst } => {
            let d = enc(dst);
            if d >= 8 {
                buf.put_bytes(&[0x41]);
            }
            buf.put_bytes(&[0x58 | (d & 7)]);
        }
        Inst::Nop => buf.put_bytes(&[0x90]),
    }
    Ok(())
}

fn inst_ty(inst: &Inst) -> Type {
    match *inst {
        Inst::AluRmR { ty, .. } => ty,
        _ => unreachable!(),
    }
}

#[allow(dead_code)]
fn unused_rsp_enc() -> u8 {
    RSP_ENC
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::I32;
    use crate::machinst::Reg;

    #[test]
    fn identity_add_ends_with_ret() {
        let r = |n| Reg::Real(super::super::inst::greg(n));
        let insts = vec![
            Inst::MovRR { dst: r(0), src: r(7), ty: I32 },
            Inst::AluRmR { op: AluOp::Add, dst: r(0), src: r(6), ty: I32 },
            Inst::Ret { rets: smallvec::smallvec![] },
        ];
        let bytes = emit(&insts).unwrap();
        assert_eq!(*bytes.last().unwrap(), 0xc3);
    }
}
