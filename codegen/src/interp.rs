//! A tree-walking interpreter over the IR, used only by this crate's own
//! tests (and anyone enabling the `interp` feature) to check that
//! `isa::compile`'s emitted machine code agrees with the IR's semantics
//! (spec.md §1 lists the interpreter as an external, test-only
//! collaborator; spec.md §8's seed scenarios assert interpreted results).
//! It walks [`Layout`] order directly rather than lowering anything, so it
//! has no opinion about registers, ABIs, or encodings.

use std::collections::HashMap;

use crate::ir::instructions::{InstructionData, Opcode};
use crate::ir::{Block, Function, IntCC, TrapCode, Type, Value};

/// One interpreted value: either a (possibly wide, possibly narrow)
/// two's-complement integer held in an `i128`, or an IEEE-754 double. `f32`
/// values are stored widened to `f64` between operations and narrowed back
/// to `f32` precision after each float op, mirroring `fdemote`/`fpromote`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    /// An integer, masked to its `Type`'s bit width after every operation.
    Int(i128),
    /// A floating-point number.
    Float(f64),
}

impl Val {
    fn as_int(self) -> i128 {
        match self {
            Val::Int(i) => i,
            Val::Float(_) => panic!("interp: expected an integer value"),
        }
    }

    fn as_float(self) -> f64 {
        match self {
            Val::Float(f) => f,
            Val::Int(_) => panic!("interp: expected a float value"),
        }
    }
}

/// Why interpretation stopped before reaching a `return`.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpError {
    /// Execution hit a `trap`, `trapz`, or `trapnz`.
    Trapped(TrapCode),
    /// The function has no entry block, or layout ran off the end of a
    /// block without hitting a terminator (a verifier-caught condition;
    /// the interpreter re-checks it defensively rather than assuming
    /// pre-verified input).
    NoTerminator(Block),
    /// The instruction's opcode has no interpreted semantics here (loads,
    /// stores, calls, and vector lane ops are out of this test tool's
    /// scope; see the module doc).
    Unsupported(Opcode),
}

/// Masks `v` down to `ty`'s bit width, sign- or zero- preserving the raw
/// bit pattern (arithmetic ops rely on wrapping at the type's width, not
/// `i128`'s).
fn mask(v: i128, ty: Type) -> i128 {
    let bits = ty.bits();
    if bits >= 128 {
        return v;
    }
    let unsigned_mask = (1i128 << bits) - 1;
    let truncated = v & unsigned_mask;
    // Sign-extend so comparisons/arithmetic on the stored value behave as
    // two's complement at this width.
    let sign_bit = 1i128 << (bits - 1);
    if truncated & sign_bit != 0 {
        truncated | !unsigned_mask
    } else {
        truncated
    }
}

fn icmp(cond: IntCC, a: i128, b: i128, ty: Type) -> bool {
    use IntCC::*;
    match cond {
        Equal => a == b,
        NotEqual => a != b,
        SignedLessThan => a < b,
        SignedLessThanOrEqual => a <= b,
        SignedGreaterThan => a > b,
        SignedGreaterThanOrEqual => a >= b,
        UnsignedLessThan => unsigned_bits(a, ty) < unsigned_bits(b, ty),
        UnsignedLessThanOrEqual => unsigned_bits(a, ty) <= unsigned_bits(b, ty),
        UnsignedGreaterThan => unsigned_bits(a, ty) > unsigned_bits(b, ty),
        UnsignedGreaterThanOrEqual => unsigned_bits(a, ty) >= unsigned_bits(b, ty),
    }
}

fn unsigned_bits(v: i128, ty: Type) -> u128 {
    let bits = ty.bits();
    if bits >= 128 {
        v as u128
    } else {
        (v as u128) & ((1u128 << bits) - 1)
    }
}

fn float_eq(ty: Type, bits: u64) -> f64 {
    if ty.bits() == 32 {
        f32::from_bits(bits as u32) as f64
    } else {
        f64::from_bits(bits)
    }
}

/// Runs `func` from its entry block with `args` bound to the entry block's
/// parameters, executing instructions in layout order until a `return`,
/// following `jump`/`brif` edges by binding the destination block's
/// parameters from the `BlockCall`'s arguments (spec.md §9 "SSA with block
/// parameters, not phi nodes" — this is exactly the substitution that
/// expresses).
pub fn run(func: &Function, args: &[Val]) -> Result<Vec<Val>, InterpError> {
    let mut env: HashMap<Value, Val> = HashMap::new();
    let entry = func.entry_block.ok_or(InterpError::NoTerminator(Block::from_u32(0)))?;
    bind_params(func, entry, args, &mut env);

    let mut block = entry;
    loop {
        let mut terminated = false;
        for inst in func.layout.block_insts(block) {
            let data = func.dfg.inst_data(inst).clone();
            match step(func, inst, &data, &mut env)? {
                Step::Continue => {}
                Step::Jump(dest) => {
                    let args: Vec<Val> = dest.args.iter().map(|v| read(func, &env, *v)).collect();
                    bind_params(func, dest.block, &args, &mut env);
                    block = dest.block;
                    terminated = true;
                    break;
                }
                Step::Return(vals) => return Ok(vals),
            }
        }
        if !terminated {
            // Reached the end of the block's instruction list without a
            // terminator redirecting `block` or returning.
            return Err(InterpError::NoTerminator(block));
        }
    }
}

fn bind_params(func: &Function, block: Block, args: &[Val], env: &mut HashMap<Value, Val>) {
    for (&v, &a) in func.dfg.block_params(block).iter().zip(args) {
        env.insert(v, a);
    }
}

fn read(func: &Function, env: &HashMap<Value, Val>, v: Value) -> Val {
    let resolved = func.dfg.resolve_alias_value(v);
    *env.get(&resolved).unwrap_or_else(|| panic!("interp: {resolved} read before definition"))
}

enum Step {
    Continue,
    Jump(crate::ir::BlockCall),
    Return(Vec<Val>),
}

fn step(func: &Function, inst: crate::ir::Inst, data: &InstructionData, env: &mut HashMap<Value, Val>) -> Result<Step, InterpError> {
    use InstructionData::*;
    let result_ty = || func.dfg.value_type(func.dfg.first_result(inst));
    match data {
        Nullary { opcode: Opcode::Nop, .. } => {}
        Nullary { opcode: Opcode::Trap, trap_code } => {
            return Err(InterpError::Trapped(trap_code.unwrap_or(TrapCode::UnreachableCodeReached)));
        }
        Nullary { opcode, .. } => return Err(InterpError::Unsupported(*opcode)),
        UnaryImm { imm, ty, .. } => {
            env.insert(func.dfg.first_result(inst), Val::Int(mask(*imm as i128, *ty)));
        }
        UnaryIeeeImm { bits, ty, .. } => {
            env.insert(func.dfg.first_result(inst), Val::Float(float_eq(*ty, *bits)));
        }
        Unary { opcode, arg, ty } => {
            let a = read(func, env, *arg);
            let v = match opcode {
                Opcode::Ineg => Val::Int(mask(-a.as_int(), *ty)),
                Opcode::Bnot => Val::Int(mask(!a.as_int(), *ty)),
                Opcode::Fneg => Val::Float(-a.as_float()),
                Opcode::Sextend | Opcode::Uextend | Opcode::Ireduce => Val::Int(mask(a.as_int(), *ty)),
                Opcode::Fpromote | Opcode::Fdemote => {
                    if ty.bits() == 32 {
                        Val::Float(a.as_float() as f32 as f64)
                    } else {
                        Val::Float(a.as_float())
                    }
                }
                Opcode::Bitcast => a,
                Opcode::Isplit => {
                    let whole = a.as_int();
                    let lo = mask(whole, Type::from_repr(crate::ir::types::I64.repr()));
                    let hi = mask(whole >> 64, Type::from_repr(crate::ir::types::I64.repr()));
                    let results = func.dfg.inst_results(inst);
                    env.insert(results[0], Val::Int(lo));
                    env.insert(results[1], Val::Int(hi));
                    return Ok(Step::Continue);
                }
                other => return Err(InterpError::Unsupported(*other)),
            };
            env.insert(func.dfg.first_result(inst), v);
        }
        UnaryWithTrap { opcode, arg, code } => {
            let a = read(func, env, *arg).as_int();
            let fires = match opcode {
                Opcode::Trapz => a == 0,
                Opcode::Trapnz => a != 0,
                other => return Err(InterpError::Unsupported(*other)),
            };
            if fires {
                return Err(InterpError::Trapped(*code));
            }
        }
        Binary { opcode, args } => {
            let ty = result_ty();
            let a = read(func, env, args[0]);
            let b = read(func, env, args[1]);
            let v = eval_binary(*opcode, a, b, ty)?;
            env.insert(func.dfg.first_result(inst), v);
        }
        BinaryImm { opcode, arg, imm } => {
            let ty = result_ty();
            let a = read(func, env, *arg);
            let b = Val::Int(mask(*imm as i128, ty));
            let op = match opcode {
                Opcode::IaddImm => Opcode::Iadd,
                Opcode::ImulImm => Opcode::Imul,
                other => return Err(InterpError::Unsupported(*other)),
            };
            let v = eval_binary(op, a, b, ty)?;
            env.insert(func.dfg.first_result(inst), v);
        }
        Ternary { opcode, args } => {
            let ty = result_ty();
            match opcode {
                Opcode::Select => {
                    let cond = read(func, env, args[0]).as_int();
                    let v = if cond != 0 { read(func, env, args[1]) } else { read(func, env, args[2]) };
                    env.insert(func.dfg.first_result(inst), v);
                }
                Opcode::Fma => {
                    let a = read(func, env, args[0]).as_float();
                    let b = read(func, env, args[1]).as_float();
                    let c = read(func, env, args[2]).as_float();
                    let r = if ty.bits() == 32 { ((a * b + c) as f32) as f64 } else { a.mul_add(b, c) };
                    env.insert(func.dfg.first_result(inst), Val::Float(r));
                }
                other => return Err(InterpError::Unsupported(*other)),
            }
        }
        IntCompare { cond, args, .. } => {
            let ty = func.dfg.value_type(args[0]);
            let a = read(func, env, args[0]).as_int();
            let b = read(func, env, args[1]).as_int();
            let r = icmp(*cond, a, b, ty);
            env.insert(func.dfg.first_result(inst), Val::Int(r as i128));
        }
        FloatCompare { cond, args, .. } => {
            use crate::ir::FloatCC::*;
            let a = read(func, env, args[0]).as_float();
            let b = read(func, env, args[1]).as_float();
            let r = match cond {
                Equal => a == b,
                NotEqual => a != b,
                LessThan => a < b,
                LessThanOrEqual => a <= b,
                GreaterThan => a > b,
                GreaterThanOrEqual => a >= b,
            };
            env.insert(func.dfg.first_result(inst), Val::Int(r as i128));
        }
        Jump { destination, .. } => return Ok(Step::Jump(destination.clone())),
        Branch { cond, blocks, .. } => {
            let c = read(func, env, *cond).as_int();
            let dest = if c != 0 { &blocks[0] } else { &blocks[1] };
            return Ok(Step::Jump(dest.clone()));
        }
        Return { args, .. } => {
            let vals = args.as_slice(&func.dfg.value_lists).iter().map(|v| read(func, env, *v)).collect();
            return Ok(Step::Return(vals));
        }
        other => return Err(InterpError::Unsupported(other.opcode())),
    }
    Ok(Step::Continue)
}

fn eval_binary(opcode: Opcode, a: Val, b: Val, ty: Type) -> Result<Val, InterpError> {
    Ok(if ty.is_float() {
        let x = a.as_float();
        let y = b.as_float();
        let r = match opcode {
            Opcode::Fadd => x + y,
            Opcode::Fsub => x - y,
            Opcode::Fmul => x * y,
            Opcode::Fdiv => x / y,
            other => return Err(InterpError::Unsupported(other)),
        };
        Val::Float(if ty.bits() == 32 { (r as f32) as f64 } else { r })
    } else {
        let x = a.as_int();
        let y = b.as_int();
        let r = match opcode {
            Opcode::Iadd | Opcode::IaddImm => x.wrapping_add(y),
            Opcode::Isub => x.wrapping_sub(y),
            Opcode::Imul | Opcode::ImulImm => x.wrapping_mul(y),
            Opcode::Sdiv => {
                if y == 0 {
                    return Err(InterpError::Trapped(TrapCode::IntegerDivisionByZero));
                }
                x.wrapping_div(y)
            }
            Opcode::Udiv => {
                if y == 0 {
                    return Err(InterpError::Trapped(TrapCode::IntegerDivisionByZero));
                }
                (unsigned_bits(x, ty) / unsigned_bits(y, ty)) as i128
            }
            Opcode::Srem => {
                if y == 0 {
                    return Err(InterpError::Trapped(TrapCode::IntegerDivisionByZero));
                }
                x.wrapping_rem(y)
            }
            Opcode::Urem => {
                if y == 0 {
                    return Err(InterpError::Trapped(TrapCode::IntegerDivisionByZero));
                }
                (unsigned_bits(x, ty) % unsigned_bits(y, ty)) as i128
            }
            Opcode::Band => x & y,
            Opcode::Bor => x | y,
            Opcode::Bxor => x ^ y,
            Opcode::Ishl => x.wrapping_shl((y as u32) % ty.bits()),
            Opcode::Ushr => ((unsigned_bits(x, ty)) >> ((y as u32) % ty.bits())) as i128,
            Opcode::Sshr => x.wrapping_shr((y as u32) % ty.bits()),
            Opcode::Iconcat => (unsigned_bits(x, crate::ir::types::I64) as i128) | (y << 64),
            other => return Err(InterpError::Unsupported(other)),
        };
        Val::Int(mask(r, ty))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::I32;
    use crate::ir::{Builder, CallConv, Function, Signature};

    fn build_identity_add() -> Function {
        let mut func = Function::with_name_signature("identity_add", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let v0 = b.append_block_param(b0, I32);
        let v1 = b.append_block_param(b0, I32);
        let (_, v2) = b.ins_binary(Opcode::Iadd, v0, v1).unwrap();
        b.ins_return(&[v2]).unwrap();
        func
    }

    #[test]
    fn identity_add_10_and_32_is_42() {
        let func = build_identity_add();
        let result = run(&func, &[Val::Int(10), Val::Int(32)]).unwrap();
        assert_eq!(result, vec![Val::Int(42)]);
    }

    fn build_max_via_branch() -> Function {
        let mut func = Function::with_name_signature("max", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        let b1 = b.create_block();
        let b2 = b.create_block();
        b.insert_block(b0);
        b.insert_block(b1);
        b.insert_block(b2);
        b.switch_to_block(b0);
        let a = b.append_block_param(b0, I32);
        let bb = b.append_block_param(b0, I32);
        let (_, cond) = b.ins_icmp(crate::ir::IntCC::SignedLessThan, a, bb).unwrap();
        b.ins_brif(cond, b1, &[], b2, &[]).unwrap();
        b.switch_to_block(b1);
        b.ins_return(&[bb]).unwrap();
        b.switch_to_block(b2);
        b.ins_return(&[a]).unwrap();
        func
    }

    #[test]
    fn max_via_branch_picks_larger_operand() {
        let func = build_max_via_branch();
        assert_eq!(run(&func, &[Val::Int(5), Val::Int(7)]).unwrap(), vec![Val::Int(7)]);
        assert_eq!(run(&func, &[Val::Int(7), Val::Int(5)]).unwrap(), vec![Val::Int(7)]);
        assert_eq!(run(&func, &[Val::Int(5), Val::Int(5)]).unwrap(), vec![Val::Int(5)]);
    }

    fn build_abs_via_select() -> Function {
        let mut func = Function::with_name_signature("abs", Signature::new(CallConv::SystemV));
        let mut b = Builder::new(&mut func);
        let b0 = b.create_block();
        b.insert_block(b0);
        b.switch_to_block(b0);
        let x = b.append_block_param(b0, I32);
        let (_, zero) = b.ins_iconst(I32, 0).unwrap();
        let (_, neg) = b.ins_binary(Opcode::Isub, zero, x).unwrap();
        let (_, cond) = b.ins_icmp(crate::ir::IntCC::SignedLessThan, x, zero).unwrap();
        let (_, v) = b.ins_select(cond, neg, x).unwrap();
        b.ins_return(&[v]).unwrap();
        func
    }

    #[test]
    fn abs_via_select_negates_only_negatives() {
        let func = build_abs_via_select();
        assert_eq!(run(&func, &[Val::Int(-7)]).unwrap(), vec![Val::Int(7)]);
        assert_eq!(run(&func, &[Val::Int(5)]).unwrap(), vec![Val::Int(5)]);
    }
}
