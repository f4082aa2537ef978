//! Interpreter ↔ JIT equivalence over the arithmetic surface.

use bytecode_system::{ChunkBuilder, Opcode};
use core_types::Value;
use integration_tests::{binary_function, run_both_ways};

fn assert_same(op: Opcode, lhs: Value, rhs: Value) {
    let (interp, jit) = run_both_ways(binary_function(op), &[lhs, rhs]);
    assert_eq!(
        interp.bits(),
        jit.bits(),
        "{:?} on {:?}/{:?} diverged: {:?} vs {:?}",
        op,
        lhs,
        rhs,
        interp,
        jit
    );
}

#[test]
fn test_add_matrix() {
    let interesting = [
        Value::from_i32(0),
        Value::from_i32(1),
        Value::from_i32(-1),
        Value::from_i32(i32::MAX),
        Value::from_i32(i32::MIN),
        Value::from_f64(0.5),
        Value::from_f64(-1e100),
        Value::UNDEFINED,
        Value::NULL,
        Value::TRUE,
    ];
    for &lhs in &interesting {
        for &rhs in &interesting {
            assert_same(Opcode::Add, lhs, rhs);
        }
    }
}

#[test]
fn test_sub_and_mul_overflow_paths() {
    assert_same(Opcode::Sub, Value::from_i32(i32::MIN), Value::from_i32(1));
    assert_same(Opcode::Sub, Value::from_i32(i32::MIN), Value::from_i32(i32::MIN));
    assert_same(Opcode::Mul, Value::from_i32(65536), Value::from_i32(65536));
    assert_same(Opcode::Mul, Value::from_i32(-3), Value::from_i32(7));
    assert_same(Opcode::Mul, Value::from_f64(1.5), Value::from_i32(2));
}

#[test]
fn test_shift_semantics_match() {
    for lhs in [-1i32, 1, i32::MIN, i32::MAX, 0x12345678] {
        for rhs in [0i32, 1, 31, 32, 33, -1] {
            let (l, r) = (Value::from_i32(lhs), Value::from_i32(rhs));
            assert_same(Opcode::Shl, l, r);
            assert_same(Opcode::Shr, l, r);
            assert_same(Opcode::UShr, l, r);
        }
    }
}

#[test]
fn test_bitwise_matrix() {
    for lhs in [-1i32, 0, 0b1010, i32::MIN] {
        for rhs in [0i32, 0b0110, -1] {
            let (l, r) = (Value::from_i32(lhs), Value::from_i32(rhs));
            assert_same(Opcode::BitAnd, l, r);
            assert_same(Opcode::BitOr, l, r);
            assert_same(Opcode::BitXor, l, r);
        }
    }
    // doubles route through ToInt32 in both tiers
    assert_same(Opcode::BitAnd, Value::from_f64(3.7), Value::from_i32(1));
    assert_same(Opcode::BitXor, Value::from_f64(-2.5), Value::from_f64(9.0));
}

#[test]
fn test_division_and_modulo() {
    assert_same(Opcode::Div, Value::from_i32(7), Value::from_i32(2));
    assert_same(Opcode::Div, Value::from_i32(1), Value::from_i32(0));
    assert_same(Opcode::Mod, Value::from_i32(7), Value::from_i32(3));
    assert_same(Opcode::Mod, Value::from_i32(-7), Value::from_i32(3));
}

#[test]
fn test_comparisons_match() {
    for op in [Opcode::Lt, Opcode::LtEq, Opcode::Gt, Opcode::GtEq, Opcode::Eq, Opcode::StrictEq] {
        assert_same(op, Value::from_i32(1), Value::from_i32(2));
        assert_same(op, Value::from_i32(2), Value::from_i32(2));
        assert_same(op, Value::from_f64(f64::NAN), Value::from_i32(2));
        assert_same(op, Value::from_i32(3), Value::from_f64(3.0));
    }
}

#[test]
fn test_loop_program_matches() {
    // sum of 1..=n, exercising the fused compare-and-branch in both tiers
    let mut b = ChunkBuilder::with_params(4, 1);
    b.emit(Opcode::LoadInt, 1, 0, 0);
    b.emit(Opcode::LoadInt, 2, 1, 0);
    b.emit(Opcode::LoadInt, 3, 1, 0);
    let loop_start = b.emit(Opcode::Add, 1, 1, 2);
    b.emit(Opcode::Add, 2, 2, 3);
    let branch = b.emit_jump(Opcode::JumpIfLessEq, 2, 0);
    b.patch_jump(branch, loop_start);
    b.emit(Opcode::Return, 1, 0, 0);
    let chunk = b.build();

    let (interp, jit) = run_both_ways(chunk, &[Value::from_i32(1000)]);
    assert_eq!(interp, Value::from_i32(500500));
    assert_eq!(interp.bits(), jit.bits());
}

#[test]
fn test_int32_add_property() {
    // the fast path either produces the int32 sum or the exact double
    for (a, b) in [
        (1, 2),
        (i32::MAX, 1),
        (i32::MIN, -1),
        (i32::MAX, i32::MAX),
        (-1000, 1000),
    ] {
        let (interp, _) = run_both_ways(
            binary_function(Opcode::Add),
            &[Value::from_i32(a), Value::from_i32(b)],
        );
        let exact = a as i64 + b as i64;
        if let Ok(small) = i32::try_from(exact) {
            assert_eq!(interp, Value::from_i32(small));
        } else {
            assert!(interp.is_double());
            assert_eq!(interp.as_double(), exact as f64);
        }
    }
}
