//! Glue between generated code and the VM.
//!
//! Generated code receives a [`JitInvocation`] whose stub table points at
//! the functions below. Each stub recovers the VM and context from the
//! invocation's user data, runs the same generic operation the
//! interpreter uses, and reports script errors through the pending-error
//! flag; the generated code then bails with the empty sentinel and the
//! dispatcher rethrows.

use crate::context::{Context, LoadedFunction};
use crate::dispatch::{ExecError, Vm, VmResult};
use core_types::{EngineError, JsError, Value};
use jit_compiler::{JitInvocation, StubTable};
use std::cmp::Ordering;

/// What the stubs see through `user_data`.
struct StubBridge {
    vm: *mut Vm,
    ctx: *mut Context,
}

/// Execute a function's compiled body.
pub(crate) fn run_compiled(
    vm: &mut Vm,
    ctx: &mut Context,
    function: u32,
    func: &LoadedFunction,
    args: &[Value],
) -> VmResult<Value> {
    // the register window is allocated outside the VM stack so that stub
    // re-entry can grow the stack without moving it
    let register_count = func.chunk.register_count as usize;
    let mut window: Vec<Value> = Vec::with_capacity(register_count);
    window.extend(args.iter().copied().take(register_count));
    window.resize(register_count, Value::UNDEFINED);

    let compiled = vm
        .compiled_entry(function)
        .expect("compiled code present for function");
    vm.jit_windows.push((window.as_ptr() as usize, window.len()));

    let mut bridge = StubBridge {
        vm: vm as *mut Vm,
        ctx: ctx as *mut Context,
    };
    let mut invocation = JitInvocation::new(stub_table(), &mut bridge as *mut StubBridge as *mut _);

    // SAFETY: the invocation and window outlive the call; the stub table
    // upholds the calling convention; the window is registered as a GC
    // root for the duration.
    let bits = unsafe { compiled(&mut invocation, window.as_mut_ptr() as *mut u64) };
    vm.jit_windows.pop();

    let result = Value::from_bits(bits);
    if result.is_empty() {
        let error = ctx
            .pending_exception
            .take()
            .unwrap_or_else(|| JsError::new(core_types::ErrorKind::Error, "native code fault"));
        return Err(ExecError::Script(error));
    }
    Ok(result)
}

impl Vm {
    /// Entry point of a function's compiled body, if present.
    pub(crate) fn compiled_entry(&self, function: u32) -> Option<jit_compiler::JitEntry> {
        // SAFETY: compiled code is produced by the template compiler for
        // this chunk and kept alive in the map.
        self.compiled_code(function).map(|code| unsafe { code.entry() })
    }
}

fn stub_table() -> StubTable {
    StubTable {
        binary_add: stub_add,
        binary_subtract: stub_subtract,
        binary_multiply: stub_multiply,
        binary_divide: stub_divide,
        binary_modulo: stub_modulo,
        binary_bitand: stub_bitand,
        binary_bitor: stub_bitor,
        binary_bitxor: stub_bitxor,
        binary_lshift: stub_lshift,
        binary_rshift: stub_rshift,
        binary_rshift_logical: stub_rshift_logical,
        binary_lt: stub_lt,
        binary_lte: stub_lte,
        binary_gt: stub_gt,
        binary_gte: stub_gte,
        binary_eq: stub_eq,
        binary_ne: stub_ne,
        binary_strict_eq: stub_strict_eq,
        binary_strict_ne: stub_strict_ne,
        unary_neg: stub_neg,
        unary_not: stub_not,
        unary_bitnot: stub_bitnot,
        to_boolean: stub_to_boolean,
    }
}

/// Run `f` with the VM and context recovered from the invocation, storing
/// any script error in the pending slot.
fn with_bridge<F>(invocation: *mut JitInvocation, f: F) -> u64
where
    F: FnOnce(&mut Vm, &mut Context) -> VmResult<Value>,
{
    // SAFETY: user_data points at the StubBridge constructed by
    // run_compiled, which is alive for the whole native call.
    let (vm, ctx) = unsafe {
        let invocation = &mut *invocation;
        let bridge = &mut *(invocation.user_data as *mut StubBridge);
        (&mut *bridge.vm, &mut *bridge.ctx)
    };
    match f(vm, ctx) {
        Ok(value) => value.bits(),
        Err(error) => {
            let script = match error {
                ExecError::Script(e) => e,
                ExecError::Engine(EngineError::OutOfMemory) => {
                    JsError::range_error("out of memory")
                }
                ExecError::Engine(e) => JsError::new(core_types::ErrorKind::Error, e.to_string()),
            };
            ctx.pending_exception = Some(script);
            // SAFETY: same invocation pointer as above.
            unsafe {
                (*invocation).pending_error = 1;
            }
            Value::EMPTY.bits()
        }
    }
}

extern "C" fn stub_add(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        vm.generic_add(ctx, Value::from_bits(lhs), Value::from_bits(rhs))
    })
}

extern "C" fn stub_subtract(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let l = vm.to_number(ctx, Value::from_bits(lhs))?;
        let r = vm.to_number(ctx, Value::from_bits(rhs))?;
        Ok(Value::from_number(l - r))
    })
}

extern "C" fn stub_multiply(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let l = vm.to_number(ctx, Value::from_bits(lhs))?;
        let r = vm.to_number(ctx, Value::from_bits(rhs))?;
        Ok(Value::from_number(l * r))
    })
}

extern "C" fn stub_divide(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let l = vm.to_number(ctx, Value::from_bits(lhs))?;
        let r = vm.to_number(ctx, Value::from_bits(rhs))?;
        Ok(Value::from_number(l / r))
    })
}

extern "C" fn stub_modulo(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let l = vm.to_number(ctx, Value::from_bits(lhs))?;
        let r = vm.to_number(ctx, Value::from_bits(rhs))?;
        Ok(Value::from_number(l % r))
    })
}

macro_rules! bitwise_stub {
    ($name:ident, $op:tt) => {
        extern "C" fn $name(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
            with_bridge(invocation, |vm, ctx| {
                let l = vm.to_int32(ctx, Value::from_bits(lhs))?;
                let r = vm.to_int32(ctx, Value::from_bits(rhs))?;
                Ok(Value::from_i32(l $op r))
            })
        }
    };
}

bitwise_stub!(stub_bitand, &);
bitwise_stub!(stub_bitor, |);
bitwise_stub!(stub_bitxor, ^);

extern "C" fn stub_lshift(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let l = vm.to_int32(ctx, Value::from_bits(lhs))?;
        let r = vm.to_uint32(ctx, Value::from_bits(rhs))?;
        Ok(Value::from_i32(l.wrapping_shl(r & 0x1F)))
    })
}

extern "C" fn stub_rshift(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let l = vm.to_int32(ctx, Value::from_bits(lhs))?;
        let r = vm.to_uint32(ctx, Value::from_bits(rhs))?;
        Ok(Value::from_i32(l.wrapping_shr(r & 0x1F)))
    })
}

extern "C" fn stub_rshift_logical(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let l = vm.to_uint32(ctx, Value::from_bits(lhs))?;
        let r = vm.to_uint32(ctx, Value::from_bits(rhs))?;
        Ok(Value::from_number(l.wrapping_shr(r & 0x1F) as f64))
    })
}

macro_rules! relational_stub {
    ($name:ident, $pattern:pat) => {
        extern "C" fn $name(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
            with_bridge(invocation, |vm, ctx| {
                let ordering =
                    vm.compare_values(ctx, Value::from_bits(lhs), Value::from_bits(rhs))?;
                Ok(Value::from_bool(matches!(ordering, Some($pattern))))
            })
        }
    };
}

relational_stub!(stub_lt, Ordering::Less);
relational_stub!(stub_lte, Ordering::Less | Ordering::Equal);
relational_stub!(stub_gt, Ordering::Greater);
relational_stub!(stub_gte, Ordering::Greater | Ordering::Equal);

extern "C" fn stub_eq(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let eq = vm.loose_equals(ctx, Value::from_bits(lhs), Value::from_bits(rhs))?;
        Ok(Value::from_bool(eq))
    })
}

extern "C" fn stub_ne(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let eq = vm.loose_equals(ctx, Value::from_bits(lhs), Value::from_bits(rhs))?;
        Ok(Value::from_bool(!eq))
    })
}

extern "C" fn stub_strict_eq(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let eq = vm.strict_equals(ctx, Value::from_bits(lhs), Value::from_bits(rhs));
        Ok(Value::from_bool(eq))
    })
}

extern "C" fn stub_strict_ne(invocation: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let eq = vm.strict_equals(ctx, Value::from_bits(lhs), Value::from_bits(rhs));
        Ok(Value::from_bool(!eq))
    })
}

extern "C" fn stub_neg(invocation: *mut JitInvocation, operand: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let n = vm.to_number(ctx, Value::from_bits(operand))?;
        Ok(Value::from_f64(-n))
    })
}

extern "C" fn stub_not(invocation: *mut JitInvocation, operand: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let b = vm.boolean_of(ctx, Value::from_bits(operand));
        Ok(Value::from_bool(!b))
    })
}

extern "C" fn stub_bitnot(invocation: *mut JitInvocation, operand: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let n = vm.to_int32(ctx, Value::from_bits(operand))?;
        Ok(Value::from_i32(!n))
    })
}

extern "C" fn stub_to_boolean(invocation: *mut JitInvocation, operand: u64) -> u64 {
    with_bridge(invocation, |vm, ctx| {
        let b = vm.boolean_of(ctx, Value::from_bits(operand));
        // raw 0/1, not a boxed boolean
        Ok(Value::from_bits(b as u64))
    })
}
