//! Runtime stub table.
//!
//! Generated code never calls into the interpreter directly; every slow
//! path goes through a function pointer installed here by the embedding
//! VM. Stubs receive the invocation context and boxed operands and return
//! a boxed result. A faulting stub records the error in `pending_error`
//! before returning; the generated code checks the flag after every call
//! and bails out with the `Value::EMPTY` sentinel.

use std::ffi::c_void;

/// Binary slow path: `(invocation, lhs bits, rhs bits) → result bits`.
pub type BinaryStub = extern "C" fn(*mut JitInvocation, u64, u64) -> u64;

/// Unary slow path: `(invocation, operand bits) → result bits`.
pub type UnaryStub = extern "C" fn(*mut JitInvocation, u64) -> u64;

/// The slow-path entry points, in a fixed layout so the emitter can call
/// through `[r14 + offset]`.
#[repr(C)]
pub struct StubTable {
    pub binary_add: BinaryStub,
    pub binary_subtract: BinaryStub,
    pub binary_multiply: BinaryStub,
    pub binary_divide: BinaryStub,
    pub binary_modulo: BinaryStub,
    pub binary_bitand: BinaryStub,
    pub binary_bitor: BinaryStub,
    pub binary_bitxor: BinaryStub,
    pub binary_lshift: BinaryStub,
    pub binary_rshift: BinaryStub,
    pub binary_rshift_logical: BinaryStub,
    pub binary_lt: BinaryStub,
    pub binary_lte: BinaryStub,
    pub binary_gt: BinaryStub,
    pub binary_gte: BinaryStub,
    pub binary_eq: BinaryStub,
    pub binary_ne: BinaryStub,
    pub binary_strict_eq: BinaryStub,
    pub binary_strict_ne: BinaryStub,
    pub unary_neg: UnaryStub,
    pub unary_not: UnaryStub,
    pub unary_bitnot: UnaryStub,
    /// Returns raw 0/1, not a boxed boolean.
    pub to_boolean: UnaryStub,
}

/// Per-call context handed to generated code in `r14`.
///
/// The stub table sits at offset 0 so stub slots are addressable with
/// small displacements.
#[repr(C)]
pub struct JitInvocation {
    pub stubs: StubTable,
    /// Set non-zero by a stub that raised a script error.
    pub pending_error: u8,
    /// Opaque pointer to the embedding VM's state, for stub
    /// implementations.
    pub user_data: *mut c_void,
}

impl JitInvocation {
    pub fn new(stubs: StubTable, user_data: *mut c_void) -> Self {
        JitInvocation {
            stubs,
            pending_error: 0,
            user_data,
        }
    }
}

/// Field offsets used by the emitter.
pub mod offsets {
    use super::{JitInvocation, StubTable};
    use std::mem::offset_of;

    pub const PENDING_ERROR: i32 = offset_of!(JitInvocation, pending_error) as i32;

    pub const BINARY_ADD: i32 = offset_of!(StubTable, binary_add) as i32;
    pub const BINARY_SUBTRACT: i32 = offset_of!(StubTable, binary_subtract) as i32;
    pub const BINARY_MULTIPLY: i32 = offset_of!(StubTable, binary_multiply) as i32;
    pub const BINARY_DIVIDE: i32 = offset_of!(StubTable, binary_divide) as i32;
    pub const BINARY_MODULO: i32 = offset_of!(StubTable, binary_modulo) as i32;
    pub const BINARY_BITAND: i32 = offset_of!(StubTable, binary_bitand) as i32;
    pub const BINARY_BITOR: i32 = offset_of!(StubTable, binary_bitor) as i32;
    pub const BINARY_BITXOR: i32 = offset_of!(StubTable, binary_bitxor) as i32;
    pub const BINARY_LSHIFT: i32 = offset_of!(StubTable, binary_lshift) as i32;
    pub const BINARY_RSHIFT: i32 = offset_of!(StubTable, binary_rshift) as i32;
    pub const BINARY_RSHIFT_LOGICAL: i32 = offset_of!(StubTable, binary_rshift_logical) as i32;
    pub const BINARY_LT: i32 = offset_of!(StubTable, binary_lt) as i32;
    pub const BINARY_LTE: i32 = offset_of!(StubTable, binary_lte) as i32;
    pub const BINARY_GT: i32 = offset_of!(StubTable, binary_gt) as i32;
    pub const BINARY_GTE: i32 = offset_of!(StubTable, binary_gte) as i32;
    pub const BINARY_EQ: i32 = offset_of!(StubTable, binary_eq) as i32;
    pub const BINARY_NE: i32 = offset_of!(StubTable, binary_ne) as i32;
    pub const BINARY_STRICT_EQ: i32 = offset_of!(StubTable, binary_strict_eq) as i32;
    pub const BINARY_STRICT_NE: i32 = offset_of!(StubTable, binary_strict_ne) as i32;
    pub const UNARY_NEG: i32 = offset_of!(StubTable, unary_neg) as i32;
    pub const UNARY_NOT: i32 = offset_of!(StubTable, unary_not) as i32;
    pub const UNARY_BITNOT: i32 = offset_of!(StubTable, unary_bitnot) as i32;
    pub const TO_BOOLEAN: i32 = offset_of!(StubTable, to_boolean) as i32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_table_is_at_offset_zero() {
        assert_eq!(std::mem::offset_of!(JitInvocation, stubs), 0);
    }

    #[test]
    fn test_stub_slots_are_pointer_sized() {
        assert_eq!(
            offsets::BINARY_SUBTRACT - offsets::BINARY_ADD,
            std::mem::size_of::<usize>() as i32
        );
        assert_eq!(
            offsets::TO_BOOLEAN,
            22 * std::mem::size_of::<usize>() as i32
        );
    }
}
