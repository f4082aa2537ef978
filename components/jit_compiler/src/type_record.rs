//! Per-register abstract values for the template compiler.
//!
//! A `TypeEntry` is a lattice element: an optional kind plus an optional
//! constant. Transfer functions fold constant inputs to constant outputs
//! and propagate "cannot be int32" taint so the emitter can skip guards it
//! knows will fail.

use core_types::{double_to_int32, double_to_uint32, Value};

/// Abstract kind of a register's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Unknown,
    Int32,
    Double,
    /// int32 or double
    Number,
    String,
    Boolean,
    Object,
    Undefined,
    Null,
}

impl TypeKind {
    /// True when a value of this kind can never carry the int32 tag.
    pub fn is_not_int32(self) -> bool {
        matches!(
            self,
            TypeKind::Double
                | TypeKind::String
                | TypeKind::Boolean
                | TypeKind::Object
                | TypeKind::Undefined
                | TypeKind::Null
        )
    }

    fn is_number(self) -> bool {
        matches!(self, TypeKind::Int32 | TypeKind::Double | TypeKind::Number)
    }
}

/// Lattice element tracked per register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeEntry {
    kind: TypeKind,
    constant: Option<Value>,
}

impl TypeEntry {
    pub const UNKNOWN: TypeEntry = TypeEntry {
        kind: TypeKind::Unknown,
        constant: None,
    };

    pub fn of_kind(kind: TypeKind) -> TypeEntry {
        TypeEntry {
            kind,
            constant: None,
        }
    }

    pub fn constant(value: Value) -> TypeEntry {
        let kind = if value.is_int32() {
            TypeKind::Int32
        } else if value.is_double() {
            TypeKind::Double
        } else if value.is_boolean() {
            TypeKind::Boolean
        } else if value.is_string() {
            TypeKind::String
        } else if value.is_object() {
            TypeKind::Object
        } else if value.is_null() {
            TypeKind::Null
        } else {
            TypeKind::Undefined
        };
        TypeEntry {
            kind,
            constant: Some(value),
        }
    }

    pub fn kind(self) -> TypeKind {
        self.kind
    }

    pub fn is_constant(self) -> bool {
        self.constant.is_some()
    }

    pub fn constant_value(self) -> Option<Value> {
        self.constant
    }

    pub fn is_constant_int32(self) -> bool {
        matches!(self.constant, Some(v) if v.is_int32())
    }

    pub fn constant_int32(self) -> i32 {
        self.constant.expect("constant entry").as_int32()
    }

    fn constant_number(self) -> Option<f64> {
        match self.constant {
            Some(v) if v.is_number() => Some(v.number()),
            _ => None,
        }
    }

    // transfer functions

    pub fn add(lhs: TypeEntry, rhs: TypeEntry) -> TypeEntry {
        if let (Some(l), Some(r)) = (lhs.constant_number(), rhs.constant_number()) {
            return TypeEntry::constant(Value::from_number(l + r));
        }
        if lhs.kind == TypeKind::String || rhs.kind == TypeKind::String {
            return TypeEntry::of_kind(TypeKind::String);
        }
        if lhs.kind.is_number() && rhs.kind.is_number() {
            return TypeEntry::of_kind(TypeKind::Number);
        }
        TypeEntry::UNKNOWN
    }

    pub fn subtract(lhs: TypeEntry, rhs: TypeEntry) -> TypeEntry {
        if let (Some(l), Some(r)) = (lhs.constant_number(), rhs.constant_number()) {
            return TypeEntry::constant(Value::from_number(l - r));
        }
        TypeEntry::of_kind(TypeKind::Number)
    }

    pub fn multiply(lhs: TypeEntry, rhs: TypeEntry) -> TypeEntry {
        if let (Some(l), Some(r)) = (lhs.constant_number(), rhs.constant_number()) {
            return TypeEntry::constant(Value::from_number(l * r));
        }
        TypeEntry::of_kind(TypeKind::Number)
    }

    pub fn divide(lhs: TypeEntry, rhs: TypeEntry) -> TypeEntry {
        if let (Some(l), Some(r)) = (lhs.constant_number(), rhs.constant_number()) {
            return TypeEntry::constant(Value::from_number(l / r));
        }
        TypeEntry::of_kind(TypeKind::Number)
    }

    pub fn modulo(lhs: TypeEntry, rhs: TypeEntry) -> TypeEntry {
        if let (Some(l), Some(r)) = (lhs.constant_number(), rhs.constant_number()) {
            return TypeEntry::constant(Value::from_number(l % r));
        }
        TypeEntry::of_kind(TypeKind::Number)
    }

    fn bitwise(lhs: TypeEntry, rhs: TypeEntry, op: fn(i32, i32) -> i32) -> TypeEntry {
        if let (Some(l), Some(r)) = (lhs.constant_number(), rhs.constant_number()) {
            return TypeEntry::constant(Value::from_i32(op(
                double_to_int32(l),
                double_to_int32(r),
            )));
        }
        TypeEntry::of_kind(TypeKind::Int32)
    }

    pub fn bitwise_and(lhs: TypeEntry, rhs: TypeEntry) -> TypeEntry {
        Self::bitwise(lhs, rhs, |l, r| l & r)
    }

    pub fn bitwise_or(lhs: TypeEntry, rhs: TypeEntry) -> TypeEntry {
        Self::bitwise(lhs, rhs, |l, r| l | r)
    }

    pub fn bitwise_xor(lhs: TypeEntry, rhs: TypeEntry) -> TypeEntry {
        Self::bitwise(lhs, rhs, |l, r| l ^ r)
    }

    pub fn lshift(lhs: TypeEntry, rhs: TypeEntry) -> TypeEntry {
        Self::bitwise(lhs, rhs, |l, r| l.wrapping_shl(r as u32 & 0x1F))
    }

    pub fn rshift(lhs: TypeEntry, rhs: TypeEntry) -> TypeEntry {
        Self::bitwise(lhs, rhs, |l, r| l.wrapping_shr(r as u32 & 0x1F))
    }

    /// `>>>` produces a uint32, which may not fit in int32.
    pub fn rshift_logical(lhs: TypeEntry, rhs: TypeEntry) -> TypeEntry {
        if let (Some(l), Some(r)) = (lhs.constant_number(), rhs.constant_number()) {
            let shifted = double_to_uint32(l).wrapping_shr(double_to_uint32(r) & 0x1F);
            return TypeEntry::constant(Value::from_number(shifted as f64));
        }
        TypeEntry::of_kind(TypeKind::Number)
    }
}

/// The per-register record maintained across a basic block.
#[derive(Debug)]
pub struct TypeRecord {
    entries: Vec<TypeEntry>,
}

impl TypeRecord {
    pub fn new(register_count: usize) -> Self {
        TypeRecord {
            entries: vec![TypeEntry::UNKNOWN; register_count],
        }
    }

    pub fn get(&self, register: i16) -> TypeEntry {
        self.entries
            .get(register as usize)
            .copied()
            .unwrap_or(TypeEntry::UNKNOWN)
    }

    pub fn put(&mut self, register: i16, entry: TypeEntry) {
        if let Some(slot) = self.entries.get_mut(register as usize) {
            *slot = entry;
        }
    }

    /// Forget everything. Called at join points, where another path may
    /// have produced different values.
    pub fn clear(&mut self) {
        self.entries.fill(TypeEntry::UNKNOWN);
    }
}
