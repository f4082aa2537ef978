//! Generic slow paths: coercion, concatenation, equality, relational
//! comparison.
//!
//! These are the semantics behind both the interpreter's non-int32 cases
//! and the JIT's runtime stubs. Locally recoverable conditions (int32
//! overflow, cache misses) never reach here as errors; only genuine script
//! errors propagate.

use crate::context::Context;
use crate::dispatch::{ExecError, Vm, VmResult};
use core_types::{
    double_to_int32, double_to_uint32, number_to_string, JsError, Symbol, Value,
};
use std::cmp::Ordering;

/// Preferred type for ToPrimitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Number,
    String,
}

impl Vm {
    /// ToPrimitive: invoke `valueOf`/`toString` on objects per the hint
    /// order; primitives pass through.
    pub fn to_primitive(&mut self, ctx: &mut Context, value: Value, hint: Hint) -> VmResult<Value> {
        if !value.is_object() {
            return Ok(value);
        }
        let (first, second) = {
            let defaults = ctx.symbols.defaults();
            match hint {
                Hint::Number => (defaults.value_of, defaults.to_string),
                Hint::String => (defaults.to_string, defaults.value_of),
            }
        };
        for key in [first, second] {
            let method = self.get_property_value(ctx, value, key)?;
            if method.is_object() && ctx.heap.object(method.as_object()).is_callable() {
                let result = self.call_value(ctx, method, value, &[])?;
                if !result.is_object() {
                    return Ok(result);
                }
            }
        }
        Err(JsError::type_error("cannot convert object to primitive value").into())
    }

    /// ToNumber.
    pub fn to_number(&mut self, ctx: &mut Context, value: Value) -> VmResult<f64> {
        if value.is_int32() {
            return Ok(value.as_int32() as f64);
        }
        if value.is_double() {
            return Ok(value.as_double());
        }
        if value.is_boolean() {
            return Ok(if value.as_boolean() { 1.0 } else { 0.0 });
        }
        if value.is_null() {
            return Ok(0.0);
        }
        if value.is_undefined() {
            return Ok(f64::NAN);
        }
        if value.is_string() {
            let units = ctx.heap.string_units(value.as_string());
            return Ok(string_to_number(&units));
        }
        let primitive = self.to_primitive(ctx, value, Hint::Number)?;
        self.to_number(ctx, primitive)
    }

    pub fn to_int32(&mut self, ctx: &mut Context, value: Value) -> VmResult<i32> {
        if value.is_int32() {
            return Ok(value.as_int32());
        }
        Ok(double_to_int32(self.to_number(ctx, value)?))
    }

    pub fn to_uint32(&mut self, ctx: &mut Context, value: Value) -> VmResult<u32> {
        if value.is_int32() && value.as_int32() >= 0 {
            return Ok(value.as_int32() as u32);
        }
        Ok(double_to_uint32(self.to_number(ctx, value)?))
    }

    /// ToString, as UTF-16 units.
    pub fn to_string_units(&mut self, ctx: &mut Context, value: Value) -> VmResult<Vec<u16>> {
        if value.is_string() {
            return Ok(ctx.heap.string_units(value.as_string()));
        }
        let text = if value.is_int32() {
            value.as_int32().to_string()
        } else if value.is_double() {
            number_to_string(value.as_double())
        } else if value.is_boolean() {
            if value.as_boolean() { "true" } else { "false" }.to_string()
        } else if value.is_null() {
            "null".to_string()
        } else if value.is_undefined() {
            "undefined".to_string()
        } else {
            let primitive = self.to_primitive(ctx, value, Hint::String)?;
            return self.to_string_units(ctx, primitive);
        };
        Ok(text.encode_utf16().collect())
    }

    /// ToString into a heap string value.
    pub fn to_string_value(&mut self, ctx: &mut Context, value: Value) -> VmResult<Value> {
        if value.is_string() {
            return Ok(value);
        }
        let units = self.to_string_units(ctx, value)?;
        Ok(ctx.new_string_value_from_units(&units)?)
    }

    /// ToString for diagnostics and the embedder.
    pub fn to_display_string(&mut self, ctx: &mut Context, value: Value) -> VmResult<String> {
        let units = self.to_string_units(ctx, value)?;
        Ok(String::from_utf16_lossy(&units))
    }

    /// ToBoolean, resolving string length through the heap.
    pub fn boolean_of(&self, ctx: &Context, value: Value) -> bool {
        if value.is_string() {
            return ctx.heap.string_len(value.as_string()) > 0;
        }
        value.to_boolean()
    }

    /// ToPropertyKey: index values become index symbols directly.
    pub fn to_property_key(&mut self, ctx: &mut Context, value: Value) -> VmResult<Symbol> {
        if value.is_int32() && value.as_int32() >= 0 {
            return Ok(Symbol::Index(value.as_int32() as u32));
        }
        let text = self.to_display_string(ctx, value)?;
        Ok(ctx.symbols.intern(&text))
    }

    /// The generic `+`: ToPrimitive both sides, concatenate when either is
    /// a string, numeric addition otherwise.
    pub fn generic_add(&mut self, ctx: &mut Context, lhs: Value, rhs: Value) -> VmResult<Value> {
        let lprim = self.to_primitive(ctx, lhs, Hint::Number)?;
        // spill across the second ToPrimitive, which can run script and
        // collect at a safepoint
        let rprim = self.with_root(lprim, |vm| vm.to_primitive(ctx, rhs, Hint::Number))?;
        if lprim.is_string() || rprim.is_string() {
            let left = self.to_string_value(ctx, lprim)?;
            let right = self.to_string_value(ctx, rprim)?;
            let joined = ctx.heap.concat_strings(left.as_string(), right.as_string())?;
            return Ok(Value::from_string(joined));
        }
        let l = self.to_number(ctx, lprim)?;
        let r = self.to_number(ctx, rprim)?;
        Ok(Value::from_number(l + r))
    }

    /// Strict equality (`===`), comparing string content.
    pub fn strict_equals(&mut self, ctx: &mut Context, lhs: Value, rhs: Value) -> bool {
        match lhs.strict_equals_bits(rhs) {
            Some(result) => result,
            None => ctx.heap.string_eq(lhs.as_string(), rhs.as_string()),
        }
    }

    /// Loose equality (`==`).
    pub fn loose_equals(&mut self, ctx: &mut Context, lhs: Value, rhs: Value) -> VmResult<bool> {
        if lhs.is_number() && rhs.is_number() {
            return Ok(lhs.number() == rhs.number());
        }
        if lhs.is_string() && rhs.is_string() {
            return Ok(ctx.heap.string_eq(lhs.as_string(), rhs.as_string()));
        }
        if lhs.is_null_or_undefined() && rhs.is_null_or_undefined() {
            return Ok(true);
        }
        if lhs.is_null_or_undefined() || rhs.is_null_or_undefined() {
            return Ok(false);
        }
        if lhs.is_boolean() {
            let n = Value::from_number(if lhs.as_boolean() { 1.0 } else { 0.0 });
            return self.loose_equals(ctx, n, rhs);
        }
        if rhs.is_boolean() {
            let n = Value::from_number(if rhs.as_boolean() { 1.0 } else { 0.0 });
            return self.loose_equals(ctx, lhs, n);
        }
        if lhs.is_object() && (rhs.is_number() || rhs.is_string()) {
            let prim = self.to_primitive(ctx, lhs, Hint::Number)?;
            return self.loose_equals(ctx, prim, rhs);
        }
        if rhs.is_object() && (lhs.is_number() || lhs.is_string()) {
            let prim = self.to_primitive(ctx, rhs, Hint::Number)?;
            return self.loose_equals(ctx, lhs, prim);
        }
        if lhs.is_number() && rhs.is_string() {
            let r = self.to_number(ctx, rhs)?;
            return Ok(lhs.number() == r);
        }
        if lhs.is_string() && rhs.is_number() {
            let l = self.to_number(ctx, lhs)?;
            return Ok(l == rhs.number());
        }
        Ok(lhs.bits() == rhs.bits())
    }

    /// Abstract relational comparison. `None` means incomparable (NaN).
    pub fn compare_values(
        &mut self,
        ctx: &mut Context,
        lhs: Value,
        rhs: Value,
    ) -> VmResult<Option<Ordering>> {
        let lprim = self.to_primitive(ctx, lhs, Hint::Number)?;
        let rprim = self.with_root(lprim, |vm| vm.to_primitive(ctx, rhs, Hint::Number))?;
        if lprim.is_string() && rprim.is_string() {
            return Ok(Some(
                ctx.heap.string_cmp(lprim.as_string(), rprim.as_string()),
            ));
        }
        let l = self.to_number(ctx, lprim)?;
        let r = self.to_number(ctx, rprim)?;
        Ok(l.partial_cmp(&r))
    }

    pub fn type_error(message: &str) -> ExecError {
        JsError::type_error(message).into()
    }
}

/// StringToNumber: whitespace-trimmed decimal, hex with `0x`, empty string
/// is zero.
pub fn string_to_number(units: &[u16]) -> f64 {
    let text: String = String::from_utf16_lossy(units);
    let trimmed = text.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '\u{FEFF}' | '\u{2028}' | '\u{2029}')
    });
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return match u64::from_str_radix(hex, 16) {
            Ok(v) => v as f64,
            Err(_) => f64::NAN,
        };
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number(&units("42")), 42.0);
        assert_eq!(string_to_number(&units("  3.5\t")), 3.5);
        assert_eq!(string_to_number(&units("")), 0.0);
        assert_eq!(string_to_number(&units("0x10")), 16.0);
        assert_eq!(string_to_number(&units("-Infinity")), f64::NEG_INFINITY);
        assert!(string_to_number(&units("12abc")).is_nan());
    }
}
