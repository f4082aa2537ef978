//! The host runtime library: Error, String.prototype, RegExp.
//!
//! Natives coerce their receiver and arguments, delegate to the pure
//! algorithms in `builtins`, and build heap results. Installation happens
//! once at engine bring-up.

use crate::context::{Context, RegexData};
use crate::dispatch::{Vm, VmResult};
use core_types::{EngineError, ErrorKind, JsError, ObjectHandle, Symbol, Value};
use memory_manager::{ClassTag, PropertyDescriptor};
use regex_engine::{RegexFlags, RegexProgram};

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).copied().unwrap_or(Value::UNDEFINED)
}

/// CheckObjectCoercible + ToString on the receiver.
fn this_string_units(vm: &mut Vm, ctx: &mut Context, this: Value) -> VmResult<Vec<u16>> {
    if this.is_null_or_undefined() {
        return Err(JsError::type_error(format!("{} has no properties", this.type_of())).into());
    }
    vm.to_string_units(ctx, this)
}

fn make_string(ctx: &mut Context, units: &[u16]) -> VmResult<Value> {
    Ok(ctx.new_string_value_from_units(units)?)
}

/// Array-like result object: indexed elements plus `length`.
fn make_array(ctx: &mut Context, elements: &[Value]) -> VmResult<Value> {
    let handle = ctx
        .heap
        .new_object(ClassTag::Array, Some(ctx.intrinsics.object_prototype))?;
    for (index, element) in elements.iter().enumerate() {
        ctx.heap.define_own_property(
            handle,
            Symbol::Index(index as u32),
            &PropertyDescriptor::data(*element),
        );
    }
    let length_key = ctx.symbols.defaults().length;
    ctx.heap.define_own_property(
        handle,
        length_key,
        &PropertyDescriptor::data_with(Value::from_i32(elements.len() as i32), true, false, false),
    );
    Ok(Value::from_object(handle))
}

fn optional_number(vm: &mut Vm, ctx: &mut Context, value: Value, default: f64) -> VmResult<f64> {
    if value.is_undefined() {
        Ok(default)
    } else {
        vm.to_number(ctx, value)
    }
}

fn regex_data_of(ctx: &Context, value: Value) -> Option<(RegexProgram, u32)> {
    if !value.is_object() {
        return None;
    }
    ctx.heap
        .object(value.as_object())
        .internal
        .as_ref()
        .and_then(|data| data.downcast_ref::<RegexData>())
        .map(|data| (data.program.clone(), data.last_index))
}

fn set_regex_last_index(ctx: &mut Context, value: Value, last_index: u32) {
    if let Some(data) = ctx
        .heap
        .object_mut(value.as_object())
        .internal
        .as_mut()
        .and_then(|data| data.downcast_mut::<RegexData>())
    {
        data.last_index = last_index;
    }
    let key = ctx.symbols.intern("lastIndex");
    let object = ctx.heap.object_mut(value.as_object());
    if let Some(own) = object.get_own(key) {
        object.set_slot_value(
            own.slot,
            memory_manager::PropertySlot::Data(Value::from_i32(last_index as i32)),
        );
    }
}

// ---- Object.prototype ----

pub fn object_to_string(_vm: &mut Vm, ctx: &mut Context, this: Value, _args: &[Value]) -> VmResult<Value> {
    let text = if this.is_undefined() {
        "[object Undefined]"
    } else if this.is_null() {
        "[object Null]"
    } else if this.is_object() {
        match ctx.heap.object(this.as_object()).class() {
            ClassTag::Function => "[object Function]",
            ClassTag::Array => "[object Array]",
            ClassTag::Error => "[object Error]",
            ClassTag::String => "[object String]",
            ClassTag::Number => "[object Number]",
            ClassTag::Boolean => "[object Boolean]",
            ClassTag::RegExp => "[object RegExp]",
            ClassTag::Object => "[object Object]",
        }
    } else {
        "[object Object]"
    };
    Ok(ctx.new_string_value(text)?)
}

pub fn object_value_of(_vm: &mut Vm, _ctx: &mut Context, this: Value, _args: &[Value]) -> VmResult<Value> {
    Ok(this)
}

// ---- Error ----

macro_rules! error_constructor {
    ($name:ident, $kind:expr) => {
        pub fn $name(vm: &mut Vm, ctx: &mut Context, _this: Value, args: &[Value]) -> VmResult<Value> {
            let message = arg(args, 0);
            let message = if message.is_undefined() {
                None
            } else {
                Some(vm.to_display_string(ctx, message)?)
            };
            let handle = ctx.new_error_object($kind, message.as_deref())?;
            Ok(Value::from_object(handle))
        }
    };
}

error_constructor!(error_constructor, ErrorKind::Error);
error_constructor!(type_error_constructor, ErrorKind::TypeError);
error_constructor!(reference_error_constructor, ErrorKind::ReferenceError);
error_constructor!(syntax_error_constructor, ErrorKind::SyntaxError);
error_constructor!(range_error_constructor, ErrorKind::RangeError);
error_constructor!(uri_error_constructor, ErrorKind::URIError);
error_constructor!(eval_error_constructor, ErrorKind::EvalError);

pub fn error_to_string(vm: &mut Vm, ctx: &mut Context, this: Value, _args: &[Value]) -> VmResult<Value> {
    if !this.is_object() {
        return Err(JsError::type_error("Error.prototype.toString requires an object").into());
    }
    let name_key = ctx.symbols.defaults().name;
    let name_value = vm.get_property_value(ctx, this, name_key)?;
    let name = if name_value.is_undefined() {
        "Error".to_string()
    } else {
        vm.to_display_string(ctx, name_value)?
    };
    let message_key = ctx.symbols.defaults().message;
    let message_value = vm.get_property_value(ctx, this, message_key)?;
    let message = if message_value.is_undefined() {
        String::new()
    } else {
        vm.to_display_string(ctx, message_value)?
    };
    let text = builtins::error_to_string(&name, &message);
    Ok(ctx.new_string_value(&text)?)
}

// ---- String.prototype ----

pub fn string_char_at(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let position = optional_number(vm, ctx, arg(args, 0), 0.0)?;
    let index = if position.is_nan() { 0 } else { position as i64 };
    make_string(ctx, &builtins::char_at(&units, index))
}

pub fn string_char_code_at(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let position = optional_number(vm, ctx, arg(args, 0), 0.0)?;
    let index = if position.is_nan() { 0 } else { position as i64 };
    Ok(match builtins::char_code_at(&units, index) {
        Some(unit) => Value::from_i32(unit as i32),
        None => Value::from_f64(f64::NAN),
    })
}

pub fn string_index_of(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let needle = vm.to_string_units(ctx, arg(args, 0))?;
    let position = optional_number(vm, ctx, arg(args, 1), 0.0)?;
    Ok(match builtins::index_of(&units, &needle, position) {
        Some(index) => Value::from_i32(index as i32),
        None => Value::from_i32(-1),
    })
}

pub fn string_last_index_of(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let needle = vm.to_string_units(ctx, arg(args, 0))?;
    let position = optional_number(vm, ctx, arg(args, 1), f64::NAN)?;
    Ok(match builtins::last_index_of(&units, &needle, position) {
        Some(index) => Value::from_i32(index as i32),
        None => Value::from_i32(-1),
    })
}

pub fn string_slice(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let start = optional_number(vm, ctx, arg(args, 0), 0.0)?;
    let end = optional_number(vm, ctx, arg(args, 1), f64::INFINITY)?;
    make_string(ctx, &builtins::slice(&units, start, end))
}

pub fn string_substring(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let start = optional_number(vm, ctx, arg(args, 0), 0.0)?;
    let end = optional_number(vm, ctx, arg(args, 1), f64::INFINITY)?;
    make_string(ctx, &builtins::substring(&units, start, end))
}

pub fn string_substr(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let start = optional_number(vm, ctx, arg(args, 0), 0.0)?;
    let length = optional_number(vm, ctx, arg(args, 1), f64::INFINITY)?;
    make_string(ctx, &builtins::substr(&units, start, length))
}

pub fn string_repeat(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let count = optional_number(vm, ctx, arg(args, 0), 0.0)?;
    make_string(ctx, &builtins::repeat(&units, count))
}

pub fn string_trim(vm: &mut Vm, ctx: &mut Context, this: Value, _args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    make_string(ctx, &builtins::trim(&units))
}

pub fn string_concat(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let mut units = this_string_units(vm, ctx, this)?;
    for &argument in args {
        let more = vm.to_string_units(ctx, argument)?;
        units = builtins::concat(&units, &more);
    }
    make_string(ctx, &units)
}

pub fn string_to_upper_case(vm: &mut Vm, ctx: &mut Context, this: Value, _args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let upper = builtins::to_upper_case(&units, None, builtins::default_locale_hook);
    make_string(ctx, &upper)
}

pub fn string_to_lower_case(vm: &mut Vm, ctx: &mut Context, this: Value, _args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let lower = builtins::to_lower_case(&units, None, builtins::default_locale_hook);
    make_string(ctx, &lower)
}

pub fn string_to_locale_upper_case(
    vm: &mut Vm,
    ctx: &mut Context,
    this: Value,
    _args: &[Value],
) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let locale = ctx.default_locale.clone();
    let upper = builtins::to_upper_case(&units, locale.as_deref(), builtins::default_locale_hook);
    make_string(ctx, &upper)
}

pub fn string_to_locale_lower_case(
    vm: &mut Vm,
    ctx: &mut Context,
    this: Value,
    _args: &[Value],
) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let locale = ctx.default_locale.clone();
    let lower = builtins::to_lower_case(&units, locale.as_deref(), builtins::default_locale_hook);
    make_string(ctx, &lower)
}

pub fn string_split(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let separator = arg(args, 0);
    let limit_value = arg(args, 1);
    let limit = if limit_value.is_undefined() {
        u32::MAX
    } else {
        vm.to_uint32(ctx, limit_value)?
    };

    if separator.is_undefined() {
        let whole = make_string(ctx, &units)?;
        return make_array(ctx, &[whole]);
    }

    if let Some((program, _)) = regex_data_of(ctx, separator) {
        let pieces = builtins::split_with_regex(&units, &program, limit);
        let mut elements = Vec::with_capacity(pieces.len());
        for piece in pieces {
            elements.push(match piece {
                Some(piece) => make_string(ctx, &piece)?,
                None => Value::UNDEFINED,
            });
        }
        return make_array(ctx, &elements);
    }

    let separator_value = vm.to_string_value(ctx, separator)?;
    let this_handle = ctx.heap.new_string_from_units(&units)?;
    let parts = ctx
        .heap
        .string_split(this_handle, separator_value.as_string(), limit)?;
    let elements: Vec<Value> = parts.into_iter().map(Value::from_string).collect();
    make_array(ctx, &elements)
}

pub fn string_replace(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let units = this_string_units(vm, ctx, this)?;
    let pattern = arg(args, 0);
    let replacement = arg(args, 1);
    let replacement_is_function =
        replacement.is_object() && ctx.heap.object(replacement.as_object()).is_callable();

    if let Some((program, _)) = regex_data_of(ctx, pattern) {
        let source_value = make_string(ctx, &units)?;
        let mut failure: Option<crate::dispatch::ExecError> = None;
        let out = if replacement_is_function {
            builtins::replace_regex_with(&units, &program, |captures| {
                if failure.is_some() {
                    return Vec::new();
                }
                match call_function_replacer(vm, ctx, replacement, captures, &units, source_value) {
                    Ok(replaced) => replaced,
                    Err(error) => {
                        failure = Some(error);
                        Vec::new()
                    }
                }
            })
        } else {
            let template = vm.to_string_units(ctx, replacement)?;
            builtins::replace_regex(&units, &program, &template)
        };
        if let Some(error) = failure {
            return Err(error);
        }
        return make_string(ctx, &out);
    }

    // string pattern: first occurrence only
    let search = vm.to_string_units(ctx, pattern)?;
    if replacement_is_function {
        let Some(at) = builtins::index_of(&units, &search, 0.0) else {
            return make_string(ctx, &units);
        };
        let source_value = make_string(ctx, &units)?;
        let matched = make_string(ctx, &search)?;
        let result = vm.call_value(
            ctx,
            replacement,
            Value::UNDEFINED,
            &[matched, Value::from_i32(at as i32), source_value],
        )?;
        let replaced = vm.to_string_units(ctx, result)?;
        let mut out = Vec::with_capacity(units.len());
        out.extend_from_slice(&units[..at]);
        out.extend_from_slice(&replaced);
        out.extend_from_slice(&units[at + search.len()..]);
        return make_string(ctx, &out);
    }
    let template = vm.to_string_units(ctx, replacement)?;
    make_string(ctx, &builtins::replace_string(&units, &search, &template))
}

/// Function replacers receive `(match, cap1…, offset, source)`.
fn call_function_replacer(
    vm: &mut Vm,
    ctx: &mut Context,
    function: Value,
    captures: &[i32],
    input: &[u16],
    source: Value,
) -> VmResult<Vec<u16>> {
    let group_count = captures.len() / 2;
    let mut call_args = Vec::with_capacity(group_count + 2);
    for group in 0..group_count {
        let (lo, hi) = (captures[group * 2], captures[group * 2 + 1]);
        if lo < 0 || hi < 0 {
            call_args.push(Value::UNDEFINED);
        } else {
            call_args.push(make_string(ctx, &input[lo as usize..hi as usize])?);
        }
    }
    call_args.push(Value::from_i32(captures[0]));
    call_args.push(source);
    let result = vm.call_value(ctx, function, Value::UNDEFINED, &call_args)?;
    vm.to_string_units(ctx, result)
}

// ---- RegExp ----

pub fn regexp_constructor(vm: &mut Vm, ctx: &mut Context, _this: Value, args: &[Value]) -> VmResult<Value> {
    let pattern_value = arg(args, 0);
    let pattern = if pattern_value.is_undefined() {
        String::new()
    } else {
        vm.to_display_string(ctx, pattern_value)?
    };
    let flags_value = arg(args, 1);
    let flags_text = if flags_value.is_undefined() {
        String::new()
    } else {
        vm.to_display_string(ctx, flags_value)?
    };
    let flags = RegexFlags::parse(&flags_text)
        .ok_or_else(|| JsError::syntax_error(format!("invalid regex flags `{}`", flags_text)))?;
    let pattern_units: Vec<u16> = pattern.encode_utf16().collect();
    let program = regex_engine::compile_pattern(&pattern_units, flags)
        .map_err(|error| JsError::syntax_error(format!("invalid regular expression: {}", error)))?;
    let handle = ctx.new_regexp_object(&pattern, program)?;
    Ok(Value::from_object(handle))
}

pub fn regexp_exec(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let Some((program, last_index)) = regex_data_of(ctx, this) else {
        return Err(JsError::type_error("exec requires a RegExp receiver").into());
    };
    let input = vm.to_string_units(ctx, arg(args, 0))?;
    let global = program.flags.global();
    let start = if global { last_index as usize } else { 0 };

    if start > input.len() {
        set_regex_last_index(ctx, this, 0);
        return Ok(Value::NULL);
    }
    let Some(captures) = program.search(&input, start) else {
        if global {
            set_regex_last_index(ctx, this, 0);
        }
        return Ok(Value::NULL);
    };
    if global {
        set_regex_last_index(ctx, this, captures[1] as u32);
    }

    let group_count = captures.len() / 2;
    let mut elements = Vec::with_capacity(group_count);
    for group in 0..group_count {
        let (lo, hi) = (captures[group * 2], captures[group * 2 + 1]);
        if lo < 0 || hi < 0 {
            elements.push(Value::UNDEFINED);
        } else {
            elements.push(make_string(ctx, &input[lo as usize..hi as usize])?);
        }
    }
    let result = make_array(ctx, &elements)?;
    let handle = result.as_object();
    let index_key = ctx.symbols.intern("index");
    ctx.heap.define_own_property(
        handle,
        index_key,
        &PropertyDescriptor::data(Value::from_i32(captures[0])),
    );
    let input_value = make_string(ctx, &input)?;
    let input_key = ctx.symbols.intern("input");
    ctx.heap
        .define_own_property(handle, input_key, &PropertyDescriptor::data(input_value));
    Ok(result)
}

pub fn regexp_test(vm: &mut Vm, ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let result = regexp_exec(vm, ctx, this, args)?;
    Ok(Value::from_bool(!result.is_null()))
}

// ---- installation ----

fn define_method(
    ctx: &mut Context,
    target: ObjectHandle,
    name: &str,
    native: crate::context::NativeFn,
) -> Result<(), EngineError> {
    let function = ctx.register_native(native)?;
    let key = ctx.intern(name);
    ctx.heap.define_own_property(
        target,
        key,
        &PropertyDescriptor::data_with(Value::from_object(function), true, false, true),
    );
    Ok(())
}

fn define_data(
    ctx: &mut Context,
    target: ObjectHandle,
    name: &str,
    value: Value,
) -> Result<(), EngineError> {
    let key = ctx.intern(name);
    ctx.heap.define_own_property(
        target,
        key,
        &PropertyDescriptor::data_with(value, true, false, true),
    );
    Ok(())
}

/// Install the runtime library onto the fresh context. Called exactly once
/// at engine bring-up.
pub fn install(ctx: &mut Context) -> Result<(), EngineError> {
    // Object.prototype
    let object_prototype = ctx.intrinsics.object_prototype;
    define_method(ctx, object_prototype, "toString", object_to_string)?;
    define_method(ctx, object_prototype, "valueOf", object_value_of)?;

    // Error constructors and prototypes
    let kinds: [(&str, ErrorKind, crate::context::NativeFn); 7] = [
        ("Error", ErrorKind::Error, error_constructor),
        ("TypeError", ErrorKind::TypeError, type_error_constructor),
        (
            "ReferenceError",
            ErrorKind::ReferenceError,
            reference_error_constructor,
        ),
        ("SyntaxError", ErrorKind::SyntaxError, syntax_error_constructor),
        ("RangeError", ErrorKind::RangeError, range_error_constructor),
        ("URIError", ErrorKind::URIError, uri_error_constructor),
        ("EvalError", ErrorKind::EvalError, eval_error_constructor),
    ];
    for (name, kind, constructor) in kinds {
        let prototype = ctx.intrinsics.error_prototype_for(kind);
        let name_value = ctx.new_string_value(name)?;
        define_data(ctx, prototype, "name", name_value)?;
        let empty = ctx.new_string_value("")?;
        define_data(ctx, prototype, "message", empty)?;

        let constructor_object = ctx.register_native(constructor)?;
        let prototype_key = ctx.symbols.defaults().prototype;
        ctx.heap.define_own_property(
            constructor_object,
            prototype_key,
            &PropertyDescriptor::data_with(Value::from_object(prototype), false, false, false),
        );
        let constructor_key = ctx.symbols.defaults().constructor;
        ctx.heap.define_own_property(
            prototype,
            constructor_key,
            &PropertyDescriptor::data_with(
                Value::from_object(constructor_object),
                true,
                false,
                true,
            ),
        );
        let global_key = ctx.intern(name);
        ctx.heap.define_own_property(
            ctx.global,
            global_key,
            &PropertyDescriptor::data_with(Value::from_object(constructor_object), true, false, true),
        );
    }
    let error_prototype = ctx.intrinsics.error_prototype;
    define_method(ctx, error_prototype, "toString", error_to_string)?;

    // String.prototype
    let string_prototype = ctx.intrinsics.string_prototype;
    let methods: [(&str, crate::context::NativeFn); 16] = [
        ("charAt", string_char_at),
        ("charCodeAt", string_char_code_at),
        ("indexOf", string_index_of),
        ("lastIndexOf", string_last_index_of),
        ("slice", string_slice),
        ("substring", string_substring),
        ("substr", string_substr),
        ("repeat", string_repeat),
        ("trim", string_trim),
        ("concat", string_concat),
        ("split", string_split),
        ("replace", string_replace),
        ("toUpperCase", string_to_upper_case),
        ("toLowerCase", string_to_lower_case),
        ("toLocaleUpperCase", string_to_locale_upper_case),
        ("toLocaleLowerCase", string_to_locale_lower_case),
    ];
    for (name, native) in methods {
        define_method(ctx, string_prototype, name, native)?;
    }

    // RegExp
    let regexp_prototype = ctx.intrinsics.regexp_prototype;
    define_method(ctx, regexp_prototype, "exec", regexp_exec)?;
    define_method(ctx, regexp_prototype, "test", regexp_test)?;
    let regexp_constructor_object = ctx.register_native(regexp_constructor)?;
    let prototype_key = ctx.symbols.defaults().prototype;
    ctx.heap.define_own_property(
        regexp_constructor_object,
        prototype_key,
        &PropertyDescriptor::data_with(Value::from_object(regexp_prototype), false, false, false),
    );
    let global_key = ctx.intern("RegExp");
    ctx.heap.define_own_property(
        ctx.global,
        global_key,
        &PropertyDescriptor::data_with(
            Value::from_object(regexp_constructor_object),
            true,
            false,
            true,
        ),
    );
    Ok(())
}
