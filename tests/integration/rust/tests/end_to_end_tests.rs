//! The literal end-to-end scenarios, driven through the embedding API.

use bytecode_system::{Chunk, ChunkBuilder, Constant, Opcode};
use core_types::Value;
use interpreter::Engine;

#[test]
fn test_s1_arithmetic_overflow() {
    let overflow_chunk = || {
        let mut b = ChunkBuilder::new(3);
        let max = b.add_constant(Constant::Number(2147483647.0));
        b.emit(Opcode::LoadConst, 0, max as i16, 0);
        b.emit(Opcode::LoadInt, 1, 1, 0);
        b.emit(Opcode::Add, 2, 0, 1);
        b.emit(Opcode::Return, 2, 0, 0);
        b.build()
    };

    let mut engine = Engine::new().unwrap();
    let f = engine.load_chunk(overflow_chunk()).unwrap();
    let result = engine.call(f, &[]).unwrap();
    assert!(result.is_double());
    assert_eq!(result.as_double(), 2147483648.0);

    // after JIT, the same result
    let mut jitted = Engine::new().unwrap();
    jitted.set_jit_threshold(1);
    let f = jitted.load_chunk(overflow_chunk()).unwrap();
    let jit_result = jitted.call(f, &[]).unwrap();
    assert_eq!(jit_result.bits(), result.bits());
}

#[test]
fn test_s2_logical_shift_boxing() {
    let mut engine = Engine::new().unwrap();
    let chunk: Chunk = {
        let mut b = ChunkBuilder::new(3);
        b.emit(Opcode::LoadInt, 0, -1, 0);
        b.emit(Opcode::LoadInt, 1, 0, 0);
        b.emit(Opcode::UShr, 2, 0, 1);
        b.emit(Opcode::Return, 2, 0, 0);
        b.build()
    };
    let f = engine.load_chunk(chunk).unwrap();
    let result = engine.call(f, &[]).unwrap();
    assert!(result.is_double());
    assert_eq!(result.as_double(), 4294967295.0);
}

#[test]
fn test_s3_regex_replace_with_back_refs() {
    let mut engine = Engine::new().unwrap();
    let receiver = engine.new_string("Java123").unwrap();
    let regexp = engine.new_regexp(r"(\w+?)(\d+)", "").unwrap();
    let template = engine.new_string("$2-$1").unwrap();
    let result = engine
        .call_method(receiver, "replace", &[regexp, template])
        .unwrap();
    assert_eq!(engine.to_display_string(result).unwrap(), "123-Java");
}

#[test]
fn test_s4_capturing_vs_non_capturing() {
    let mut engine = Engine::new().unwrap();
    let input = engine.new_string("ababab").unwrap();

    let re = engine.new_regexp("(?:ab)+", "").unwrap();
    let result = engine.call_method(re, "exec", &[input]).unwrap();
    let match0 = engine.get_element(result, 0).unwrap();
    assert_eq!(engine.to_display_string(match0).unwrap(), "ababab");
    let length = engine.get_property(result, "length").unwrap();
    assert_eq!(length, Value::from_i32(1));

    let re = engine.new_regexp("(ab)+", "").unwrap();
    let result = engine.call_method(re, "exec", &[input]).unwrap();
    let match0 = engine.get_element(result, 0).unwrap();
    let group1 = engine.get_element(result, 1).unwrap();
    assert_eq!(engine.to_display_string(match0).unwrap(), "ababab");
    assert_eq!(engine.to_display_string(group1).unwrap(), "ab");
}

#[test]
fn test_s5_grandfathered_language_tag() {
    let tag = builtins::scan_language_tag("i-klingon");
    assert!(tag.well_formed);
    assert_eq!(tag.grandfathered, Some(builtins::Grandfathered::Irregular));
}

#[test]
fn test_s6_error_to_string() {
    let mut engine = Engine::new().unwrap();
    let ctor = engine.get_global("Error").unwrap();
    let message = engine.new_string("x").unwrap();
    let error = engine.construct(ctor, &[message]).unwrap();

    let text = engine.call_method(error, "toString", &[]).unwrap();
    assert_eq!(engine.to_display_string(text).unwrap(), "Error: x");

    // name = "" yields the message, message = "" yields the name
    let empty = engine.new_string("").unwrap();
    engine.set_property(error, "name", empty).unwrap();
    let text = engine.call_method(error, "toString", &[]).unwrap();
    assert_eq!(engine.to_display_string(text).unwrap(), "x");

    let plain = engine.construct(ctor, &[]).unwrap();
    let text = engine.call_method(plain, "toString", &[]).unwrap();
    assert_eq!(engine.to_display_string(text).unwrap(), "Error");
}

#[test]
fn test_s9_serialized_chunk_roundtrip() {
    let mut b = ChunkBuilder::with_params(3, 2);
    b.add_constant(Constant::String("serialized".into()));
    b.emit(Opcode::Add, 2, 0, 1);
    b.emit(Opcode::Return, 2, 0, 0);
    let chunk = b.build();

    let bytes = chunk.to_bytes();
    let decoded = Chunk::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, chunk);

    let mut engine = Engine::new().unwrap();
    let f = engine.load_chunk_bytes(&bytes).unwrap();
    let result = engine
        .call(f, &[Value::from_i32(40), Value::from_i32(2)])
        .unwrap();
    assert_eq!(result, Value::from_i32(42));
}

#[test]
fn test_s10_string_methods() {
    let mut engine = Engine::new().unwrap();
    let s = engine.new_string("abcabc").unwrap();
    let needle = engine.new_string("b").unwrap();
    let found = engine
        .call_method(s, "indexOf", &[needle, Value::from_i32(2)])
        .unwrap();
    assert_eq!(found, Value::from_i32(4));

    let abc = engine.new_string("abc").unwrap();
    let repeated = engine
        .call_method(abc, "repeat", &[Value::from_i32(-1)])
        .unwrap();
    assert_eq!(engine.to_display_string(repeated).unwrap(), "");
}

#[test]
fn test_split_scenarios() {
    let mut engine = Engine::new().unwrap();
    let ab = engine.new_string("ab").unwrap();
    let empty = engine.new_string("").unwrap();

    // "ab".split("") == ["a", "b"]
    let parts = engine.call_method(ab, "split", &[empty]).unwrap();
    assert_eq!(engine.get_property(parts, "length").unwrap(), Value::from_i32(2));
    let first = engine.get_element(parts, 0).unwrap();
    assert_eq!(engine.to_display_string(first).unwrap(), "a");

    // "".split("") == []
    let parts = engine.call_method(empty, "split", &[empty]).unwrap();
    assert_eq!(engine.get_property(parts, "length").unwrap(), Value::from_i32(0));

    // regex split keeps capture groups
    let csv = engine.new_string("a1b2c").unwrap();
    let re = engine.new_regexp(r"(\d)", "").unwrap();
    let parts = engine.call_method(csv, "split", &[re]).unwrap();
    assert_eq!(engine.get_property(parts, "length").unwrap(), Value::from_i32(5));
    let second = engine.get_element(parts, 1).unwrap();
    assert_eq!(engine.to_display_string(second).unwrap(), "1");
}

#[test]
fn test_global_regex_advances_last_index() {
    let mut engine = Engine::new().unwrap();
    let re = engine.new_regexp("a", "g").unwrap();
    let input = engine.new_string("aa").unwrap();

    let first = engine.call_method(re, "exec", &[input]).unwrap();
    assert_eq!(engine.get_property(first, "index").unwrap(), Value::from_i32(0));
    let second = engine.call_method(re, "exec", &[input]).unwrap();
    assert_eq!(engine.get_property(second, "index").unwrap(), Value::from_i32(1));
    let third = engine.call_method(re, "exec", &[input]).unwrap();
    assert!(third.is_null());
}

#[test]
fn test_locale_case_conversion_through_engine() {
    let mut engine = Engine::new().unwrap();
    engine.context_mut().default_locale = Some("tr".to_string());
    let i = engine.new_string("i").unwrap();
    let upper = engine.call_method(i, "toLocaleUpperCase", &[]).unwrap();
    assert_eq!(engine.to_display_string(upper).unwrap(), "\u{0130}");
    let plain = engine.call_method(i, "toUpperCase", &[]).unwrap();
    assert_eq!(engine.to_display_string(plain).unwrap(), "I");
}
