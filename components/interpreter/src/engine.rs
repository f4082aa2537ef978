//! The embedding API.
//!
//! An engine owns one context and one VM. Values cross the boundary as
//! tagged words; chunks are loaded into function slots and called by
//! index or as function objects.

use crate::context::{Context, NativeFn};
use crate::dispatch::{ExecError, Vm, VmResult};
use bytecode_system::Chunk;
use core_types::{EngineError, Symbol, Value};
use memory_manager::{GcStats, PropertyDescriptor};

pub struct Engine {
    ctx: Context,
    vm: Vm,
}

impl Engine {
    /// Bring up an engine: heap, intern table, intrinsics and the runtime
    /// library.
    pub fn new() -> Result<Engine, EngineError> {
        let mut ctx = Context::new()?;
        crate::runtime::install(&mut ctx)?;
        Ok(Engine { ctx, vm: Vm::new() })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Load source that has already been lowered to bytecode. Returns the
    /// function index.
    pub fn load_chunk(&mut self, chunk: Chunk) -> Result<u32, EngineError> {
        self.ctx.load_chunk(chunk)
    }

    /// Load a serialized chunk.
    pub fn load_chunk_bytes(&mut self, bytes: &[u8]) -> Result<u32, EngineError> {
        let chunk = Chunk::from_bytes(bytes)
            .map_err(|error| EngineError::InvalidBytecode(error.to_string()))?;
        self.load_chunk(chunk)
    }

    /// Call a loaded function with values.
    pub fn call(&mut self, function: u32, args: &[Value]) -> VmResult<Value> {
        self.vm
            .run_function(&mut self.ctx, function, Value::UNDEFINED, args)
    }

    /// Call an arbitrary callable value.
    pub fn call_value(&mut self, callee: Value, this: Value, args: &[Value]) -> VmResult<Value> {
        self.vm.call_value(&mut self.ctx, callee, this, args)
    }

    /// `new callee(...)`.
    pub fn construct(&mut self, callee: Value, args: &[Value]) -> VmResult<Value> {
        self.vm.construct(&mut self.ctx, callee, args)
    }

    pub fn get_global(&mut self, name: &str) -> Option<Value> {
        self.ctx.get_global(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.ctx.set_global(name, value)
    }

    pub fn intern(&mut self, name: &str) -> Symbol {
        self.ctx.intern(name)
    }

    /// Register a native function under a global name.
    pub fn register_global_native(&mut self, name: &str, f: NativeFn) -> Result<(), EngineError> {
        let function = self.ctx.register_native(f)?;
        self.ctx.set_global(name, Value::from_object(function));
        Ok(())
    }

    pub fn new_string(&mut self, s: &str) -> Result<Value, EngineError> {
        self.ctx.new_string_value(s)
    }

    /// Compile a regex literal into a RegExp value.
    pub fn new_regexp(&mut self, pattern: &str, flags: &str) -> VmResult<Value> {
        let pattern_value = self.new_string(pattern)?;
        let flags_value = self.new_string(flags)?;
        crate::runtime::regexp_constructor(
            &mut self.vm,
            &mut self.ctx,
            Value::UNDEFINED,
            &[pattern_value, flags_value],
        )
    }

    /// DefineOwnProperty with the caller-supplied strictness: rejections
    /// return false, or raise a TypeError when `strict`.
    pub fn define_property(
        &mut self,
        object: Value,
        name: &str,
        descriptor: &PropertyDescriptor,
        strict: bool,
    ) -> VmResult<bool> {
        if !object.is_object() {
            return Err(Vm::type_error("cannot define a property on a primitive"));
        }
        let key = self.ctx.intern(name);
        let accepted = self
            .ctx
            .heap
            .define_own_property(object.as_object(), key, descriptor);
        if !accepted && strict {
            return Err(Vm::type_error(&format!("cannot redefine property `{}`", name)));
        }
        Ok(accepted)
    }

    /// Property read on any value, accessors included.
    pub fn get_property(&mut self, receiver: Value, name: &str) -> VmResult<Value> {
        let key = self.ctx.intern(name);
        self.vm.get_property_value(&mut self.ctx, receiver, key)
    }

    /// Indexed property read.
    pub fn get_element(&mut self, receiver: Value, index: u32) -> VmResult<Value> {
        self.vm
            .get_property_value(&mut self.ctx, receiver, Symbol::Index(index))
    }

    /// Property write on any value.
    pub fn set_property(&mut self, receiver: Value, name: &str, value: Value) -> VmResult<()> {
        let key = self.ctx.intern(name);
        self.vm.set_property_value(&mut self.ctx, receiver, key, value)
    }

    /// Look up a method and call it with the receiver as `this`.
    pub fn call_method(&mut self, receiver: Value, name: &str, args: &[Value]) -> VmResult<Value> {
        let method = self.get_property(receiver, name)?;
        self.call_value(method, receiver, args)
    }

    /// Drive a collection now.
    pub fn collect_garbage(&mut self) {
        self.vm.collect_garbage(&mut self.ctx);
    }

    pub fn gc_stats(&self) -> GcStats {
        self.ctx.heap.stats()
    }

    /// ToString a value for the embedder.
    pub fn to_display_string(&mut self, value: Value) -> VmResult<String> {
        self.vm.to_display_string(&mut self.ctx, value)
    }

    pub fn set_jit_threshold(&mut self, threshold: u64) {
        self.vm.set_jit_threshold(threshold);
    }

    pub fn set_jit_enabled(&mut self, enabled: bool) {
        self.vm.set_jit_enabled(enabled);
    }

    pub fn compiled_function_count(&self) -> usize {
        self.vm.compiled_function_count()
    }

    /// Report an execution failure as a displayable message.
    pub fn describe_error(&mut self, error: &ExecError) -> String {
        match error {
            ExecError::Script(script) => match script.thrown {
                Some(value) => self
                    .to_display_string(value)
                    .unwrap_or_else(|_| "uncaught exception".to_string()),
                None => script.to_string(),
            },
            ExecError::Engine(engine) => engine.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode_system::{ChunkBuilder, Constant, Opcode};

    fn engine() -> Engine {
        Engine::new().unwrap()
    }

    /// `return <lhs> <op> <rhs>` over int constants.
    fn binary_chunk(op: Opcode, lhs: i16, rhs: i16) -> Chunk {
        let mut b = ChunkBuilder::new(3);
        b.emit(Opcode::LoadInt, 0, lhs, 0);
        b.emit(Opcode::LoadInt, 1, rhs, 0);
        b.emit(op, 2, 0, 1);
        b.emit(Opcode::Return, 2, 0, 0);
        b.build()
    }

    #[test]
    fn test_simple_arithmetic() {
        let mut engine = engine();
        let f = engine.load_chunk(binary_chunk(Opcode::Add, 20, 22)).unwrap();
        assert_eq!(engine.call(f, &[]).unwrap(), Value::from_i32(42));
    }

    #[test]
    fn test_scenario_s1_overflow_add() {
        // 2147483647 + 1 → 2147483648 as a double
        let mut engine = engine();
        let mut b = ChunkBuilder::new(3);
        let max = b.add_constant(Constant::Number(2147483647.0));
        b.emit(Opcode::LoadConst, 0, max as i16, 0);
        b.emit(Opcode::LoadInt, 1, 1, 0);
        b.emit(Opcode::Add, 2, 0, 1);
        b.emit(Opcode::Return, 2, 0, 0);
        let f = engine.load_chunk(b.build()).unwrap();

        let result = engine.call(f, &[]).unwrap();
        assert!(result.is_double());
        assert_eq!(result.as_double(), 2147483648.0);
    }

    #[test]
    fn test_scenario_s2_logical_shift() {
        // (-1) >>> 0 → 4294967295 as a double
        let mut engine = engine();
        let f = engine.load_chunk(binary_chunk(Opcode::UShr, -1, 0)).unwrap();
        let result = engine.call(f, &[]).unwrap();
        assert!(result.is_double());
        assert_eq!(result.as_double(), 4294967295.0);
    }

    #[test]
    fn test_string_concat_through_add() {
        let mut engine = engine();
        let mut b = ChunkBuilder::new(3);
        let hello = b.add_constant(Constant::String("hello ".into()));
        let world = b.add_constant(Constant::String("world".into()));
        b.emit(Opcode::LoadConst, 0, hello as i16, 0);
        b.emit(Opcode::LoadConst, 1, world as i16, 0);
        b.emit(Opcode::Add, 2, 0, 1);
        b.emit(Opcode::Return, 2, 0, 0);
        let f = engine.load_chunk(b.build()).unwrap();

        let result = engine.call(f, &[]).unwrap();
        assert_eq!(engine.to_display_string(result).unwrap(), "hello world");
    }

    #[test]
    fn test_arguments_and_locals() {
        // fn(a, b) { return a * b } with args in the first registers
        let mut engine = engine();
        let mut b = ChunkBuilder::with_params(3, 2);
        b.emit(Opcode::Mul, 2, 0, 1);
        b.emit(Opcode::Return, 2, 0, 0);
        let f = engine.load_chunk(b.build()).unwrap();

        let result = engine
            .call(f, &[Value::from_i32(6), Value::from_i32(7)])
            .unwrap();
        assert_eq!(result, Value::from_i32(42));
    }

    #[test]
    fn test_loop_sums() {
        // sum 1..=n using a fused compare-and-branch
        let mut engine = engine();
        let mut b = ChunkBuilder::new(4);
        b.emit(Opcode::LoadInt, 1, 0, 0);
        b.emit(Opcode::LoadInt, 2, 1, 0);
        b.emit(Opcode::LoadInt, 3, 1, 0);
        let loop_start = b.emit(Opcode::Add, 1, 1, 2);
        b.emit(Opcode::Add, 2, 2, 3);
        let branch = b.emit_jump(Opcode::JumpIfLessEq, 2, 0);
        b.patch_jump(branch, loop_start);
        b.emit(Opcode::Return, 1, 0, 0);
        let f = engine.load_chunk(b.build()).unwrap();

        let result = engine.call(f, &[Value::from_i32(100)]).unwrap();
        assert_eq!(result, Value::from_i32(5050));
    }

    #[test]
    fn test_globals_between_host_and_script() {
        let mut engine = engine();
        engine.set_global("x", Value::from_i32(10));

        let mut b = ChunkBuilder::new(2);
        let name = b.add_constant(Constant::String("x".into()));
        b.emit(Opcode::LoadGlobal, 0, name as i16, 0);
        b.emit(Opcode::LoadInt, 1, 5, 0);
        b.emit(Opcode::Add, 0, 0, 1);
        b.emit(Opcode::StoreGlobal, name as i16, 0, 0);
        b.emit(Opcode::Return, 0, 0, 0);
        let f = engine.load_chunk(b.build()).unwrap();

        assert_eq!(engine.call(f, &[]).unwrap(), Value::from_i32(15));
        assert_eq!(engine.get_global("x"), Some(Value::from_i32(15)));
    }

    #[test]
    fn test_undefined_global_is_reference_error() {
        let mut engine = engine();
        let mut b = ChunkBuilder::new(1);
        let name = b.add_constant(Constant::String("missing".into()));
        b.emit(Opcode::LoadGlobal, 0, name as i16, 0);
        b.emit(Opcode::Return, 0, 0, 0);
        let f = engine.load_chunk(b.build()).unwrap();

        match engine.call(f, &[]) {
            Err(ExecError::Script(error)) => {
                assert_eq!(error.kind, core_types::ErrorKind::ReferenceError);
            }
            other => panic!("expected ReferenceError, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_objects_and_properties() {
        let mut engine = engine();
        let mut b = ChunkBuilder::new(3);
        let key = b.add_constant(Constant::String("answer".into()));
        b.emit(Opcode::NewObject, 0, 0, 0);
        b.emit(Opcode::LoadInt, 1, 42, 0);
        b.emit(Opcode::SetProperty, 0, key as i16, 1);
        b.emit(Opcode::GetProperty, 2, 0, key as i16);
        b.emit(Opcode::Return, 2, 0, 0);
        let f = engine.load_chunk(b.build()).unwrap();
        assert_eq!(engine.call(f, &[]).unwrap(), Value::from_i32(42));
    }

    #[test]
    fn test_inline_caches_survive_repeat_calls() {
        let mut engine = engine();
        engine.set_jit_enabled(false);
        let mut b = ChunkBuilder::new(3);
        let key = b.add_constant(Constant::String("p".into()));
        b.emit(Opcode::NewObject, 0, 0, 0);
        b.emit(Opcode::LoadInt, 1, 7, 0);
        b.emit(Opcode::SetProperty, 0, key as i16, 1);
        b.emit(Opcode::GetProperty, 2, 0, key as i16);
        b.emit(Opcode::Return, 2, 0, 0);
        let f = engine.load_chunk(b.build()).unwrap();
        for _ in 0..50 {
            assert_eq!(engine.call(f, &[]).unwrap(), Value::from_i32(7));
        }
    }

    #[test]
    fn test_exception_table_catches_throw() {
        let mut engine = engine();
        let mut b = ChunkBuilder::new(2);
        b.emit(Opcode::LoadInt, 1, 9, 0); // pc 0
        b.emit(Opcode::Throw, 1, 0, 0); // pc 2
        b.emit(Opcode::LoadInt, 0, 1, 0); // pc 4, skipped
        b.emit(Opcode::Return, 0, 0, 0); // pc 6
        let handler = b.emit(Opcode::Return, 0, 0, 0); // pc 8: returns caught value
        b.add_exception_range(0, 8, handler);
        let f = engine.load_chunk(b.build()).unwrap();

        // the handler receives the thrown value in register 0
        assert_eq!(engine.call(f, &[]).unwrap(), Value::from_i32(9));
    }

    #[test]
    fn test_uncaught_throw_reaches_embedder() {
        let mut engine = engine();
        let mut b = ChunkBuilder::new(1);
        b.emit(Opcode::LoadInt, 0, 3, 0);
        b.emit(Opcode::Throw, 0, 0, 0);
        let f = engine.load_chunk(b.build()).unwrap();

        match engine.call(f, &[]) {
            Err(ExecError::Script(error)) => assert_eq!(error.thrown, Some(Value::from_i32(3))),
            other => panic!("expected script error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_scenario_s6_error_to_string() {
        let mut engine = engine();
        let ctor = engine.get_global("Error").unwrap();
        let message = engine.new_string("x").unwrap();
        let error = engine.construct(ctor, &[message]).unwrap();

        let to_string_key = engine.intern("toString");
        let method = {
            let vm = &mut engine.vm;
            vm.get_property_value(&mut engine.ctx, error, to_string_key)
                .unwrap()
        };
        let text = engine.call_value(method, error, &[]).unwrap();
        assert_eq!(engine.to_display_string(text).unwrap(), "Error: x");

        // with name = "" the result is the message alone
        let empty = engine.new_string("").unwrap();
        let name_key = engine.intern("name");
        engine
            .vm
            .set_property_value(&mut engine.ctx, error, name_key, empty)
            .unwrap();
        let text = engine.call_value(method, error, &[]).unwrap();
        assert_eq!(engine.to_display_string(text).unwrap(), "x");

        // with message = "" the result is the name alone
        let fresh = engine.construct(ctor, &[]).unwrap();
        let text_method = {
            let vm = &mut engine.vm;
            vm.get_property_value(&mut engine.ctx, fresh, to_string_key)
                .unwrap()
        };
        let text = engine.call_value(text_method, fresh, &[]).unwrap();
        assert_eq!(engine.to_display_string(text).unwrap(), "Error");
    }

    #[test]
    fn test_scenario_s3_replace_with_backrefs() {
        // "Java123".replace(/(\w+?)(\d+)/, "$2-$1") → "123-Java"
        let mut engine = engine();
        let receiver = engine.new_string("Java123").unwrap();
        let regexp = engine.new_regexp(r"(\w+?)(\d+)", "").unwrap();
        let template = engine.new_string("$2-$1").unwrap();

        let replace_key = engine.intern("replace");
        let method = engine
            .vm
            .get_property_value(&mut engine.ctx, receiver, replace_key)
            .unwrap();
        let result = engine.call_value(method, receiver, &[regexp, template]).unwrap();
        assert_eq!(engine.to_display_string(result).unwrap(), "123-Java");
    }

    #[test]
    fn test_scenario_s4_capturing_groups() {
        let mut engine = engine();
        let input = engine.new_string("ababab").unwrap();

        // non-capturing: match only
        let re = engine.new_regexp("(?:ab)+", "").unwrap();
        let exec_key = engine.intern("exec");
        let exec = engine
            .vm
            .get_property_value(&mut engine.ctx, re, exec_key)
            .unwrap();
        let result = engine.call_value(exec, re, &[input]).unwrap();
        let zero = engine
            .vm
            .get_property_value(&mut engine.ctx, result, Symbol::Index(0))
            .unwrap();
        assert_eq!(engine.to_display_string(zero).unwrap(), "ababab");
        let length_key = engine.ctx.symbols.defaults().length;
        let len = engine
            .vm
            .get_property_value(&mut engine.ctx, result, length_key)
            .unwrap();
        assert_eq!(len, Value::from_i32(1));

        // capturing: group 1 holds the last repetition
        let re = engine.new_regexp("(ab)+", "").unwrap();
        let exec = engine
            .vm
            .get_property_value(&mut engine.ctx, re, exec_key)
            .unwrap();
        let result = engine.call_value(exec, re, &[input]).unwrap();
        let zero = engine
            .vm
            .get_property_value(&mut engine.ctx, result, Symbol::Index(0))
            .unwrap();
        let one = engine
            .vm
            .get_property_value(&mut engine.ctx, result, Symbol::Index(1))
            .unwrap();
        assert_eq!(engine.to_display_string(zero).unwrap(), "ababab");
        assert_eq!(engine.to_display_string(one).unwrap(), "ab");
    }

    #[test]
    fn test_split_on_string_receiver() {
        let mut engine = engine();
        let receiver = engine.new_string("ab").unwrap();
        let empty = engine.new_string("").unwrap();
        let split_key = engine.intern("split");
        let method = engine
            .vm
            .get_property_value(&mut engine.ctx, receiver, split_key)
            .unwrap();

        // "ab".split("") → ["a", "b"]
        let result = engine.call_value(method, receiver, &[empty]).unwrap();
        let length_key = engine.ctx.symbols.defaults().length;
        let len = engine
            .vm
            .get_property_value(&mut engine.ctx, result, length_key)
            .unwrap();
        assert_eq!(len, Value::from_i32(2));

        // "".split("") → []
        let result = engine.call_value(method, empty, &[empty]).unwrap();
        let len = engine
            .vm
            .get_property_value(&mut engine.ctx, result, length_key)
            .unwrap();
        assert_eq!(len, Value::from_i32(0));
    }

    #[test]
    fn test_gc_keeps_script_reachable_state() {
        let mut engine = engine();
        engine.context_mut().heap.set_gc_threshold(1);
        let mut b = ChunkBuilder::new(3);
        let hello = b.add_constant(Constant::String("keep-".into()));
        b.emit(Opcode::LoadConst, 0, hello as i16, 0);
        b.emit(Opcode::Add, 0, 0, 0); // forces a fresh cord each call
        b.emit(Opcode::Return, 0, 0, 0);
        let f = engine.load_chunk(b.build()).unwrap();

        for _ in 0..10 {
            let result = engine.call(f, &[]).unwrap();
            assert_eq!(engine.to_display_string(result).unwrap(), "keep-keep-");
        }
        assert!(engine.gc_stats().collections > 0 || engine.gc_stats().live_cells > 0);
    }

    #[test]
    fn test_chunk_bytes_roundtrip_runs() {
        let mut engine = engine();
        let chunk = binary_chunk(Opcode::Add, 1, 2);
        let bytes = chunk.to_bytes();
        let f = engine.load_chunk_bytes(&bytes).unwrap();
        assert_eq!(engine.call(f, &[]).unwrap(), Value::from_i32(3));
    }

    #[test]
    fn test_define_property_strictness() {
        let mut engine = engine();
        let object = {
            let proto = engine.ctx.intrinsics.object_prototype;
            let handle = engine
                .ctx
                .heap
                .new_object(memory_manager::ClassTag::Object, Some(proto))
                .unwrap();
            Value::from_object(handle)
        };
        let frozen = PropertyDescriptor::data_with(Value::from_i32(1), false, false, false);
        assert!(engine.define_property(object, "k", &frozen, true).unwrap());

        let change = PropertyDescriptor::data_with(Value::from_i32(2), true, true, true);
        // non-strict: reports false
        assert!(!engine.define_property(object, "k", &change, false).unwrap());
        // strict: raises TypeError
        assert!(matches!(
            engine.define_property(object, "k", &change, true),
            Err(ExecError::Script(error)) if error.kind == core_types::ErrorKind::TypeError
        ));
    }
}
