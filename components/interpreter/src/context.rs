//! Execution context: heap, interned symbols, globals, intrinsics.
//!
//! Process-wide engine state lives here with a fixed lifecycle: everything
//! is created at engine bring-up, mutated only through the registration
//! entry points, and dropped with the engine.

use bytecode_system::{Chunk, Constant};
use core_types::{
    EngineError, ErrorKind, JsError, ObjectHandle, StringHandle, Symbol, SymbolTable, Value,
};
use memory_manager::{
    CellRef, ClassTag, FunctionData, FunctionKind, Heap, PropertyDescriptor, PropertyLookup,
};
use regex_engine::{RegexFlags, RegexProgram};
use std::rc::Rc;

/// Signature of a registered native function: `(vm, ctx, this, args)`.
pub type NativeFn =
    fn(&mut crate::dispatch::Vm, &mut Context, Value, &[Value]) -> crate::dispatch::VmResult<Value>;

/// A chunk loaded into the engine, with its constant pool resolved to
/// values and name constants pre-interned.
#[derive(Debug)]
pub struct LoadedFunction {
    pub chunk: Chunk,
    /// Constant pool materialized as values; string constants are heap
    /// cells rooted here.
    pub constants: Vec<Value>,
    /// For string constants, the interned symbol (used by property and
    /// global opcodes).
    pub symbols: Vec<Option<Symbol>>,
}

/// Intrinsic class slots, created once at bring-up.
#[derive(Debug, Clone, Copy)]
pub struct Intrinsics {
    pub object_prototype: ObjectHandle,
    pub function_prototype: ObjectHandle,
    pub string_prototype: ObjectHandle,
    pub error_prototype: ObjectHandle,
    pub type_error_prototype: ObjectHandle,
    pub reference_error_prototype: ObjectHandle,
    pub syntax_error_prototype: ObjectHandle,
    pub range_error_prototype: ObjectHandle,
    pub uri_error_prototype: ObjectHandle,
    pub eval_error_prototype: ObjectHandle,
    pub regexp_prototype: ObjectHandle,
}

impl Intrinsics {
    pub fn error_prototype_for(&self, kind: ErrorKind) -> ObjectHandle {
        match kind {
            ErrorKind::Error => self.error_prototype,
            ErrorKind::TypeError => self.type_error_prototype,
            ErrorKind::ReferenceError => self.reference_error_prototype,
            ErrorKind::SyntaxError => self.syntax_error_prototype,
            ErrorKind::RangeError => self.range_error_prototype,
            ErrorKind::URIError => self.uri_error_prototype,
            ErrorKind::EvalError => self.eval_error_prototype,
        }
    }
}

/// Compiled-regex payload carried by RegExp objects.
#[derive(Debug)]
pub struct RegexData {
    pub program: RegexProgram,
    pub last_index: u32,
}

/// Engine-wide mutable state.
pub struct Context {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub functions: Vec<Rc<LoadedFunction>>,
    pub native_fns: Vec<NativeFn>,
    pub global: ObjectHandle,
    pub intrinsics: Intrinsics,
    /// Error recorded by a JIT stub, consumed by the dispatcher when the
    /// generated code bails.
    pub pending_exception: Option<JsError>,
    /// Locale used by the `toLocale*Case` methods.
    pub default_locale: Option<String>,
}

impl Context {
    pub fn new() -> Result<Self, EngineError> {
        let mut heap = Heap::new();
        let symbols = SymbolTable::new();

        let object_prototype = heap.new_object(ClassTag::Object, None)?;
        let function_prototype = heap.new_object(ClassTag::Object, Some(object_prototype))?;
        let string_prototype = heap.new_object(ClassTag::Object, Some(object_prototype))?;
        let error_prototype = heap.new_object(ClassTag::Object, Some(object_prototype))?;
        let regexp_prototype = heap.new_object(ClassTag::Object, Some(object_prototype))?;
        let mut sub_error = || -> Result<ObjectHandle, EngineError> {
            heap.new_object(ClassTag::Object, Some(error_prototype))
        };
        let type_error_prototype = sub_error()?;
        let reference_error_prototype = sub_error()?;
        let syntax_error_prototype = sub_error()?;
        let range_error_prototype = sub_error()?;
        let uri_error_prototype = sub_error()?;
        let eval_error_prototype = sub_error()?;

        let global = heap.new_object(ClassTag::Object, Some(object_prototype))?;

        Ok(Context {
            heap,
            symbols,
            functions: Vec::new(),
            native_fns: Vec::new(),
            global,
            intrinsics: Intrinsics {
                object_prototype,
                function_prototype,
                string_prototype,
                error_prototype,
                type_error_prototype,
                reference_error_prototype,
                syntax_error_prototype,
                range_error_prototype,
                uri_error_prototype,
                eval_error_prototype,
                regexp_prototype,
            },
            pending_exception: None,
            default_locale: None,
        })
    }

    pub fn intern(&mut self, name: &str) -> Symbol {
        self.symbols.intern(name)
    }

    pub fn new_string_value(&mut self, s: &str) -> Result<Value, EngineError> {
        Ok(Value::from_string(self.heap.new_string(s)?))
    }

    pub fn new_string_value_from_units(&mut self, units: &[u16]) -> Result<Value, EngineError> {
        Ok(Value::from_string(self.heap.new_string_from_units(units)?))
    }

    /// Load a chunk: resolve its constant pool and register it. Returns
    /// the function index.
    pub fn load_chunk(&mut self, chunk: Chunk) -> Result<u32, EngineError> {
        let mut constants = Vec::with_capacity(chunk.constants.len());
        let mut symbols = Vec::with_capacity(chunk.constants.len());
        for constant in &chunk.constants {
            match constant {
                Constant::Undefined => {
                    constants.push(Value::UNDEFINED);
                    symbols.push(None);
                }
                Constant::Null => {
                    constants.push(Value::NULL);
                    symbols.push(None);
                }
                Constant::Bool(b) => {
                    constants.push(Value::from_bool(*b));
                    symbols.push(None);
                }
                Constant::Number(n) => {
                    constants.push(Value::from_number(*n));
                    symbols.push(None);
                }
                Constant::String(s) => {
                    constants.push(Value::from_string(self.heap.new_string(s)?));
                    symbols.push(Some(self.symbols.intern(s)));
                }
            }
        }
        let index = self.functions.len() as u32;
        self.functions.push(Rc::new(LoadedFunction {
            chunk,
            constants,
            symbols,
        }));
        Ok(index)
    }

    /// Register a native function and wrap it in a callable object.
    pub fn register_native(&mut self, f: NativeFn) -> Result<ObjectHandle, EngineError> {
        let id = self.native_fns.len() as u32;
        self.native_fns.push(f);
        let handle = self
            .heap
            .new_object(ClassTag::Function, Some(self.intrinsics.function_prototype))?;
        self.heap.object_mut(handle).function = Some(FunctionData {
            kind: FunctionKind::Native(id),
            environment: None,
        });
        Ok(handle)
    }

    /// Wrap a loaded chunk in a callable function object.
    pub fn new_function_object(&mut self, function: u32) -> Result<ObjectHandle, EngineError> {
        let handle = self
            .heap
            .new_object(ClassTag::Function, Some(self.intrinsics.function_prototype))?;
        self.heap.object_mut(handle).function = Some(FunctionData {
            kind: FunctionKind::Bytecode(function),
            environment: None,
        });
        Ok(handle)
    }

    /// Create an Error object of `kind` with a `message` property.
    pub fn new_error_object(
        &mut self,
        kind: ErrorKind,
        message: Option<&str>,
    ) -> Result<ObjectHandle, EngineError> {
        let prototype = self.intrinsics.error_prototype_for(kind);
        let handle = self.heap.new_object(ClassTag::Error, Some(prototype))?;
        if let Some(message) = message {
            let value = self.new_string_value(message)?;
            let key = self.symbols.defaults().message;
            self.heap
                .define_own_property(handle, key, &PropertyDescriptor::data_with(value, true, false, true));
        }
        Ok(handle)
    }

    /// Materialize a script error as a throwable value.
    pub fn error_value(&mut self, error: &JsError) -> Value {
        if let Some(thrown) = error.thrown {
            return thrown;
        }
        match self.new_error_object(error.kind, Some(&error.message)) {
            Ok(handle) => Value::from_object(handle),
            Err(_) => Value::UNDEFINED,
        }
    }

    /// Create a RegExp object around a compiled program.
    pub fn new_regexp_object(
        &mut self,
        source: &str,
        program: RegexProgram,
    ) -> Result<ObjectHandle, EngineError> {
        let handle = self
            .heap
            .new_object(ClassTag::RegExp, Some(self.intrinsics.regexp_prototype))?;
        let flags = program.flags;
        self.heap.object_mut(handle).internal = Some(Box::new(RegexData {
            program,
            last_index: 0,
        }));

        let source_value = self.new_string_value(source)?;
        let entries: [(&str, Value); 4] = [
            ("source", source_value),
            ("global", Value::from_bool(flags.contains(RegexFlags::GLOBAL))),
            ("ignoreCase", Value::from_bool(flags.contains(RegexFlags::IGNORE_CASE))),
            ("multiline", Value::from_bool(flags.contains(RegexFlags::MULTILINE))),
        ];
        for (name, value) in entries {
            let key = self.intern(name);
            self.heap.define_own_property(
                handle,
                key,
                &PropertyDescriptor::data_with(value, false, false, false),
            );
        }
        let key = self.intern("lastIndex");
        self.heap.define_own_property(
            handle,
            key,
            &PropertyDescriptor::data_with(Value::from_i32(0), true, false, false),
        );
        Ok(handle)
    }

    /// Read a global binding.
    pub fn get_global(&mut self, name: &str) -> Option<Value> {
        let key = self.symbols.intern(name);
        match self.heap.get_property(self.global, key) {
            PropertyLookup::Data(v) => Some(v),
            PropertyLookup::Accessor { .. } | PropertyLookup::NotFound => None,
        }
    }

    /// Write a global binding.
    pub fn set_global(&mut self, name: &str, value: Value) {
        let key = self.symbols.intern(name);
        self.heap.set_property(self.global, key, value);
    }

    /// The string content of a string value.
    pub fn string_units(&mut self, handle: StringHandle) -> Vec<u16> {
        self.heap.string_units(handle)
    }

    /// Cell roots that must stay alive across collections.
    pub fn intrinsic_roots(&self) -> Vec<CellRef> {
        let i = &self.intrinsics;
        vec![
            CellRef::Object(self.global),
            CellRef::Object(i.object_prototype),
            CellRef::Object(i.function_prototype),
            CellRef::Object(i.string_prototype),
            CellRef::Object(i.error_prototype),
            CellRef::Object(i.type_error_prototype),
            CellRef::Object(i.reference_error_prototype),
            CellRef::Object(i.syntax_error_prototype),
            CellRef::Object(i.range_error_prototype),
            CellRef::Object(i.uri_error_prototype),
            CellRef::Object(i.eval_error_prototype),
            CellRef::Object(i.regexp_prototype),
        ]
    }

    /// Value roots from resolved constant pools.
    pub fn constant_roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.functions.iter().flat_map(|f| f.constants.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode_system::{ChunkBuilder, Opcode};

    #[test]
    fn test_bring_up_creates_intrinsics() {
        let ctx = Context::new().unwrap();
        let proto = ctx.heap.object(ctx.intrinsics.type_error_prototype);
        assert_eq!(proto.prototype(), Some(ctx.intrinsics.error_prototype));
    }

    #[test]
    fn test_globals_roundtrip() {
        let mut ctx = Context::new().unwrap();
        assert_eq!(ctx.get_global("answer"), None);
        ctx.set_global("answer", Value::from_i32(42));
        assert_eq!(ctx.get_global("answer"), Some(Value::from_i32(42)));
    }

    #[test]
    fn test_load_chunk_resolves_constants() {
        let mut ctx = Context::new().unwrap();
        let mut b = ChunkBuilder::new(1);
        b.add_constant(Constant::Number(1.5));
        b.add_constant(Constant::String("name".into()));
        b.emit(Opcode::Return, 0, 0, 0);
        let index = ctx.load_chunk(b.build()).unwrap();

        let loaded = &ctx.functions[index as usize];
        assert_eq!(loaded.constants[0], Value::from_f64(1.5));
        assert!(loaded.constants[1].is_string());
        assert!(loaded.symbols[1].is_some());
        assert_eq!(loaded.symbols[0], None);
    }

    #[test]
    fn test_error_object_has_message_and_prototype() {
        let mut ctx = Context::new().unwrap();
        let error = ctx.new_error_object(ErrorKind::TypeError, Some("boom")).unwrap();
        assert_eq!(
            ctx.heap.object(error).prototype(),
            Some(ctx.intrinsics.type_error_prototype)
        );
        let key = ctx.symbols.defaults().message;
        match ctx.heap.get_property(error, key) {
            PropertyLookup::Data(v) => {
                let units = ctx.string_units(v.as_string());
                assert_eq!(String::from_utf16(&units).unwrap(), "boom");
            }
            other => panic!("unexpected lookup {:?}", other),
        }
    }

    #[test]
    fn test_regexp_object_carries_program_and_flags() {
        let mut ctx = Context::new().unwrap();
        let units: Vec<u16> = "a+".encode_utf16().collect();
        let program =
            regex_engine::compile_pattern(&units, RegexFlags::GLOBAL | RegexFlags::IGNORE_CASE)
                .unwrap();
        let re = ctx.new_regexp_object("a+", program).unwrap();

        let data = ctx
            .heap
            .object(re)
            .internal
            .as_ref()
            .unwrap()
            .downcast_ref::<RegexData>()
            .unwrap();
        assert!(data.program.flags.global());

        let key = ctx.intern("global");
        assert_eq!(
            ctx.heap.get_property(re, key),
            PropertyLookup::Data(Value::TRUE)
        );
    }
}
