//! The bytecode dispatcher.
//!
//! Executes 32-bit instruction words over a contiguous register stack.
//! Backward branches and call sites are safepoints: collection may run and
//! the JIT handshake happens there. Script errors unwind through the
//! chunk's exception table; the handler receives the thrown value in
//! register 0 of the faulting frame.

use crate::call_frame::CallFrame;
use crate::context::{Context, LoadedFunction};
use crate::inline_cache::InlineCache;
use core_types::{EngineError, JsError, Value};
use bytecode_system::{Instruction, Opcode, WORDS_PER_INSTRUCTION};
use memory_manager::{
    CellRef, ClassTag, FunctionKind, PropertyLookup, PropertySlot, PutOutcome,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::rc::Rc;
use tracing::debug;

/// Execution failure: script errors unwind, engine errors abort.
#[derive(Debug)]
pub enum ExecError {
    Script(JsError),
    Engine(EngineError),
}

impl From<JsError> for ExecError {
    fn from(e: JsError) -> Self {
        ExecError::Script(e)
    }
}

impl From<EngineError> for ExecError {
    fn from(e: EngineError) -> Self {
        ExecError::Engine(e)
    }
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Script(e) => write!(f, "uncaught {}", e),
            ExecError::Engine(e) => write!(f, "engine error: {}", e),
        }
    }
}

pub type VmResult<T> = Result<T, ExecError>;

/// Call depth bound; exceeding it is a stack-overflow engine error.
const MAX_CALL_DEPTH: usize = 512;

/// Calls before a function is handed to the template compiler.
const DEFAULT_JIT_THRESHOLD: u64 = 100;

enum Flow {
    Continue,
    Return(Value),
}

/// The virtual machine.
pub struct Vm {
    /// Register stack; each frame owns a window.
    stack: Vec<Value>,
    /// Active frames, scanned as GC roots.
    frames: Vec<CallFrame>,
    /// Property/global inline caches, keyed by (function, pc).
    caches: FxHashMap<(u32, u32), InlineCache>,
    execution_counts: FxHashMap<u32, u64>,
    compiled: FxHashMap<u32, jit_compiler::CompiledCode>,
    uncompilable: FxHashSet<u32>,
    jit_threshold: u64,
    jit_enabled: bool,
    /// Live JIT register windows, scanned as GC roots while generated code
    /// is on the native stack.
    pub(crate) jit_windows: Vec<(usize, usize)>,
    /// Temporaries spilled into GC-visible slots across nested script
    /// calls (see [`Vm::with_root`]).
    temp_roots: Vec<Value>,
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(16),
            caches: FxHashMap::default(),
            execution_counts: FxHashMap::default(),
            compiled: FxHashMap::default(),
            uncompilable: FxHashSet::default(),
            jit_threshold: DEFAULT_JIT_THRESHOLD,
            jit_enabled: jit_compiler::jit_supported(),
            jit_windows: Vec::new(),
            temp_roots: Vec::new(),
        }
    }

    /// Keep `value` alive across `f`. Any operation that holds a heap value
    /// in a plain local while running script (which can collect at a
    /// safepoint) must spill it here first.
    pub(crate) fn with_root<R>(&mut self, value: Value, f: impl FnOnce(&mut Self) -> R) -> R {
        self.temp_roots.push(value);
        let result = f(self);
        self.temp_roots.pop();
        result
    }

    pub fn set_jit_threshold(&mut self, threshold: u64) {
        self.jit_threshold = threshold;
    }

    pub fn set_jit_enabled(&mut self, enabled: bool) {
        self.jit_enabled = enabled && jit_compiler::jit_supported();
    }

    pub fn compiled_function_count(&self) -> usize {
        self.compiled.len()
    }

    pub(crate) fn compiled_code(&self, function: u32) -> Option<&jit_compiler::CompiledCode> {
        self.compiled.get(&function)
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Run a loaded function: count the call, hand hot functions to the
    /// template compiler, otherwise interpret.
    pub fn run_function(
        &mut self,
        ctx: &mut Context,
        function: u32,
        this: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        self.run_function_with_env(ctx, function, this, args, None)
    }

    fn run_function_with_env(
        &mut self,
        ctx: &mut Context,
        function: u32,
        this: Value,
        args: &[Value],
        environment: Option<memory_manager::EnvHandle>,
    ) -> VmResult<Value> {
        let func = ctx
            .functions
            .get(function as usize)
            .cloned()
            .ok_or_else(|| {
                ExecError::Engine(EngineError::Internal(format!(
                    "function index {} not loaded",
                    function
                )))
            })?;

        if self.jit_enabled && !self.uncompilable.contains(&function) {
            let count = self.execution_counts.entry(function).or_insert(0);
            *count += 1;
            if *count == self.jit_threshold && !self.compiled.contains_key(&function) {
                match jit_compiler::compile_chunk(&func.chunk) {
                    Ok(code) => {
                        debug!(function, "function compiled to native code");
                        self.compiled.insert(function, code);
                    }
                    Err(reason) => {
                        debug!(function, %reason, "function stays on the interpreter");
                        self.uncompilable.insert(function);
                    }
                }
            }
            if self.compiled.contains_key(&function) {
                return crate::jit_bridge::run_compiled(self, ctx, function, &func, args);
            }
        }

        self.interpret(ctx, function, &func, this, args, environment)
    }

    /// Call an arbitrary value.
    pub fn call_value(
        &mut self,
        ctx: &mut Context,
        callee: Value,
        this: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        if !callee.is_object() {
            return Err(Self::type_error("callee is not a function"));
        }
        let handle = callee.as_object();
        let Some(function) = ctx.heap.object(handle).function else {
            return Err(Self::type_error("callee is not a function"));
        };
        match function.kind {
            FunctionKind::Native(id) => {
                let native = ctx.native_fns[id as usize];
                // natives hold their receiver and arguments in plain
                // locals, so spill them for any script they run
                let mark = self.temp_roots.len();
                self.temp_roots.push(callee);
                self.temp_roots.push(this);
                self.temp_roots.extend_from_slice(args);
                let result = native(self, ctx, this, args);
                self.temp_roots.truncate(mark);
                result
            }
            FunctionKind::Bytecode(index) => {
                // closures start from their captured environment
                self.run_function_with_env(ctx, index, this, args, function.environment)
            }
        }
    }

    /// `new callee(...args)`.
    pub fn construct(&mut self, ctx: &mut Context, callee: Value, args: &[Value]) -> VmResult<Value> {
        if !callee.is_object() || !ctx.heap.object(callee.as_object()).is_callable() {
            return Err(Self::type_error("constructor is not a function"));
        }
        let prototype_key = ctx.symbols.defaults().prototype;
        let prototype = match ctx.heap.get_property(callee.as_object(), prototype_key) {
            PropertyLookup::Data(v) if v.is_object() => v.as_object(),
            _ => ctx.intrinsics.object_prototype,
        };
        let this = ctx.heap.new_object(ClassTag::Object, Some(prototype))?;
        let result = self.call_value(ctx, callee, Value::from_object(this), args)?;
        Ok(if result.is_object() {
            result
        } else {
            Value::from_object(this)
        })
    }

    // ---- the interpreter proper ----

    fn interpret(
        &mut self,
        ctx: &mut Context,
        function: u32,
        func: &Rc<LoadedFunction>,
        this: Value,
        args: &[Value],
        environment: Option<memory_manager::EnvHandle>,
    ) -> VmResult<Value> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(EngineError::StackOverflow.into());
        }
        let register_count = func.chunk.register_count as usize;
        let base = self.stack.len();
        for arg in args.iter().take(register_count) {
            self.stack.push(*arg);
        }
        while self.stack.len() < base + register_count {
            self.stack.push(Value::UNDEFINED);
        }
        let mut frame = CallFrame::new(function, base, register_count);
        frame.this_value = this;
        frame.environment = environment;
        self.frames.push(frame);

        let mut pc = func.chunk.entry_pc as usize;
        let result = loop {
            match self.step(ctx, function, func, base, &mut pc) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(value)) => break Ok(value),
                Err(ExecError::Script(error)) => {
                    // exception-table unwinding within this frame; frames
                    // without a handler rethrow to the caller
                    match func.chunk.handler_for(pc as u32) {
                        Some(handler) => {
                            let thrown = ctx.error_value(&error);
                            self.stack[base] = thrown;
                            pc = handler as usize;
                        }
                        None => break Err(ExecError::Script(error)),
                    }
                }
                Err(fatal) => break Err(fatal),
            }
        };

        self.frames.pop();
        self.stack.truncate(base);
        result
    }

    #[inline]
    fn reg(&self, base: usize, r: i16) -> Value {
        self.stack[base + r as usize]
    }

    #[inline]
    fn set_reg(&mut self, base: usize, r: i16, value: Value) {
        self.stack[base + r as usize] = value;
    }

    fn step(
        &mut self,
        ctx: &mut Context,
        function: u32,
        func: &Rc<LoadedFunction>,
        base: usize,
        pc: &mut usize,
    ) -> VmResult<Flow> {
        let chunk = &func.chunk;
        let instr = Instruction::decode(&chunk.code, *pc)
            .ok_or_else(|| EngineError::InvalidBytecode(format!("bad instruction at {}", pc)))?;
        let mut next = *pc + WORDS_PER_INSTRUCTION;

        match instr.opcode {
            Opcode::Nop => {}
            Opcode::Move => {
                let v = self.reg(base, instr.b);
                self.set_reg(base, instr.a, v);
            }
            Opcode::LoadConst => {
                let v = *func
                    .constants
                    .get(instr.b as usize)
                    .ok_or_else(|| EngineError::InvalidBytecode("constant index".into()))?;
                self.set_reg(base, instr.a, v);
            }
            Opcode::LoadUndefined => self.set_reg(base, instr.a, Value::UNDEFINED),
            Opcode::LoadNull => self.set_reg(base, instr.a, Value::NULL),
            Opcode::LoadTrue => self.set_reg(base, instr.a, Value::TRUE),
            Opcode::LoadFalse => self.set_reg(base, instr.a, Value::FALSE),
            Opcode::LoadInt => self.set_reg(base, instr.a, Value::from_i32(instr.b as i32)),
            Opcode::LoadThis => {
                let this = self.frames.last().expect("active frame").this_value;
                self.set_reg(base, instr.a, this);
            }

            Opcode::Add => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let v = if lhs.is_int32() && rhs.is_int32() {
                    match lhs.as_int32().checked_add(rhs.as_int32()) {
                        Some(sum) => Value::from_i32(sum),
                        // overflow widens to double; the 64-bit sum is exact
                        None => Value::from_f64(lhs.as_int32() as i64 as f64 + rhs.as_int32() as i64 as f64),
                    }
                } else {
                    self.generic_add(ctx, lhs, rhs)?
                };
                self.set_reg(base, instr.a, v);
            }
            Opcode::Sub => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let v = if lhs.is_int32() && rhs.is_int32() {
                    match lhs.as_int32().checked_sub(rhs.as_int32()) {
                        Some(diff) => Value::from_i32(diff),
                        None => Value::from_f64(
                            lhs.as_int32() as i64 as f64 - rhs.as_int32() as i64 as f64,
                        ),
                    }
                } else {
                    let l = self.to_number(ctx, lhs)?;
                    let r = self.to_number(ctx, rhs)?;
                    Value::from_number(l - r)
                };
                self.set_reg(base, instr.a, v);
            }
            Opcode::Mul => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let v = if lhs.is_int32() && rhs.is_int32() {
                    match lhs.as_int32().checked_mul(rhs.as_int32()) {
                        Some(product) => Value::from_i32(product),
                        None => {
                            Value::from_f64(lhs.as_int32() as f64 * rhs.as_int32() as f64)
                        }
                    }
                } else {
                    let l = self.to_number(ctx, lhs)?;
                    let r = self.to_number(ctx, rhs)?;
                    Value::from_number(l * r)
                };
                self.set_reg(base, instr.a, v);
            }
            Opcode::Div => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let l = self.to_number(ctx, lhs)?;
                let r = self.to_number(ctx, rhs)?;
                self.set_reg(base, instr.a, Value::from_number(l / r));
            }
            Opcode::Mod => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let l = self.to_number(ctx, lhs)?;
                let r = self.to_number(ctx, rhs)?;
                self.set_reg(base, instr.a, Value::from_number(l % r));
            }

            Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let l = self.to_int32(ctx, lhs)?;
                let r = self.to_int32(ctx, rhs)?;
                let v = match instr.opcode {
                    Opcode::BitAnd => l & r,
                    Opcode::BitOr => l | r,
                    _ => l ^ r,
                };
                self.set_reg(base, instr.a, Value::from_i32(v));
            }
            Opcode::Shl => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let l = self.to_int32(ctx, lhs)?;
                let r = self.to_uint32(ctx, rhs)?;
                self.set_reg(base, instr.a, Value::from_i32(l.wrapping_shl(r & 0x1F)));
            }
            Opcode::Shr => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let l = self.to_int32(ctx, lhs)?;
                let r = self.to_uint32(ctx, rhs)?;
                self.set_reg(base, instr.a, Value::from_i32(l.wrapping_shr(r & 0x1F)));
            }
            Opcode::UShr => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let l = self.to_uint32(ctx, lhs)?;
                let r = self.to_uint32(ctx, rhs)?;
                let shifted = l.wrapping_shr(r & 0x1F);
                // out of int32 range boxes as double
                self.set_reg(base, instr.a, Value::from_number(shifted as f64));
            }

            Opcode::Neg => {
                let v = self.reg(base, instr.b);
                let result = if v.is_int32() && v.as_int32() != 0 {
                    match v.as_int32().checked_neg() {
                        Some(n) => Value::from_i32(n),
                        None => Value::from_f64(-(v.as_int32() as f64)),
                    }
                } else {
                    let n = self.to_number(ctx, v)?;
                    Value::from_f64(-n)
                };
                self.set_reg(base, instr.a, result);
            }
            Opcode::Not => {
                let v = self.reg(base, instr.b);
                let b = self.boolean_of(ctx, v);
                self.set_reg(base, instr.a, Value::from_bool(!b));
            }
            Opcode::BitNot => {
                let v = self.reg(base, instr.b);
                let n = self.to_int32(ctx, v)?;
                self.set_reg(base, instr.a, Value::from_i32(!n));
            }
            Opcode::TypeOf => {
                let v = self.reg(base, instr.b);
                let name = if v.is_object() && ctx.heap.object(v.as_object()).is_callable() {
                    "function"
                } else {
                    v.type_of()
                };
                let s = ctx.new_string_value(name)?;
                self.set_reg(base, instr.a, s);
            }

            Opcode::Eq | Opcode::NotEq => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let eq = self.loose_equals(ctx, lhs, rhs)?;
                let v = if instr.opcode == Opcode::Eq { eq } else { !eq };
                self.set_reg(base, instr.a, Value::from_bool(v));
            }
            Opcode::StrictEq | Opcode::StrictNotEq => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let eq = self.strict_equals(ctx, lhs, rhs);
                let v = if instr.opcode == Opcode::StrictEq { eq } else { !eq };
                self.set_reg(base, instr.a, Value::from_bool(v));
            }
            Opcode::Lt | Opcode::LtEq | Opcode::Gt | Opcode::GtEq => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let v = self.relational(ctx, instr.opcode, lhs, rhs)?;
                self.set_reg(base, instr.a, Value::from_bool(v));
            }

            Opcode::Jump => {
                next = offset_pc(*pc, instr.a);
                if instr.a < 0 {
                    self.safepoint(ctx);
                }
            }
            Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
                let cond = self.reg(base, instr.b);
                let truthy = self.boolean_of(ctx, cond);
                if truthy == (instr.opcode == Opcode::JumpIfTrue) {
                    next = offset_pc(*pc, instr.a);
                    if instr.a < 0 {
                        self.safepoint(ctx);
                    }
                }
            }
            Opcode::JumpIfLess | Opcode::JumpIfLessEq | Opcode::JumpIfGreater
            | Opcode::JumpIfGreaterEq => {
                let (lhs, rhs) = (self.reg(base, instr.b), self.reg(base, instr.c));
                let compare_op = match instr.opcode {
                    Opcode::JumpIfLess => Opcode::Lt,
                    Opcode::JumpIfLessEq => Opcode::LtEq,
                    Opcode::JumpIfGreater => Opcode::Gt,
                    _ => Opcode::GtEq,
                };
                if self.relational(ctx, compare_op, lhs, rhs)? {
                    next = offset_pc(*pc, instr.a);
                    if instr.a < 0 {
                        self.safepoint(ctx);
                    }
                }
            }

            Opcode::LoadGlobal => {
                let key = func
                    .symbols
                    .get(instr.b as usize)
                    .copied()
                    .flatten()
                    .ok_or_else(|| EngineError::InvalidBytecode("global name constant".into()))?;
                let global = Value::from_object(ctx.global);
                let site = (function, *pc as u32);
                match self.get_cached_own(ctx, global, key, site) {
                    Some(v) => self.set_reg(base, instr.a, v),
                    None => {
                        let lookup = ctx.heap.get_property(ctx.global, key);
                        match lookup {
                            PropertyLookup::NotFound => {
                                let name = ctx.symbols.describe(key);
                                return Err(JsError::reference_error(format!(
                                    "{} is not defined",
                                    name
                                ))
                                .into());
                            }
                            _ => {
                                let v = self.get_property_value(ctx, global, key)?;
                                self.set_reg(base, instr.a, v);
                            }
                        }
                    }
                }
            }
            Opcode::StoreGlobal => {
                let key = func
                    .symbols
                    .get(instr.a as usize)
                    .copied()
                    .flatten()
                    .ok_or_else(|| EngineError::InvalidBytecode("global name constant".into()))?;
                let v = self.reg(base, instr.b);
                ctx.heap.set_property(ctx.global, key, v);
            }

            Opcode::GetProperty => {
                let receiver = self.reg(base, instr.b);
                let key = func
                    .symbols
                    .get(instr.c as usize)
                    .copied()
                    .flatten()
                    .ok_or_else(|| EngineError::InvalidBytecode("property name constant".into()))?;
                let site = (function, *pc as u32);
                let v = match self.get_cached_own(ctx, receiver, key, site) {
                    Some(v) => v,
                    None => self.get_property_value(ctx, receiver, key)?,
                };
                self.set_reg(base, instr.a, v);
            }
            Opcode::SetProperty => {
                let receiver = self.reg(base, instr.a);
                let key = func
                    .symbols
                    .get(instr.b as usize)
                    .copied()
                    .flatten()
                    .ok_or_else(|| EngineError::InvalidBytecode("property name constant".into()))?;
                let v = self.reg(base, instr.c);
                let site = (function, *pc as u32);
                if !self.set_cached_own(ctx, receiver, key, v, site) {
                    self.set_property_value(ctx, receiver, key, v)?;
                }
            }
            Opcode::GetElement => {
                let receiver = self.reg(base, instr.b);
                let key_value = self.reg(base, instr.c);
                let key = self.to_property_key(ctx, key_value)?;
                let v = self.get_property_value(ctx, receiver, key)?;
                self.set_reg(base, instr.a, v);
            }
            Opcode::SetElement => {
                let receiver = self.reg(base, instr.a);
                let key_value = self.reg(base, instr.b);
                let v = self.reg(base, instr.c);
                let key = self.to_property_key(ctx, key_value)?;
                self.set_property_value(ctx, receiver, key, v)?;
            }
            Opcode::DeleteProperty => {
                let receiver = self.reg(base, instr.b);
                let key = func
                    .symbols
                    .get(instr.c as usize)
                    .copied()
                    .flatten()
                    .ok_or_else(|| EngineError::InvalidBytecode("property name constant".into()))?;
                let deleted = if receiver.is_object() {
                    ctx.heap.delete_property(receiver.as_object(), key)
                } else {
                    true
                };
                self.set_reg(base, instr.a, Value::from_bool(deleted));
            }
            Opcode::NewObject => {
                let proto = ctx.intrinsics.object_prototype;
                let handle = ctx.heap.new_object(ClassTag::Object, Some(proto))?;
                self.set_reg(base, instr.a, Value::from_object(handle));
            }

            Opcode::NewEnvironment => {
                let parent = self.frames.last().expect("active frame").environment;
                let env = ctx
                    .heap
                    .new_environment(vec![Value::UNDEFINED; instr.a as usize], parent)?;
                self.frames.last_mut().expect("active frame").environment = Some(env);
            }
            Opcode::LoadUpvalue => {
                let v = self.upvalue_slot(ctx, instr.b as u32, instr.c as u32)?;
                self.set_reg(base, instr.a, v);
            }
            Opcode::StoreUpvalue => {
                let v = self.reg(base, instr.c);
                self.store_upvalue_slot(ctx, instr.a as u32, instr.b as u32, v)?;
            }
            Opcode::CreateClosure => {
                let environment = self.frames.last().expect("active frame").environment;
                let handle = ctx.new_function_object(instr.b as u32)?;
                ctx.heap.object_mut(handle).function = Some(memory_manager::FunctionData {
                    kind: FunctionKind::Bytecode(instr.b as u32),
                    environment,
                });
                self.set_reg(base, instr.a, Value::from_object(handle));
            }

            Opcode::Call => {
                self.safepoint(ctx);
                let callee = self.reg(base, instr.b);
                let argc = instr.c as usize;
                let first = base + instr.b as usize + 1;
                let args: Vec<Value> = self.stack[first..first + argc].to_vec();
                let result = self.call_value(ctx, callee, Value::UNDEFINED, &args)?;
                self.set_reg(base, instr.a, result);
            }
            Opcode::Construct => {
                self.safepoint(ctx);
                let callee = self.reg(base, instr.b);
                let argc = instr.c as usize;
                let first = base + instr.b as usize + 1;
                let args: Vec<Value> = self.stack[first..first + argc].to_vec();
                let result = self.construct(ctx, callee, &args)?;
                self.set_reg(base, instr.a, result);
            }

            Opcode::Return => {
                return Ok(Flow::Return(self.reg(base, instr.a)));
            }
            Opcode::Throw => {
                let v = self.reg(base, instr.a);
                return Err(JsError::thrown(v).into());
            }
        }

        *pc = next;
        Ok(Flow::Continue)
    }

    fn relational(
        &mut self,
        ctx: &mut Context,
        op: Opcode,
        lhs: Value,
        rhs: Value,
    ) -> VmResult<bool> {
        // int32 pairs take the fast path; everything else coerces
        if lhs.is_int32() && rhs.is_int32() {
            let (l, r) = (lhs.as_int32(), rhs.as_int32());
            return Ok(match op {
                Opcode::Lt => l < r,
                Opcode::LtEq => l <= r,
                Opcode::Gt => l > r,
                _ => l >= r,
            });
        }
        let ordering = self.compare_values(ctx, lhs, rhs)?;
        Ok(match ordering {
            None => false,
            Some(ordering) => match op {
                Opcode::Lt => ordering == Ordering::Less,
                Opcode::LtEq => ordering != Ordering::Greater,
                Opcode::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            },
        })
    }

    /// Inline-cache fast path: own data slots on the receiver's shape.
    /// Returns `None` on a miss, leaving the slow path to refill.
    fn get_cached_own(
        &mut self,
        ctx: &Context,
        receiver: Value,
        key: core_types::Symbol,
        site: (u32, u32),
    ) -> Option<Value> {
        if !receiver.is_object() {
            return None;
        }
        let object = ctx.heap.object(receiver.as_object());
        let shape = object.shape_id();
        let cache = self.caches.entry(site).or_default();
        if let Some(slot) = cache.lookup(shape) {
            if let PropertySlot::Data(v) = object.slot_value(slot) {
                return Some(*v);
            }
            return None;
        }
        if cache.is_megamorphic() {
            return None;
        }
        // refill from a slow own lookup when it lands on a data slot
        let own = object.get_own(key)?;
        if own.attributes.is_accessor() {
            return None;
        }
        cache.update(shape, own.slot);
        match own.value {
            PropertySlot::Data(v) => Some(v),
            PropertySlot::Accessor { .. } => None,
        }
    }

    /// Inline-cache fast path for stores into existing writable own data
    /// slots.
    fn set_cached_own(
        &mut self,
        ctx: &mut Context,
        receiver: Value,
        key: core_types::Symbol,
        value: Value,
        site: (u32, u32),
    ) -> bool {
        if !receiver.is_object() {
            return false;
        }
        let handle = receiver.as_object();
        let shape = ctx.heap.object(handle).shape_id();
        let cache = self.caches.entry(site).or_default();
        if let Some(slot) = cache.lookup(shape) {
            let object = ctx.heap.object_mut(handle);
            if matches!(object.slot_value(slot), PropertySlot::Data(_)) {
                object.set_slot_value(slot, PropertySlot::Data(value));
                return true;
            }
            return false;
        }
        if cache.is_megamorphic() {
            return false;
        }
        let Some(own) = ctx.heap.object(handle).get_own(key) else {
            return false;
        };
        if own.attributes.is_accessor() || !own.attributes.is_writable() {
            return false;
        }
        cache.update(shape, own.slot);
        ctx.heap
            .object_mut(handle)
            .set_slot_value(own.slot, PropertySlot::Data(value));
        true
    }

    /// Full property read, prototype chain and accessors included.
    pub fn get_property_value(
        &mut self,
        ctx: &mut Context,
        receiver: Value,
        key: core_types::Symbol,
    ) -> VmResult<Value> {
        if receiver.is_object() {
            return match ctx.heap.get_property(receiver.as_object(), key) {
                PropertyLookup::Data(v) => Ok(v),
                PropertyLookup::Accessor { get: Some(getter) } => {
                    self.call_value(ctx, getter, receiver, &[])
                }
                PropertyLookup::Accessor { get: None } => Ok(Value::UNDEFINED),
                PropertyLookup::NotFound => Ok(Value::UNDEFINED),
            };
        }
        if receiver.is_string() {
            let handle = receiver.as_string();
            let defaults = *ctx.symbols.defaults();
            if key == defaults.length {
                return Ok(Value::from_i32(ctx.heap.string_len(handle) as i32));
            }
            if let core_types::Symbol::Index(index) = key {
                let len = ctx.heap.string_len(handle);
                if (index as usize) < len {
                    let unit = ctx.heap.string_at(handle, index as usize);
                    return Ok(ctx.new_string_value_from_units(&[unit])?);
                }
                return Ok(Value::UNDEFINED);
            }
            let proto = Value::from_object(ctx.intrinsics.string_prototype);
            return match ctx.heap.get_property(ctx.intrinsics.string_prototype, key) {
                PropertyLookup::Data(v) => Ok(v),
                PropertyLookup::Accessor { get: Some(getter) } => {
                    self.call_value(ctx, getter, receiver, &[])
                }
                _ => {
                    let _ = proto;
                    Ok(Value::UNDEFINED)
                }
            };
        }
        if receiver.is_null_or_undefined() {
            return Err(Self::type_error(&format!(
                "{} has no properties",
                receiver.type_of()
            )));
        }
        // numbers and booleans have no wired prototypes
        Ok(Value::UNDEFINED)
    }

    /// Full property write.
    pub fn set_property_value(
        &mut self,
        ctx: &mut Context,
        receiver: Value,
        key: core_types::Symbol,
        value: Value,
    ) -> VmResult<()> {
        if receiver.is_null_or_undefined() {
            return Err(Self::type_error(&format!(
                "{} has no properties",
                receiver.type_of()
            )));
        }
        if !receiver.is_object() {
            // writes to primitives are silently dropped in sloppy mode
            return Ok(());
        }
        match ctx.heap.set_property(receiver.as_object(), key, value) {
            PutOutcome::Done => Ok(()),
            PutOutcome::CallSetter(setter) => {
                self.call_value(ctx, setter, receiver, &[value])?;
                Ok(())
            }
            PutOutcome::Rejected => Ok(()),
        }
    }

    fn upvalue_slot(&self, ctx: &Context, depth: u32, index: u32) -> VmResult<Value> {
        let mut env = self.frames.last().expect("active frame").environment;
        for _ in 0..depth {
            env = env.and_then(|e| ctx.heap.environment(e).parent);
        }
        let env = env.ok_or_else(|| {
            ExecError::Engine(EngineError::InvalidBytecode("upvalue depth".into()))
        })?;
        ctx.heap
            .environment(env)
            .values
            .get(index as usize)
            .copied()
            .ok_or_else(|| ExecError::Engine(EngineError::InvalidBytecode("upvalue index".into())))
    }

    fn store_upvalue_slot(
        &mut self,
        ctx: &mut Context,
        depth: u32,
        index: u32,
        value: Value,
    ) -> VmResult<()> {
        let mut env = self.frames.last().expect("active frame").environment;
        for _ in 0..depth {
            env = env.and_then(|e| ctx.heap.environment(e).parent);
        }
        let env = env.ok_or_else(|| {
            ExecError::Engine(EngineError::InvalidBytecode("upvalue depth".into()))
        })?;
        let slot = ctx
            .heap
            .environment_mut(env)
            .values
            .get_mut(index as usize)
            .ok_or_else(|| {
                ExecError::Engine(EngineError::InvalidBytecode("upvalue index".into()))
            })?;
        *slot = value;
        Ok(())
    }

    /// GC handshake. Runs at backward branches and call sites.
    pub fn safepoint(&mut self, ctx: &mut Context) {
        if ctx.heap.needs_collection() {
            self.collect_garbage(ctx);
        }
    }

    /// Stop-the-world collection with precise roots: the register stack,
    /// frame state, resolved constant pools, intrinsics, and any register
    /// windows generated code is using.
    pub fn collect_garbage(&mut self, ctx: &mut Context) {
        let mut roots: Vec<Value> = Vec::with_capacity(self.stack.len() + 64);
        roots.extend_from_slice(&self.stack);
        roots.extend_from_slice(&self.temp_roots);
        for frame in &self.frames {
            roots.push(frame.this_value);
        }
        roots.extend(ctx.constant_roots());
        for &(ptr, len) in &self.jit_windows {
            // SAFETY: windows are registered only while the generated code
            // that owns them is on the native stack.
            let window = unsafe { std::slice::from_raw_parts(ptr as *const Value, len) };
            roots.extend_from_slice(window);
        }

        let mut cell_roots = ctx.intrinsic_roots();
        for frame in &self.frames {
            if let Some(env) = frame.environment {
                cell_roots.push(CellRef::Environment(env));
            }
        }
        ctx.heap.collect(&roots, &cell_roots);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn offset_pc(pc: usize, delta: i16) -> usize {
    (pc as i64 + delta as i64) as usize
}
