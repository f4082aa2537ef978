//! The template compiler.
//!
//! One emitter per opcode, each producing a sequence whose semantics equal
//! the interpreter's. Register roles in generated code are fixed: `r14`
//! holds the invocation context, `r13` the register-file base, `r15` the
//! int32 tag constant; `rax`/`rcx`/`rdx` are scratch.
//!
//! Chunks using opcodes outside the template set are rejected and stay on
//! the interpreter.

use crate::assembler::{Assembler, Cond, Reg, Xmm};
use crate::code_buffer::{ExecutableCode, JitEntry};
use crate::stubs::offsets;
use crate::type_record::{TypeEntry, TypeRecord};
use bytecode_system::{Chunk, Constant, Instruction, Opcode, WORDS_PER_INSTRUCTION};
use core_types::{Value, INT32_TAG_BITS, INT32_TAG_SHIFTED};
use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::debug;

const VALUE_SIZE: i32 = 8;

#[derive(Debug, Error)]
pub enum JitError {
    #[error("opcode {0:?} has no template")]
    Unsupported(Opcode),
    #[error("constant kind not materializable in code")]
    UnsupportedConstant,
    #[error("bytecode is malformed")]
    MalformedBytecode,
    #[error(transparent)]
    Assembler(#[from] crate::assembler::AsmError),
    #[error(transparent)]
    Map(#[from] core_types::EngineError),
}

/// A compiled function body.
#[derive(Debug)]
pub struct CompiledCode {
    code: ExecutableCode,
}

impl CompiledCode {
    /// # Safety
    ///
    /// Callers must uphold the JIT calling convention: a valid invocation
    /// context and a register file at least as large as the chunk's
    /// register count.
    pub unsafe fn entry(&self) -> JitEntry {
        self.code.entry()
    }

    pub fn code_size(&self) -> usize {
        self.code.len()
    }
}

/// Compile a chunk, or report why it must stay interpreted.
pub fn compile_chunk(chunk: &Chunk) -> Result<CompiledCode, JitError> {
    let mut compiler = Compiler::new(chunk);
    compiler.run()?;
    let bytes = compiler.asm.finish()?;
    let code = ExecutableCode::map(&bytes)?;
    debug!(code_size = code.len(), "template compilation finished");
    Ok(CompiledCode { code })
}

struct Compiler<'a> {
    chunk: &'a Chunk,
    asm: Assembler,
    types: TypeRecord,
    branch_targets: FxHashSet<u32>,
    /// pc of a fused-away branch instruction, skipped during the walk.
    fused_skip: Option<u32>,
}

impl<'a> Compiler<'a> {
    fn new(chunk: &'a Chunk) -> Self {
        Compiler {
            chunk,
            asm: Assembler::new(),
            types: TypeRecord::new(chunk.register_count as usize),
            branch_targets: FxHashSet::default(),
            fused_skip: None,
        }
    }

    fn run(&mut self) -> Result<(), JitError> {
        self.collect_branch_targets()?;
        self.emit_prologue();

        let mut pc = 0u32;
        let end = self.chunk.code.len() as u32;
        while pc < end {
            let instr = self
                .chunk
                .instruction_at(pc as usize)
                .ok_or(JitError::MalformedBytecode)?;
            if self.branch_targets.contains(&pc) {
                self.asm.bind(&pc_label(pc));
                // a join point: register contents depend on the path taken
                self.types.clear();
            }
            if self.fused_skip == Some(pc) {
                self.fused_skip = None;
                pc += WORDS_PER_INSTRUCTION as u32;
                continue;
            }
            self.emit_instruction(pc, instr)?;
            pc += WORDS_PER_INSTRUCTION as u32;
        }

        // fall off the end: behave like `return undefined`
        self.asm.mov_ri64(Reg::Rax, Value::UNDEFINED.bits());
        self.asm.jmp("epilogue");

        self.asm.bind("bail");
        self.asm.mov_ri64(Reg::Rax, Value::EMPTY.bits());
        self.asm.bind("epilogue");
        self.asm.pop(Reg::R15);
        self.asm.pop(Reg::R14);
        self.asm.pop(Reg::R13);
        self.asm.pop(Reg::Rbp);
        self.asm.ret();
        Ok(())
    }

    fn collect_branch_targets(&mut self) -> Result<(), JitError> {
        let mut pc = 0u32;
        let end = self.chunk.code.len() as u32;
        while pc < end {
            let instr = self
                .chunk
                .instruction_at(pc as usize)
                .ok_or(JitError::MalformedBytecode)?;
            if instr.opcode.is_branch() {
                let target = pc as i64 + instr.a as i64;
                if target < 0 || target >= end as i64 || target % 2 != 0 {
                    return Err(JitError::MalformedBytecode);
                }
                self.branch_targets.insert(target as u32);
            }
            pc += WORDS_PER_INSTRUCTION as u32;
        }
        Ok(())
    }

    fn emit_prologue(&mut self) {
        self.asm.push(Reg::Rbp);
        self.asm.mov_rr64(Reg::Rbp, Reg::Rsp);
        self.asm.push(Reg::R13);
        self.asm.push(Reg::R14);
        self.asm.push(Reg::R15);
        self.asm.mov_rr64(Reg::R14, Reg::Rdi);
        self.asm.mov_rr64(Reg::R13, Reg::Rsi);
        self.asm.mov_ri64(Reg::R15, INT32_TAG_BITS);
    }

    // -- helpers --

    fn load_vr(&mut self, reg: Reg, vr: i16) {
        self.asm.mov_rm64(reg, Reg::R13, vr as i32 * VALUE_SIZE);
    }

    fn load_vrs(&mut self, reg_a: Reg, vr_a: i16, reg_b: Reg, vr_b: i16) {
        self.load_vr(reg_a, vr_a);
        self.load_vr(reg_b, vr_b);
    }

    fn store_vr(&mut self, vr: i16, reg: Reg) {
        self.asm.mov_mr64(Reg::R13, vr as i32 * VALUE_SIZE, reg);
    }

    /// Branch to `label` unless `value_reg` carries the int32 tag.
    /// Clobbers `scratch`.
    fn int32_guard(&mut self, value_reg: Reg, scratch: Reg, label: &str) {
        self.asm.mov_rr64(scratch, value_reg);
        self.asm.shr_ri64(scratch, 47);
        self.asm.cmp_ri32(scratch, INT32_TAG_SHIFTED as i32);
        self.asm.jcc(Cond::NotEqual, label);
    }

    /// Call a stub slot with operands already in rsi/rdx, then bail if it
    /// recorded an error.
    fn call_stub(&mut self, offset: i32) {
        self.asm.mov_rr64(Reg::Rdi, Reg::R14);
        self.asm.call_m(Reg::R14, offset);
        self.asm.cmp_mi8(Reg::R14, offsets::PENDING_ERROR, 0);
        self.asm.jcc(Cond::NotEqual, "bail");
    }

    fn emit_constant_dest(&mut self, entry: TypeEntry, dst: i16) {
        let value = entry.constant_value().expect("constant destination");
        self.asm.mov_ri64(Reg::Rax, value.bits());
        self.store_vr(dst, Reg::Rax);
    }

    fn constant_for(&self, index: i16) -> Result<Value, JitError> {
        match self
            .chunk
            .constants
            .get(index as usize)
            .ok_or(JitError::MalformedBytecode)?
        {
            Constant::Undefined => Ok(Value::UNDEFINED),
            Constant::Null => Ok(Value::NULL),
            Constant::Bool(b) => Ok(Value::from_bool(*b)),
            Constant::Number(n) => Ok(Value::from_number(*n)),
            // string constants are heap values private to an engine
            Constant::String(_) => Err(JitError::UnsupportedConstant),
        }
    }

    /// The instruction that follows `pc`, when it can be fused into `pc`'s
    /// emission (it must not be a branch target of its own).
    fn fusible_next(&self, pc: u32) -> Option<(u32, Instruction)> {
        let next = pc + WORDS_PER_INSTRUCTION as u32;
        if self.branch_targets.contains(&next) {
            return None;
        }
        self.chunk
            .instruction_at(next as usize)
            .map(|instr| (next, instr))
    }

    // -- emitters --

    fn emit_instruction(&mut self, pc: u32, instr: Instruction) -> Result<(), JitError> {
        match instr.opcode {
            Opcode::Nop => Ok(()),
            Opcode::Move => {
                let entry = self.types.get(instr.b);
                if entry.is_constant() {
                    self.emit_constant_dest(entry, instr.a);
                } else {
                    self.load_vr(Reg::Rax, instr.b);
                    self.store_vr(instr.a, Reg::Rax);
                }
                self.types.put(instr.a, entry);
                Ok(())
            }
            Opcode::LoadConst => {
                let value = self.constant_for(instr.b)?;
                let entry = TypeEntry::constant(value);
                self.emit_constant_dest(entry, instr.a);
                self.types.put(instr.a, entry);
                Ok(())
            }
            Opcode::LoadUndefined => self.emit_load_immediate(instr.a, Value::UNDEFINED),
            Opcode::LoadNull => self.emit_load_immediate(instr.a, Value::NULL),
            Opcode::LoadTrue => self.emit_load_immediate(instr.a, Value::TRUE),
            Opcode::LoadFalse => self.emit_load_immediate(instr.a, Value::FALSE),
            Opcode::LoadInt => self.emit_load_immediate(instr.a, Value::from_i32(instr.b as i32)),

            Opcode::Add => self.emit_additive(instr, AdditiveKind::Add),
            Opcode::Sub => self.emit_additive(instr, AdditiveKind::Sub),
            Opcode::Mul => self.emit_multiply(instr),
            Opcode::Div => self.emit_stub_binary(instr, offsets::BINARY_DIVIDE, TypeEntry::divide),
            Opcode::Mod => self.emit_stub_binary(instr, offsets::BINARY_MODULO, TypeEntry::modulo),

            Opcode::BitAnd => self.emit_bitwise(pc, instr, BitwiseKind::And),
            Opcode::BitOr => self.emit_bitwise(pc, instr, BitwiseKind::Or),
            Opcode::BitXor => self.emit_bitwise(pc, instr, BitwiseKind::Xor),

            Opcode::Shl => self.emit_shift(instr, ShiftKind::Left),
            Opcode::Shr => self.emit_shift(instr, ShiftKind::Arithmetic),
            Opcode::UShr => self.emit_shift_logical(instr),

            Opcode::Lt => self.emit_compare(instr, Cond::Less, offsets::BINARY_LT),
            Opcode::LtEq => self.emit_compare(instr, Cond::LessEq, offsets::BINARY_LTE),
            Opcode::Gt => self.emit_compare(instr, Cond::Greater, offsets::BINARY_GT),
            Opcode::GtEq => self.emit_compare(instr, Cond::GreaterEq, offsets::BINARY_GTE),
            Opcode::Eq => self.emit_compare(instr, Cond::Equal, offsets::BINARY_EQ),
            Opcode::NotEq => self.emit_compare(instr, Cond::NotEqual, offsets::BINARY_NE),
            Opcode::StrictEq => self.emit_compare(instr, Cond::Equal, offsets::BINARY_STRICT_EQ),
            Opcode::StrictNotEq => {
                self.emit_compare(instr, Cond::NotEqual, offsets::BINARY_STRICT_NE)
            }

            Opcode::Jump => {
                self.asm.jmp(&pc_label(offset_pc(pc, instr.a)));
                Ok(())
            }
            Opcode::JumpIfTrue => self.emit_conditional_jump(pc, instr, true),
            Opcode::JumpIfFalse => self.emit_conditional_jump(pc, instr, false),
            Opcode::JumpIfLess => self.emit_fused_compare(pc, instr, Cond::Less, offsets::BINARY_LT),
            Opcode::JumpIfLessEq => {
                self.emit_fused_compare(pc, instr, Cond::LessEq, offsets::BINARY_LTE)
            }
            Opcode::JumpIfGreater => {
                self.emit_fused_compare(pc, instr, Cond::Greater, offsets::BINARY_GT)
            }
            Opcode::JumpIfGreaterEq => {
                self.emit_fused_compare(pc, instr, Cond::GreaterEq, offsets::BINARY_GTE)
            }

            Opcode::Neg => self.emit_stub_unary(instr, offsets::UNARY_NEG),
            Opcode::Not => self.emit_stub_unary(instr, offsets::UNARY_NOT),
            Opcode::BitNot => self.emit_stub_unary(instr, offsets::UNARY_BITNOT),

            Opcode::Return => {
                self.load_vr(Reg::Rax, instr.a);
                self.asm.jmp("epilogue");
                Ok(())
            }

            other => Err(JitError::Unsupported(other)),
        }
    }

    fn emit_load_immediate(&mut self, dst: i16, value: Value) -> Result<(), JitError> {
        let entry = TypeEntry::constant(value);
        self.emit_constant_dest(entry, dst);
        self.types.put(dst, entry);
        Ok(())
    }

    /// Add and Sub share one template: int32 fast path, overflow widening
    /// through 64-bit math, generic stub fallback.
    fn emit_additive(&mut self, instr: Instruction, kind: AdditiveKind) -> Result<(), JitError> {
        let (dst, lhs, rhs) = (instr.a, instr.b, instr.c);
        let lhs_entry = self.types.get(lhs);
        let rhs_entry = self.types.get(rhs);
        let (dst_entry, stub) = match kind {
            AdditiveKind::Add => (TypeEntry::add(lhs_entry, rhs_entry), offsets::BINARY_ADD),
            AdditiveKind::Sub => (
                TypeEntry::subtract(lhs_entry, rhs_entry),
                offsets::BINARY_SUBTRACT,
            ),
        };

        if dst_entry.is_constant() {
            self.emit_constant_dest(dst_entry, dst);
            self.types.put(dst, dst_entry);
            return Ok(());
        }

        if lhs_entry.kind().is_not_int32() || rhs_entry.kind().is_not_int32() {
            self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
            self.call_stub(stub);
            self.store_vr(dst, Reg::Rax);
            self.types.put(dst, dst_entry);
            return Ok(());
        }

        let scope = self.asm.enter_local_scope();

        let commutes = kind == AdditiveKind::Add;
        if commutes && lhs_entry.is_constant_int32() {
            let lhs_value = lhs_entry.constant_int32();
            self.load_vr(Reg::Rax, rhs);
            self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
            self.asm.add_ri32(Reg::Rax, lhs_value);
            self.asm.jcc(Cond::Overflow, ".ARITHMETIC_OVERFLOW");
        } else if rhs_entry.is_constant_int32() {
            let rhs_value = rhs_entry.constant_int32();
            self.load_vr(Reg::Rax, lhs);
            self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
            match kind {
                AdditiveKind::Add => self.asm.add_ri32(Reg::Rax, rhs_value),
                AdditiveKind::Sub => self.asm.sub_ri32(Reg::Rax, rhs_value),
            }
            self.asm.jcc(Cond::Overflow, ".ARITHMETIC_OVERFLOW");
        } else {
            self.load_vrs(Reg::Rax, lhs, Reg::Rdx, rhs);
            self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
            self.int32_guard(Reg::Rdx, Reg::Rcx, ".ARITHMETIC_GENERIC");
            match kind {
                AdditiveKind::Add => self.asm.add_rr32(Reg::Rax, Reg::Rdx),
                AdditiveKind::Sub => self.asm.sub_rr32(Reg::Rax, Reg::Rdx),
            }
            self.asm.jcc(Cond::Overflow, ".ARITHMETIC_OVERFLOW");
        }
        // boxing
        self.asm.or_rr64(Reg::Rax, Reg::R15);
        self.asm.jmp(".ARITHMETIC_EXIT");

        // both operands are int32 but the 32-bit result overflowed; redo
        // the operation in 64 bits, which is exact, and widen to double
        self.asm.bind(".ARITHMETIC_OVERFLOW");
        self.load_vrs(Reg::Rax, lhs, Reg::Rdx, rhs);
        self.asm.movsxd(Reg::Rax, Reg::Rax);
        self.asm.movsxd(Reg::Rdx, Reg::Rdx);
        match kind {
            AdditiveKind::Add => self.asm.add_rr64(Reg::Rax, Reg::Rdx),
            AdditiveKind::Sub => self.asm.sub_rr64(Reg::Rax, Reg::Rdx),
        }
        self.asm.cvtsi2sd64(Xmm::Xmm0, Reg::Rax);
        self.asm.movq_rx(Reg::Rax, Xmm::Xmm0);
        self.asm.jmp(".ARITHMETIC_EXIT");

        self.asm.bind(".ARITHMETIC_GENERIC");
        self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
        self.call_stub(stub);

        self.asm.bind(".ARITHMETIC_EXIT");
        self.store_vr(dst, Reg::Rax);
        self.asm.exit_local_scope(scope);
        self.types.put(dst, dst_entry);
        Ok(())
    }

    fn emit_multiply(&mut self, instr: Instruction) -> Result<(), JitError> {
        let (dst, lhs, rhs) = (instr.a, instr.b, instr.c);
        let lhs_entry = self.types.get(lhs);
        let rhs_entry = self.types.get(rhs);
        let dst_entry = TypeEntry::multiply(lhs_entry, rhs_entry);

        // the type entry is recorded even when the shortcut stores a
        // constant directly
        if dst_entry.is_constant() {
            self.emit_constant_dest(dst_entry, dst);
            self.types.put(dst, dst_entry);
            return Ok(());
        }

        if lhs_entry.kind().is_not_int32() || rhs_entry.kind().is_not_int32() {
            self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
            self.call_stub(offsets::BINARY_MULTIPLY);
            self.store_vr(dst, Reg::Rax);
            self.types.put(dst, dst_entry);
            return Ok(());
        }

        let scope = self.asm.enter_local_scope();

        if lhs_entry.is_constant_int32() {
            let lhs_value = lhs_entry.constant_int32();
            self.load_vr(Reg::Rax, rhs);
            self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
            self.asm.imul_rri32(Reg::Rax, Reg::Rax, lhs_value);
            self.asm.jcc(Cond::Overflow, ".ARITHMETIC_OVERFLOW");
        } else if rhs_entry.is_constant_int32() {
            let rhs_value = rhs_entry.constant_int32();
            self.load_vr(Reg::Rax, lhs);
            self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
            self.asm.imul_rri32(Reg::Rax, Reg::Rax, rhs_value);
            self.asm.jcc(Cond::Overflow, ".ARITHMETIC_OVERFLOW");
        } else {
            self.load_vrs(Reg::Rax, lhs, Reg::Rdx, rhs);
            self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
            self.int32_guard(Reg::Rdx, Reg::Rcx, ".ARITHMETIC_GENERIC");
            self.asm.imul_rr32(Reg::Rax, Reg::Rdx);
            self.asm.jcc(Cond::Overflow, ".ARITHMETIC_OVERFLOW");
        }
        // boxing
        self.asm.or_rr64(Reg::Rax, Reg::R15);
        self.asm.jmp(".ARITHMETIC_EXIT");

        // overflow path reloads both operands and multiplies as doubles
        self.asm.bind(".ARITHMETIC_OVERFLOW");
        self.load_vrs(Reg::Rax, lhs, Reg::Rdx, rhs);
        self.asm.cvtsi2sd32(Xmm::Xmm0, Reg::Rax);
        self.asm.cvtsi2sd32(Xmm::Xmm1, Reg::Rdx);
        self.asm.mulsd(Xmm::Xmm0, Xmm::Xmm1);
        self.asm.movq_rx(Reg::Rax, Xmm::Xmm0);
        self.asm.jmp(".ARITHMETIC_EXIT");

        self.asm.bind(".ARITHMETIC_GENERIC");
        self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
        self.call_stub(offsets::BINARY_MULTIPLY);

        self.asm.bind(".ARITHMETIC_EXIT");
        self.store_vr(dst, Reg::Rax);
        self.asm.exit_local_scope(scope);
        self.types.put(dst, dst_entry);
        Ok(())
    }

    fn emit_bitwise(
        &mut self,
        pc: u32,
        instr: Instruction,
        kind: BitwiseKind,
    ) -> Result<(), JitError> {
        let (dst, lhs, rhs) = (instr.a, instr.b, instr.c);
        let lhs_entry = self.types.get(lhs);
        let rhs_entry = self.types.get(rhs);
        let (dst_entry, stub) = match kind {
            BitwiseKind::And => (
                TypeEntry::bitwise_and(lhs_entry, rhs_entry),
                offsets::BINARY_BITAND,
            ),
            BitwiseKind::Or => (
                TypeEntry::bitwise_or(lhs_entry, rhs_entry),
                offsets::BINARY_BITOR,
            ),
            BitwiseKind::Xor => (
                TypeEntry::bitwise_xor(lhs_entry, rhs_entry),
                offsets::BINARY_BITXOR,
            ),
        };

        // bitwise-and feeding a conditional branch is emitted as a single
        // test-and-jump; the branch instruction is consumed
        let fused = if kind == BitwiseKind::And {
            self.fusible_next(pc).and_then(|(next_pc, next)| {
                match next.opcode {
                    Opcode::JumpIfTrue | Opcode::JumpIfFalse if next.b == dst => Some((
                        next_pc,
                        next.opcode == Opcode::JumpIfTrue,
                        pc_label(offset_pc(next_pc, next.a)),
                    )),
                    _ => None,
                }
            })
        } else {
            None
        };

        if dst_entry.is_constant() {
            if let Some((next_pc, on_true, target)) = fused {
                self.fused_skip = Some(next_pc);
                let taken = dst_entry
                    .constant_value()
                    .expect("constant destination")
                    .to_boolean();
                if taken == on_true {
                    self.asm.jmp(&target);
                }
            } else {
                self.emit_constant_dest(dst_entry, dst);
                self.types.put(dst, dst_entry);
            }
            return Ok(());
        }

        if lhs_entry.kind().is_not_int32() || rhs_entry.kind().is_not_int32() {
            self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
            self.call_stub(stub);
            if let Some((next_pc, on_true, target)) = fused {
                self.fused_skip = Some(next_pc);
                self.asm.test_rr32(Reg::Rax, Reg::Rax);
                let cond = if on_true { Cond::NotEqual } else { Cond::Equal };
                self.asm.jcc(cond, &target);
            } else {
                self.store_vr(dst, Reg::Rax);
                self.types.put(dst, dst_entry);
            }
            return Ok(());
        }

        let scope = self.asm.enter_local_scope();

        if lhs_entry.is_constant_int32() {
            let lhs_value = lhs_entry.constant_int32();
            self.load_vr(Reg::Rax, rhs);
            self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
            self.emit_bitwise_imm(kind, lhs_value);
        } else if rhs_entry.is_constant_int32() {
            let rhs_value = rhs_entry.constant_int32();
            self.load_vr(Reg::Rax, lhs);
            self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
            self.emit_bitwise_imm(kind, rhs_value);
        } else {
            self.load_vrs(Reg::Rax, lhs, Reg::Rdx, rhs);
            self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
            self.int32_guard(Reg::Rdx, Reg::Rcx, ".ARITHMETIC_GENERIC");
            match kind {
                BitwiseKind::And => self.asm.and_rr32(Reg::Rax, Reg::Rdx),
                BitwiseKind::Or => self.asm.or_rr32(Reg::Rax, Reg::Rdx),
                BitwiseKind::Xor => self.asm.xor_rr32(Reg::Rax, Reg::Rdx),
            }
        }

        if let Some((next_pc, on_true, target)) = fused {
            self.fused_skip = Some(next_pc);
            let cond = if on_true { Cond::NotEqual } else { Cond::Equal };
            // the 32-bit ALU op already set the flags
            self.asm.jcc(cond, &target);
            self.asm.jmp(".ARITHMETIC_EXIT");

            self.asm.bind(".ARITHMETIC_GENERIC");
            self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
            self.call_stub(stub);
            self.asm.test_rr32(Reg::Rax, Reg::Rax);
            self.asm.jcc(cond, &target);
            self.asm.bind(".ARITHMETIC_EXIT");
            self.asm.exit_local_scope(scope);
        } else {
            // boxing
            self.asm.or_rr64(Reg::Rax, Reg::R15);
            self.asm.jmp(".ARITHMETIC_EXIT");

            self.asm.bind(".ARITHMETIC_GENERIC");
            self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
            self.call_stub(stub);

            self.asm.bind(".ARITHMETIC_EXIT");
            self.store_vr(dst, Reg::Rax);
            self.asm.exit_local_scope(scope);
            self.types.put(dst, dst_entry);
        }
        Ok(())
    }

    fn emit_bitwise_imm(&mut self, kind: BitwiseKind, imm: i32) {
        match kind {
            BitwiseKind::And => self.asm.and_ri32(Reg::Rax, imm),
            BitwiseKind::Or => self.asm.or_ri32(Reg::Rax, imm),
            BitwiseKind::Xor => self.asm.xor_ri32(Reg::Rax, imm),
        }
    }

    fn emit_shift(&mut self, instr: Instruction, kind: ShiftKind) -> Result<(), JitError> {
        let (dst, lhs, rhs) = (instr.a, instr.b, instr.c);
        let lhs_entry = self.types.get(lhs);
        let rhs_entry = self.types.get(rhs);
        let (dst_entry, stub) = match kind {
            ShiftKind::Left => (
                TypeEntry::lshift(lhs_entry, rhs_entry),
                offsets::BINARY_LSHIFT,
            ),
            ShiftKind::Arithmetic => (
                TypeEntry::rshift(lhs_entry, rhs_entry),
                offsets::BINARY_RSHIFT,
            ),
        };

        if dst_entry.is_constant() {
            self.emit_constant_dest(dst_entry, dst);
            self.types.put(dst, dst_entry);
            return Ok(());
        }

        if lhs_entry.kind().is_not_int32() || rhs_entry.kind().is_not_int32() {
            self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
            self.call_stub(stub);
            self.store_vr(dst, Reg::Rax);
            self.types.put(dst, dst_entry);
            return Ok(());
        }

        let scope = self.asm.enter_local_scope();

        if rhs_entry.is_constant_int32() {
            // constant shift counts are masked to their low 5 bits
            let count = (rhs_entry.constant_int32() & 0x1F) as u8;
            self.load_vr(Reg::Rax, lhs);
            self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
            match kind {
                ShiftKind::Left => self.asm.shl_ri32(Reg::Rax, count),
                ShiftKind::Arithmetic => self.asm.sar_ri32(Reg::Rax, count),
            }
        } else {
            self.load_vrs(Reg::Rax, lhs, Reg::Rcx, rhs);
            self.int32_guard(Reg::Rax, Reg::Rdx, ".ARITHMETIC_GENERIC");
            self.int32_guard(Reg::Rcx, Reg::Rdx, ".ARITHMETIC_GENERIC");
            match kind {
                ShiftKind::Left => self.asm.shl_cl32(Reg::Rax),
                ShiftKind::Arithmetic => self.asm.sar_cl32(Reg::Rax),
            }
        }
        // boxing
        self.asm.or_rr64(Reg::Rax, Reg::R15);
        self.asm.jmp(".ARITHMETIC_EXIT");

        self.asm.bind(".ARITHMETIC_GENERIC");
        self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
        self.call_stub(stub);

        self.asm.bind(".ARITHMETIC_EXIT");
        self.store_vr(dst, Reg::Rax);
        self.asm.exit_local_scope(scope);
        self.types.put(dst, dst_entry);
        Ok(())
    }

    fn emit_shift_logical(&mut self, instr: Instruction) -> Result<(), JitError> {
        let (dst, lhs, rhs) = (instr.a, instr.b, instr.c);
        let lhs_entry = self.types.get(lhs);
        let rhs_entry = self.types.get(rhs);
        let dst_entry = TypeEntry::rshift_logical(lhs_entry, rhs_entry);

        if dst_entry.is_constant() {
            self.emit_constant_dest(dst_entry, dst);
            self.types.put(dst, dst_entry);
            return Ok(());
        }

        if lhs_entry.kind().is_not_int32() || rhs_entry.kind().is_not_int32() {
            self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
            self.call_stub(offsets::BINARY_RSHIFT_LOGICAL);
            self.store_vr(dst, Reg::Rax);
            self.types.put(dst, dst_entry);
            return Ok(());
        }

        let scope = self.asm.enter_local_scope();

        if rhs_entry.is_constant_int32() {
            let count = (rhs_entry.constant_int32() & 0x1F) as u8;
            self.load_vr(Reg::Rax, lhs);
            self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
            if count > 0 {
                self.asm.shr_ri32(Reg::Rax, count);
            } else {
                // strip the tag: the sign test and the double widening
                // below read rax as a plain uint32
                self.asm.mov_rr32(Reg::Rax, Reg::Rax);
            }
        } else {
            self.load_vrs(Reg::Rax, lhs, Reg::Rcx, rhs);
            self.int32_guard(Reg::Rax, Reg::Rdx, ".ARITHMETIC_GENERIC");
            self.int32_guard(Reg::Rcx, Reg::Rdx, ".ARITHMETIC_GENERIC");
            self.asm.shr_cl32(Reg::Rax);
            // a zero cl leaves the register unwritten; strip the tag
            self.asm.mov_rr32(Reg::Rax, Reg::Rax);
        }
        // a uint32 with the high bit set does not fit in int32 and is
        // boxed as a double
        self.asm.cmp_ri32(Reg::Rax, 0);
        self.asm.jcc(Cond::Less, ".ARITHMETIC_DOUBLE");

        // boxing
        self.asm.or_rr64(Reg::Rax, Reg::R15);
        self.asm.jmp(".ARITHMETIC_EXIT");

        self.asm.bind(".ARITHMETIC_DOUBLE");
        self.asm.cvtsi2sd64(Xmm::Xmm0, Reg::Rax);
        self.asm.movq_rx(Reg::Rax, Xmm::Xmm0);
        self.asm.jmp(".ARITHMETIC_EXIT");

        self.asm.bind(".ARITHMETIC_GENERIC");
        self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
        self.call_stub(offsets::BINARY_RSHIFT_LOGICAL);

        self.asm.bind(".ARITHMETIC_EXIT");
        self.store_vr(dst, Reg::Rax);
        self.asm.exit_local_scope(scope);
        self.types.put(dst, dst_entry);
        Ok(())
    }

    fn emit_stub_binary(
        &mut self,
        instr: Instruction,
        stub: i32,
        transfer: fn(TypeEntry, TypeEntry) -> TypeEntry,
    ) -> Result<(), JitError> {
        let (dst, lhs, rhs) = (instr.a, instr.b, instr.c);
        let dst_entry = transfer(self.types.get(lhs), self.types.get(rhs));
        if dst_entry.is_constant() {
            self.emit_constant_dest(dst_entry, dst);
            self.types.put(dst, dst_entry);
            return Ok(());
        }
        self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
        self.call_stub(stub);
        self.store_vr(dst, Reg::Rax);
        self.types.put(dst, dst_entry);
        Ok(())
    }

    fn emit_stub_unary(&mut self, instr: Instruction, stub: i32) -> Result<(), JitError> {
        let (dst, src) = (instr.a, instr.b);
        self.load_vr(Reg::Rsi, src);
        self.call_stub(stub);
        self.store_vr(dst, Reg::Rax);
        self.types.put(dst, TypeEntry::UNKNOWN);
        Ok(())
    }

    fn emit_compare(&mut self, instr: Instruction, cond: Cond, stub: i32) -> Result<(), JitError> {
        let (dst, lhs, rhs) = (instr.a, instr.b, instr.c);
        let lhs_entry = self.types.get(lhs);
        let rhs_entry = self.types.get(rhs);

        if lhs_entry.kind().is_not_int32() || rhs_entry.kind().is_not_int32() {
            self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
            self.call_stub(stub);
            self.store_vr(dst, Reg::Rax);
            self.types.put(dst, TypeEntry::of_kind(crate::type_record::TypeKind::Boolean));
            return Ok(());
        }

        let scope = self.asm.enter_local_scope();

        self.load_vrs(Reg::Rax, lhs, Reg::Rdx, rhs);
        self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
        self.int32_guard(Reg::Rdx, Reg::Rcx, ".ARITHMETIC_GENERIC");
        self.asm.cmp_rr32(Reg::Rax, Reg::Rdx);
        self.asm.setcc(cond, Reg::Rax);
        self.asm.movzx_rr8(Reg::Rax, Reg::Rax);
        // box as boolean
        self.asm.mov_ri64(Reg::Rcx, Value::FALSE.bits());
        self.asm.or_rr64(Reg::Rax, Reg::Rcx);
        self.asm.jmp(".ARITHMETIC_EXIT");

        self.asm.bind(".ARITHMETIC_GENERIC");
        self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
        self.call_stub(stub);

        self.asm.bind(".ARITHMETIC_EXIT");
        self.store_vr(dst, Reg::Rax);
        self.asm.exit_local_scope(scope);
        self.types
            .put(dst, TypeEntry::of_kind(crate::type_record::TypeKind::Boolean));
        Ok(())
    }

    fn emit_conditional_jump(
        &mut self,
        pc: u32,
        instr: Instruction,
        on_true: bool,
    ) -> Result<(), JitError> {
        let target = pc_label(offset_pc(pc, instr.a));
        self.load_vr(Reg::Rsi, instr.b);
        self.call_stub(offsets::TO_BOOLEAN);
        self.asm.test_rr32(Reg::Rax, Reg::Rax);
        let cond = if on_true { Cond::NotEqual } else { Cond::Equal };
        self.asm.jcc(cond, &target);
        Ok(())
    }

    /// Fused compare-and-branch: int32 fast path jumps on the flags, the
    /// generic path tests the stub's boxed boolean payload.
    fn emit_fused_compare(
        &mut self,
        pc: u32,
        instr: Instruction,
        cond: Cond,
        stub: i32,
    ) -> Result<(), JitError> {
        let target = pc_label(offset_pc(pc, instr.a));
        let (lhs, rhs) = (instr.b, instr.c);

        let scope = self.asm.enter_local_scope();

        self.load_vrs(Reg::Rax, lhs, Reg::Rdx, rhs);
        self.int32_guard(Reg::Rax, Reg::Rcx, ".ARITHMETIC_GENERIC");
        self.int32_guard(Reg::Rdx, Reg::Rcx, ".ARITHMETIC_GENERIC");
        self.asm.cmp_rr32(Reg::Rax, Reg::Rdx);
        self.asm.jcc(cond, &target);
        self.asm.jmp(".ARITHMETIC_EXIT");

        self.asm.bind(".ARITHMETIC_GENERIC");
        self.load_vrs(Reg::Rsi, lhs, Reg::Rdx, rhs);
        self.call_stub(stub);
        self.asm.test_rr32(Reg::Rax, Reg::Rax);
        self.asm.jcc(Cond::NotEqual, &target);

        self.asm.bind(".ARITHMETIC_EXIT");
        self.asm.exit_local_scope(scope);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdditiveKind {
    Add,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitwiseKind {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftKind {
    Left,
    Arithmetic,
}

fn pc_label(pc: u32) -> String {
    format!("pc_{}", pc)
}

fn offset_pc(pc: u32, delta: i16) -> u32 {
    (pc as i64 + delta as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode_system::ChunkBuilder;

    #[test]
    fn test_unsupported_opcode_is_reported() {
        let mut b = ChunkBuilder::new(2);
        b.emit(Opcode::NewObject, 0, 0, 0);
        b.emit(Opcode::Return, 0, 0, 0);
        match compile_chunk(&b.build()) {
            Err(JitError::Unsupported(Opcode::NewObject)) => {}
            other => panic!("expected unsupported opcode, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_string_constant_is_rejected() {
        let mut b = ChunkBuilder::new(1);
        let c = b.add_constant(Constant::String("heap".into()));
        b.emit(Opcode::LoadConst, 0, c as i16, 0);
        b.emit(Opcode::Return, 0, 0, 0);
        assert!(matches!(
            compile_chunk(&b.build()),
            Err(JitError::UnsupportedConstant)
        ));
    }

    #[test]
    fn test_branch_out_of_range_is_malformed() {
        let mut b = ChunkBuilder::new(1);
        b.emit(Opcode::Jump, 64, 0, 0);
        assert!(matches!(
            compile_chunk(&b.build()),
            Err(JitError::MalformedBytecode)
        ));
    }

    #[cfg(all(unix, target_arch = "x86_64"))]
    mod native {
        use super::*;
        use crate::stubs::{JitInvocation, StubTable};
        use core_types::Value;

        extern "C" fn stub_unreachable2(_: *mut JitInvocation, _: u64, _: u64) -> u64 {
            panic!("stub must not be reached");
        }

        extern "C" fn stub_unreachable1(_: *mut JitInvocation, _: u64) -> u64 {
            panic!("stub must not be reached");
        }

        extern "C" fn stub_add_doubles(_: *mut JitInvocation, lhs: u64, rhs: u64) -> u64 {
            let l = Value::from_bits(lhs).number();
            let r = Value::from_bits(rhs).number();
            Value::from_number(l + r).bits()
        }

        fn table(add: Option<crate::stubs::BinaryStub>) -> StubTable {
            StubTable {
                binary_add: add.unwrap_or(stub_unreachable2),
                binary_subtract: stub_unreachable2,
                binary_multiply: stub_unreachable2,
                binary_divide: stub_unreachable2,
                binary_modulo: stub_unreachable2,
                binary_bitand: stub_unreachable2,
                binary_bitor: stub_unreachable2,
                binary_bitxor: stub_unreachable2,
                binary_lshift: stub_unreachable2,
                binary_rshift: stub_unreachable2,
                binary_rshift_logical: stub_unreachable2,
                binary_lt: stub_unreachable2,
                binary_lte: stub_unreachable2,
                binary_gt: stub_unreachable2,
                binary_gte: stub_unreachable2,
                binary_eq: stub_unreachable2,
                binary_ne: stub_unreachable2,
                binary_strict_eq: stub_unreachable2,
                binary_strict_ne: stub_unreachable2,
                unary_neg: stub_unreachable1,
                unary_not: stub_unreachable1,
                unary_bitnot: stub_unreachable1,
                to_boolean: stub_unreachable1,
            }
        }

        fn run(chunk: &Chunk, regs: &mut [Value]) -> Value {
            let compiled = compile_chunk(chunk).unwrap();
            let mut invocation = JitInvocation::new(table(Some(stub_add_doubles)), std::ptr::null_mut());
            // SAFETY: register file is sized per the chunk and the
            // invocation outlives the call.
            let bits = unsafe {
                let entry = compiled.entry();
                entry(&mut invocation, regs.as_mut_ptr() as *mut u64)
            };
            assert_eq!(invocation.pending_error, 0);
            Value::from_bits(bits)
        }

        #[test]
        fn test_int32_add_fast_path() {
            let mut b = ChunkBuilder::new(3);
            b.emit(Opcode::Add, 2, 0, 1);
            b.emit(Opcode::Return, 2, 0, 0);
            let chunk = b.build();

            let mut regs = [Value::from_i32(20), Value::from_i32(22), Value::UNDEFINED];
            let result = run(&chunk, &mut regs);
            assert_eq!(result, Value::from_i32(42));
            // the destination register was stored through
            assert_eq!(regs[2], Value::from_i32(42));
        }

        #[test]
        fn test_add_overflow_widens_to_double() {
            let mut b = ChunkBuilder::new(3);
            b.emit(Opcode::Add, 2, 0, 1);
            b.emit(Opcode::Return, 2, 0, 0);
            let chunk = b.build();

            let mut regs = [Value::from_i32(i32::MAX), Value::from_i32(1), Value::UNDEFINED];
            let result = run(&chunk, &mut regs);
            assert!(result.is_double());
            assert_eq!(result.as_double(), 2147483648.0);
        }

        #[test]
        fn test_double_operand_takes_generic_stub() {
            let mut b = ChunkBuilder::new(3);
            b.emit(Opcode::Add, 2, 0, 1);
            b.emit(Opcode::Return, 2, 0, 0);
            let chunk = b.build();

            let mut regs = [Value::from_f64(0.5), Value::from_i32(1), Value::UNDEFINED];
            let result = run(&chunk, &mut regs);
            assert_eq!(result.as_double(), 1.5);
        }

        #[test]
        fn test_constant_folded_destination() {
            let mut b = ChunkBuilder::new(3);
            b.emit(Opcode::LoadInt, 0, 6, 0);
            b.emit(Opcode::LoadInt, 1, 7, 0);
            // both operands are compile-time constants: no stub, no guard
            b.emit(Opcode::Mul, 2, 0, 1);
            b.emit(Opcode::Return, 2, 0, 0);
            let chunk = b.build();

            let mut regs = [Value::UNDEFINED; 3];
            assert_eq!(run(&chunk, &mut regs), Value::from_i32(42));
        }

        #[test]
        fn test_ushr_boxes_uint32_as_double() {
            // S2: (-1) >>> 0 == 4294967295
            let mut b = ChunkBuilder::new(3);
            b.emit(Opcode::UShr, 2, 0, 1);
            b.emit(Opcode::Return, 2, 0, 0);
            let chunk = b.build();

            let mut regs = [Value::from_i32(-1), Value::from_i32(0), Value::UNDEFINED];
            let result = run(&chunk, &mut regs);
            assert!(result.is_double());
            assert_eq!(result.as_double(), 4294967295.0);
        }

        #[test]
        fn test_shift_masks_constant_count() {
            let mut b = ChunkBuilder::new(3);
            b.emit(Opcode::LoadInt, 1, 33, 0); // masked to 1
            b.emit(Opcode::Shl, 2, 0, 1);
            b.emit(Opcode::Return, 2, 0, 0);
            let chunk = b.build();

            let mut regs = [Value::from_i32(3), Value::UNDEFINED, Value::UNDEFINED];
            assert_eq!(run(&chunk, &mut regs), Value::from_i32(6));
        }

        #[test]
        fn test_fused_compare_branch_loop() {
            // sum 1..=n with a backward fused branch:
            //   r1 = 0 (sum); r2 = 1 (i); r3 = 1 (step)
            // loop: r1 += r2; r2 += r3; if r2 <= r0 jump loop; return r1
            let mut b = ChunkBuilder::new(4);
            b.emit(Opcode::LoadInt, 1, 0, 0);
            b.emit(Opcode::LoadInt, 2, 1, 0);
            b.emit(Opcode::LoadInt, 3, 1, 0);
            let loop_start = b.emit(Opcode::Add, 1, 1, 2);
            b.emit(Opcode::Add, 2, 2, 3);
            let branch = b.emit_jump(Opcode::JumpIfLessEq, 2, 0);
            b.patch_jump(branch, loop_start);
            b.emit(Opcode::Return, 1, 0, 0);
            let chunk = b.build();

            let mut regs = [
                Value::from_i32(10),
                Value::UNDEFINED,
                Value::UNDEFINED,
                Value::UNDEFINED,
            ];
            assert_eq!(run(&chunk, &mut regs), Value::from_i32(55));
        }

        #[test]
        fn test_fused_bitand_branch() {
            // if (r0 & 1) return 100 else return 200
            let mut b = ChunkBuilder::new(3);
            b.emit(Opcode::LoadInt, 1, 1, 0);
            b.emit(Opcode::BitAnd, 2, 0, 1);
            let branch = b.emit_jump(Opcode::JumpIfTrue, 2, 0);
            b.emit(Opcode::LoadInt, 1, 200, 0);
            b.emit(Opcode::Return, 1, 0, 0);
            let odd = b.emit(Opcode::LoadInt, 1, 100, 0);
            b.emit(Opcode::Return, 1, 0, 0);
            b.patch_jump(branch, odd);
            let chunk = b.build();

            let mut regs = [Value::from_i32(7), Value::UNDEFINED, Value::UNDEFINED];
            assert_eq!(run(&chunk, &mut regs), Value::from_i32(100));
            let mut regs = [Value::from_i32(8), Value::UNDEFINED, Value::UNDEFINED];
            assert_eq!(run(&chunk, &mut regs), Value::from_i32(200));
        }

        #[test]
        fn test_pending_error_bails_with_empty_sentinel() {
            extern "C" fn stub_raises(invocation: *mut JitInvocation, _: u64, _: u64) -> u64 {
                // SAFETY: the VM guarantees the pointer for the call.
                unsafe {
                    (*invocation).pending_error = 1;
                }
                Value::UNDEFINED.bits()
            }

            let mut b = ChunkBuilder::new(3);
            b.emit(Opcode::Add, 2, 0, 1);
            b.emit(Opcode::Return, 2, 0, 0);
            let chunk = b.build();
            let compiled = compile_chunk(&chunk).unwrap();

            let mut invocation = JitInvocation::new(table(Some(stub_raises)), std::ptr::null_mut());
            let mut regs = [Value::UNDEFINED, Value::from_i32(1), Value::UNDEFINED];
            // undefined operand forces the generic path, whose stub raises
            let bits = unsafe {
                let entry = compiled.entry();
                entry(&mut invocation, regs.as_mut_ptr() as *mut u64)
            };
            assert_eq!(invocation.pending_error, 1);
            assert!(Value::from_bits(bits).is_empty());
        }
    }
}
