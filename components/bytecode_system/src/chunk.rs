//! Bytecode chunks: code, constant pool, exception table.
//!
//! The serialized form is a sequence of little-endian 32-bit words: a header
//! `{magic, version, entry_pc, const_count, reg_count}`, a typed
//! length-prefixed constant pool, the exception table, then the instruction
//! words.

use crate::instruction::{Instruction, WORDS_PER_INSTRUCTION};
use crate::opcode::Opcode;
use thiserror::Error;

/// `"JSBC"` in little-endian word order.
pub const CHUNK_MAGIC: u32 = u32::from_le_bytes(*b"JSBC");
pub const CHUNK_VERSION: u32 = 1;

const CONST_UNDEFINED: u32 = 0;
const CONST_NULL: u32 = 1;
const CONST_BOOL: u32 = 2;
const CONST_NUMBER: u32 = 3;
const CONST_STRING: u32 = 4;

/// A constant-pool entry. String constants are interned into the heap when
/// the chunk is loaded into an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// One exception-table range. `handler_pc` receives control with the thrown
/// value when an error unwinds out of `[start_pc, end_pc)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
}

/// A compiled function body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chunk {
    pub code: Vec<u32>,
    pub constants: Vec<Constant>,
    pub register_count: u16,
    pub entry_pc: u32,
    pub exception_table: Vec<ExceptionEntry>,
    /// Declared parameter count; callers pad missing arguments with
    /// undefined.
    pub param_count: u16,
}

#[derive(Debug, Error, PartialEq)]
pub enum ChunkDecodeError {
    #[error("chunk is truncated")]
    Truncated,
    #[error("bad magic number {0:#x}")]
    BadMagic(u32),
    #[error("unsupported version {0}")]
    BadVersion(u32),
    #[error("unknown constant tag {0}")]
    BadConstantTag(u32),
    #[error("constant string is not valid UTF-8")]
    BadString,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    pub fn instruction_count(&self) -> usize {
        self.code.len() / WORDS_PER_INSTRUCTION
    }

    /// Decode the instruction at `pc` (a word offset).
    pub fn instruction_at(&self, pc: usize) -> Option<Instruction> {
        Instruction::decode(&self.code, pc)
    }

    /// The handler for an error raised at `pc`, if any. Entries are scanned
    /// in order; the first covering range wins.
    pub fn handler_for(&self, pc: u32) -> Option<u32> {
        self.exception_table
            .iter()
            .find(|entry| entry.start_pc <= pc && pc < entry.end_pc)
            .map(|entry| entry.handler_pc)
    }

    /// Serialize to little-endian words, returned as bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut words: Vec<u32> = vec![
            CHUNK_MAGIC,
            CHUNK_VERSION,
            self.entry_pc,
            self.constants.len() as u32,
            self.register_count as u32 | ((self.param_count as u32) << 16),
        ];
        for constant in &self.constants {
            match constant {
                Constant::Undefined => words.push(CONST_UNDEFINED),
                Constant::Null => words.push(CONST_NULL),
                Constant::Bool(b) => {
                    words.push(CONST_BOOL);
                    words.push(*b as u32);
                }
                Constant::Number(n) => {
                    words.push(CONST_NUMBER);
                    let bits = n.to_bits();
                    words.push(bits as u32);
                    words.push((bits >> 32) as u32);
                }
                Constant::String(s) => {
                    words.push(CONST_STRING);
                    words.push(s.len() as u32);
                    for chunk in s.as_bytes().chunks(4) {
                        let mut padded = [0u8; 4];
                        padded[..chunk.len()].copy_from_slice(chunk);
                        words.push(u32::from_le_bytes(padded));
                    }
                }
            }
        }
        words.push(self.exception_table.len() as u32);
        for entry in &self.exception_table {
            words.push(entry.start_pc);
            words.push(entry.end_pc);
            words.push(entry.handler_pc);
        }
        words.push(self.code.len() as u32);
        words.extend_from_slice(&self.code);

        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Chunk, ChunkDecodeError> {
        let mut reader = WordReader::new(bytes)?;
        let magic = reader.next()?;
        if magic != CHUNK_MAGIC {
            return Err(ChunkDecodeError::BadMagic(magic));
        }
        let version = reader.next()?;
        if version != CHUNK_VERSION {
            return Err(ChunkDecodeError::BadVersion(version));
        }
        let entry_pc = reader.next()?;
        let const_count = reader.next()? as usize;
        let packed = reader.next()?;
        let register_count = packed as u16;
        let param_count = (packed >> 16) as u16;

        let mut constants = Vec::with_capacity(const_count);
        for _ in 0..const_count {
            let tag = reader.next()?;
            constants.push(match tag {
                CONST_UNDEFINED => Constant::Undefined,
                CONST_NULL => Constant::Null,
                CONST_BOOL => Constant::Bool(reader.next()? != 0),
                CONST_NUMBER => {
                    let lo = reader.next()? as u64;
                    let hi = reader.next()? as u64;
                    Constant::Number(f64::from_bits(lo | (hi << 32)))
                }
                CONST_STRING => {
                    let byte_len = reader.next()? as usize;
                    let word_len = byte_len.div_ceil(4);
                    let mut bytes = Vec::with_capacity(word_len * 4);
                    for _ in 0..word_len {
                        bytes.extend_from_slice(&reader.next()?.to_le_bytes());
                    }
                    bytes.truncate(byte_len);
                    Constant::String(
                        String::from_utf8(bytes).map_err(|_| ChunkDecodeError::BadString)?,
                    )
                }
                other => return Err(ChunkDecodeError::BadConstantTag(other)),
            });
        }

        let handler_count = reader.next()? as usize;
        let mut exception_table = Vec::with_capacity(handler_count);
        for _ in 0..handler_count {
            exception_table.push(ExceptionEntry {
                start_pc: reader.next()?,
                end_pc: reader.next()?,
                handler_pc: reader.next()?,
            });
        }

        let code_len = reader.next()? as usize;
        let mut code = Vec::with_capacity(code_len);
        for _ in 0..code_len {
            code.push(reader.next()?);
        }

        Ok(Chunk {
            code,
            constants,
            register_count,
            entry_pc,
            exception_table,
            param_count,
        })
    }
}

struct WordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WordReader<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, ChunkDecodeError> {
        if bytes.len() % 4 != 0 {
            return Err(ChunkDecodeError::Truncated);
        }
        Ok(WordReader { bytes, pos: 0 })
    }

    fn next(&mut self) -> Result<u32, ChunkDecodeError> {
        if self.pos + 4 > self.bytes.len() {
            return Err(ChunkDecodeError::Truncated);
        }
        let word = u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(word)
    }
}

/// Incremental chunk construction with jump patching.
///
/// # Examples
///
/// ```
/// use bytecode_system::{ChunkBuilder, Opcode};
///
/// let mut b = ChunkBuilder::new(2);
/// b.emit(Opcode::LoadInt, 0, 41, 0);
/// b.emit(Opcode::LoadInt, 1, 1, 0);
/// b.emit(Opcode::Add, 0, 0, 1);
/// b.emit(Opcode::Return, 0, 0, 0);
/// let chunk = b.build();
/// assert_eq!(chunk.instruction_count(), 4);
/// ```
#[derive(Debug, Default)]
pub struct ChunkBuilder {
    chunk: Chunk,
}

impl ChunkBuilder {
    pub fn new(register_count: u16) -> Self {
        ChunkBuilder {
            chunk: Chunk {
                register_count,
                ..Chunk::default()
            },
        }
    }

    pub fn with_params(register_count: u16, param_count: u16) -> Self {
        let mut builder = ChunkBuilder::new(register_count);
        builder.chunk.param_count = param_count;
        builder
    }

    /// Current pc, in words.
    pub fn pc(&self) -> u32 {
        self.chunk.code.len() as u32
    }

    /// Emit an instruction; returns its pc.
    pub fn emit(&mut self, opcode: Opcode, a: i16, b: i16, c: i16) -> u32 {
        let pc = self.pc();
        self.chunk
            .code
            .extend_from_slice(&Instruction::new(opcode, a, b, c).encode());
        pc
    }

    /// Emit a branch with a dummy delta; patch later with `patch_jump`.
    pub fn emit_jump(&mut self, opcode: Opcode, b: i16, c: i16) -> u32 {
        debug_assert!(opcode.is_branch());
        self.emit(opcode, 0, b, c)
    }

    /// Point the branch at `branch_pc` to `target_pc`.
    pub fn patch_jump(&mut self, branch_pc: u32, target_pc: u32) {
        let delta = target_pc as i64 - branch_pc as i64;
        debug_assert!(i16::MIN as i64 <= delta && delta <= i16::MAX as i64);
        let instr = Instruction::decode(&self.chunk.code, branch_pc as usize)
            .expect("patching a valid branch");
        let words = Instruction::new(instr.opcode, delta as i16, instr.b, instr.c).encode();
        self.chunk.code[branch_pc as usize] = words[0];
        self.chunk.code[branch_pc as usize + 1] = words[1];
    }

    pub fn add_constant(&mut self, constant: Constant) -> u16 {
        let index = self.chunk.constants.len() as u16;
        self.chunk.constants.push(constant);
        index
    }

    pub fn add_exception_range(&mut self, start_pc: u32, end_pc: u32, handler_pc: u32) {
        self.chunk.exception_table.push(ExceptionEntry {
            start_pc,
            end_pc,
            handler_pc,
        });
    }

    pub fn build(self) -> Chunk {
        self.chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk() -> Chunk {
        let mut b = ChunkBuilder::with_params(4, 1);
        let msg = b.add_constant(Constant::String("boom".into()));
        b.add_constant(Constant::Number(1.5));
        b.add_constant(Constant::Bool(true));
        b.add_constant(Constant::Null);
        b.emit(Opcode::LoadConst, 0, msg as i16, 0);
        let jump = b.emit_jump(Opcode::Jump, 0, 0);
        b.emit(Opcode::Nop, 0, 0, 0);
        let target = b.emit(Opcode::Return, 0, 0, 0);
        b.patch_jump(jump, target);
        b.add_exception_range(0, 4, 6);
        b.build()
    }

    #[test]
    fn test_builder_emits_words() {
        let chunk = sample_chunk();
        assert_eq!(chunk.instruction_count(), 4);
        assert_eq!(chunk.register_count, 4);
        assert_eq!(chunk.param_count, 1);
    }

    #[test]
    fn test_patch_jump_delta() {
        let chunk = sample_chunk();
        let jump = chunk.instruction_at(2).unwrap();
        assert_eq!(jump.opcode, Opcode::Jump);
        // branch at pc 2 targeting pc 6 → delta 4
        assert_eq!(jump.a, 4);
    }

    #[test]
    fn test_handler_lookup() {
        let chunk = sample_chunk();
        assert_eq!(chunk.handler_for(0), Some(6));
        assert_eq!(chunk.handler_for(3), Some(6));
        assert_eq!(chunk.handler_for(4), None);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let chunk = sample_chunk();
        let bytes = chunk.to_bytes();
        let decoded = Chunk::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_header_layout() {
        let chunk = sample_chunk();
        let bytes = chunk.to_bytes();
        assert_eq!(&bytes[0..4], b"JSBC");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 1);
    }

    #[test]
    fn test_decode_rejects_bad_magic_and_version() {
        let chunk = sample_chunk();
        let mut bytes = chunk.to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            Chunk::from_bytes(&bytes),
            Err(ChunkDecodeError::BadMagic(_))
        ));

        let mut bytes = chunk.to_bytes();
        bytes[4] = 9;
        assert_eq!(Chunk::from_bytes(&bytes), Err(ChunkDecodeError::BadVersion(9)));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let chunk = sample_chunk();
        let bytes = chunk.to_bytes();
        assert_eq!(
            Chunk::from_bytes(&bytes[..bytes.len() - 4]),
            Err(ChunkDecodeError::Truncated)
        );
        assert_eq!(
            Chunk::from_bytes(&bytes[..bytes.len() - 3]),
            Err(ChunkDecodeError::Truncated)
        );
    }

    #[test]
    fn test_non_ascii_string_constant_roundtrip() {
        let mut b = ChunkBuilder::new(1);
        b.add_constant(Constant::String("héllo✓".into()));
        b.emit(Opcode::Return, 0, 0, 0);
        let chunk = b.build();
        let decoded = Chunk::from_bytes(&chunk.to_bytes()).unwrap();
        assert_eq!(decoded.constants, chunk.constants);
    }
}
