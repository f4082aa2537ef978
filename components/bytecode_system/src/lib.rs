//! Bytecode definitions shared by the interpreter and the JIT.

mod chunk;
mod instruction;
mod opcode;

pub use chunk::{
    Chunk, ChunkBuilder, ChunkDecodeError, Constant, ExceptionEntry, CHUNK_MAGIC, CHUNK_VERSION,
};
pub use instruction::{Instruction, WORDS_PER_INSTRUCTION};
pub use opcode::{Opcode, OPCODE_COUNT};
