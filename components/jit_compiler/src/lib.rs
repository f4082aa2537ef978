//! Template JIT.
//!
//! Compiles bytecode chunks to native x86-64 code that reads and writes
//! the interpreter's register file. Slow paths call back into the VM
//! through a caller-installed stub table; a chunk whose opcodes fall
//! outside the template set is rejected and stays interpreted.

mod assembler;
mod code_buffer;
mod compiler;
mod stubs;
mod type_record;

pub use assembler::{AsmError, Assembler, Cond, LocalLabelScope, Reg, Xmm};
pub use code_buffer::{ExecutableCode, JitEntry};
pub use compiler::{compile_chunk, CompiledCode, JitError};
pub use stubs::{offsets, BinaryStub, JitInvocation, StubTable, UnaryStub};
pub use type_record::{TypeEntry, TypeKind, TypeRecord};

/// True when this build can generate and execute native code.
pub fn jit_supported() -> bool {
    cfg!(all(unix, target_arch = "x86_64"))
}
