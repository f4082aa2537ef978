//! Shared helpers for the end-to-end tests.

use bytecode_system::{Chunk, ChunkBuilder, Opcode};
use core_types::Value;
use interpreter::Engine;

/// `fn(a, b) { return a <op> b }`.
pub fn binary_function(op: Opcode) -> Chunk {
    let mut b = ChunkBuilder::with_params(3, 2);
    b.emit(op, 2, 0, 1);
    b.emit(Opcode::Return, 2, 0, 0);
    b.build()
}

/// Run a chunk twice: once interpreted, once with the JIT forced on the
/// first call. Returns both results for equivalence checks.
pub fn run_both_ways(chunk: Chunk, args: &[Value]) -> (Value, Value) {
    let mut interpreted = Engine::new().unwrap();
    interpreted.set_jit_enabled(false);
    let f = interpreted.load_chunk(chunk.clone()).unwrap();
    let interp_result = interpreted.call(f, args).unwrap();

    let mut jitted = Engine::new().unwrap();
    jitted.set_jit_threshold(1);
    let f = jitted.load_chunk(chunk).unwrap();
    let jit_result = jitted.call(f, args).unwrap();

    (interp_result, jit_result)
}
