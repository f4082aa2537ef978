//! The execution runtime: register VM, inline caches, runtime library and
//! the embedding engine.

mod call_frame;
mod context;
mod dispatch;
mod engine;
mod inline_cache;
mod jit_bridge;
mod operations;
mod runtime;

pub use call_frame::CallFrame;
pub use context::{Context, Intrinsics, LoadedFunction, NativeFn, RegexData};
pub use dispatch::{ExecError, Vm, VmResult};
pub use engine::Engine;
pub use inline_cache::{InlineCache, ShapeId};
pub use operations::{string_to_number, Hint};
