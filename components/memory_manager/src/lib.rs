//! Heap, string model and object system.
//!
//! Everything the collector manages lives here: the block allocator and
//! mark-sweep collector, rope strings with lazy flattening, and the
//! shape-based object model with ES5 descriptor semantics.

mod block;
mod builder;
mod cell;
mod heap;
mod hidden_class;
mod object;
mod string;

pub use builder::StringBuilder;
pub use cell::{CellHeader, CellKind, CellRef, EnvHandle, Trace, Tracer};
pub use heap::{GcStats, Heap, PropertyLookup, PutOutcome};
pub use hidden_class::{PropertyAttributes, Shape, ShapeRegistry};
pub use object::{
    ClassTag, FunctionData, FunctionKind, JsEnvironment, JsObject, OwnProperty,
    PropertyDescriptor, PropertySlot,
};
pub use string::{Fiber, StringCell};
