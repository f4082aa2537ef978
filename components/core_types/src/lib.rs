//! Core types shared across the runtime components.
//!
//! This crate has no dependency on the heap or the interpreter; it defines
//! the NaN-boxed value word, interned property keys, and the two error
//! layers, so every other component can agree on them.

mod error;
mod symbol;
mod value;

pub use error::{EngineError, ErrorKind, JsError};
pub use symbol::{DefaultSymbols, NameId, Symbol, SymbolTable};
pub use value::{
    double_to_int32, double_to_uint32, number_to_string, ObjectHandle, StringHandle, Value,
    CANONICAL_NAN_BITS, INT32_TAG_BITS, INT32_TAG_SHIFTED,
};

/// Convenience alias for fallible script-level operations.
pub type JsResult<T> = Result<T, JsError>;
