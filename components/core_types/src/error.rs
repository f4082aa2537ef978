//! Error types for the two failure layers.
//!
//! Engine errors (out of memory, invalid bytecode, internal invariants)
//! abort the current activation and surface to the embedder as
//! [`EngineError`]. Script errors are first-class values that unwind through
//! exception tables; [`JsError`] is their engine-side carrier.

use crate::Value;
use std::fmt;
use thiserror::Error;

/// The kind of a script-level error.
///
/// These correspond to the standard error constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    TypeError,
    ReferenceError,
    SyntaxError,
    RangeError,
    URIError,
    EvalError,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::URIError => "URIError",
            ErrorKind::EvalError => "EvalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A script error in flight.
///
/// Carries either a kind + message pair (errors raised by the engine) or an
/// arbitrary thrown value (`throw expr` in script).
#[derive(Debug, Clone, PartialEq)]
pub struct JsError {
    pub kind: ErrorKind,
    pub message: String,
    /// The thrown value, when the error originated from a `throw` of a
    /// non-engine value. The unwinder delivers this to the handler.
    pub thrown: Option<Value>,
}

impl JsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        JsError {
            kind,
            message: message.into(),
            thrown: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        JsError::new(ErrorKind::TypeError, message)
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        JsError::new(ErrorKind::ReferenceError, message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        JsError::new(ErrorKind::RangeError, message)
    }

    pub fn syntax_error(message: impl Into<String>) -> Self {
        JsError::new(ErrorKind::SyntaxError, message)
    }

    /// Wrap a value thrown from script.
    pub fn thrown(value: Value) -> Self {
        JsError {
            kind: ErrorKind::Error,
            message: String::new(),
            thrown: Some(value),
        }
    }
}

impl fmt::Display for JsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// An engine-level failure. These never unwind as script exceptions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("stack overflow")]
    StackOverflow,
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
    #[error("native code generation is not available on this target")]
    JitUnavailable,
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::Error.name(), "Error");
        assert_eq!(ErrorKind::TypeError.name(), "TypeError");
        assert_eq!(ErrorKind::ReferenceError.name(), "ReferenceError");
        assert_eq!(ErrorKind::RangeError.name(), "RangeError");
        assert_eq!(ErrorKind::SyntaxError.name(), "SyntaxError");
        assert_eq!(ErrorKind::URIError.name(), "URIError");
        assert_eq!(ErrorKind::EvalError.name(), "EvalError");
    }

    #[test]
    fn test_display_with_and_without_message() {
        assert_eq!(JsError::type_error("not callable").to_string(), "TypeError: not callable");
        assert_eq!(JsError::new(ErrorKind::Error, "").to_string(), "Error");
    }

    #[test]
    fn test_thrown_value_carried() {
        let err = JsError::thrown(Value::from_i32(3));
        assert_eq!(err.thrown, Some(Value::from_i32(3)));
    }

    #[test]
    fn test_engine_error_display() {
        assert_eq!(EngineError::OutOfMemory.to_string(), "out of memory");
        assert_eq!(
            EngineError::InvalidBytecode("bad magic".into()).to_string(),
            "invalid bytecode: bad magic"
        );
    }
}
