//! Regular-expression engine: parser, range builder, bytecode compiler and
//! backtracking VM.
//!
//! The pipeline is `parse` → `compile` → `RegexProgram::{match_at,search}`.
//! Inputs and capture offsets are UTF-16 code units throughout.

mod compiler;
mod flags;
mod parser;
mod range_builder;
mod vm;

pub use compiler::{compile, ReOp, RegexProgram};
pub use flags::RegexFlags;
pub use parser::{
    parse, Alternative, Disjunction, ParsedPattern, RegexError, Term, MAX_PATTERN_SIZE,
    QUANT_INFINITY,
};
pub use range_builder::{
    canonicalize, invert_ranges, is_line_terminator, is_word_unit, ranges_contain, CharRange,
    RangeBuilder,
};
pub use vm::Captures;

/// Parse and compile in one step.
pub fn compile_pattern(source: &[u16], flags: RegexFlags) -> Result<RegexProgram, RegexError> {
    Ok(compile(&parse(source, flags)?, flags))
}
