//! Host-object algorithms.
//!
//! Everything here is pure over code units and parsed regexes; the
//! interpreter's engine layer does the heap plumbing and argument
//! coercion, then calls in.

pub mod error;
pub mod language_tag;
pub mod string;

pub use error::{default_name, error_to_string};
pub use language_tag::{scan as scan_language_tag, Grandfathered, LanguageTag};
pub use string::{
    char_at, char_code_at, concat, default_locale_hook, get_substitution, index_of,
    last_index_of, repeat, replace_regex, replace_regex_with, replace_string, slice,
    split_with_regex, substr, substring, to_lower_case, to_upper_case, trim, CaseMapping,
    LocaleCaseHook,
};
