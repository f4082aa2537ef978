//! Error object behaviour.
//!
//! The engine materializes script errors as objects with `name` and
//! `message` data properties; the formatting rules here implement
//! `Error.prototype.toString`.

use core_types::ErrorKind;

/// `Error.prototype.toString`: `name + ": " + message`, with an empty name
/// yielding the message alone and vice versa.
pub fn error_to_string(name: &str, message: &str) -> String {
    if name.is_empty() {
        return message.to_string();
    }
    if message.is_empty() {
        return name.to_string();
    }
    format!("{}: {}", name, message)
}

/// Default `name` for an error kind, used when the property is absent.
pub fn default_name(kind: ErrorKind) -> &'static str {
    kind.name()
}
